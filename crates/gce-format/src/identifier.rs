//! Stable identity and path layout for a single Kubernetes-shaped resource.

use std::fmt;

/// Fingerprint of a resource: `(group, version, resource, namespace, name)`.
///
/// `group` is empty for the core API group. `namespace` is empty for
/// cluster-scoped resources.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentifier {
    /// Canonical string form: `[group/]version/resource/[namespace/]name`.
    pub fn canonical_string(&self) -> String {
        join_segments(&[
            non_empty(&self.group),
            Some(self.version.as_str()),
            Some(self.resource.as_str()),
            non_empty(&self.namespace),
            Some(self.name.as_str()),
        ])
    }

    /// Repository-relative file path, without suffix.
    ///
    /// Callers append `.yaml` or `.sops.yaml` via [`crate::path::file_suffix`].
    pub fn path_stem(&self) -> String {
        self.canonical_string()
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn join_segments(segments: &[Option<&str>]) -> String {
    segments.iter().flatten().copied().collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn id(group: &str, version: &str, resource: &str, namespace: &str, name: &str) -> ResourceIdentifier {
        ResourceIdentifier {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[rstest]
    #[case::core_namespaced(id("", "v1", "pods", "default", "test-pod"), "v1/pods/default/test-pod")]
    #[case::core_cluster_scoped(id("", "v1", "nodes", "", "worker-1"), "v1/nodes/worker-1")]
    #[case::grouped_namespaced(
        id("apps", "v1", "deployments", "kube-system", "coredns"),
        "apps/v1/deployments/kube-system/coredns"
    )]
    #[case::grouped_cluster_scoped(
        id("rbac.authorization.k8s.io", "v1", "clusterroles", "", "admin"),
        "rbac.authorization.k8s.io/v1/clusterroles/admin"
    )]
    fn canonical_string_cases(#[case] id: ResourceIdentifier, #[case] expected: &str) {
        assert_eq!(id.canonical_string(), expected);
    }
}
