//! Repository-relative file path layout and prefix sanitization.

use crate::identifier::ResourceIdentifier;

/// Suffix applied to a resource's file name.
pub fn file_suffix(encrypt_secret: bool) -> &'static str {
    if encrypt_secret { ".sops.yaml" } else { ".yaml" }
}

/// Repository-relative path for `id`, honoring an optional sanitized prefix.
///
/// `prefix` is expected to already have passed through
/// [`sanitize_path_prefix`]; an empty prefix means no extra directory
/// component is inserted.
pub fn path_for(id: &ResourceIdentifier, encrypt_secret: bool, prefix: &str) -> String {
    let stem = id.path_stem();
    let file_name = format!("{}{}", id.name, file_suffix(encrypt_secret));
    // `stem` ends with `.../<name>`; replace the trailing name with the suffixed file name.
    let dir = stem
        .strip_suffix(id.name.as_str())
        .unwrap_or(&stem)
        .trim_end_matches('/');

    let mut parts = vec![];
    if !dir.is_empty() {
        parts.push(dir.to_string());
    }
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    parts.push(file_name);
    parts.join("/")
}

/// Sanitizes an event-level path prefix.
///
/// Rejects absolute paths, backslashes, `..` traversal, and `.`-only
/// segments; strips a trailing `/`. Any unsafe input collapses to an
/// empty string (no prefix applied) rather than erroring — this is a pure,
/// total function with no failure mode.
pub fn sanitize_path_prefix(prefix: &str) -> String {
    if prefix.starts_with('/') || prefix.contains('\\') {
        return String::new();
    }

    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment == "." || segment == ".." || segment.chars().all(|c| c == '.') {
            return String::new();
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        return String::new();
    }

    segments.join("/")
}

/// Commit message for an event: `"[<OP>] <identifier-string> by user/<username>"`.
pub fn message_for(operation: &str, identifier: &ResourceIdentifier, username: &str) -> String {
    format!("[{operation}] {identifier} by user/{username}")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn pod() -> ResourceIdentifier {
        ResourceIdentifier {
            group: String::new(),
            version: "v1".into(),
            resource: "pods".into(),
            namespace: "default".into(),
            name: "test-pod".into(),
        }
    }

    #[test]
    fn path_for_namespaced_plain() {
        assert_eq!(path_for(&pod(), false, ""), "v1/pods/default/test-pod.yaml");
    }

    #[test]
    fn path_for_secret_uses_sops_suffix() {
        assert_eq!(path_for(&pod(), true, ""), "v1/pods/default/test-pod.sops.yaml");
    }

    #[test]
    fn path_for_with_prefix() {
        assert_eq!(
            path_for(&pod(), false, "cluster-a"),
            "v1/pods/default/cluster-a/test-pod.yaml"
        );
    }

    #[test]
    fn path_for_cluster_scoped() {
        let mut id = pod();
        id.namespace = String::new();
        id.name = "worker-1".into();
        id.resource = "nodes".into();
        assert_eq!(path_for(&id, false, ""), "v1/nodes/worker-1.yaml");
    }

    #[rstest]
    #[case::already_clean("cluster-a/zone-1", "cluster-a/zone-1")]
    #[case::trailing_slash_trimmed("cluster-a/", "cluster-a")]
    #[case::absolute_rejected("/etc/passwd", "")]
    #[case::absolute_with_trailing_slash_rejected("/cluster-a/", "")]
    #[case::backslash_rejected("cluster\\a", "")]
    #[case::dotdot_rejected("cluster-a/../etc", "")]
    #[case::dot_only_segment_rejected("./cluster-a", "")]
    #[case::empty_stays_empty("", "")]
    #[case::only_slashes("///", "")]
    fn sanitize_path_prefix_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_path_prefix(input), expected);
    }

    #[test]
    fn message_for_formats_operation_identifier_and_user() {
        assert_eq!(
            message_for("CREATE", &pod(), "alice"),
            "[CREATE] v1/pods/default/test-pod by user/alice"
        );
    }
}
