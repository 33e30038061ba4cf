//! Commit Generator. Walks a batch of events in order, applies
//! create/update/delete to the worktree, and produces one commit per
//! materially-changed event, suppressing no-op writes.

use std::path::Path;
use std::path::PathBuf;

use gce_crypto::EncryptionGate;
use gce_crypto::ResourceMeta;
use gce_format::canonicalize;
use gce_format::message_for;
use gce_format::path_for;
use gce_format::sanitize_path_prefix;
use git2::Repository;
use git2::Signature;

use crate::error::EngineError;
use crate::model::Event;
use crate::model::Operation;

const COMMIT_AUTHOR_NAME: &str = "GitOps Reverser";
const COMMIT_AUTHOR_EMAIL: &str = "gitops-reverser@configbutler.ai";

/// Applies `events` to the worktree at `repo`'s HEAD, one commit per
/// materially-changed event. Returns the hashes of the commits created, in
/// order.
///
/// # Errors
/// - A secret resource has no encryptor configured, or encryption fails;
///   either way the whole batch aborts, no partial write.
/// - Filesystem I/O or Git plumbing fails while materializing a change.
pub fn generate_commits(repo: &Repository, gate: &EncryptionGate, events: &[Event]) -> Result<Vec<String>, EngineError> {
    let workdir = repo.workdir().ok_or_else(|| EngineError::InvalidInput {
        reason: "repository has no worktree".to_string(),
    })?;

    let mut commits = Vec::new();
    for event in events {
        if event.operation.is_control() {
            continue;
        }

        let prefix = event.path_prefix.as_deref().map(sanitize_path_prefix).unwrap_or_default();
        let relative_path = path_for(&event.identifier, event.is_secret, &prefix);
        let absolute_path = workdir.join(&relative_path);

        let changed = match event.operation {
            Operation::Delete => apply_delete(repo, &absolute_path, &relative_path)?,
            Operation::Create | Operation::Update => apply_write(repo, gate, event, &absolute_path, &relative_path)?,
            Operation::Control(_) => unreachable!("control events are skipped above"),
        };

        if changed {
            let message = message_for(&event.operation.to_string(), &event.identifier, &event.user_info.username);
            let commit_hash = commit_worktree(repo, &message)?;
            commits.push(commit_hash);
        }
    }

    Ok(commits)
}

fn apply_delete(repo: &Repository, absolute_path: &Path, relative_path: &str) -> Result<bool, EngineError> {
    if !absolute_path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(absolute_path).map_err(|e| EngineError::io(format!("removing {absolute_path:?}"), e))?;

    let mut index = repo.index().map_err(|e| EngineError::git("opening index", e))?;
    index
        .remove_path(Path::new(relative_path))
        .map_err(|e| EngineError::git(format!("staging deletion of {relative_path}"), e))?;
    index.write().map_err(|e| EngineError::git("writing index", e))?;
    Ok(true)
}

fn apply_write(
    repo: &Repository,
    gate: &EncryptionGate,
    event: &Event,
    absolute_path: &Path,
    relative_path: &str,
) -> Result<bool, EngineError> {
    let object = event.object.as_ref().ok_or_else(|| EngineError::InvalidInput {
        reason: format!("{}/{} has no object to write", event.target_namespace, event.target_name),
    })?;
    let canonical = canonicalize(object).map_err(|e| EngineError::InvalidInput {
        reason: format!("canonicalizing {relative_path}: {e}"),
    })?;

    let contents = if event.is_secret {
        let meta = ResourceMeta {
            identifier: event.identifier.clone(),
            uid: event.uid.clone(),
            resource_version: event.resource_version.clone(),
            generation: event.generation,
        };
        gate.encrypt_for_write(&canonical, &meta)?
    } else {
        canonical
    };

    if let Ok(existing) = std::fs::read(absolute_path) {
        if existing == contents {
            return Ok(false);
        }
    }

    write_file(absolute_path, &contents)?;

    let mut index = repo.index().map_err(|e| EngineError::git("opening index", e))?;
    index
        .add_path(Path::new(relative_path))
        .map_err(|e| EngineError::git(format!("staging {relative_path}"), e))?;
    index.write().map_err(|e| EngineError::git("writing index", e))?;
    Ok(true)
}

fn write_file(absolute_path: &Path, contents: &[u8]) -> Result<(), EngineError> {
    if let Some(parent) = absolute_path.parent() {
        create_dir_with_mode(parent)?;
    }
    std::fs::write(absolute_path, contents).map_err(|e| EngineError::io(format!("writing {absolute_path:?}"), e))?;
    set_mode(absolute_path, 0o600)?;
    Ok(())
}

#[cfg(unix)]
fn create_dir_with_mode(dir: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::DirBuilderExt;
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o750);
    builder.create(dir).map_err(|e| EngineError::io(format!("creating {dir:?}"), e))
}

#[cfg(not(unix))]
fn create_dir_with_mode(dir: &Path) -> Result<(), EngineError> {
    std::fs::create_dir_all(dir).map_err(|e| EngineError::io(format!("creating {dir:?}"), e))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms).map_err(|e| EngineError::io(format!("setting mode on {path:?}"), e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), EngineError> {
    Ok(())
}

fn commit_worktree(repo: &Repository, message: &str) -> Result<String, EngineError> {
    let mut index = repo.index().map_err(|e| EngineError::git("opening index", e))?;
    let tree_id = index.write_tree().map_err(|e| EngineError::git("writing tree", e))?;
    let tree = repo.find_tree(tree_id).map_err(|e| EngineError::git("finding written tree", e))?;

    let signature =
        Signature::now(COMMIT_AUTHOR_NAME, COMMIT_AUTHOR_EMAIL).map_err(|e| EngineError::git("building commit signature", e))?;

    let parent = repo.head().ok().and_then(|head| head.target()).and_then(|oid| repo.find_commit(oid).ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let head_ref_name = current_branch_ref_name(repo)?;
    let commit_oid = repo
        .commit(Some(&head_ref_name), &signature, &signature, message, &tree, &parents)
        .map_err(|e| EngineError::git("creating commit", e))?;

    Ok(commit_oid.to_string())
}

/// `repo.head()` fails outright on an unborn branch, which is exactly the
/// state `PrepareBranch` may have left HEAD in; read HEAD's symbolic
/// target directly instead of requiring it to resolve to an object.
fn current_branch_ref_name(repo: &Repository) -> Result<String, EngineError> {
    let head_ref = repo
        .find_reference("HEAD")
        .map_err(|e| EngineError::git("resolving HEAD reference", e))?;
    head_ref
        .symbolic_target()
        .map(ToString::to_string)
        .ok_or_else(|| EngineError::LocalCorruption {
            path: "HEAD".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use assert2::let_assert;
    use gce_format::ResourceIdentifier;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_yaml::Value;
    use tempfile::TempDir;

    use super::*;
    use crate::model::UserInfo;

    fn make_event(op: Operation, name: &str, yaml: &str) -> Event {
        Event {
            object: Some(serde_yaml::from_str::<Value>(yaml).unwrap()),
            identifier: ResourceIdentifier {
                group: String::new(),
                version: "v1".to_string(),
                resource: "configmaps".to_string(),
                namespace: "default".to_string(),
                name: name.to_string(),
            },
            operation: op,
            user_info: UserInfo {
                username: "alice".to_string(),
                uid: "u-1".to_string(),
            },
            path_prefix: None,
            target_name: name.to_string(),
            target_namespace: "default".to_string(),
            is_secret: false,
            uid: "u-1".to_string(),
            resource_version: "1".to_string(),
            generation: 1,
        }
    }

    fn init_repo(dir: &TempDir) -> Repository {
        Repository::init(dir.path()).unwrap()
    }

    #[test]
    fn first_create_produces_a_root_commit() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        repo.set_head("refs/heads/main").unwrap();
        let gate = EncryptionGate::new(None);

        let events = vec![make_event(Operation::Create, "cm-a", "data:\n  key: value\n")];
        let commits = generate_commits(&repo, &gate, &events).unwrap();
        assert_eq!(commits.len(), 1);

        let commit = repo.find_commit(git2::Oid::from_str(&commits[0]).unwrap()).unwrap();
        assert_eq!(commit.parent_count(), 0);
        assert_eq!(commit.author().name(), Some(COMMIT_AUTHOR_NAME));
    }

    #[test]
    fn identical_update_is_suppressed() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        repo.set_head("refs/heads/main").unwrap();
        let gate = EncryptionGate::new(None);

        let event = make_event(Operation::Create, "cm-a", "data:\n  key: value\n");
        generate_commits(&repo, &gate, &[event.clone()]).unwrap();

        let commits = generate_commits(&repo, &gate, &[event]).unwrap();
        assert!(commits.is_empty());
    }

    #[test]
    fn delete_of_absent_file_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        repo.set_head("refs/heads/main").unwrap();
        let gate = EncryptionGate::new(None);

        let events = vec![make_event(Operation::Delete, "cm-missing", "")];
        let commits = generate_commits(&repo, &gate, &events).unwrap();
        assert!(commits.is_empty());
    }

    #[test]
    fn delete_after_create_removes_file_and_commits() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        repo.set_head("refs/heads/main").unwrap();
        let gate = EncryptionGate::new(None);

        let create = make_event(Operation::Create, "cm-a", "data:\n  key: value\n");
        let delete = make_event(Operation::Delete, "cm-a", "");
        let commits = generate_commits(&repo, &gate, &[create, delete]).unwrap();
        assert_eq!(commits.len(), 2);

        let path = dir.path().join("v1/configmaps/default/cm-a.yaml");
        assert!(!path.exists());
    }

    #[rstest]
    #[case::resync("resync")]
    #[case::rebuild("rebuild")]
    fn control_events_are_skipped(#[case] control_kind: &str) {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        repo.set_head("refs/heads/main").unwrap();
        let gate = EncryptionGate::new(None);

        let event = make_event(Operation::Control(control_kind.to_string()), "cm-a", "");
        let commits = generate_commits(&repo, &gate, &[event]).unwrap();
        assert!(commits.is_empty());
    }

    #[test]
    fn secret_without_encryptor_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        repo.set_head("refs/heads/main").unwrap();
        let gate = EncryptionGate::new(None);

        let mut event = make_event(Operation::Create, "secret-a", "data:\n  password: hunter2\n");
        event.is_secret = true;
        let result = generate_commits(&repo, &gate, &[event]);
        let_assert!(Err(EngineError::EncryptorMissing { .. }) = result);
    }
}
