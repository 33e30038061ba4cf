//! Local clone lifecycle: open-or-init, and keeping `origin` pointed at the
//! right URL. Grounded on the open/discover idiom of `ytil_git::repo` and
//! the remote lookup idiom of `ytil_git::remote`, generalized to also
//! create/repair a remote rather than only reading it.

use std::path::Path;

use git2::Repository;

use crate::error::EngineError;

/// Opens the repository at `local_path`, or initializes a fresh one if it
/// is missing or fails an integrity check.
pub fn open_or_init(local_path: &Path) -> Result<Repository, EngineError> {
    if let Some(parent) = local_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(format!("creating parent of {local_path:?}"), e))?;
    }

    match Repository::open(local_path) {
        Ok(repo) if integrity_ok(&repo) => Ok(repo),
        _ => reinit(local_path),
    }
}

fn integrity_ok(repo: &Repository) -> bool {
    // A minimal, cheap sanity check: the object database and HEAD
    // reference must both be readable. A corrupted `.git` directory
    // typically fails one of these outright.
    repo.odb().is_ok() && repo.head().is_ok() || repo.head_detached().is_ok()
}

fn reinit(local_path: &Path) -> Result<Repository, EngineError> {
    if local_path.exists() {
        std::fs::remove_dir_all(local_path).map_err(|e| EngineError::io(format!("wiping corrupt clone at {local_path:?}"), e))?;
    }
    std::fs::create_dir_all(local_path).map_err(|e| EngineError::io(format!("recreating {local_path:?}"), e))?;
    Repository::init(local_path).map_err(|e| EngineError::git(format!("reinitializing {local_path:?}"), e))
}

/// Ensures `origin` exists and points at `url`, recreating it if not.
pub fn ensure_origin<'repo>(repo: &'repo Repository, url: &str) -> Result<git2::Remote<'repo>, EngineError> {
    match repo.find_remote("origin") {
        Ok(remote) if remote.url() == Some(url) => Ok(remote),
        Ok(_) => {
            repo.remote_delete("origin")
                .map_err(|e| EngineError::git("deleting stale origin remote", e))?;
            repo.remote("origin", url)
                .map_err(|e| EngineError::git("recreating origin remote", e))
        }
        Err(_) => repo
            .remote("origin", url)
            .map_err(|e| EngineError::git("creating origin remote", e)),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn open_or_init_creates_fresh_repo_when_missing() {
        let dir = TempDir::new().unwrap();
        let local_path = dir.path().join("clone");

        let repo = open_or_init(&local_path).unwrap();
        assert!(!repo.is_bare());
    }

    #[test]
    fn open_or_init_reopens_existing_repo() {
        let dir = TempDir::new().unwrap();
        let local_path = dir.path().join("clone");
        open_or_init(&local_path).unwrap();

        let repo = open_or_init(&local_path).unwrap();
        assert!(repo.path().exists());
    }

    #[test]
    fn open_or_init_self_heals_corrupted_git_dir() {
        let dir = TempDir::new().unwrap();
        let local_path = dir.path().join("clone");
        open_or_init(&local_path).unwrap();

        // Corrupt the repo by truncating its object database directory into a file.
        std::fs::remove_dir_all(local_path.join(".git/objects")).unwrap();
        std::fs::write(local_path.join(".git/objects"), b"not a directory").unwrap();

        let repo = open_or_init(&local_path).unwrap();
        assert!(repo.path().exists());
    }

    #[test]
    fn ensure_origin_creates_when_absent() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let remote = ensure_origin(&repo, "https://example.com/repo.git").unwrap();
        assert_eq!(remote.url(), Some("https://example.com/repo.git"));
    }

    #[test]
    fn ensure_origin_recreates_on_url_mismatch() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://example.com/old.git").unwrap();

        let remote = ensure_origin(&repo, "https://example.com/new.git").unwrap();
        assert_eq!(remote.url(), Some("https://example.com/new.git"));
    }

    #[test]
    fn ensure_origin_reuses_matching_remote() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://example.com/repo.git").unwrap();

        let remote = ensure_origin(&repo, "https://example.com/repo.git").unwrap();
        assert_eq!(remote.url(), Some("https://example.com/repo.git"));
    }
}
