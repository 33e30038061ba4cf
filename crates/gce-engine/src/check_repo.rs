//! `CheckRepo`: lightweight remote connectivity probe. Never touches disk.

use git2::Direction;
use git2::Repository;

use crate::auth::AuthMethod;
use crate::error::EngineError;
use crate::model::BranchInfo;
use crate::model::RepoInfo;

/// Probes `repo_url` and reports its default branch and advertised branch
/// count, without creating or mutating any local clone.
///
/// # Errors
/// - The remote cannot be reached.
pub fn check_repo(repo_url: &str, auth: &AuthMethod) -> Result<RepoInfo, EngineError> {
    // `remote_anonymous` needs some repository to hang off of, but it never
    // touches that repository's object database or worktree; a throwaway
    // bare repo in a temp dir gives us a `Remote` handle without leaving
    // anything the caller cares about on disk.
    let scratch_dir = tempfile::tempdir().map_err(|e| EngineError::io("creating scratch dir for CheckRepo", e))?;
    let scratch =
        Repository::init_bare(scratch_dir.path()).map_err(|e| EngineError::git("opening scratch repository for CheckRepo", e))?;

    let mut remote = scratch
        .remote_anonymous(repo_url)
        .map_err(|e| EngineError::git(format!("creating anonymous remote for {repo_url}"), e))?;

    let heads = {
        let connection = remote
            .connect_auth(Direction::Fetch, Some(auth.remote_callbacks()), None)
            .map_err(|e| EngineError::git("connecting to remote for CheckRepo", e))?;
        connection
            .list()
            .map_err(|e| EngineError::git("listing remote refs for CheckRepo", e))?
            .iter()
            .map(|h| (h.name().to_string(), h.symref_target().map(str::to_string), h.oid().to_string()))
            .collect::<Vec<_>>()
    };

    if heads.is_empty() {
        return Ok(RepoInfo {
            default_branch: None,
            remote_branch_count: 0,
        });
    }

    let branch_heads: Vec<_> = heads
        .iter()
        .filter(|(name, _, _)| name.starts_with("refs/heads/"))
        .collect();

    let default_branch = heads.iter().find(|(name, _, _)| name == "HEAD").and_then(|(_, target, _)| {
        let target = target.as_ref()?;
        let (_, _, oid) = heads.iter().find(|(name, _, _)| name == target)?;
        let short = target.strip_prefix("refs/heads/")?;
        Some(BranchInfo::at(short, oid.clone()))
    });

    Ok(RepoInfo {
        default_branch,
        remote_branch_count: branch_heads.len(),
    })
}
