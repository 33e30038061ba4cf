//! Branch Sync State Machine: `PrepareBranch`.

use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::Oid;
use git2::Repository;

use crate::auth::AuthMethod;
use crate::error::EngineError;
use crate::local_repo;
use crate::model::BranchInfo;
use crate::model::PullReport;
use crate::smart_fetch::smart_fetch;

const ZERO_HASH: &str = "0000000000000000000000000000000000000000";

/// Opens or initializes the clone at `local_path`, runs Smart Fetch, and
/// brings the worktree to the correct state for `target_branch`.
///
/// # Errors
/// - The local clone cannot be opened, initialized, or repaired.
/// - The `origin` remote cannot be created or updated.
/// - Smart Fetch fails (network, protocol).
/// - The checkout/reset or unborn-HEAD transition fails.
pub fn prepare_branch(
    repo_url: &str,
    local_path: &Path,
    target_branch: &str,
    auth: &AuthMethod,
) -> Result<PullReport, EngineError> {
    let repo = local_repo::open_or_init(local_path)?;
    let mut remote = local_repo::ensure_origin(&repo, repo_url)?;

    let current_hash = resolve_head_hash(&repo).unwrap_or_else(|| ZERO_HASH.to_string());

    let outcome = smart_fetch(&mut remote, target_branch, auth)?;
    drop(remote);

    if let Some(default_short) = &outcome.default_short {
        repo.reference_symbolic(
            "refs/remotes/origin/HEAD",
            &format!("refs/remotes/origin/{default_short}"),
            true,
            "smart fetch: update origin/HEAD",
        )
        .map_err(|e| EngineError::git("updating refs/remotes/origin/HEAD", e))?;
    }

    match &outcome.adopted_short {
        Some(adopted_short) => {
            let new_hash = checkout_and_hard_reset(&repo, adopted_short)?;
            Ok(PullReport {
                exists_on_remote: outcome.target_exists,
                incoming_changes: new_hash != current_hash,
                head: BranchInfo::at(target_branch, new_hash),
            })
        }
        None => {
            let was_unborn_transition = make_head_unborn(&repo, target_branch)?;
            Ok(PullReport {
                exists_on_remote: false,
                incoming_changes: current_hash != ZERO_HASH || was_unborn_transition,
                head: BranchInfo::unborn(target_branch),
            })
        }
    }
}

fn resolve_head_hash(repo: &Repository) -> Option<String> {
    repo.head().ok()?.target().map(|oid| oid.to_string())
}

/// Checkout-and-hard-reset to `refs/remotes/origin/<adopted_short>`.
fn checkout_and_hard_reset(repo: &Repository, adopted_short: &str) -> Result<String, EngineError> {
    let remote_ref_name = format!("refs/remotes/origin/{adopted_short}");
    let target_oid = repo
        .refname_to_id(&remote_ref_name)
        .map_err(|e| EngineError::git(format!("resolving {remote_ref_name}"), e))?;

    let local_ref_name = format!("refs/heads/{adopted_short}");
    match repo.find_reference(&local_ref_name) {
        Ok(mut reference) => {
            reference
                .set_target(target_oid, "sync: fast-forward local branch")
                .map_err(|e| EngineError::git(format!("updating {local_ref_name}"), e))?;
        }
        Err(_) => {
            repo.reference(&local_ref_name, target_oid, true, "sync: create local branch")
                .map_err(|e| EngineError::git(format!("creating {local_ref_name}"), e))?;
        }
    }

    repo.set_head(&local_ref_name)
        .map_err(|e| EngineError::git(format!("setting HEAD to {local_ref_name}"), e))?;

    let object = repo
        .find_object(target_oid, None)
        .map_err(|e| EngineError::git("resolving checkout target object", e))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.reset(&object, git2::ResetType::Hard, Some(&mut checkout))
        .map_err(|e| EngineError::git("hard-resetting worktree", e))?;

    Ok(target_oid.to_string())
}

/// Makes HEAD unborn on `target_branch`, returns whether this was an
/// actual state transition (`true`) or a no-op re-affirmation (`false`).
fn make_head_unborn(repo: &Repository, target_branch: &str) -> Result<bool, EngineError> {
    let branch_ref_name = format!("refs/heads/{target_branch}");
    let was_already_unborn = matches!(repo.head(), Err(e) if e.code() == git2::ErrorCode::UnbornBranch);

    repo.set_head(&branch_ref_name)
        .map_err(|e| EngineError::git(format!("setting HEAD symbolic to {branch_ref_name}"), e))?;

    if let Ok(mut reference) = repo.find_reference(&branch_ref_name) {
        reference
            .delete()
            .map_err(|e| EngineError::git(format!("removing stale {branch_ref_name}"), e))?;
    }

    let mut index = repo.index().map_err(|e| EngineError::git("opening index", e))?;
    index.clear().map_err(|e| EngineError::git("clearing index", e))?;
    index
        .write()
        .map_err(|e| EngineError::git("writing cleared index", e))?;

    clean_worktree(repo)?;

    Ok(!was_already_unborn)
}

fn clean_worktree(repo: &Repository) -> Result<(), EngineError> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| EngineError::InvalidInput {
            reason: "repository has no worktree to clean".to_string(),
        })?
        .to_path_buf();

    for entry in std::fs::read_dir(&workdir).map_err(|e| EngineError::io(format!("reading {workdir:?}"), e))? {
        let entry = entry.map_err(|e| EngineError::io(format!("walking {workdir:?}"), e))?;
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|e| EngineError::io(format!("removing {path:?}"), e))?;
        } else {
            std::fs::remove_file(&path).map_err(|e| EngineError::io(format!("removing {path:?}"), e))?;
        }
    }
    Ok(())
}

/// The worker's "checkout -B" idiom: force-checkout `branch` if it exists
/// locally and hard-reset it to `base_hash`, else create it from `base_hash`.
///
/// # Errors
/// - `base_hash` does not resolve to an object in the local object database.
/// - The reference update or checkout fails.
pub fn checkout_dash_b(repo: &Repository, branch: &str, base_hash: &str) -> Result<(), EngineError> {
    let oid = Oid::from_str(base_hash).map_err(|e| EngineError::git(format!("parsing base hash {base_hash}"), e))?;
    let branch_ref_name = format!("refs/heads/{branch}");

    match repo.find_reference(&branch_ref_name) {
        Ok(mut reference) => {
            reference
                .set_target(oid, "checkout -B idiom: reset existing branch")
                .map_err(|e| EngineError::git(format!("resetting {branch_ref_name}"), e))?;
        }
        Err(_) => {
            repo.reference(&branch_ref_name, oid, true, "checkout -B idiom: create branch")
                .map_err(|e| EngineError::git(format!("creating {branch_ref_name}"), e))?;
        }
    }

    repo.set_head(&branch_ref_name)
        .map_err(|e| EngineError::git(format!("setting HEAD to {branch_ref_name}"), e))?;

    let object = repo
        .find_object(oid, None)
        .map_err(|e| EngineError::git("resolving checkout -B target object", e))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.reset(&object, git2::ResetType::Hard, Some(&mut checkout))
        .map_err(|e| EngineError::git("hard-resetting worktree for checkout -B", e))?;

    Ok(())
}
