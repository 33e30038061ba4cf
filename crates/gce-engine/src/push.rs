//! Atomic Pusher: one receive-pack session, one ref update, guarded by an
//! expected old-hash check repeated right up to negotiation time to close
//! the race between the ref-advertisement read and the actual push.

use std::cell::RefCell;
use std::collections::HashMap;

use git2::Direction;
use git2::PushOptions;
use git2::RemoteCallbacks;
use git2::Repository;

use crate::auth::AuthMethod;
use crate::error::EngineError;

const ZERO_HASH: &str = "0000000000000000000000000000000000000000";

/// Pushes the current tip of the local branch under `HEAD` to `root_branch`
/// on `origin`, asserting that `root_branch`'s remote tip still equals
/// `root_hash` (the tip the caller's commits were generated against).
///
/// # Errors
/// - `root_branch` is not a plain branch short name (`EngineError::InvalidInput`).
/// - `root_branch` vanished from the remote while `root_hash` was non-zero
///   (`EngineError::RemoteWentMissing`).
/// - The remote advanced past `root_hash` (`EngineError::RemoteReceivedUnknownUpdates`).
/// - The remote rejected the update (`EngineError::PushRejected`).
/// - Any other Git plumbing or network failure.
pub fn push_atomic(repo: &Repository, root_hash: &str, root_branch: &str, auth: &AuthMethod) -> Result<String, EngineError> {
    if root_branch.is_empty() || root_branch == "HEAD" || root_branch.contains('/') {
        return Err(EngineError::InvalidInput {
            reason: format!("root_branch must be a plain branch short name, got {root_branch:?}"),
        });
    }

    let local_branch_ref = current_branch_ref_name(repo)?;
    let local_hash = repo
        .refname_to_id(&local_branch_ref)
        .map_err(|e| EngineError::git(format!("resolving {local_branch_ref}"), e))?
        .to_string();

    let root_branch_ref = format!("refs/heads/{root_branch}");

    let mut remote = repo
        .find_remote("origin")
        .map_err(|e| EngineError::git("finding origin remote", e))?;

    let advertised = read_advertised_refs(&mut remote, auth)?;
    let remote_hash = advertised.get(local_branch_ref.as_str()).cloned();
    let current_root_hash = advertised.get(root_branch_ref.as_str()).cloned();

    if current_root_hash.is_none() && root_hash != ZERO_HASH {
        return Err(EngineError::RemoteWentMissing {
            branch: root_branch.to_string(),
            expected_root: root_hash.to_string(),
        });
    }

    if let Some(remote_hash) = &remote_hash {
        if *remote_hash == local_hash {
            return Ok(local_hash);
        }
        let current_root_hash = current_root_hash.unwrap_or_else(|| ZERO_HASH.to_string());
        if root_hash != current_root_hash {
            return Err(EngineError::RemoteReceivedUnknownUpdates {
                branch: root_branch.to_string(),
                expected_root: root_hash.to_string(),
                current_root: current_root_hash,
            });
        }
    }

    let old_hash = remote_hash.unwrap_or_else(|| ZERO_HASH.to_string());
    let expected_old = old_hash.clone();
    let rejection: RefCell<Option<(String, String)>> = RefCell::new(None);
    let negotiation_ok = RefCell::new(true);

    let mut callbacks = auth.remote_callbacks();
    install_guard_callbacks(&mut callbacks, &local_branch_ref, &expected_old, &rejection, &negotiation_ok);

    let mut push_options = PushOptions::new();
    push_options.remote_callbacks(callbacks);

    let push_result = remote.push(&[local_branch_ref.as_str()], Some(&mut push_options));

    if !*negotiation_ok.borrow() {
        return Err(EngineError::RemoteReceivedUnknownUpdates {
            branch: root_branch.to_string(),
            expected_root: expected_old,
            current_root: "advanced-at-negotiation".to_string(),
        });
    }

    push_result.map_err(|e| EngineError::git(format!("pushing {local_branch_ref}"), e))?;

    if let Some((reference, reason)) = rejection.into_inner() {
        return Err(EngineError::PushRejected { reference, reason });
    }

    Ok(local_hash)
}

fn current_branch_ref_name(repo: &Repository) -> Result<String, EngineError> {
    let head_ref = repo.find_reference("HEAD").map_err(|e| EngineError::git("resolving HEAD", e))?;
    head_ref.symbolic_target().map(ToString::to_string).ok_or_else(|| EngineError::InvalidInput {
        reason: "HEAD does not point at a branch".to_string(),
    })
}

fn read_advertised_refs(remote: &mut git2::Remote<'_>, auth: &AuthMethod) -> Result<HashMap<String, String>, EngineError> {
    let connection = remote
        .connect_auth(Direction::Push, Some(auth.remote_callbacks()), None)
        .map_err(|e| EngineError::git("connecting to remote for push advertisement", e))?;
    let heads = connection
        .list()
        .map_err(|e| EngineError::git("listing remote refs before push", e))?;
    Ok(heads.iter().map(|h| (h.name().to_string(), h.oid().to_string())).collect())
}

/// Wires `push_negotiation` (the last check before the packfile is sent,
/// catching a remote advance that happened after `read_advertised_refs`)
/// and `push_update_reference` (captures a per-command rejection reason).
fn install_guard_callbacks<'cb>(
    callbacks: &mut RemoteCallbacks<'cb>,
    local_branch_ref: &'cb str,
    expected_old: &'cb str,
    rejection: &'cb RefCell<Option<(String, String)>>,
    negotiation_ok: &'cb RefCell<bool>,
) {
    callbacks.push_negotiation(move |updates| {
        for update in updates {
            if update.dst_refname() == Some(local_branch_ref) && update.src().to_string() != expected_old {
                *negotiation_ok.borrow_mut() = false;
                return Err(git2::Error::from_str("expected root hash moved before push negotiation"));
            }
        }
        Ok(())
    });

    callbacks.push_update_reference(move |refname, status| {
        if let Some(reason) = status {
            *rejection.borrow_mut() = Some((refname.to_string(), reason.to_string()));
        }
        Ok(())
    });
}
