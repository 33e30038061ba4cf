//! Smart Fetch: a single ref-advertisement pass followed by a minimal,
//! depth-1 fetch.

use std::collections::HashSet;

use git2::Direction;
use git2::FetchOptions;
use git2::FetchPrune;
use git2::Remote;

use crate::auth::AuthMethod;
use crate::error::EngineError;

/// Outcome of a Smart Fetch pass.
#[derive(Clone, Debug, Default)]
pub struct SmartFetchOutcome {
    /// Local reference short name the worker should adopt, if any.
    pub adopted_short: Option<String>,
    /// Whether the caller's target branch was present on the remote.
    pub target_exists: bool,
    /// The remote's default branch short name, if it could be determined.
    pub default_short: Option<String>,
}

/// Runs the Smart Fetch pass against `remote` for `target_branch`.
///
/// Does not touch `refs/remotes/origin/HEAD`; the caller updates that
/// symref from [`SmartFetchOutcome::default_short`] once it has a
/// repository handle (see `sync::prepare_branch`).
///
/// # Errors
/// - The remote cannot be reached or the fetch itself fails.
pub fn smart_fetch(
    remote: &mut Remote<'_>,
    target_branch: &str,
    auth: &AuthMethod,
) -> Result<SmartFetchOutcome, EngineError> {
    let target_full = format!("refs/heads/{target_branch}");

    let advertised = {
        let connection = remote
            .connect_auth(Direction::Fetch, Some(auth.remote_callbacks()), None)
            .map_err(|e| EngineError::git("connecting to remote for ls-refs", e))?;
        let heads = connection
            .list()
            .map_err(|e| EngineError::git("listing remote refs", e))?;
        heads
            .iter()
            .map(|h| (h.name().to_string(), h.symref_target().map(str::to_string)))
            .collect::<Vec<_>>()
    };

    if advertised.is_empty() {
        tracing::debug!(target_branch, "smart fetch observed empty remote");
        return Ok(SmartFetchOutcome::default());
    }

    let existing_refs: HashSet<&str> = advertised.iter().map(|(name, _)| name.as_str()).collect();

    let mut default_full = None;
    for (name, symref_target) in &advertised {
        if name == "HEAD" {
            if let Some(target) = symref_target {
                if existing_refs.contains(target.as_str()) {
                    default_full = Some(target.clone());
                } else {
                    tracing::warn!(target, "remote HEAD points at a missing ref, ignoring");
                }
            }
        }
    }

    let default_short = default_full
        .as_deref()
        .and_then(|full| full.strip_prefix("refs/heads/"))
        .map(|s| s.trim_start_matches("origin/").to_string());

    let target_exists = existing_refs.contains(target_full.as_str());

    let mut refspecs = Vec::new();
    if let Some(default_full) = &default_full {
        let default_short = default_short.as_deref().unwrap_or(target_branch);
        refspecs.push(format!("+{default_full}:refs/remotes/origin/{default_short}"));
    }
    if target_exists && Some(target_branch) != default_short.as_deref() {
        refspecs.push(format!("+{target_full}:refs/remotes/origin/{target_branch}"));
    }

    if !refspecs.is_empty() {
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(auth.remote_callbacks());
        fetch_opts.depth(1);
        fetch_opts.prune(FetchPrune::On);
        fetch_opts.force();
        let refspec_refs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
        remote
            .fetch(&refspec_refs, Some(&mut fetch_opts), None)
            .map_err(|e| EngineError::git(format!("fetching refspecs={refspecs:?}"), e))?;
    }

    let adopted_short = if target_exists {
        Some(target_branch.to_string())
    } else {
        default_short.clone()
    };

    Ok(SmartFetchOutcome {
        adopted_short,
        target_exists,
        default_short,
    })
}
