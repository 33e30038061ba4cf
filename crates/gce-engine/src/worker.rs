//! Branch Worker: one thread per `(provider, branch)`, batching enqueued
//! events and driving Sync → Generate → Push with a bounded retry loop.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::RwLock;
use std::thread::JoinHandle;
use std::time::Instant;

use gce_crypto::EncryptionGate;

use crate::auth::AuthMethod;
use crate::error::EngineError;
use crate::generate::generate_commits;
use crate::model::Event;
use crate::model::PullReport;
use crate::model::WorkerConfig;
use crate::model::WriteEventsResult;
use crate::sync::checkout_dash_b;
use crate::sync::prepare_branch;

/// Bounded queue capacity.
const QUEUE_CAPACITY: usize = 100;
/// Cache freshness window for [`Worker::cached_metadata`].
const METADATA_FRESHNESS_WINDOW_SECS: u64 = 30;
const ZERO_HASH: &str = "0000000000000000000000000000000000000000";

/// Immutable identity of a worker: `(providerNamespace, providerName, branch)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    pub provider_namespace: String,
    pub provider_name: String,
    pub branch: String,
}

/// Per-worker cached branch metadata, protected by a read/write lock.
#[derive(Clone, Debug)]
struct MetadataSnapshot {
    branch_exists: bool,
    last_commit_sha: String,
    last_fetch_time: Option<Instant>,
}

impl Default for MetadataSnapshot {
    fn default() -> Self {
        Self {
            branch_exists: false,
            last_commit_sha: String::new(),
            last_fetch_time: None,
        }
    }
}

/// A running branch worker: owns the event queue, the flush thread, and
/// the cached metadata snapshot.
pub struct Worker {
    pub identity: WorkerIdentity,
    sender: Option<mpsc::SyncSender<Event>>,
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    dropped_events: Arc<AtomicUsize>,
    metadata: Arc<RwLock<MetadataSnapshot>>,
}

impl Worker {
    /// Spawns a worker thread for `identity`, owning the local clone at
    /// `local_path`.
    pub fn spawn(
        identity: WorkerIdentity,
        repo_url: String,
        local_path: PathBuf,
        auth: AuthMethod,
        gate: Arc<EncryptionGate>,
        config: WorkerConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::sync_channel(QUEUE_CAPACITY);
        let cancel = Arc::new(AtomicBool::new(false));
        let dropped_events = Arc::new(AtomicUsize::new(0));
        let metadata = Arc::new(RwLock::new(MetadataSnapshot::default()));

        let thread_identity = identity.clone();
        let thread_cancel = Arc::clone(&cancel);
        let thread_metadata = Arc::clone(&metadata);

        let handle = std::thread::spawn(move || {
            run_loop(
                &thread_identity,
                &repo_url,
                &local_path,
                &auth,
                &gate,
                &config,
                &receiver,
                &thread_cancel,
                &thread_metadata,
            );
        });

        Self {
            identity,
            sender: Some(sender),
            handle: Some(handle),
            cancel,
            dropped_events,
            metadata,
        }
    }

    /// Non-blocking enqueue; drops and counts the event if the buffer is
    /// full. Drops are advisory: the caller observes them via
    /// [`Worker::dropped_event_count`] rather than an error return.
    pub fn enqueue(&self, event: Event) {
        let Some(sender) = self.sender.as_ref() else {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if sender.try_send(event).is_err() {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                branch = %self.identity.branch,
                "event queue full, dropping event",
            );
        }
    }

    pub fn dropped_event_count(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Returns the worker's cached branch metadata as a `PullReport`,
    /// without triggering a fresh sync. Logs when the snapshot has aged
    /// past [`METADATA_FRESHNESS_WINDOW_SECS`] so a caller polling this
    /// between flushes can tell a stale answer from a fresh one.
    pub fn cached_metadata(&self) -> PullReport {
        let snapshot = self.metadata.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        if let Some(last_fetch_time) = snapshot.last_fetch_time {
            if last_fetch_time.elapsed().as_secs() > METADATA_FRESHNESS_WINDOW_SECS {
                tracing::debug!(branch = %self.identity.branch, "cached metadata is stale");
            }
        }
        PullReport {
            exists_on_remote: snapshot.branch_exists,
            incoming_changes: false,
            head: crate::model::BranchInfo {
                short_name: self.identity.branch.clone(),
                sha: snapshot.last_commit_sha,
                unborn: false,
            },
        }
    }

    /// Requests a graceful shutdown: the worker flushes its current buffer
    /// then exits. Dropping the sender unblocks a thread parked in
    /// `recv_timeout` immediately, regardless of the configured push
    /// interval.
    pub fn stop(mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    identity: &WorkerIdentity,
    repo_url: &str,
    local_path: &PathBuf,
    auth: &AuthMethod,
    gate: &EncryptionGate,
    config: &WorkerConfig,
    receiver: &mpsc::Receiver<Event>,
    cancel: &AtomicBool,
    metadata: &RwLock<MetadataSnapshot>,
) {
    let mut buffer: Vec<Event> = Vec::new();
    let mut byte_counter: usize = 0;

    loop {
        if cancel.load(Ordering::Relaxed) {
            if !buffer.is_empty() {
                flush(identity, repo_url, local_path, auth, gate, config, &mut buffer, metadata);
            }
            return;
        }

        match receiver.recv_timeout(config.push_interval) {
            Ok(event) => {
                byte_counter += estimate_event_bytes(&event);
                buffer.push(event);
                if buffer.len() >= config.max_commits || byte_counter >= config.max_bytes {
                    flush(identity, repo_url, local_path, auth, gate, config, &mut buffer, metadata);
                    byte_counter = 0;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !buffer.is_empty() {
                    flush(identity, repo_url, local_path, auth, gate, config, &mut buffer, metadata);
                    byte_counter = 0;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if !buffer.is_empty() {
                    flush(identity, repo_url, local_path, auth, gate, config, &mut buffer, metadata);
                }
                return;
            }
        }
    }
}

fn estimate_event_bytes(event: &Event) -> usize {
    event
        .object
        .as_ref()
        .and_then(|object| gce_format::canonicalize(object).ok())
        .map_or(64, |bytes| bytes.len())
}

#[allow(clippy::too_many_arguments)]
fn flush(
    identity: &WorkerIdentity,
    repo_url: &str,
    local_path: &PathBuf,
    auth: &AuthMethod,
    gate: &EncryptionGate,
    config: &WorkerConfig,
    buffer: &mut Vec<Event>,
    metadata: &RwLock<MetadataSnapshot>,
) {
    let batch = std::mem::take(buffer);
    let result = commit_and_push(identity, repo_url, local_path, auth, gate, config, &batch);

    if !result.last_hash.is_empty() {
        let mut snapshot = metadata.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshot.branch_exists = true;
        snapshot.last_commit_sha = result.last_hash;
        snapshot.last_fetch_time = Some(Instant::now());
    }

    if result.failures > 0 {
        tracing::warn!(
            branch = %identity.branch,
            failures = result.failures,
            conflicts = result.conflict_pulls.len(),
            "flush completed with unresolved failures",
        );
    }
}

/// Sync, checkout-B if needed, generate, push, retrying up to
/// `config.max_retries` times on a retryable error.
#[allow(clippy::too_many_arguments)]
fn commit_and_push(
    identity: &WorkerIdentity,
    repo_url: &str,
    local_path: &PathBuf,
    auth: &AuthMethod,
    gate: &EncryptionGate,
    config: &WorkerConfig,
    batch: &[Event],
) -> WriteEventsResult {
    let mut result = WriteEventsResult::default();

    for attempt in 0..=config.max_retries {
        let sync_result = prepare_branch(repo_url, local_path, &identity.branch, auth);
        let pull_report = match sync_result {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(branch = %identity.branch, error = %e, "prepare_branch failed");
                result.failures += 1;
                return result;
            }
        };

        let repo = match git2::Repository::open(local_path) {
            Ok(repo) => repo,
            Err(e) => {
                tracing::error!(branch = %identity.branch, error = %e, "reopening local clone failed");
                result.failures += 1;
                return result;
            }
        };

        // `pull_report.head.short_name` is always `identity.branch` by
        // construction (see `sync::prepare_branch`'s report shaping), so it
        // can't tell us whether Smart Fetch actually fell back to a default
        // branch. Read the real ref HEAD is on instead.
        let base_branch = match current_branch_short_name(&repo) {
            Ok(name) => name,
            Err(e) => {
                tracing::error!(branch = %identity.branch, error = %e, "reading current HEAD branch failed");
                result.failures += 1;
                return result;
            }
        };
        let base_hash = pull_report.head.sha.clone();
        if base_branch != identity.branch {
            if let Err(e) = checkout_dash_b(&repo, &identity.branch, &base_hash) {
                tracing::error!(branch = %identity.branch, error = %e, "checkout -B idiom failed");
                result.failures += 1;
                return result;
            }
        }

        let commits = match generate_commits(&repo, gate, batch) {
            Ok(commits) => commits,
            Err(e) => {
                // Encryption failures abort the whole batch, no partial write.
                tracing::error!(branch = %identity.branch, error = %e, "commit generation aborted batch");
                result.failures += 1;
                return result;
            }
        };
        result.commits_created += commits.len();

        if commits.is_empty() {
            result.last_hash = base_hash;
            return result;
        }

        let root_hash = if base_hash.is_empty() { ZERO_HASH } else { base_hash.as_str() };
        match crate::push::push_atomic(&repo, root_hash, &base_branch, auth) {
            Ok(new_hash) => {
                result.last_hash = new_hash;
                return result;
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                tracing::warn!(branch = %identity.branch, attempt, error = %e, "push rejected, re-syncing and retrying");
                result.conflict_pulls.push(pull_report);
            }
            Err(e) => {
                tracing::error!(branch = %identity.branch, error = %e, "push failed, giving up for this batch");
                result.failures += 1;
                return result;
            }
        }
    }

    result
}

/// `repo.head()` fails outright on an unborn branch, which is exactly the
/// state `PrepareBranch` may have left HEAD in; read HEAD's symbolic
/// target directly and strip it down to a short branch name.
fn current_branch_short_name(repo: &git2::Repository) -> Result<String, EngineError> {
    let head_ref = repo.find_reference("HEAD").map_err(|e| EngineError::git("resolving HEAD reference", e))?;
    let full_name = head_ref.symbolic_target().ok_or_else(|| EngineError::LocalCorruption {
        path: "HEAD".to_string(),
    })?;
    Ok(full_name.strip_prefix("refs/heads/").unwrap_or(full_name).to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::assert;
    use git2::Repository;
    use tempfile::TempDir;

    use super::*;
    use crate::model::Operation;
    use crate::model::UserInfo;
    use gce_format::ResourceIdentifier;

    fn make_event(name: &str) -> Event {
        Event {
            object: Some(serde_yaml::from_str("data:\n  key: value\n").unwrap()),
            identifier: ResourceIdentifier {
                group: String::new(),
                version: "v1".to_string(),
                resource: "configmaps".to_string(),
                namespace: "default".to_string(),
                name: name.to_string(),
            },
            operation: Operation::Create,
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

    #[test]
    fn worker_flushes_enqueued_events_and_pushes() {
        let remote_dir = TempDir::new().unwrap();
        Repository::init_bare(remote_dir.path()).unwrap();
        let local_dir = TempDir::new().unwrap();
        let url = format!("file://{}", remote_dir.path().display());

        let worker = Worker::spawn(
            WorkerIdentity {
                provider_namespace: "ns".to_string(),
                provider_name: "provider".to_string(),
                branch: "main".to_string(),
            },
            url,
            local_dir.path().join("clone"),
            AuthMethod::None,
            Arc::new(EncryptionGate::new(None)),
            WorkerConfig::for_tests(),
        );

        worker.enqueue(make_event("cm-a"));
        std::thread::sleep(Duration::from_millis(200));
        worker.stop();

        let remote_repo = Repository::open_bare(remote_dir.path()).unwrap();
        assert!(remote_repo.find_reference("refs/heads/main").is_ok());
    }

    #[test]
    fn enqueue_past_capacity_increments_drop_counter() {
        let remote_dir = TempDir::new().unwrap();
        Repository::init_bare(remote_dir.path()).unwrap();
        let local_dir = TempDir::new().unwrap();
        let url = format!("file://{}", remote_dir.path().display());

        // A push interval long enough that the flush thread doesn't drain
        // the buffer before we've overfilled the channel.
        let mut config = WorkerConfig::for_tests();
        config.push_interval = Duration::from_secs(30);

        let worker = Worker::spawn(
            WorkerIdentity {
                provider_namespace: "ns".to_string(),
                provider_name: "provider".to_string(),
                branch: "main".to_string(),
            },
            url,
            local_dir.path().join("clone"),
            AuthMethod::None,
            Arc::new(EncryptionGate::new(None)),
            config,
        );

        for i in 0..(QUEUE_CAPACITY + 10) {
            worker.enqueue(make_event(&format!("cm-{i}")));
        }
        assert!(worker.dropped_event_count() > 0);
        worker.stop();
    }
}
