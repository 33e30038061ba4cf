//! Shared data model for events, branch state, and per-operation reports.

use std::fmt;
use std::time::Duration;

use gce_format::ResourceIdentifier;

/// Who triggered an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub uid: String,
}

/// The mutation (or control tag) an [`Event`] carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// A non-mutating control event (e.g. a resync sentinel); the commit
    /// generator skips these.
    Control(String),
}

impl Operation {
    /// `true` for [`Operation::Control`]: events the generator must skip.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control(_))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("CREATE"),
            Self::Update => f.write_str("UPDATE"),
            Self::Delete => f.write_str("DELETE"),
            Self::Control(tag) => write!(f, "CONTROL:{tag}"),
        }
    }
}

/// One upstream admission/resource event queued for a branch worker.
#[derive(Clone, Debug)]
pub struct Event {
    /// Canonicalizable resource tree; `None` for DELETE and control events.
    pub object: Option<serde_yaml::Value>,
    pub identifier: ResourceIdentifier,
    pub operation: Operation,
    pub user_info: UserInfo,
    /// Optional relative path prefix; sanitized by the commit generator.
    pub path_prefix: Option<String>,
    pub target_name: String,
    pub target_namespace: String,
    /// `true` if this resource should be written encrypted.
    pub is_secret: bool,
    /// Marker used to key the encryption cache; required when `is_secret`.
    pub uid: String,
    pub resource_version: String,
    pub generation: i64,
}

/// A branch's short name, tip hash, and unborn status.
///
/// Invariant: `unborn` iff `sha` is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchInfo {
    pub short_name: String,
    pub sha: String,
    pub unborn: bool,
}

impl BranchInfo {
    pub fn unborn(short_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            sha: String::new(),
            unborn: true,
        }
    }

    pub fn at(short_name: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            sha: sha.into(),
            unborn: false,
        }
    }
}

/// Lightweight connectivity-probe result (`CheckRepo`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoInfo {
    pub default_branch: Option<BranchInfo>,
    pub remote_branch_count: usize,
}

/// Result of a `PrepareBranch` sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullReport {
    pub exists_on_remote: bool,
    pub incoming_changes: bool,
    pub head: BranchInfo,
}

/// Result of a `WriteEvents` flush cycle.
#[derive(Clone, Debug, Default)]
pub struct WriteEventsResult {
    pub commits_created: usize,
    pub conflict_pulls: Vec<PullReport>,
    pub failures: usize,
    pub last_hash: String,
}

/// Per-worker batching tunables.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub push_interval: Duration,
    pub max_commits: usize,
    pub max_bytes: usize,
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            push_interval: Duration::from_secs(5),
            max_commits: 50,
            max_bytes: 1024 * 1024,
            max_retries: 3,
        }
    }
}

impl WorkerConfig {
    /// Shorter interval and lower thresholds for tests, so batching logic
    /// doesn't require real wall-clock sleeps to exercise.
    pub fn for_tests() -> Self {
        Self {
            push_interval: Duration::from_millis(50),
            max_commits: 5,
            max_bytes: 4096,
            max_retries: 3,
        }
    }
}
