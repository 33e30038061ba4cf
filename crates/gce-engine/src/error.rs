//! Categorical engine errors.
//!
//! The public API always returns this typed error rather than a
//! type-erased report: the worker's retry loop needs to pattern-match on
//! error kind to decide whether to retry, fail the batch, or self-heal.

/// Error surface for every public engine operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The remote advanced past the caller's expected root while a push
    /// was in flight for the target branch. Drives the worker's re-sync
    /// retry loop.
    #[error("remote received unknown updates | branch={branch} expected_root={expected_root} current_root={current_root}")]
    RemoteReceivedUnknownUpdates {
        branch: String,
        expected_root: String,
        current_root: String,
    },

    /// The base branch the push intended to update disappeared from the
    /// remote entirely. Fatal for the current batch; the next sync
    /// reinitializes.
    #[error("remote branch went missing | branch={branch} expected_root={expected_root}")]
    RemoteWentMissing { branch: String, expected_root: String },

    /// The remote (or push target) rejected the update, with an optional
    /// per-command reason reported by `report-status`.
    #[error("push rejected | ref={reference} reason={reason}")]
    PushRejected { reference: String, reason: String },

    /// No secret [`gce_crypto::Encryptor`] configured for a secret resource.
    #[error("encryptor missing | identity={identity}")]
    EncryptorMissing { identity: String },

    /// The configured encryptor failed; the whole batch aborts, no partial
    /// write.
    #[error("encryption failed | identity={identity} reason={reason}")]
    EncryptionFailed { identity: String, reason: String },

    /// The local clone could not be opened or failed an integrity check;
    /// callers should expect the clone directory to have been wiped and
    /// reinitialized as a side effect of recovery.
    #[error("local clone corrupted, reinitialized | path={path}")]
    LocalCorruption { path: String },

    /// Unsafe path prefix, a non-branch push target, or similar caller
    /// misuse. Fatal; surfaced directly.
    #[error("invalid input | {reason}")]
    InvalidInput { reason: String },

    /// The flush loop was asked to stop mid-cycle; the in-flight batch was
    /// flushed before returning.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other Git plumbing failure (I/O, protocol, libgit2 internals)
    /// that doesn't warrant its own categorical variant.
    #[error("git operation failed | context={context}")]
    Git {
        context: String,
        #[source]
        source: git2::Error,
    },

    /// Filesystem I/O failure while materializing the worktree.
    #[error("filesystem operation failed | context={context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// `true` for kinds the worker's retry loop should treat as transient
    /// and absorb by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteReceivedUnknownUpdates { .. } | Self::PushRejected { .. })
    }

    pub(crate) fn git(context: impl Into<String>, source: git2::Error) -> Self {
        Self::Git {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<gce_crypto::CryptoError> for EngineError {
    fn from(value: gce_crypto::CryptoError) -> Self {
        match value {
            gce_crypto::CryptoError::EncryptorMissing { identity } => Self::EncryptorMissing { identity },
            gce_crypto::CryptoError::EncryptionFailed { identity, reason } => {
                Self::EncryptionFailed { identity, reason }
            }
        }
    }
}
