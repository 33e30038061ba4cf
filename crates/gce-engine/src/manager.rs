//! Worker Manager: indexes workers by
//! `(providerNamespace, providerName, branch)`, creating on first target
//! registration and tearing down when no target remains.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;

use gce_crypto::EncryptionGate;

use crate::auth::AuthMethod;
use crate::model::WorkerConfig;
use crate::worker::Worker;
use crate::worker::WorkerIdentity;

/// Owns every running [`Worker`], keyed by its identity. Map mutations
/// happen under a write lock that is never held across Git I/O — worker
/// lifecycle and worker work are fully decoupled.
pub struct WorkerManager {
    workers: RwLock<HashMap<WorkerIdentity, Worker>>,
    gate: Arc<EncryptionGate>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub fn new(gate: Arc<EncryptionGate>, config: WorkerConfig) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            gate,
            config,
        }
    }

    /// Looks up or creates the worker for `identity`, starting it on
    /// creation. Registering an already-running identity is a no-op.
    pub fn register_target(&self, identity: WorkerIdentity, repo_url: String, local_path: PathBuf, auth: AuthMethod) {
        let already_running = self
            .workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&identity);
        if already_running {
            return;
        }

        let mut workers = self.workers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        workers.entry(identity.clone()).or_insert_with(|| {
            Worker::spawn(
                identity,
                repo_url,
                local_path,
                auth,
                Arc::clone(&self.gate),
                self.config.clone(),
            )
        });
    }

    /// Stops and removes the worker for `identity`, if one exists.
    pub fn unregister_target(&self, identity: &WorkerIdentity) {
        let worker = self.workers.write().unwrap_or_else(|poisoned| poisoned.into_inner()).remove(identity);
        if let Some(worker) = worker {
            worker.stop();
        }
    }

    /// Read-locked lookup; returns `true` if a worker for `identity` is
    /// currently registered.
    pub fn has_worker(&self, identity: &WorkerIdentity) -> bool {
        self.workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(identity)
    }

    /// Enqueues `event` on the worker for `identity`, if it exists.
    pub fn enqueue(&self, identity: &WorkerIdentity, event: crate::model::Event) {
        let workers = self.workers.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(worker) = workers.get(identity) {
            worker.enqueue(event);
        }
    }

    /// Stops and removes every worker. Called on shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<Worker> = self
            .workers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, w)| w)
            .collect();
        for worker in drained {
            worker.stop();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
