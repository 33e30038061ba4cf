//! Git Commit Engine: turns batches of resource events into a linear,
//! conflict-free sequence of commits on a remote branch.
//!
//! The public surface is four operations: [`check_repo`],
//! [`prepare_branch`], [`generate_commits`] (the building block behind
//! `WriteEvents`), and [`push_atomic`], plus the [`WorkerManager`]/[`Worker`]
//! pair that orchestrates them per branch.

mod auth;
mod check_repo;
mod error;
mod generate;
mod local_repo;
mod manager;
mod model;
mod push;
mod smart_fetch;
mod sync;
mod worker;

pub use auth::AuthMethod;
pub use check_repo::check_repo;
pub use error::EngineError;
pub use generate::generate_commits;
pub use manager::WorkerManager;
pub use model::BranchInfo;
pub use model::Event;
pub use model::Operation;
pub use model::PullReport;
pub use model::RepoInfo;
pub use model::UserInfo;
pub use model::WorkerConfig;
pub use model::WriteEventsResult;
pub use push::push_atomic;
pub use smart_fetch::smart_fetch;
pub use smart_fetch::SmartFetchOutcome;
pub use sync::checkout_dash_b;
pub use sync::prepare_branch;
pub use worker::Worker;
pub use worker::WorkerIdentity;
