//! Path layout, commit messages, and deterministic YAML canonicalization.
//!
//! This crate holds the pure, total leaf components of the commit engine:
//! nothing here touches a filesystem, a repository, or the network.

pub mod identifier;
pub mod path;
pub mod yaml;

pub use identifier::ResourceIdentifier;
pub use path::message_for;
pub use path::path_for;
pub use path::sanitize_path_prefix;
pub use yaml::canonicalize;
