//! Opaque authentication method applied to a Git transport.
//!
//! The engine never retrieves or stores credentials: it only applies
//! whatever [`AuthMethod`] the caller hands it to a [`git2::RemoteCallbacks`]
//! for the duration of one operation.

use std::path::PathBuf;

use git2::Cred;
use git2::RemoteCallbacks;

/// Credential material for one Git operation, supplied by the embedding
/// controller as an opaque value the engine never inspects.
#[derive(Clone, Debug)]
pub enum AuthMethod {
    /// Private key on disk.
    Ssh {
        username: String,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
    /// Delegate to a running `ssh-agent`.
    SshAgent { username: String },
    /// HTTP basic auth (personal access token as password, typically).
    HttpBasic { username: String, password: String },
    /// No authentication (local/file transport, or a public anonymous remote).
    None,
}

impl AuthMethod {
    /// Builds remote callbacks with credentials wired up for this auth method.
    pub fn remote_callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        match self {
            Self::Ssh {
                username,
                private_key,
                passphrase,
            } => {
                callbacks.credentials(move |_url, _username_from_url, _allowed| {
                    Cred::ssh_key(username, None, private_key, passphrase.as_deref())
                });
            }
            Self::SshAgent { username } => {
                callbacks.credentials(move |_url, username_from_url, _allowed| {
                    Cred::ssh_key_from_agent(username_from_url.unwrap_or(username))
                });
            }
            Self::HttpBasic { username, password } => {
                callbacks.credentials(move |_url, _username_from_url, _allowed| Cred::userpass_plaintext(username, password));
            }
            Self::None => {}
        }
        callbacks
    }
}
