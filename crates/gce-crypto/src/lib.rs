//! Encryption gate for secret resources.
//!
//! Consults a process-lifetime cache keyed by `(identity, content-digest)`
//! plus a `(uid, resourceVersion, generation)` marker before invoking the
//! external [`Encryptor`].

use std::collections::HashMap;
use std::sync::RwLock;

use gce_format::ResourceIdentifier;
use sha2::Digest as _;
use sha2::Sha256;

/// Identity + change-marker of a resource at the moment it was encrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceMeta {
    pub identifier: ResourceIdentifier,
    pub uid: String,
    pub resource_version: String,
    pub generation: i64,
}

impl ResourceMeta {
    fn identity_key(&self) -> String {
        self.identifier.canonical_string()
    }

    fn marker(&self) -> Marker {
        Marker {
            uid: self.uid.clone(),
            resource_version: self.resource_version.clone(),
            generation: self.generation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Marker {
    uid: String,
    resource_version: String,
    generation: i64,
}

/// External encryption subprocess interface (e.g. a SOPS-like tool).
///
/// The engine makes no assumption about recipients or algorithms beyond
/// the output being a well-formed YAML document embedding an encryption
/// envelope.
pub trait Encryptor: Send + Sync {
    /// # Errors
    /// - The underlying encryption operation fails for any reason.
    fn encrypt(&self, plaintext: &[u8], meta: &ResourceMeta) -> Result<Vec<u8>, EncryptError>;
}

/// Failure surfaced by an [`Encryptor`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("encryption failed | identity={identity} reason={reason}")]
pub struct EncryptError {
    pub identity: String,
    pub reason: String,
}

/// Gate failures: `EncryptorMissing` when a secret has no configured
/// encryptor, `EncryptionFailed` when the encryptor itself errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no encryptor configured for secret | identity={identity}")]
    EncryptorMissing { identity: String },
    #[error("encryption failed | identity={identity} reason={reason}")]
    EncryptionFailed { identity: String, reason: String },
}

/// Per-process cache of `(identity, digest)` -> ciphertext plus the latest
/// change marker observed per identity.
pub struct EncryptionGate {
    encryptor: Option<Box<dyn Encryptor>>,
    markers: RwLock<HashMap<String, Marker>>,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl EncryptionGate {
    pub fn new(encryptor: Option<Box<dyn Encryptor>>) -> Self {
        Self {
            encryptor,
            markers: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Encrypts `plaintext` for `meta`, consulting the cache first.
    ///
    /// Returns a byte-for-byte copy of the cached ciphertext on a hit; the
    /// cache is never aliased to the caller.
    ///
    /// # Errors
    /// - No [`Encryptor`] is configured (`CryptoError::EncryptorMissing`).
    /// - The configured `Encryptor` fails (`CryptoError::EncryptionFailed`).
    pub fn encrypt_for_write(&self, plaintext: &[u8], meta: &ResourceMeta) -> Result<Vec<u8>, CryptoError> {
        let identity_key = meta.identity_key();
        let cache_key = cache_key_for(&identity_key, plaintext);
        let marker = meta.marker();

        if self.is_cache_hit(&identity_key, &cache_key, &marker) {
            let cache = self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(ciphertext) = cache.get(&cache_key) {
                tracing::debug!(identity = %identity_key, "marker-skip");
                tracing::debug!(identity = %identity_key, "cache-hit");
                return Ok(ciphertext.clone());
            }
        }

        let Some(encryptor) = self.encryptor.as_ref() else {
            return Err(CryptoError::EncryptorMissing { identity: identity_key });
        };

        tracing::debug!(identity = %identity_key, "attempt");
        let ciphertext = encryptor.encrypt(plaintext, meta).map_err(|error| {
            tracing::debug!(identity = %identity_key, "failure");
            CryptoError::EncryptionFailed {
                identity: identity_key.clone(),
                reason: error.reason,
            }
        })?;

        {
            let mut markers = self.markers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            markers.insert(identity_key.clone(), marker);
        }
        {
            let mut cache = self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            cache.insert(cache_key, ciphertext.clone());
        }

        Ok(ciphertext)
    }

    fn is_cache_hit(&self, identity_key: &str, cache_key: &str, marker: &Marker) -> bool {
        let markers = self.markers.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(cached_marker) = markers.get(identity_key) else {
            return false;
        };
        if cached_marker != marker {
            return false;
        }
        drop(markers);
        let cache = self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.contains_key(cache_key)
    }
}

fn cache_key_for(identity_key: &str, plaintext: &[u8]) -> String {
    let digest = Sha256::digest(plaintext);
    format!("{identity_key}:{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use gce_format::ResourceIdentifier;

    use pretty_assertions::assert_eq;

    use super::*;

    struct CountingEncryptor {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Encryptor for CountingEncryptor {
        fn encrypt(&self, plaintext: &[u8], meta: &ResourceMeta) -> Result<Vec<u8>, EncryptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EncryptError {
                    identity: meta.identity_key(),
                    reason: "boom".into(),
                });
            }
            Ok([b"ENC:".as_slice(), plaintext].concat())
        }
    }

    fn meta() -> ResourceMeta {
        ResourceMeta {
            identifier: ResourceIdentifier {
                group: String::new(),
                version: "v1".into(),
                resource: "secrets".into(),
                namespace: "default".into(),
                name: "creds".into(),
            },
            uid: "uid-1".into(),
            resource_version: "10".into(),
            generation: 1,
        }
    }

    #[test]
    fn missing_encryptor_fails() {
        let gate = EncryptionGate::new(None);
        let result = gate.encrypt_for_write(b"plain", &meta());
        assert!(matches!(result, Err(CryptoError::EncryptorMissing { .. })));
    }

    #[test]
    fn first_write_invokes_encryptor_and_caches() {
        let encryptor = Box::new(CountingEncryptor {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        let gate = EncryptionGate::new(Some(encryptor));

        let first = gate.encrypt_for_write(b"plain", &meta()).unwrap();
        assert_eq!(first, b"ENC:plain");

        let second = gate.encrypt_for_write(b"plain", &meta()).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn marker_advance_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let encryptor = CountingEncryptor {
            calls: calls.clone(),
            fail: false,
        };
        let gate = EncryptionGate::new(Some(Box::new(encryptor)));

        gate.encrypt_for_write(b"plain", &meta()).unwrap();

        let mut advanced = meta();
        advanced.resource_version = "11".into();
        gate.encrypt_for_write(b"plain", &advanced).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn digest_change_bypasses_cache_even_with_same_marker() {
        let encryptor = Box::new(CountingEncryptor {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        let gate = EncryptionGate::new(Some(encryptor));

        let first = gate.encrypt_for_write(b"plain-a", &meta()).unwrap();
        let second = gate.encrypt_for_write(b"plain-b", &meta()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn encryptor_failure_surfaces_and_does_not_cache() {
        let encryptor = Box::new(CountingEncryptor {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: true,
        });
        let gate = EncryptionGate::new(Some(encryptor));

        let result = gate.encrypt_for_write(b"plain", &meta());
        assert!(matches!(result, Err(CryptoError::EncryptionFailed { .. })));
    }

    #[test]
    fn cache_is_not_aliased_to_caller() {
        let encryptor = Box::new(CountingEncryptor {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        let gate = EncryptionGate::new(Some(encryptor));

        let mut first = gate.encrypt_for_write(b"plain", &meta()).unwrap();
        first.push(b'!');

        let second = gate.encrypt_for_write(b"plain", &meta()).unwrap();
        assert_eq!(second, b"ENC:plain");
    }
}
