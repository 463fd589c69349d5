//! Process-wide symmetric secret for token hashing
//!
//! The secret is generated once and reused across restarts. Losing the key
//! file invalidates every previously issued token, since stored HMACs can no
//! longer be reproduced.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

/// Length of the symmetric key in bytes
const KEY_LEN: usize = 32;

/// Secret store errors
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Secret file is corrupt: expected {KEY_LEN} bytes, found {0}")]
    BadLength(usize),
}

/// Holds the symmetric key used to compute token hashes
pub struct SecretStore {
    key: [u8; KEY_LEN],
}

impl SecretStore {
    /// Load the key from `path`, or generate and persist a new one.
    ///
    /// The key file is written with mode 0600 on unix. Failure here is fatal
    /// to startup; no component can verify tokens without the key.
    pub fn load_or_create(path: &Path) -> Result<Self, SecretError> {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.len() != KEY_LEN {
                return Err(SecretError::BadLength(bytes.len()));
            }
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            debug!("Loaded secret key from {:?}", path);
            return Ok(Self { key });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        write_restricted(path, &key)?;
        info!("Generated new secret key at {:?}", path);
        Ok(Self { key })
    }

    /// Create a store from an existing key (used by tests)
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Create a store with a fresh random key, not persisted anywhere
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Compute the stored hash for a raw token: base64(HMAC-SHA256(key, token))
    pub fn token_hash(&self, token: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(token.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }
}

#[cfg(unix)]
fn write_restricted(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_restricted(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}
