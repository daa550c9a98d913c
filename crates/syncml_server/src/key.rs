//! Session keys.
//!
//! A session is stored under a digest of the client device id and the
//! protocol session id. With a configured secret the digest is an
//! HMAC-SHA256, so stored file names cannot be linked back to devices
//! without it.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Storage key of one session: 64 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    /// Derives the key of `session_id` on `device_id`.
    pub fn derive(device_id: &str, session_id: &str, secret: Option<&[u8]>) -> Self {
        let digest: [u8; 32] = match secret {
            Some(secret) => {
                let mut mac =
                    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
                mac.update(device_id.as_bytes());
                mac.update(&[0]);
                mac.update(session_id.as_bytes());
                mac.finalize().into_bytes().into()
            }
            None => {
                let mut hasher = Sha256::new();
                hasher.update(device_id.as_bytes());
                hasher.update([0]);
                hasher.update(session_id.as_bytes());
                hasher.finalize().into()
            }
        };
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Returns the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
