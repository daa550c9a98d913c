//! Header credential checks.
//!
//! `syncml:auth-basic` carries `user:password` in base64 and is verified
//! through [`Backend::check_password`]. `syncml:auth-md5` only carries a
//! digest, so it is checked against an [`Md5Credentials`] table holding
//! `b64(md5("user:password"))` per user. That table is an example hook
//! rather than a credential store: values are unsalted, the nonce is always
//! empty and digests are replayable. Leave it empty in production.

use crate::backend::Backend;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use std::collections::HashMap;
use syncml_protocol::auth as auth_type;
use tracing::{debug, warn};

/// Credentials from a `<Cred>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// `<Cred><Data>`.
    pub data: String,
    /// `<Cred><Meta><Format>`.
    pub format: String,
    /// `<Cred><Meta><Type>`.
    pub auth_type: String,
}

impl Credentials {
    /// Returns true if the header carried no credential data.
    pub fn is_missing(&self) -> bool {
        self.data.is_empty()
    }

    /// Builds basic credentials for `user` and `password`.
    pub fn basic(user: &str, password: &str) -> Self {
        Self {
            data: STANDARD.encode(format!("{user}:{password}")),
            format: "b64".to_string(),
            auth_type: auth_type::BASIC.to_string(),
        }
    }
}

/// Insecure lookup table for `syncml:auth-md5`.
#[derive(Debug, Clone, Default)]
pub struct Md5Credentials {
    users: HashMap<String, String>,
}

impl Md5Credentials {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the hash for `user` with `password`.
    pub fn insert_password(&mut self, user: &str, password: &str) {
        self.users
            .insert(user.to_string(), md5_b64(format!("{user}:{password}").as_bytes()));
    }

    /// Returns true if `data` is the digest the client must send for
    /// `user` with the given nonce.
    pub fn verify(&self, user: &str, nonce: &str, data: &str) -> bool {
        match self.users.get(user) {
            Some(stored) => md5_b64(format!("{stored}:{nonce}").as_bytes()) == data,
            None => false,
        }
    }

    /// Computes the digest a client sends for `user`/`password`/`nonce`.
    pub fn client_digest(user: &str, password: &str, nonce: &str) -> String {
        let stored = md5_b64(format!("{user}:{password}").as_bytes());
        md5_b64(format!("{stored}:{nonce}").as_bytes())
    }
}

fn md5_b64(input: &[u8]) -> String {
    STANDARD.encode(Md5::digest(input))
}

/// Splits base64 basic credentials into user and password.
pub fn decode_basic(data: &str) -> Option<(String, String)> {
    let raw = STANDARD.decode(data.trim()).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Dispatches on the credential type and returns the authenticated user.
pub fn check_credentials<B: Backend + ?Sized>(
    backend: &mut B,
    username: &str,
    credentials: &Credentials,
) -> Option<String> {
    if credentials.data.is_empty() || credentials.auth_type.is_empty() {
        return None;
    }

    match credentials.auth_type.as_str() {
        auth_type::BASIC => {
            let (user, password) = decode_basic(&credentials.data)?;
            debug!(user = %user, "checking basic authentication");
            match backend.check_password(&user, &password) {
                Ok(true) => Some(user),
                Ok(false) => None,
                Err(err) => {
                    warn!(user = %user, error = %err, "password check failed");
                    None
                }
            }
        }
        auth_type::MD5 => {
            let table = backend.md5_credentials()?;
            table
                .verify(username, "", &credentials.data)
                .then(|| username.to_string())
        }
        other => {
            warn!(auth_type = other, "unsupported authentication type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_round_trip() {
        let creds = Credentials::basic("alice", "s:cret");
        assert_eq!(
            decode_basic(&creds.data),
            Some(("alice".to_string(), "s:cret".to_string()))
        );
        assert_eq!(decode_basic("not base64!"), None);
    }

    #[test]
    fn md5_table_matches_known_value() {
        let mut table = Md5Credentials::new();
        table.insert_password("dummy", "sync");
        assert_eq!(table.users["dummy"], "ZD1ZeisPeQs0qipHc9tEsw==");

        let digest = Md5Credentials::client_digest("dummy", "sync", "");
        assert!(table.verify("dummy", "", &digest));
        assert!(!table.verify("dummy", "", "bogus"));
        assert!(!table.verify("nobody", "", &digest));
    }
}
