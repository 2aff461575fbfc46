//! Symmetric signing over canonical strings.
//!
//! A token is `identity name + truncated sha256(secret + value)`. The signer
//! always uses one identity; a verifier accepts any identity it knows whose
//! name prefixes the token, which allows secrets to be rotated.

use std::fmt;

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{Cache, Ttl};

/// Hex characters of digest kept in a token.
pub const SIGNATURE_WIDTH: usize = 16;

const SECRET_KEY: &str = "anonymous-secret";

/// A named signing secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    secret: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }

    /// The unnamed identity used when no identity is configured.
    pub fn anonymous(secret: impl Into<String>) -> Self {
        Self::new("", secret)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn digest(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(value.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(SIGNATURE_WIDTH);
        digest
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub struct Signature {
    configured: Option<Identity>,
    secrets: Option<Cache>,
    anonymous: OnceCell<Identity>,
    verifiers: Vec<Identity>,
}

impl Signature {
    /// Sign with an explicit identity.
    pub fn new(identity: Identity) -> Self {
        Self {
            configured: Some(identity),
            secrets: None,
            anonymous: OnceCell::new(),
            verifiers: Vec::new(),
        }
    }

    /// Sign with the anonymous identity. Its secret is generated on first use
    /// and persisted in `secrets` so tokens survive restarts.
    pub fn anonymous(secrets: Cache) -> Self {
        Self {
            configured: None,
            secrets: Some(secrets),
            anonymous: OnceCell::new(),
            verifiers: Vec::new(),
        }
    }

    /// Accept tokens from an additional identity.
    pub fn with_verifier(mut self, identity: Identity) -> Self {
        self.verifiers.push(identity);
        self
    }

    pub fn sign(&self, value: &str) -> String {
        let identity = self.signer();
        format!("{}{}", identity.name, identity.digest(value))
    }

    pub fn verify(&self, token: &str, value: &str) -> bool {
        let Some(split) = token.len().checked_sub(SIGNATURE_WIDTH) else {
            return false;
        };
        if !token.is_char_boundary(split) {
            return false;
        }
        let (name, mac) = token.split_at(split);

        std::iter::once(self.signer())
            .chain(self.verifiers.iter())
            .filter(|identity| identity.name == name)
            .any(|identity| identity.digest(value).as_bytes().ct_eq(mac.as_bytes()).into())
    }

    fn signer(&self) -> &Identity {
        if let Some(identity) = &self.configured {
            return identity;
        }
        self.anonymous
            .get_or_init(|| Identity::anonymous(self.load_or_generate_secret()))
    }

    fn load_or_generate_secret(&self) -> String {
        let generate = || Uuid::new_v4().simple().to_string();
        let Some(secrets) = &self.secrets else {
            return generate();
        };

        match secrets.get_or_compute(SECRET_KEY, Ttl::Never, || Some(generate())) {
            Ok(Some(secret)) => {
                debug!(
                    target = "protocol::signature",
                    op = "load_secret",
                    result = "ok",
                    "Loaded anonymous signing secret"
                );
                secret
            }
            Ok(None) => generate(),
            Err(err) => {
                warn!(
                    target = "protocol::signature",
                    op = "load_secret",
                    result = "ephemeral",
                    error = %err,
                    "Signing secret could not be persisted; tokens will not survive a restart"
                );
                generate()
            }
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("configured", &self.configured)
            .field("verifiers", &self.verifiers)
            .finish_non_exhaustive()
    }
}
