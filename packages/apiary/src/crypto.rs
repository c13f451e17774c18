//! Cryptographic utilities for token hashing and secret generation.
//!
//! Reversible encryption of stored third-party credentials lives in
//! [`crate::secrets`]; this module only covers one-way hashes and random
//! generation.

use rand::RngCore;
use sha2::{Digest, Sha256};
use tap::Pipe;

use crate::auth::RawToken;

/// A hashed API token.
///
/// Hashed tokens use SHA2 (SHA256): when you call `new`, the plaintext token
/// is hashed to produce a deterministic binary hash. Verification compares
/// the hash of the provided plaintext token against the stored hash.
///
/// Note: it's not a _security issue_ to leak this value, but they're not
/// really _intended to be sent to clients_. Clients send the plaintext form
/// and we fetch these from the database to validate it. For this reason,
/// this type does not implement `Serialize` or `Deserialize`; if you want
/// to add them, take a moment to think about why that is, because you
/// probably aren't doing the right thing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenHash(Vec<u8>);

impl TokenHash {
    /// Create a new instance from the given plaintext token.
    pub fn new(token: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(token.as_ref());
        let hash = hasher.finalize();
        Self(hash.to_vec())
    }

    /// Check whether the given plaintext token hashes to this value.
    pub fn verify(&self, token: impl AsRef<[u8]>) -> bool {
        Self::new(token) == *self
    }

    /// Get the hash as bytes for storage.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<TokenHash> for TokenHash {
    fn as_ref(&self) -> &TokenHash {
        self
    }
}

/// Generate a new API key token with 128 bits of entropy.
///
/// Returns a 32-character hex string (16 random bytes, hex-encoded).
pub fn generate_api_key() -> RawToken {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes).pipe(RawToken::new)
}

/// Length of a generated swarm password.
const SWARM_PASSWORD_LENGTH: usize = 20;

/// Generate a password for a newly provisioned swarm.
///
/// The password is only ever transmitted to the remote provisioning API; it
/// is alphanumeric so it survives being embedded in instance bootstrap
/// scripts without escaping.
pub fn generate_swarm_password() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    let mut rng = rand::thread_rng();
    (0..SWARM_PASSWORD_LENGTH)
        .map(|_| {
            let idx = (rng.next_u32() as usize) % ALPHABET.len();
            ALPHABET[idx] as char
        })
        .collect()
}
