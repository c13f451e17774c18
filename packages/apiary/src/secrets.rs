//! Envelope encryption for sensitive fields.
//!
//! Third-party credentials (OAuth tokens, installation tokens, swarm API
//! keys) are never persisted in plaintext. Every write path passes through
//! [`SecretCipher::encrypt_field`], which produces a versioned
//! [`EncryptedEnvelope`]; the envelope, not the plaintext, is what storage
//! columns hold, serialized as JSON.
//!
//! ## Key rotation
//!
//! Each envelope embeds the id of the key that produced it. Decryption
//! consults the embedded key id against the configured key set, so new keys
//! can be introduced for fresh writes without invalidating envelopes written
//! under old ones. Envelopes are replaced wholesale on rotation, never
//! patched in place.
//!
//! ## Field binding
//!
//! The field name is bound into the authenticated data together with the
//! envelope version and key id. An envelope lifted from one column cannot be
//! relabeled and decrypted under another field name; the tag check fails.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, KeyInit, Nonce,
    aead::{Aead, OsRng, Payload},
};
use color_eyre::{Result, eyre::bail};
use derive_more::{Debug, Display, Error};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Envelope format version produced by this build.
pub const ENVELOPE_VERSION: &str = "1";

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Key material for the cipher, resolved from process configuration once at
/// startup and passed by reference into [`SecretCipher::new`].
#[derive(Clone, Debug)]
#[debug("CipherConfig(active = {}, keys = {})", self.active_key_id, self.keys.len())]
pub struct CipherConfig {
    /// The key id used for new envelopes.
    pub active_key_id: String,

    /// All keys the process can decrypt with, including retired ones.
    pub keys: HashMap<String, [u8; 32]>,
}

impl CipherConfig {
    /// Build a config holding a single key, given as a 64-character hex
    /// string.
    pub fn single(key_id: impl Into<String>, key_hex: &str) -> Result<Self> {
        let key_id = key_id.into();
        let key = decode_key_hex(&key_id, key_hex)?;
        Ok(Self {
            active_key_id: key_id.clone(),
            keys: HashMap::from([(key_id, key)]),
        })
    }

    /// Register an additional (typically retired) key for decryption.
    pub fn with_key(mut self, key_id: impl Into<String>, key_hex: &str) -> Result<Self> {
        let key_id = key_id.into();
        let key = decode_key_hex(&key_id, key_hex)?;
        self.keys.insert(key_id, key);
        Ok(self)
    }
}

fn decode_key_hex(key_id: &str, key_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(key_hex.trim())?;
    let Ok(key) = <[u8; 32]>::try_from(bytes) else {
        bail!("cipher key '{key_id}' must be 32 bytes (64 hex characters)");
    };
    Ok(key)
}

/// The serialized form stored wherever a sensitive field lives.
///
/// `data`, `iv`, and `tag` are base64; `encrypted_at` is provenance only and
/// takes no part in authentication.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub data: String,
    pub iv: String,
    pub tag: String,
    pub key_id: String,
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub encrypted_at: OffsetDateTime,
}

impl EncryptedEnvelope {
    /// Serialize for storage in a text column.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization cannot fail")
    }

    /// Parse a stored envelope.
    pub fn from_json(raw: &str) -> Result<Self, DecryptionError> {
        serde_json::from_str(raw).map_err(|_| DecryptionError::Malformed)
    }
}

/// Why an envelope could not be opened.
///
/// Callers that treat credentials as optional context (notably the
/// credential resolver) convert any of these into "no credential" rather
/// than surfacing the cause.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
pub enum DecryptionError {
    #[display("unknown key id '{key_id}'")]
    UnknownKeyId { key_id: String },

    #[display("unsupported envelope version '{version}'")]
    UnsupportedVersion { version: String },

    #[display("envelope is malformed")]
    Malformed,

    #[display("authentication tag verification failed")]
    Verification,

    #[display("decrypted payload is not valid UTF-8")]
    Encoding,
}

/// Symmetric envelope cipher for sensitive fields.
///
/// Stateless after construction and safe to share across concurrent callers;
/// the API state holds one instance for the whole process.
#[derive(Clone, Debug)]
#[debug("SecretCipher(active = {}, keys = {})", self.active_key_id, self.keys.len())]
pub struct SecretCipher {
    active_key_id: String,
    keys: HashMap<String, Key>,
}

impl SecretCipher {
    pub fn new(config: &CipherConfig) -> Result<Self> {
        if !config.keys.contains_key(&config.active_key_id) {
            bail!(
                "active cipher key id '{}' has no key material configured",
                config.active_key_id
            );
        }
        let keys = config
            .keys
            .iter()
            .map(|(id, key)| (id.clone(), Key::from(*key)))
            .collect();
        Ok(Self {
            active_key_id: config.active_key_id.clone(),
            keys,
        })
    }

    /// Encrypt a sensitive field under the active key.
    pub fn encrypt_field(&self, field_name: &str, plaintext: &str) -> EncryptedEnvelope {
        let key = &self.keys[&self.active_key_id];
        let cipher = ChaCha20Poly1305::new(key);

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let aad = associated_data(ENVELOPE_VERSION, &self.active_key_id, field_name);
        let mut sealed = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .expect("ChaCha20-Poly1305 encryption of an in-memory buffer cannot fail");

        // The aead API appends the tag to the ciphertext; the envelope
        // stores them separately.
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        EncryptedEnvelope {
            data: STANDARD.encode(&sealed),
            iv: STANDARD.encode(nonce_bytes),
            tag: STANDARD.encode(&tag),
            key_id: self.active_key_id.clone(),
            version: ENVELOPE_VERSION.to_string(),
            encrypted_at: OffsetDateTime::now_utc(),
        }
    }

    /// Open an envelope previously produced by [`encrypt_field`] under the
    /// same field name.
    ///
    /// The key is selected by the envelope's embedded key id, never by the
    /// active key, so envelopes written under retired keys stay readable.
    pub fn decrypt_field(
        &self,
        field_name: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<String, DecryptionError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(DecryptionError::UnsupportedVersion {
                version: envelope.version.clone(),
            });
        }
        let Some(key) = self.keys.get(&envelope.key_id) else {
            return Err(DecryptionError::UnknownKeyId {
                key_id: envelope.key_id.clone(),
            });
        };

        let data = STANDARD
            .decode(&envelope.data)
            .map_err(|_| DecryptionError::Malformed)?;
        let iv = STANDARD
            .decode(&envelope.iv)
            .map_err(|_| DecryptionError::Malformed)?;
        let tag = STANDARD
            .decode(&envelope.tag)
            .map_err(|_| DecryptionError::Malformed)?;
        let Ok(nonce_bytes) = <[u8; NONCE_SIZE]>::try_from(iv) else {
            return Err(DecryptionError::Malformed);
        };
        if tag.len() != TAG_SIZE {
            return Err(DecryptionError::Malformed);
        }

        let mut sealed = data;
        sealed.extend_from_slice(&tag);

        let aad = associated_data(&envelope.version, &envelope.key_id, field_name);
        let cipher = ChaCha20Poly1305::new(key);
        let plaintext = cipher
            .decrypt(
                &Nonce::from(nonce_bytes),
                Payload {
                    msg: &sealed,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| DecryptionError::Verification)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError::Encoding)
    }

    /// Encrypt a field and serialize the envelope for a text column.
    pub fn encrypt_field_to_json(&self, field_name: &str, plaintext: &str) -> String {
        self.encrypt_field(field_name, plaintext).to_json()
    }

    /// Parse a stored envelope and open it under the given field name.
    pub fn decrypt_field_from_json(
        &self,
        field_name: &str,
        raw: &str,
    ) -> Result<String, DecryptionError> {
        let envelope = EncryptedEnvelope::from_json(raw)?;
        self.decrypt_field(field_name, &envelope)
    }
}

fn associated_data(version: &str, key_id: &str, field_name: &str) -> String {
    format!("{version}\u{1f}{key_id}\u{1f}{field_name}")
}
