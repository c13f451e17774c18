//! Tests for envelope encryption.

use apiary::secrets::{
    CipherConfig, DecryptionError, ENVELOPE_VERSION, EncryptedEnvelope, SecretCipher,
};
use pretty_assertions::assert_eq as pretty_assert_eq;

use crate::support::{self, KEY_HEX};

const OTHER_KEY_HEX: &str = "6f746865726b65796f746865726b65796f746865726b65796f746865726b6579";

#[test]
fn round_trip() {
    let cipher = support::cipher();
    let envelope = cipher.encrypt_field("access_token", "gho_plaintext");
    let opened = cipher.decrypt_field("access_token", &envelope).unwrap();
    pretty_assert_eq!(opened, "gho_plaintext");
}

#[test]
fn round_trip_empty_and_unicode() {
    let cipher = support::cipher();
    for plaintext in ["", "p@ssw0rd", "日本語トークン", "line\nbreak"] {
        let envelope = cipher.encrypt_field("field", plaintext);
        pretty_assert_eq!(cipher.decrypt_field("field", &envelope).unwrap(), plaintext);
    }
}

#[test]
fn envelope_metadata() {
    let cipher = support::cipher();
    let envelope = cipher.encrypt_field("access_token", "secret");
    pretty_assert_eq!(envelope.version, ENVELOPE_VERSION);
    pretty_assert_eq!(envelope.key_id, "k1");
    assert!(!envelope.data.contains("secret"));
}

#[test]
fn field_name_is_bound() {
    let cipher = support::cipher();
    let envelope = cipher.encrypt_field("access_token", "secret");
    let err = cipher.decrypt_field("app_access_token", &envelope).unwrap_err();
    pretty_assert_eq!(err, DecryptionError::Verification);
}

#[test]
fn tampered_ciphertext_fails() {
    let cipher = support::cipher();
    let mut envelope = cipher.encrypt_field("field", "secret");
    envelope.data = {
        let mut data = envelope.data.into_bytes();
        data[0] = if data[0] == b'A' { b'B' } else { b'A' };
        String::from_utf8(data).unwrap()
    };
    let err = cipher.decrypt_field("field", &envelope).unwrap_err();
    assert!(matches!(
        err,
        DecryptionError::Verification | DecryptionError::Malformed
    ));
}

#[test]
fn unknown_key_id_fails() {
    let cipher = support::cipher();
    let mut envelope = cipher.encrypt_field("field", "secret");
    envelope.key_id = String::from("k9");
    let err = cipher.decrypt_field("field", &envelope).unwrap_err();
    pretty_assert_eq!(
        err,
        DecryptionError::UnknownKeyId {
            key_id: String::from("k9")
        }
    );
}

#[test]
fn unsupported_version_fails() {
    let cipher = support::cipher();
    let mut envelope = cipher.encrypt_field("field", "secret");
    envelope.version = String::from("0");
    let err = cipher.decrypt_field("field", &envelope).unwrap_err();
    pretty_assert_eq!(
        err,
        DecryptionError::UnsupportedVersion {
            version: String::from("0")
        }
    );
}

#[test]
fn rotation_keeps_old_envelopes_readable() {
    let old = support::cipher();
    let envelope = old.encrypt_field("access_token", "written-under-k1");

    // New active key k2, with k1 retained for decryption.
    let config = CipherConfig::single("k2", OTHER_KEY_HEX)
        .unwrap()
        .with_key("k1", KEY_HEX)
        .unwrap();
    let rotated = SecretCipher::new(&config).unwrap();

    pretty_assert_eq!(
        rotated.decrypt_field("access_token", &envelope).unwrap(),
        "written-under-k1"
    );

    let fresh = rotated.encrypt_field("access_token", "written-under-k2");
    pretty_assert_eq!(fresh.key_id, "k2");
    // A cipher that never knew k2 cannot open the new envelope.
    pretty_assert_eq!(
        old.decrypt_field("access_token", &fresh).unwrap_err(),
        DecryptionError::UnknownKeyId {
            key_id: String::from("k2")
        }
    );
}

#[test]
fn json_form_uses_camel_case_keys() {
    let cipher = support::cipher();
    let raw = cipher.encrypt_field_to_json("field", "secret");
    assert!(raw.contains("\"keyId\""));
    assert!(raw.contains("\"encryptedAt\""));
    assert!(raw.contains("\"iv\""));
    assert!(raw.contains("\"tag\""));
    assert!(!raw.contains("secret"));

    let opened = cipher.decrypt_field_from_json("field", &raw).unwrap();
    pretty_assert_eq!(opened, "secret");
}

#[test]
fn malformed_stored_value_fails_cleanly() {
    let cipher = support::cipher();
    pretty_assert_eq!(
        cipher
            .decrypt_field_from_json("field", "definitely not json")
            .unwrap_err(),
        DecryptionError::Malformed
    );
    pretty_assert_eq!(
        EncryptedEnvelope::from_json("{}").unwrap_err(),
        DecryptionError::Malformed
    );
}

#[test]
fn active_key_must_be_configured() {
    let mut config = CipherConfig::single("k1", KEY_HEX).unwrap();
    config.active_key_id = String::from("missing");
    assert!(SecretCipher::new(&config).is_err());
}
