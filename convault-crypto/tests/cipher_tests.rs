use convault_crypto::{
    decrypt, decrypt_with_fallback, encrypt, CryptoError, Envelope, KdfParams, KeyManager,
    KeyProvenance, NONCE_SIZE, TAG_SIZE,
};

fn test_key(secret: &str) -> KeyManager {
    KeyManager::from_secret(secret, &KdfParams { iterations: 1_000 }).unwrap()
}

#[test]
fn encrypt_decrypt_roundtrip() {
    let km = test_key("cipher-test-secret-0001");
    let plaintext = b"how do I switch careers into data engineering?";

    let envelope = encrypt(km.key(), plaintext).unwrap();
    let recovered = decrypt(km.key(), &envelope).unwrap();

    assert_eq!(recovered, plaintext);
}

#[test]
fn empty_plaintext_roundtrip() {
    let km = test_key("cipher-test-secret-0001");
    let envelope = encrypt(km.key(), b"").unwrap();
    assert_eq!(decrypt(km.key(), &envelope).unwrap(), b"");
}

#[test]
fn each_encrypt_uses_a_fresh_nonce() {
    let km = test_key("cipher-test-secret-0001");
    let plaintext = b"same plaintext every time";

    let env1 = encrypt(km.key(), plaintext).unwrap();
    let env2 = encrypt(km.key(), plaintext).unwrap();

    assert_ne!(env1.nonce, env2.nonce);
    assert_ne!(env1.ciphertext, env2.ciphertext);

    assert_eq!(decrypt(km.key(), &env1).unwrap(), plaintext);
    assert_eq!(decrypt(km.key(), &env2).unwrap(), plaintext);
}

#[test]
fn tampered_ciphertext_fails() {
    let km = test_key("cipher-test-secret-0001");
    let mut envelope = encrypt(km.key(), b"sensitive message body").unwrap();

    envelope.ciphertext[0] ^= 0x01;

    assert!(matches!(
        decrypt(km.key(), &envelope),
        Err(CryptoError::Decryption)
    ));
}

#[test]
fn tampered_tag_fails() {
    let km = test_key("cipher-test-secret-0001");
    let mut envelope = encrypt(km.key(), b"sensitive message body").unwrap();

    envelope.tag[TAG_SIZE - 1] ^= 0x80;

    assert!(matches!(
        decrypt(km.key(), &envelope),
        Err(CryptoError::Decryption)
    ));
}

#[test]
fn tampered_nonce_fails() {
    let km = test_key("cipher-test-secret-0001");
    let mut envelope = encrypt(km.key(), b"sensitive message body").unwrap();

    envelope.nonce[NONCE_SIZE / 2] ^= 0x01;

    assert!(matches!(
        decrypt(km.key(), &envelope),
        Err(CryptoError::Decryption)
    ));
}

#[test]
fn wrong_key_fails() {
    let km1 = test_key("cipher-test-secret-0001");
    let km2 = test_key("cipher-test-secret-0002");

    let envelope = encrypt(km1.key(), b"for the first key only").unwrap();

    assert!(matches!(
        decrypt(km2.key(), &envelope),
        Err(CryptoError::Decryption)
    ));
}

#[test]
fn wire_format_roundtrip() {
    let km = test_key("cipher-test-secret-0001");
    let envelope = encrypt(km.key(), b"wire roundtrip").unwrap();

    let wire = envelope.to_wire();
    assert_eq!(wire.matches(':').count(), 2);
    assert!(Envelope::is_wire_format(&wire));

    let parsed = Envelope::parse(&wire).unwrap();
    assert_eq!(parsed, envelope);
    assert_eq!(decrypt(km.key(), &parsed).unwrap(), b"wire roundtrip");
}

#[test]
fn malformed_wire_rejected_without_decryption() {
    for wire in [
        "",
        "not an envelope at all",
        "deadbeef",
        "aa:bb",
        "aa:bb:cc:dd",
        // non-hex nonce
        "zz0102030405060708090a0b:00112233445566778899aabbccddeeff:aabb",
        // nonce too short
        "aabb:00112233445566778899aabbccddeeff:aabb",
        // tag too short
        "000102030405060708090a0b:aabb:aabb",
    ] {
        assert!(
            matches!(Envelope::parse(wire), Err(CryptoError::Format(_))),
            "accepted malformed wire: {wire:?}"
        );
        assert!(!Envelope::is_wire_format(wire));
    }
}

#[test]
fn fallback_reports_current_key() {
    let km = test_key("cipher-test-secret-0001");
    let envelope = encrypt(km.key(), b"current key data").unwrap();

    let (plaintext, provenance) =
        decrypt_with_fallback(km.key(), &[], &envelope).unwrap();

    assert_eq!(plaintext, b"current key data");
    assert_eq!(provenance, KeyProvenance::Current);
}

#[test]
fn fallback_reports_legacy_key_index() {
    let current = test_key("cipher-test-secret-0001");
    let old_a = test_key("cipher-test-secret-000a");
    let old_b = test_key("cipher-test-secret-000b");

    let envelope = encrypt(old_b.key(), b"written under the second legacy key").unwrap();

    let legacy = vec![old_a.key().clone(), old_b.key().clone()];
    let (plaintext, provenance) =
        decrypt_with_fallback(current.key(), &legacy, &envelope).unwrap();

    assert_eq!(plaintext, b"written under the second legacy key");
    assert_eq!(provenance, KeyProvenance::Legacy(1));
}

#[test]
fn fallback_fails_when_no_key_matches() {
    let current = test_key("cipher-test-secret-0001");
    let other = test_key("cipher-test-secret-0002");
    let unknown = test_key("cipher-test-secret-0003");

    let envelope = encrypt(unknown.key(), b"nobody has this key").unwrap();

    let result = decrypt_with_fallback(current.key(), &[other.key().clone()], &envelope);
    assert!(matches!(result, Err(CryptoError::Decryption)));
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn roundtrip_always_recovers_plaintext(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let km = test_key("cipher-prop-secret-0001");
            let envelope = encrypt(km.key(), &data).unwrap();
            prop_assert_eq!(decrypt(km.key(), &envelope).unwrap(), data);
        }

        #[test]
        fn wire_roundtrip_is_lossless(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let km = test_key("cipher-prop-secret-0001");
            let envelope = encrypt(km.key(), &data).unwrap();
            let parsed = Envelope::parse(&envelope.to_wire()).unwrap();
            prop_assert_eq!(decrypt(km.key(), &parsed).unwrap(), data);
        }

        #[test]
        fn flipping_any_ciphertext_bit_is_detected(
            data in proptest::collection::vec(any::<u8>(), 1..128),
            byte_idx: prop::sample::Index,
            bit in 0u8..8,
        ) {
            let km = test_key("cipher-prop-secret-0001");
            let mut envelope = encrypt(km.key(), &data).unwrap();
            let idx = byte_idx.index(envelope.ciphertext.len());
            envelope.ciphertext[idx] ^= 1 << bit;
            prop_assert!(matches!(decrypt(km.key(), &envelope), Err(CryptoError::Decryption)));
        }
    }
}
