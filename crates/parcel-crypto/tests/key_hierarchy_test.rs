//! Integration tests for master key handling, key derivation and one-shot
//! content encryption.

use parcel_core::ParcelError;
use parcel_crypto::{
    expand, generate_key, make_login_key, KeyHierarchy, MasterKey, PrependIv, SymmetricCryptor,
    SymmetricKey, CONTENT_IV, RANDOM_IV_SIZE,
};

const EXAMPLE_PEM: &str = "-----BEGIN PARCEL PRIVATE MASTER KEY-----
Version: 1 (256 bit)

009167 186544 520379 167502
092114 170530 357103 015669
422915 084699 505677 309062
407924 293407 624445 483701
-----END PARCEL PRIVATE MASTER KEY-----
";

#[test]
fn login_key_derivation_is_repeatable() {
    let master = MasterKey::from_pem(EXAMPLE_PEM).unwrap();
    let info = "login^kullo#abcd1234";

    let first = expand(&master.to_symmetric_key(), info, 256).unwrap();
    let second = expand(&master.to_symmetric_key(), info, 256).unwrap();
    assert_eq!(first.len(), 32);
    assert_eq!(first, second);

    // the 512-bit login key starts with the 256-bit expansion
    let login = make_login_key("kullo#abcd1234", &master).unwrap();
    assert_eq!(login.len(), 64);
    assert_eq!(&login.as_bytes()[..32], first.as_bytes());
}

#[test]
fn master_key_survives_pem_roundtrip_and_derives_same_keys() {
    let master = MasterKey::make_random().unwrap();
    let restored = MasterKey::from_pem(&master.to_pem()).unwrap();
    let hierarchy = KeyHierarchy::new();
    assert_eq!(
        hierarchy.private_data_key(&master, 256).unwrap(),
        hierarchy.private_data_key(&restored, 256).unwrap()
    );
}

#[test]
fn short_kdf_input_rejected_before_derivation() {
    let err = expand(&SymmetricKey::from_slice(&[0u8; 8]), "privatedata", 256).unwrap_err();
    assert!(matches!(err, ParcelError::InvalidKey(_)));
}

#[test]
fn empty_message_content() {
    let cryptor = SymmetricCryptor::new();
    let key = generate_key(256).unwrap();
    let ct = cryptor
        .encrypt(b"", &key, CONTENT_IV, PrependIv::DontPrepend)
        .unwrap();
    assert!(ct.is_empty());
    assert!(cryptor.decrypt(&ct, &key, CONTENT_IV).unwrap().is_empty());
}

#[test]
fn random_iv_is_prepended() {
    let cryptor = SymmetricCryptor::new();
    let key = generate_key(256).unwrap();
    let ct = cryptor.encrypt_with_random_iv(b"hello world", &key).unwrap();
    assert_eq!(ct.len(), 39);

    let pt = cryptor
        .decrypt_with_iv_prefix(&ct, &key, RANDOM_IV_SIZE)
        .unwrap();
    assert_eq!(pt, b"hello world");

    let mut tampered = ct.clone();
    tampered[RANDOM_IV_SIZE] ^= 0x01;
    let err = cryptor
        .decrypt_with_iv_prefix(&tampered, &key, RANDOM_IV_SIZE)
        .unwrap_err();
    assert!(err.is_integrity_related());
}

#[test]
fn message_content_with_derived_message_key() {
    let master = MasterKey::from_pem(EXAMPLE_PEM).unwrap();
    let key = KeyHierarchy::new().message_key(&master, 4711, 256).unwrap();
    let cryptor = SymmetricCryptor::new();
    let ct = cryptor
        .encrypt(b"Dear Bob", &key, CONTENT_IV, PrependIv::DontPrepend)
        .unwrap();
    assert_eq!(cryptor.decrypt(&ct, &key, CONTENT_IV).unwrap(), b"Dear Bob");
}
