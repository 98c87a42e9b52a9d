//! End-to-end scenarios for the miniLock container: self-encryption with a
//! passphrase-derived key, multiple recipients, non-recipients, truncation,
//! tampering and the magic-byte probe.

use std::path::Path;

use minilock_crypto::{
    decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, is_encrypted_file, DecryptOptions,
    EncryptOptions, Id, KdfParams, KeyPair, MiniLockError,
};
use proptest::prelude::*;
use secrecy::SecretString;
use tempfile::TempDir;

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

fn ids(pairs: &[&KeyPair]) -> Vec<Id> {
    pairs.iter().map(|p| p.public_id().clone()).collect()
}

/// Offset of the first framed block: magic, header length, header.
fn payload_offset(container: &[u8]) -> usize {
    let mut len = [0u8; 4];
    len.copy_from_slice(&container[8..12]);
    12 + u32::from_le_bytes(len) as usize
}

#[test]
fn single_recipient_self_encrypt() {
    let passphrase = SecretString::from("correct horse battery staple");
    let keys = KeyPair::from_email_and_password("a@b.com", &passphrase)
        .expect("key derivation should succeed");

    // same inputs, same identity
    let again = KeyPair::from_email_and_password_with_params("a@b.com", &passphrase, &KdfParams::default())
        .unwrap();
    assert_eq!(keys.public_id(), again.public_id());
    assert_eq!(keys.private_key().as_bytes(), again.private_key().as_bytes());

    let plaintext: Vec<u8> = (0u8..10).collect();
    let container = encrypt_bytes(&plaintext, None, &keys, &ids(&[&keys]), None).unwrap();
    let opened = decrypt_bytes(&container, &keys, None).unwrap();

    assert_eq!(opened.data, plaintext);
    assert_eq!(&opened.sender, keys.public_id());

    let parsed: Id = keys.public_id().as_base58().parse().unwrap();
    assert_eq!(&parsed, keys.public_id());
}

#[test]
fn multi_recipient_and_outsider() {
    let sender = KeyPair::generate();
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    let carol = KeyPair::generate();

    let message = b"for alice and bob only";
    let container = encrypt_bytes(message, Some("memo.txt"), &sender, &ids(&[&alice, &bob]), None)
        .unwrap();

    for reader in [&alice, &bob] {
        let opened = decrypt_bytes(&container, reader, None).unwrap();
        assert_eq!(opened.data, message);
        assert_eq!(&opened.sender, sender.public_id());
        assert_eq!(opened.file_name.as_deref(), Some("memo.txt"));
    }

    assert!(matches!(
        decrypt_bytes(&container, &carol, None),
        Err(MiniLockError::NotARecipient)
    ));
    // the sender did not include themselves
    assert!(matches!(
        decrypt_bytes(&container, &sender, None),
        Err(MiniLockError::NotARecipient)
    ));
}

#[test]
fn truncated_container_is_corrupt() {
    let keys = KeyPair::generate();
    let data = vec![0x5Au8; 3000];
    let container = encrypt_bytes(&data, Some("t.bin"), &keys, &ids(&[&keys]), None).unwrap();
    let payload = payload_offset(&container);

    let cuts = [
        container.len() - 1,
        container.len() - 17,
        payload + 300,
        payload + 1,
        payload,
        payload - 1,
        11,
        4,
        0,
    ];
    for cut in cuts {
        let err = decrypt_bytes(&container[..cut], &keys, None)
            .expect_err("truncated container must not decrypt");
        assert!(err.is_corruption(), "cut at {cut}: unexpected {err:?}");
    }
}

#[test]
fn tampered_payload_is_corrupt() {
    let keys = KeyPair::generate();
    let container = encrypt_bytes(&[1u8; 10], Some("x"), &keys, &ids(&[&keys]), None).unwrap();

    for i in payload_offset(&container)..container.len() {
        let mut tampered = container.clone();
        tampered[i] ^= 0x01;
        let err = decrypt_bytes(&tampered, &keys, None)
            .expect_err("tampered container must not decrypt");
        assert!(err.is_corruption(), "flip at {i}: unexpected {err:?}");
    }
}

#[test]
fn appended_block_is_corrupt() {
    let keys = KeyPair::generate();
    let mut container = encrypt_bytes(b"short", None, &keys, &ids(&[&keys]), None).unwrap();

    // a well-formed but unauthenticated extra block after the real last one
    container.extend_from_slice(&5u32.to_le_bytes());
    container.extend_from_slice(&[0u8; 16 + 5]);

    let err = decrypt_bytes(&container, &keys, None).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn file_roundtrip_for_each_recipient() {
    let tmp = TempDir::new().unwrap();
    let original = b"quarterly numbers, do not forward";
    let source = write_test_file(tmp.path(), "numbers.csv", original);

    let sender = KeyPair::generate();
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();

    let encrypted = encrypt_file(
        &source,
        &EncryptOptions::default(),
        &sender,
        &ids(&[&sender, &alice, &bob]),
        None,
    )
    .expect("encryption should succeed");
    assert!(is_encrypted_file(&encrypted).unwrap());
    assert!(!is_encrypted_file(&source).unwrap());

    for (who, keys) in [("sender", &sender), ("alice", &alice), ("bob", &bob)] {
        let out = tmp.path().join(who);
        std::fs::create_dir(&out).unwrap();
        let options = DecryptOptions {
            destination_dir: Some(out.clone()),
            ..Default::default()
        };
        let decrypted = decrypt_file(&encrypted, &options, keys, None).unwrap();

        assert_eq!(decrypted.path, out.join("numbers.csv"));
        assert_eq!(decrypted.bytes, original.len() as u64);
        assert_eq!(&decrypted.sender, sender.public_id());
        assert_eq!(std::fs::read(&decrypted.path).unwrap(), original);
    }
}

#[test]
fn magic_byte_probe() {
    let tmp = TempDir::new().unwrap();
    let keys = KeyPair::generate();
    let container = encrypt_bytes(b"probe me", None, &keys, &ids(&[&keys]), None).unwrap();

    let real = write_test_file(tmp.path(), "real.minilock", &container);
    let empty = write_test_file(tmp.path(), "empty", b"");
    let plain = write_test_file(tmp.path(), "plain.txt", b"just text, nothing else");
    let almost = write_test_file(tmp.path(), "almost", b"miniLoc");

    assert!(is_encrypted_file(&real).unwrap());
    assert!(!is_encrypted_file(&empty).unwrap());
    assert!(!is_encrypted_file(&plain).unwrap());
    assert!(!is_encrypted_file(&almost).unwrap());
    assert!(matches!(
        is_encrypted_file(&tmp.path().join("missing")),
        Err(MiniLockError::NotAFile(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn roundtrip_any_payload(
        data in proptest::collection::vec(any::<u8>(), 1..4096),
        extra_recipients in 0usize..3,
    ) {
        let sender = KeyPair::generate();
        let others: Vec<KeyPair> = (0..extra_recipients).map(|_| KeyPair::generate()).collect();
        let mut recipients = vec![sender.public_id().clone()];
        recipients.extend(others.iter().map(|k| k.public_id().clone()));

        let container = encrypt_bytes(&data, None, &sender, &recipients, None).unwrap();
        for keys in std::iter::once(&sender).chain(others.iter()) {
            let opened = decrypt_bytes(&container, keys, None).unwrap();
            prop_assert_eq!(&opened.data, &data);
            prop_assert_eq!(&opened.sender, sender.public_id());
        }
    }
}
