//! Framing and resource-bound checks: malformed `EncryptedPackage` streams must be rejected
//! with structured errors before any password work, and hostile headers must not drive large
//! allocations or unbounded hash loops.

use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use gridbook_offcrypto::{
    decrypt, decrypt_encrypted_package, DecryptLimits, DecryptOptions, OffcryptoError,
};

const F_CRYPTO_API: u32 = 0b0000_0100;
const F_AES: u32 = 0b0010_0000;

const CSP_AES: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";

fn standard_encryption_info_bytes() -> Vec<u8> {
    let mut csp_name = Vec::new();
    for cu in CSP_AES.encode_utf16() {
        csp_name.extend_from_slice(&cu.to_le_bytes());
    }
    csp_name.extend_from_slice(&0u16.to_le_bytes());

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&3u16.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&(F_CRYPTO_API | F_AES).to_le_bytes());

    let mut header = Vec::new();
    header.extend_from_slice(&0u32.to_le_bytes()); // flags
    header.extend_from_slice(&0u32.to_le_bytes()); // sizeExtra
    header.extend_from_slice(&0x0000_660Eu32.to_le_bytes()); // algId (AES-128)
    header.extend_from_slice(&0x0000_8004u32.to_le_bytes()); // algIdHash (SHA-1)
    header.extend_from_slice(&128u32.to_le_bytes()); // keySize
    header.extend_from_slice(&0x18u32.to_le_bytes()); // providerType
    header.extend_from_slice(&0u32.to_le_bytes()); // reserved1
    header.extend_from_slice(&0u32.to_le_bytes()); // reserved2
    header.extend_from_slice(&csp_name);
    bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&header);

    bytes.extend_from_slice(&16u32.to_le_bytes()); // saltSize
    bytes.extend_from_slice(&[0u8; 16]); // salt
    bytes.extend_from_slice(&[0u8; 16]); // encryptedVerifier
    bytes.extend_from_slice(&20u32.to_le_bytes()); // verifierHashSize
    bytes.extend_from_slice(&[0u8; 32]); // encryptedVerifierHash
    bytes
}

/// A parseable agile descriptor whose verifier can never match (the verifier hash ciphertext
/// is shorter than a SHA-1 digest), with a configurable spin count.
fn agile_encryption_info_bytes(spin_count: u32) -> Vec<u8> {
    let salt = STANDARD.encode([0u8; 16]);
    let ct16 = STANDARD.encode([0u8; 16]);
    let xml = format!(
        r#"<encryption xmlns="http://schemas.microsoft.com/office/2006/encryption"
    xmlns:p="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
  <keyData saltSize="16" blockSize="16" keyBits="128" hashSize="20" cipherAlgorithm="AES"
    cipherChaining="ChainingModeCBC" hashAlgorithm="SHA1" saltValue="{salt}"/>
  <dataIntegrity encryptedHmacKey="{ct16}" encryptedHmacValue="{ct16}"/>
  <keyEncryptors>
    <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
      <p:encryptedKey spinCount="{spin_count}" saltSize="16" blockSize="16" keyBits="128"
        hashSize="20" cipherAlgorithm="AES" cipherChaining="ChainingModeCBC" hashAlgorithm="SHA1"
        saltValue="{salt}"
        encryptedVerifierHashInput="{ct16}"
        encryptedVerifierHashValue="{ct16}"
        encryptedKeyValue="{ct16}"/>
    </keyEncryptor>
  </keyEncryptors>
</encryption>"#
    );

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&0x40u32.to_le_bytes());
    bytes.extend_from_slice(xml.as_bytes());
    bytes
}

#[test]
fn standard_rejects_short_encrypted_package() {
    let err = decrypt_encrypted_package(
        &standard_encryption_info_bytes(),
        &[0u8; 7],
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn standard_rejects_unaligned_ciphertext() {
    let mut package = 0u64.to_le_bytes().to_vec();
    package.extend_from_slice(&[0u8; 15]);
    let err = decrypt_encrypted_package(
        &standard_encryption_info_bytes(),
        &package,
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn standard_rejects_declared_size_exceeding_ciphertext() {
    // total_size=32 with only 16 bytes of ciphertext: the plaintext cannot exist.
    let mut package = 32u64.to_le_bytes().to_vec();
    package.extend_from_slice(&[0u8; 16]);
    let err = decrypt_encrypted_package(
        &standard_encryption_info_bytes(),
        &package,
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn standard_rejects_oversized_declared_size_before_any_allocation() {
    // A hostile 8-byte prefix claiming u64::MAX must be rejected by the ciphertext-length
    // bound, never allocated.
    let mut package = u64::MAX.to_le_bytes().to_vec();
    package.extend_from_slice(&[0u8; 16]);
    let err = decrypt_encrypted_package(
        &standard_encryption_info_bytes(),
        &package,
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn standard_enforces_max_output_size() {
    let total_size: u64 = 2 * 1024 * 1024;
    let max: u64 = 1024 * 1024;

    let mut package = total_size.to_le_bytes().to_vec();
    package.resize(8 + total_size as usize, 0);

    let options = DecryptOptions {
        limits: DecryptLimits {
            max_output_size: Some(max),
            ..DecryptLimits::default()
        },
        ..DecryptOptions::default()
    };
    let err = decrypt_encrypted_package(
        &standard_encryption_info_bytes(),
        &package,
        "pw",
        options,
    )
    .unwrap_err();
    assert_eq!(err, OffcryptoError::OutputTooLarge { total_size, max });
}

#[test]
fn agile_rejects_short_encrypted_package_before_password_work() {
    let err = decrypt_encrypted_package(
        &agile_encryption_info_bytes(100_000),
        &[0u8; 7],
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn agile_rejects_unaligned_ciphertext_before_password_work() {
    let mut package = 0u64.to_le_bytes().to_vec();
    package.extend_from_slice(&[0u8; 15]);
    let err = decrypt_encrypted_package(
        &agile_encryption_info_bytes(100_000),
        &package,
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn agile_rejects_declared_size_exceeding_ciphertext_before_password_work() {
    let mut package = 32u64.to_le_bytes().to_vec();
    package.extend_from_slice(&[0u8; 16]);
    let err = decrypt_encrypted_package(
        &agile_encryption_info_bytes(100_000),
        &package,
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn agile_enforces_max_output_size() {
    let total_size: u64 = 2 * 1024 * 1024;
    let max: u64 = 1024 * 1024;

    let mut package = total_size.to_le_bytes().to_vec();
    package.resize(8 + total_size as usize, 0);

    let options = DecryptOptions {
        limits: DecryptLimits {
            max_output_size: Some(max),
            ..DecryptLimits::default()
        },
        ..DecryptOptions::default()
    };
    let err = decrypt_encrypted_package(
        &agile_encryption_info_bytes(100_000),
        &package,
        "pw",
        options,
    )
    .unwrap_err();
    assert_eq!(err, OffcryptoError::OutputTooLarge { total_size, max });
}

#[test]
fn agile_rejects_hostile_spin_count() {
    // A spinCount above the MS-OFFCRYPTO ceiling is a decompression-bomb-style slowdown, not
    // a legitimate descriptor.
    let mut package = 0u64.to_le_bytes().to_vec();
    package.extend_from_slice(&[0u8; 16]);
    let err = decrypt_encrypted_package(
        &agile_encryption_info_bytes(10_000_001),
        &package,
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn agile_wrong_password_is_bad_password_once_framing_is_valid() {
    let mut package = 16u64.to_le_bytes().to_vec();
    package.extend_from_slice(&[0u8; 16]);
    let err = decrypt_encrypted_package(
        &agile_encryption_info_bytes(1000),
        &package,
        "pw",
        DecryptOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err, OffcryptoError::BadPassword);
}

#[test]
fn container_missing_encrypted_package_stream_is_rejected() {
    let cursor = std::io::Cursor::new(Vec::new());
    let mut ole = cfb::CompoundFile::create(cursor).expect("create cfb");
    ole.create_stream("EncryptionInfo")
        .expect("create stream")
        .write_all(&standard_encryption_info_bytes())
        .expect("write stream");
    let bytes = ole.into_inner().into_inner();

    // The EncryptedPackage stream reads as empty, so its size prefix is truncated.
    let err = decrypt(&bytes, "pw").unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}

#[test]
fn container_missing_encryption_info_stream_is_rejected() {
    let cursor = std::io::Cursor::new(Vec::new());
    let mut ole = cfb::CompoundFile::create(cursor).expect("create cfb");
    ole.create_stream("EncryptedPackage")
        .expect("create stream")
        .write_all(&[0u8; 64])
        .expect("write stream");
    let bytes = ole.into_inner().into_inner();

    let err = decrypt(&bytes, "pw").unwrap_err();
    assert!(matches!(err, OffcryptoError::CorruptHeader { .. }), "{err:?}");
}
