//! Password-protected OOXML (MS-OFFCRYPTO) workbook decryption.
//!
//! Encrypted OOXML files are not ZIP files on disk even when they carry a `.xlsx` extension:
//! the real ZIP/OPC package is wrapped in an OLE/CFB container with two streams,
//! `EncryptionInfo` (the encryption descriptor) and `EncryptedPackage` (an 8-byte plaintext
//! size prefix followed by the ciphertext).
//!
//! This crate supports:
//! - MS-OFFCRYPTO "Agile Encryption" (XML descriptor, version 4.4): mandatory password
//!   verifier, AES-CBC in 4096-byte segments with a rederived IV per segment, optional
//!   `dataIntegrity` HMAC check
//! - MS-OFFCRYPTO / ECMA-376 "Standard Encryption" (binary descriptor, versions 2.2/3.2/4.2):
//!   single-pass AES-ECB
//!
//! The decrypted output is the raw OOXML ZIP bytes (should start with `PK`). Decryption is a
//! pure function of `(container bytes, password)`; no state is shared or cached across calls,
//! and derived key material is zeroized when the call returns.

use std::io::{Cursor, Read, Seek};

mod agile;
mod crypto;
mod error;
pub mod kdf;
mod standard;
mod util;


pub use crate::agile::{
    agile_package_key, AgileDataIntegrity, AgileEncryptionInfo, AgileKeyData,
    AgilePasswordKeyEncryptor,
};
pub use crate::crypto::HashAlgorithm;
pub use crate::error::OffcryptoError;
pub use crate::standard::{
    standard_derive_key, standard_verify_key, StandardEncryptionHeader, StandardEncryptionInfo,
    StandardEncryptionVerifier,
};

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

// EncryptionVersionInfo flag bits for the standard (binary) descriptor.
const FLAG_RESERVED: u32 = 0b0000_0011;
const FLAG_CRYPTO_API: u32 = 0b0000_0100;
const FLAG_EXTERNAL: u32 = 0b0001_0000;
const FLAG_AES: u32 = 0b0010_0000;

/// The agile descriptor carries a fixed `0x40` in the flags word.
const AGILE_FLAGS: u32 = 0x40;

/// Parsed `EncryptionVersionInfo` (the first 8 bytes of the `EncryptionInfo` stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionVersion {
    pub major: u16,
    pub minor: u16,
    pub flags: u32,
}

/// Parsed `EncryptionInfo` stream, one variant per supported scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionInfo {
    /// Standard (CryptoAPI) encryption, versions 2.2/3.2/4.2.
    Standard {
        version: EncryptionVersion,
        info: StandardEncryptionInfo,
    },
    /// Agile (XML) encryption, version 4.4.
    Agile {
        version: EncryptionVersion,
        info: AgileEncryptionInfo,
    },
}

/// Resource bounds applied while decrypting attacker-supplied containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptLimits {
    /// Upper bound on the declared plaintext size; `None` bounds it only by the ciphertext
    /// length.
    pub max_output_size: Option<u64>,
    /// Upper bound on the agile `spinCount` (the header-supplied hash iteration count).
    pub max_spin_count: Option<u32>,
}

impl Default for DecryptLimits {
    fn default() -> Self {
        Self {
            max_output_size: None,
            // MS-OFFCRYPTO bounds spinCount to 10,000,000; anything above is a hostile or
            // corrupt descriptor, not a real producer.
            max_spin_count: Some(10_000_000),
        }
    }
}

/// Knobs for [`decrypt_with_options`] and [`decrypt_encrypted_package`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptOptions {
    /// (Agile) verify the `dataIntegrity` HMAC over the `EncryptedPackage` stream. The HMAC is
    /// not required for decryption itself, so this defaults to off.
    pub verify_integrity: bool,
    /// (Standard) check the password against the header's verifier fields before decrypting.
    ///
    /// By default decryption proceeds optimistically and a wrong password surfaces as a
    /// malformed package in the downstream ZIP reader; enabling this rejects wrong passwords
    /// with [`OffcryptoError::BadPassword`] instead.
    pub verify_standard_password: bool,
    pub limits: DecryptLimits,
}

/// Returns true if `bytes` look like an OLE/CFB container holding an Office-encrypted OOXML
/// package (streams `EncryptionInfo` and `EncryptedPackage`).
pub fn is_encrypted_ole(bytes: &[u8]) -> bool {
    if bytes.len() < OLE_MAGIC.len() || bytes[..OLE_MAGIC.len()] != OLE_MAGIC {
        return false;
    }

    let Ok(mut ole) = cfb::CompoundFile::open(Cursor::new(bytes)) else {
        return false;
    };
    stream_exists(&mut ole, ENCRYPTION_INFO_STREAM) && stream_exists(&mut ole, ENCRYPTED_PACKAGE_STREAM)
}

/// Decrypt an encrypted OOXML container and return the raw ZIP bytes.
pub fn decrypt(bytes: &[u8], password: &str) -> Result<Vec<u8>, OffcryptoError> {
    decrypt_with_options(bytes, password, DecryptOptions::default())
}

/// [`decrypt`] with explicit [`DecryptOptions`].
pub fn decrypt_with_options(
    bytes: &[u8],
    password: &str,
    options: DecryptOptions,
) -> Result<Vec<u8>, OffcryptoError> {
    if bytes.is_empty() {
        return Err(OffcryptoError::EmptyInput);
    }

    let mut ole = cfb::CompoundFile::open(Cursor::new(bytes))
        .map_err(|_| OffcryptoError::MalformedContainer)?;

    // An absent stream reads as empty here and is rejected by the header parser, keeping the
    // failure classification in one place.
    let encryption_info = read_stream_or_empty(&mut ole, ENCRYPTION_INFO_STREAM);
    let encrypted_package = read_stream_or_empty(&mut ole, ENCRYPTED_PACKAGE_STREAM);

    decrypt_encrypted_package(&encryption_info, &encrypted_package, password, options)
}

/// Decrypt from the raw `EncryptionInfo` and `EncryptedPackage` stream bytes.
pub fn decrypt_encrypted_package(
    encryption_info: &[u8],
    encrypted_package: &[u8],
    password: &str,
    options: DecryptOptions,
) -> Result<Vec<u8>, OffcryptoError> {
    match parse_encryption_info(encryption_info)? {
        EncryptionInfo::Standard { info, .. } => {
            standard::decrypt_standard_package(&info, encrypted_package, password, &options)
        }
        EncryptionInfo::Agile { info, .. } => {
            agile::decrypt_agile_package(&info, encrypted_package, password, &options)
        }
    }
}

/// Encrypt a raw OOXML ZIP package.
///
/// Only the agile descriptor shape is assembled; producing an actual encrypted container is
/// not implemented, and the returned bytes are empty.
pub fn encrypt(bytes: &[u8], _password: &str) -> Result<Vec<u8>, OffcryptoError> {
    if bytes.is_empty() {
        return Err(OffcryptoError::EmptyInput);
    }

    let _descriptor = agile::encryption_descriptor();

    Ok(Vec::new())
}

/// Parse an `EncryptionInfo` stream and route to the scheme its version word selects.
pub fn parse_encryption_info(bytes: &[u8]) -> Result<EncryptionInfo, OffcryptoError> {
    let mut r = util::Reader::new(bytes);
    let major = r.read_u16_le("EncryptionVersionInfo.major")?;
    let minor = r.read_u16_le("EncryptionVersionInfo.minor")?;
    let flags = r.read_u32_le("EncryptionVersionInfo.flags")?;
    let version = EncryptionVersion { major, minor, flags };

    // Version 4.4 is agile; the rest of the stream is a UTF-8 XML document.
    if (major, minor) == (4, 4) {
        if flags != AGILE_FLAGS {
            return Err(OffcryptoError::CorruptHeader {
                context: "agile EncryptionVersionInfo.flags must be 0x40",
            });
        }
        let info = agile::parse_agile_encryption_info(r.remaining())?;
        return Ok(EncryptionInfo::Agile { version, info });
    }

    // Standard encryption is identified by minor == 2 with major in {2, 3, 4}.
    if minor != 2 || !matches!(major, 2 | 3 | 4) {
        return Err(OffcryptoError::UnsupportedEncryptionVersion { major, minor });
    }

    if flags & FLAG_RESERVED != 0 {
        return Err(OffcryptoError::CorruptHeader {
            context: "reserved EncryptionVersionInfo flag bits are set",
        });
    }
    if flags & FLAG_CRYPTO_API == 0 || flags & FLAG_EXTERNAL != 0 {
        return Err(OffcryptoError::UnsupportedConfiguration {
            context: "extensible encryption is not supported",
        });
    }
    if flags & FLAG_AES == 0 {
        return Err(OffcryptoError::UnsupportedConfiguration {
            context: "the AES flag is not set (not an OOXML password header)",
        });
    }

    let info = standard::parse_standard_encryption_info(&mut r)?;
    Ok(EncryptionInfo::Standard { version, info })
}

fn stream_exists<R: Read + Seek>(ole: &mut cfb::CompoundFile<R>, name: &str) -> bool {
    ole.open_stream(name).is_ok()
}

fn read_stream_or_empty<R: Read + Seek>(ole: &mut cfb::CompoundFile<R>, name: &str) -> Vec<u8> {
    // Some producers register root streams with a leading separator; accept both spellings.
    let mut stream = match ole.open_stream(name) {
        Ok(stream) => stream,
        Err(_) => {
            let rooted = format!("/{name}");
            match ole.open_stream(&rooted) {
                Ok(stream) => stream,
                Err(_) => return Vec::new(),
            }
        }
    };
    let mut buf = Vec::new();
    if stream.read_to_end(&mut buf).is_err() {
        return Vec::new();
    }
    buf
}
