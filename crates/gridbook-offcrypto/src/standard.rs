//! Standard (CryptoAPI / ECMA-376) encryption: binary `EncryptionInfo` header and the
//! single-pass AES-ECB `EncryptedPackage` decryption.
//!
//! Note the scheme's verifier fields are parsed but *not* checked by default: decryption
//! proceeds optimistically and a wrong password surfaces as a malformed package in the
//! downstream ZIP reader. [`crate::DecryptOptions::verify_standard_password`] opts into
//! checking them.

use zeroize::Zeroizing;

use crate::crypto::{aes_ecb_decrypt_in_place, HashAlgorithm, AES_BLOCK_LEN};
use crate::util::{ct_eq, decode_utf16le, password_to_utf16le_bytes, Reader};
use crate::{kdf, DecryptOptions, OffcryptoError};

// CryptoAPI algorithm identifiers used by standard encryption.
const CALG_AES_128: u32 = 0x0000_660E;
const CALG_AES_192: u32 = 0x0000_660F;
const CALG_AES_256: u32 = 0x0000_6610;
const CALG_SHA1: u32 = 0x0000_8004;

const PROV_RSA_AES: u32 = 0x0000_0018;

// The only CSP names written by Office for AES standard encryption.
const CSP_AES: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";
const CSP_AES_PROTOTYPE: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider (Prototype)";

const SHA1_LEN: usize = 20;

/// Parsed standard `EncryptionHeader`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionHeader {
    pub alg_id: u32,
    pub alg_id_hash: u32,
    pub key_bits: u32,
    pub provider_type: u32,
    pub csp_name: String,
}

/// Parsed standard `EncryptionVerifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionVerifier {
    pub salt: Vec<u8>,
    pub encrypted_verifier: [u8; 16],
    pub verifier_hash_size: u32,
    pub encrypted_verifier_hash: Vec<u8>,
}

/// Parsed standard `EncryptionInfo` (header + verifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionInfo {
    pub header: StandardEncryptionHeader,
    pub verifier: StandardEncryptionVerifier,
}

/// Parse the standard binary descriptor; `r` is positioned just past the 8-byte version
/// prefix.
pub(crate) fn parse_standard_encryption_info(
    r: &mut Reader<'_>,
) -> Result<StandardEncryptionInfo, OffcryptoError> {
    let header_len = r.read_u32_le("EncryptionInfo.headerSize")? as usize;

    // EncryptionHeader: 8 fixed DWORDs followed by the UTF-16LE CSP name.
    const FIXED_FIELDS_LEN: usize = 8 * 4;
    if header_len < FIXED_FIELDS_LEN {
        return Err(OffcryptoError::CorruptHeader {
            context: "EncryptionHeader smaller than its fixed fields",
        });
    }

    let _flags = r.read_u32_le("EncryptionHeader.flags")?;
    let _size_extra = r.read_u32_le("EncryptionHeader.sizeExtra")?;
    let alg_id = r.read_u32_le("EncryptionHeader.algId")?;
    let alg_id_hash = r.read_u32_le("EncryptionHeader.algIdHash")?;
    let key_bits = r.read_u32_le("EncryptionHeader.keySize")?;
    let provider_type = r.read_u32_le("EncryptionHeader.providerType")?;
    let _reserved1 = r.read_u32_le("EncryptionHeader.reserved1")?;
    let reserved2 = r.read_u32_le("EncryptionHeader.reserved2")?;

    match alg_id {
        // 0 leaves the cipher implied by the provider; Office always means AES here.
        0 => {
            if !matches!(key_bits, 128 | 192 | 256) {
                return Err(OffcryptoError::UnsupportedCipher {
                    context: "keySize is not an AES key size",
                });
            }
        }
        CALG_AES_128 if key_bits == 128 => {}
        CALG_AES_192 if key_bits == 192 => {}
        CALG_AES_256 if key_bits == 256 => {}
        CALG_AES_128 | CALG_AES_192 | CALG_AES_256 => {
            return Err(OffcryptoError::UnsupportedCipher {
                context: "keySize does not match the AES algId",
            });
        }
        _ => {
            return Err(OffcryptoError::UnsupportedCipher {
                context: "algId is not an AES identifier",
            });
        }
    }

    // 0 leaves the hash implied; anything else must be the CryptoAPI SHA-1 constant.
    if alg_id_hash != CALG_SHA1 && alg_id_hash != 0 {
        return Err(OffcryptoError::UnsupportedHash {
            context: "algIdHash is not the SHA-1 identifier",
        });
    }

    if provider_type != 0 && provider_type != PROV_RSA_AES {
        return Err(OffcryptoError::CorruptHeader {
            context: "unrecognized cryptographic provider type",
        });
    }
    if reserved2 != 0 {
        return Err(OffcryptoError::CorruptHeader {
            context: "EncryptionHeader.reserved2 must be zero",
        });
    }

    let csp_name_len = header_len - FIXED_FIELDS_LEN;
    let csp_bytes = r.take(csp_name_len, "EncryptionHeader.cspName")?;
    let csp_name = decode_utf16le(csp_bytes, "EncryptionHeader.cspName")?;
    if csp_name != CSP_AES && csp_name != CSP_AES_PROTOTYPE {
        return Err(OffcryptoError::CorruptHeader {
            context: "unrecognized cryptographic provider name",
        });
    }

    // EncryptionVerifier occupies the remaining bytes.
    let salt_size = r.read_u32_le("EncryptionVerifier.saltSize")? as usize;
    if salt_size != 16 {
        return Err(OffcryptoError::CorruptHeader {
            context: "EncryptionVerifier.saltSize must be 16",
        });
    }
    let salt = r.take(16, "EncryptionVerifier.salt")?.to_vec();

    let mut encrypted_verifier = [0u8; 16];
    encrypted_verifier.copy_from_slice(r.take(16, "EncryptionVerifier.encryptedVerifier")?);

    let verifier_hash_size = r.read_u32_le("EncryptionVerifier.verifierHashSize")?;
    if verifier_hash_size != SHA1_LEN as u32 {
        return Err(OffcryptoError::CorruptHeader {
            context: "EncryptionVerifier.verifierHashSize must be 20 (SHA-1)",
        });
    }
    // The SHA-1 verifier hash is stored padded to the AES block boundary: 32 bytes.
    let encrypted_verifier_hash = r
        .take(32, "EncryptionVerifier.encryptedVerifierHash")?
        .to_vec();

    Ok(StandardEncryptionInfo {
        header: StandardEncryptionHeader {
            alg_id,
            alg_id_hash,
            key_bits,
            provider_type,
            csp_name,
        },
        verifier: StandardEncryptionVerifier {
            salt,
            encrypted_verifier,
            verifier_hash_size,
            encrypted_verifier_hash,
        },
    })
}

/// ECMA-376 standard password→key derivation.
///
/// The fixed 50k spin chain over `Hash(salt || password)`, the block-0 mixing step, and the
/// CryptoAPI `CryptDeriveKey` expansion, truncated to the header's key size.
pub fn standard_derive_key(
    info: &StandardEncryptionInfo,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, OffcryptoError> {
    let password_utf16 = Zeroizing::new(password_to_utf16le_bytes(password));
    let h = kdf::iterated_hash(
        &password_utf16,
        &info.verifier.salt,
        HashAlgorithm::Sha1,
        kdf::STANDARD_SPIN_COUNT,
    );
    let h_final = Zeroizing::new(kdf::block_hash(&h, 0, HashAlgorithm::Sha1));
    kdf::crypt_derive_key(&h_final, HashAlgorithm::Sha1, info.header.key_bits as usize)
}

/// Check a derived key against the header's verifier fields.
///
/// `Hash(ECB⁻¹(encryptedVerifier))` must equal the first 20 bytes of
/// `ECB⁻¹(encryptedVerifierHash)`.
pub fn standard_verify_key(
    info: &StandardEncryptionInfo,
    key: &[u8],
) -> Result<(), OffcryptoError> {
    let mut verifier = info.verifier.encrypted_verifier;
    aes_ecb_decrypt_in_place(key, &mut verifier)?;
    let calculated = HashAlgorithm::Sha1.digest(&verifier);

    let mut verifier_hash = info.verifier.encrypted_verifier_hash.clone();
    aes_ecb_decrypt_in_place(key, &mut verifier_hash)?;
    let expected = verifier_hash
        .get(..SHA1_LEN)
        .ok_or(OffcryptoError::CorruptHeader {
            context: "decrypted verifier hash shorter than a SHA-1 digest",
        })?;

    if ct_eq(&calculated, expected) {
        Ok(())
    } else {
        Err(OffcryptoError::BadPassword)
    }
}

/// Decrypt a standard-scheme `EncryptedPackage` stream.
pub(crate) fn decrypt_standard_package(
    info: &StandardEncryptionInfo,
    encrypted_package: &[u8],
    password: &str,
    options: &DecryptOptions,
) -> Result<Vec<u8>, OffcryptoError> {
    let mut r = Reader::new(encrypted_package);
    let total_size = r.read_u64_le("EncryptedPackage.originalSize")?;
    let ciphertext = r.remaining();

    if ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(OffcryptoError::CorruptHeader {
            context: "EncryptedPackage ciphertext is not AES block aligned",
        });
    }
    if total_size > ciphertext.len() as u64 {
        return Err(OffcryptoError::CorruptHeader {
            context: "declared plaintext size exceeds the ciphertext size",
        });
    }
    if let Some(max) = options.limits.max_output_size {
        if total_size > max {
            return Err(OffcryptoError::OutputTooLarge { total_size, max });
        }
    }

    let key = standard_derive_key(info, password)?;
    if options.verify_standard_password {
        standard_verify_key(info, &key)?;
    }

    let mut out = ciphertext.to_vec();
    aes_ecb_decrypt_in_place(&key, &mut out)?;
    out.truncate(total_size as usize);
    Ok(out)
}
