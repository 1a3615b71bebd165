//! Agile encryption: the XML `EncryptionInfo` descriptor, the mandatory password verifier,
//! and the segmented AES-CBC `EncryptedPackage` decryption.
//!
//! Password verification decrypts the `encryptedVerifierHashInput` and
//! `encryptedVerifierHashValue` fields with keys derived from the password and checks
//! `Hash(verifierHashInput) == verifierHashValue`. The verifier hash (like the other agile
//! digest fields) is AES-CBC ciphertext and decrypts to a buffer padded to a 16-byte boundary
//! when the digest size is not a multiple of 16 (e.g. SHA-1 = 20 bytes), so only the digest
//! prefix is compared. Only after the verifier matches is `encryptedKeyValue` decrypted into
//! the package key.

use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader as XmlReader;
use zeroize::Zeroizing;

use crate::crypto::{aes_cbc_decrypt, hmac_digest, HashAlgorithm, AES_BLOCK_LEN};
use crate::util::{
    ct_eq, decode_base64_attr, parse_decimal_u32, parse_decimal_usize, password_to_utf16le_bytes,
};
use crate::util::Reader;
use crate::{kdf, DecryptOptions, OffcryptoError};

const PASSWORD_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";

/// Block key for deriving the `encryptedVerifierHashInput` decryption key.
const VERIFIER_HASH_INPUT_BLOCK: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
/// Block key for deriving the `encryptedVerifierHashValue` decryption key.
const VERIFIER_HASH_VALUE_BLOCK: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
/// Block key for deriving the `encryptedKeyValue` decryption key.
const KEY_VALUE_BLOCK: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
/// Block key for the IV that protects `dataIntegrity.encryptedHmacKey`.
const HMAC_KEY_BLOCK: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
/// Block key for the IV that protects `dataIntegrity.encryptedHmacValue`.
const HMAC_VALUE_BLOCK: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

/// The package ciphertext is decrypted in fixed 4096-byte segments, each with its own IV.
const SEGMENT_LEN: usize = 4096;

const VERIFIER_HASH_INPUT_LEN: usize = 16;

/// Parsed `<keyData>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileKeyData {
    pub salt_size: usize,
    pub block_size: usize,
    pub key_bits: usize,
    pub hash_size: usize,
    pub cipher_algorithm: String,
    pub cipher_chaining: String,
    pub hash: HashAlgorithm,
    pub salt: Vec<u8>,
}

/// Parsed `<dataIntegrity>` element (optional post-decrypt HMAC check).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileDataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// Parsed password `<p:encryptedKey>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgilePasswordKeyEncryptor {
    pub spin_count: u32,
    pub salt_size: usize,
    pub block_size: usize,
    pub key_bits: usize,
    pub hash_size: usize,
    pub cipher_algorithm: String,
    pub cipher_chaining: String,
    pub hash: HashAlgorithm,
    pub salt: Vec<u8>,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
}

/// Parsed agile `EncryptionInfo` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileEncryptionInfo {
    pub key_data: AgileKeyData,
    pub data_integrity: AgileDataIntegrity,
    pub key_encryptor: AgilePasswordKeyEncryptor,
}

// --- XML parsing ---------------------------------------------------------------------------

/// Namespace declarations introduced by one element, innermost last on the stack.
#[derive(Debug, Clone)]
struct NamespaceFrame {
    decls: Vec<(Vec<u8> /* prefix */, Vec<u8> /* uri */)>,
}

fn push_namespace_frame(
    stack: &mut Vec<NamespaceFrame>,
    elem: &BytesStart<'_>,
) -> Result<(), OffcryptoError> {
    let mut frame = NamespaceFrame { decls: Vec::new() };

    for attr in elem.attributes().with_checks(false) {
        let attr = attr.map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid XML attribute",
        })?;
        let key = attr.key.as_ref();
        if key == b"xmlns" {
            frame.decls.push((Vec::new(), attr.value.to_vec()));
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            frame.decls.push((prefix.to_vec(), attr.value.to_vec()));
        }
    }

    stack.push(frame);
    Ok(())
}

fn resolve_namespace_uri<'a>(stack: &'a [NamespaceFrame], prefix: &[u8]) -> Option<&'a [u8]> {
    for frame in stack.iter().rev() {
        for (p, uri) in &frame.decls {
            if p.as_slice() == prefix {
                return Some(uri.as_slice());
            }
        }
    }
    None
}

fn element_prefix(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[..idx])
        .unwrap_or(&[])
}

fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[idx + 1..])
        .unwrap_or(name)
}

#[derive(Default)]
struct ParseState {
    key_data: Option<AgileKeyData>,
    data_integrity: Option<AgileDataIntegrity>,
    key_encryptor: Option<AgilePasswordKeyEncryptor>,
    in_key_encryptor: bool,
    in_encrypted_key: bool,
}

/// Parse the agile XML descriptor; `xml_bytes` starts just past the 8-byte version prefix.
pub(crate) fn parse_agile_encryption_info(
    xml_bytes: &[u8],
) -> Result<AgileEncryptionInfo, OffcryptoError> {
    let xml = std::str::from_utf8(xml_bytes).map_err(|_| OffcryptoError::CorruptHeader {
        context: "agile EncryptionInfo XML is not valid UTF-8",
    })?;

    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut ns_stack: Vec<NamespaceFrame> = Vec::new();
    let mut state = ParseState::default();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|_| OffcryptoError::CorruptHeader {
                context: "agile EncryptionInfo XML parse error",
            })?;

        match event {
            XmlEvent::Start(ref e) => {
                push_namespace_frame(&mut ns_stack, e)?;
                handle_element(&ns_stack, e, &mut state, false)?;
            }
            XmlEvent::Empty(ref e) => {
                push_namespace_frame(&mut ns_stack, e)?;
                let handled = handle_element(&ns_stack, e, &mut state, true);
                ns_stack.pop();
                handled?;
            }
            XmlEvent::End(ref e) => {
                match local_name(e.name().as_ref()) {
                    b"keyEncryptor" => state.in_key_encryptor = false,
                    b"encryptedKey" => state.in_encrypted_key = false,
                    _ => {}
                }
                ns_stack.pop();
            }
            XmlEvent::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    Ok(AgileEncryptionInfo {
        key_data: state.key_data.ok_or(OffcryptoError::CorruptHeader {
            context: "missing <keyData> element",
        })?,
        data_integrity: state.data_integrity.ok_or(OffcryptoError::CorruptHeader {
            context: "missing <dataIntegrity> element",
        })?,
        key_encryptor: state.key_encryptor.ok_or(OffcryptoError::CorruptHeader {
            context: "no password key encryptor in <keyEncryptors>",
        })?,
    })
}

fn handle_element(
    ns_stack: &[NamespaceFrame],
    e: &BytesStart<'_>,
    state: &mut ParseState,
    is_empty: bool,
) -> Result<(), OffcryptoError> {
    let name = e.name();
    let local = local_name(name.as_ref());

    if state.in_key_encryptor && !state.in_encrypted_key {
        // Direct child of <keyEncryptor>: only the password encryptedKey is decryptable.
        // Certificate (and any other) encryptor kinds are rejected, not skipped.
        let ns = resolve_namespace_uri(ns_stack, element_prefix(name.as_ref()));
        if local != b"encryptedKey" || ns != Some(PASSWORD_KEY_ENCRYPTOR_NS.as_bytes()) {
            return Err(OffcryptoError::UnsupportedKeyEncryptorType);
        }
        if state.key_encryptor.is_some() {
            return Err(OffcryptoError::CorruptHeader {
                context: "more than one password key encryptor",
            });
        }
        state.key_encryptor = Some(parse_password_encrypted_key_attrs(e)?);
        if !is_empty {
            state.in_encrypted_key = true;
        }
        return Ok(());
    }

    match local {
        b"keyData" => state.key_data = Some(parse_key_data_attrs(e)?),
        b"dataIntegrity" => state.data_integrity = Some(parse_data_integrity_attrs(e)?),
        b"keyEncryptor" => {
            if !is_empty {
                state.in_key_encryptor = true;
            }
        }
        _ => {}
    }
    Ok(())
}

fn attr_string(value: &[u8]) -> Result<String, OffcryptoError> {
    std::str::from_utf8(value)
        .map(str::to_owned)
        .map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid UTF-8 attribute value",
        })
}

fn parse_key_data_attrs(e: &BytesStart<'_>) -> Result<AgileKeyData, OffcryptoError> {
    let mut salt_size: Option<usize> = None;
    let mut block_size: Option<usize> = None;
    let mut key_bits: Option<usize> = None;
    let mut hash_size: Option<usize> = None;
    let mut cipher_algorithm: Option<String> = None;
    let mut cipher_chaining: Option<String> = None;
    let mut hash_name: Option<String> = None;
    let mut salt: Option<Vec<u8>> = None;

    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid XML attribute",
        })?;
        let value = attr.value.as_ref();
        match local_name(attr.key.as_ref()) {
            b"saltSize" => salt_size = Some(parse_decimal_usize(value, "keyData.saltSize")?),
            b"blockSize" => block_size = Some(parse_decimal_usize(value, "keyData.blockSize")?),
            b"keyBits" => key_bits = Some(parse_decimal_usize(value, "keyData.keyBits")?),
            b"hashSize" => hash_size = Some(parse_decimal_usize(value, "keyData.hashSize")?),
            b"cipherAlgorithm" => cipher_algorithm = Some(attr_string(value)?),
            b"cipherChaining" => cipher_chaining = Some(attr_string(value)?),
            b"hashAlgorithm" => hash_name = Some(attr_string(value)?),
            b"saltValue" => salt = Some(decode_base64_attr(value)?),
            _ => {}
        }
    }

    let missing = |context| OffcryptoError::CorruptHeader { context };
    let salt_size = salt_size.ok_or_else(|| missing("missing keyData.saltSize"))?;
    let block_size = block_size.ok_or_else(|| missing("missing keyData.blockSize"))?;
    let key_bits = key_bits.ok_or_else(|| missing("missing keyData.keyBits"))?;
    let hash_size = hash_size.ok_or_else(|| missing("missing keyData.hashSize"))?;
    let cipher_algorithm =
        cipher_algorithm.ok_or_else(|| missing("missing keyData.cipherAlgorithm"))?;
    let cipher_chaining =
        cipher_chaining.ok_or_else(|| missing("missing keyData.cipherChaining"))?;
    let hash_name = hash_name.ok_or_else(|| missing("missing keyData.hashAlgorithm"))?;
    let salt = salt.ok_or_else(|| missing("missing keyData.saltValue"))?;

    let hash = HashAlgorithm::parse_agile_name(&hash_name)?;
    validate_cipher_names(
        &cipher_algorithm,
        &cipher_chaining,
        "keyData.cipherAlgorithm must be AES",
        "keyData.cipherChaining must be ChainingModeCBC",
    )?;
    if block_size != AES_BLOCK_LEN {
        return Err(OffcryptoError::CorruptHeader {
            context: "keyData.blockSize must be 16",
        });
    }
    if hash_size != hash.digest_len() {
        return Err(OffcryptoError::CorruptHeader {
            context: "keyData.hashSize does not match the hash algorithm",
        });
    }
    if salt_size != salt.len() || salt.len() != 16 {
        return Err(OffcryptoError::CorruptHeader {
            context: "keyData salt must be 16 bytes and match saltSize",
        });
    }

    Ok(AgileKeyData {
        salt_size,
        block_size,
        key_bits,
        hash_size,
        cipher_algorithm,
        cipher_chaining,
        hash,
        salt,
    })
}

fn parse_data_integrity_attrs(e: &BytesStart<'_>) -> Result<AgileDataIntegrity, OffcryptoError> {
    let mut encrypted_hmac_key: Option<Vec<u8>> = None;
    let mut encrypted_hmac_value: Option<Vec<u8>> = None;

    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid XML attribute",
        })?;
        match local_name(attr.key.as_ref()) {
            b"encryptedHmacKey" => {
                encrypted_hmac_key = Some(decode_base64_attr(attr.value.as_ref())?)
            }
            b"encryptedHmacValue" => {
                encrypted_hmac_value = Some(decode_base64_attr(attr.value.as_ref())?)
            }
            _ => {}
        }
    }

    Ok(AgileDataIntegrity {
        encrypted_hmac_key: encrypted_hmac_key.ok_or(OffcryptoError::CorruptHeader {
            context: "missing dataIntegrity.encryptedHmacKey",
        })?,
        encrypted_hmac_value: encrypted_hmac_value.ok_or(OffcryptoError::CorruptHeader {
            context: "missing dataIntegrity.encryptedHmacValue",
        })?,
    })
}

fn parse_password_encrypted_key_attrs(
    e: &BytesStart<'_>,
) -> Result<AgilePasswordKeyEncryptor, OffcryptoError> {
    let mut spin_count: Option<u32> = None;
    let mut salt_size: Option<usize> = None;
    let mut block_size: Option<usize> = None;
    let mut key_bits: Option<usize> = None;
    let mut hash_size: Option<usize> = None;
    let mut cipher_algorithm: Option<String> = None;
    let mut cipher_chaining: Option<String> = None;
    let mut hash_name: Option<String> = None;
    let mut salt: Option<Vec<u8>> = None;
    let mut encrypted_verifier_hash_input: Option<Vec<u8>> = None;
    let mut encrypted_verifier_hash_value: Option<Vec<u8>> = None;
    let mut encrypted_key_value: Option<Vec<u8>> = None;

    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid XML attribute",
        })?;
        let value = attr.value.as_ref();
        match local_name(attr.key.as_ref()) {
            b"spinCount" => spin_count = Some(parse_decimal_u32(value, "encryptedKey.spinCount")?),
            b"saltSize" => salt_size = Some(parse_decimal_usize(value, "encryptedKey.saltSize")?),
            b"blockSize" => {
                block_size = Some(parse_decimal_usize(value, "encryptedKey.blockSize")?)
            }
            b"keyBits" => key_bits = Some(parse_decimal_usize(value, "encryptedKey.keyBits")?),
            b"hashSize" => hash_size = Some(parse_decimal_usize(value, "encryptedKey.hashSize")?),
            b"cipherAlgorithm" => cipher_algorithm = Some(attr_string(value)?),
            b"cipherChaining" => cipher_chaining = Some(attr_string(value)?),
            b"hashAlgorithm" => hash_name = Some(attr_string(value)?),
            b"saltValue" => salt = Some(decode_base64_attr(value)?),
            b"encryptedVerifierHashInput" => {
                encrypted_verifier_hash_input = Some(decode_base64_attr(value)?)
            }
            b"encryptedVerifierHashValue" => {
                encrypted_verifier_hash_value = Some(decode_base64_attr(value)?)
            }
            b"encryptedKeyValue" => encrypted_key_value = Some(decode_base64_attr(value)?),
            _ => {}
        }
    }

    let missing = |context| OffcryptoError::CorruptHeader { context };
    let spin_count = spin_count.ok_or_else(|| missing("missing encryptedKey.spinCount"))?;
    let salt_size = salt_size.ok_or_else(|| missing("missing encryptedKey.saltSize"))?;
    let block_size = block_size.ok_or_else(|| missing("missing encryptedKey.blockSize"))?;
    let key_bits = key_bits.ok_or_else(|| missing("missing encryptedKey.keyBits"))?;
    let hash_size = hash_size.ok_or_else(|| missing("missing encryptedKey.hashSize"))?;
    let cipher_algorithm =
        cipher_algorithm.ok_or_else(|| missing("missing encryptedKey.cipherAlgorithm"))?;
    let cipher_chaining =
        cipher_chaining.ok_or_else(|| missing("missing encryptedKey.cipherChaining"))?;
    let hash_name = hash_name.ok_or_else(|| missing("missing encryptedKey.hashAlgorithm"))?;
    let salt = salt.ok_or_else(|| missing("missing encryptedKey.saltValue"))?;
    let encrypted_verifier_hash_input = encrypted_verifier_hash_input
        .ok_or_else(|| missing("missing encryptedKey.encryptedVerifierHashInput"))?;
    let encrypted_verifier_hash_value = encrypted_verifier_hash_value
        .ok_or_else(|| missing("missing encryptedKey.encryptedVerifierHashValue"))?;
    let encrypted_key_value =
        encrypted_key_value.ok_or_else(|| missing("missing encryptedKey.encryptedKeyValue"))?;

    let hash = HashAlgorithm::parse_agile_name(&hash_name)?;
    validate_cipher_names(
        &cipher_algorithm,
        &cipher_chaining,
        "encryptedKey.cipherAlgorithm must be AES",
        "encryptedKey.cipherChaining must be ChainingModeCBC",
    )?;
    if !matches!(key_bits, 128 | 192 | 256) {
        return Err(OffcryptoError::UnsupportedCipher {
            context: "encryptedKey.keyBits is not an AES key size",
        });
    }
    if block_size != AES_BLOCK_LEN {
        return Err(OffcryptoError::CorruptHeader {
            context: "encryptedKey.blockSize must be 16",
        });
    }
    if hash_size != hash.digest_len() {
        return Err(OffcryptoError::CorruptHeader {
            context: "encryptedKey.hashSize does not match the hash algorithm",
        });
    }
    if salt_size != salt.len() || salt.len() != 16 {
        return Err(OffcryptoError::CorruptHeader {
            context: "encryptedKey salt must be 16 bytes and match saltSize",
        });
    }
    for (blob, context) in [
        (
            &encrypted_verifier_hash_input,
            "encryptedVerifierHashInput must be non-empty and AES block aligned",
        ),
        (
            &encrypted_verifier_hash_value,
            "encryptedVerifierHashValue must be non-empty and AES block aligned",
        ),
        (
            &encrypted_key_value,
            "encryptedKeyValue must be non-empty and AES block aligned",
        ),
    ] {
        if blob.is_empty() || blob.len() % AES_BLOCK_LEN != 0 {
            return Err(OffcryptoError::CorruptHeader { context });
        }
    }

    Ok(AgilePasswordKeyEncryptor {
        spin_count,
        salt_size,
        block_size,
        key_bits,
        hash_size,
        cipher_algorithm,
        cipher_chaining,
        hash,
        salt,
        encrypted_verifier_hash_input,
        encrypted_verifier_hash_value,
        encrypted_key_value,
    })
}

fn validate_cipher_names(
    cipher_algorithm: &str,
    cipher_chaining: &str,
    algorithm_context: &'static str,
    chaining_context: &'static str,
) -> Result<(), OffcryptoError> {
    if cipher_algorithm != "AES" {
        return Err(OffcryptoError::UnsupportedCipher {
            context: algorithm_context,
        });
    }
    if cipher_chaining != "ChainingModeCBC" {
        return Err(OffcryptoError::UnsupportedCipher {
            context: chaining_context,
        });
    }
    Ok(())
}

// --- Password verification and package decryption ------------------------------------------

/// Derive the package key from the password, verifying the password first.
///
/// The expensive iterated hash is computed once and reused for all three block-key
/// derivations. A verifier mismatch returns [`OffcryptoError::BadPassword`] before
/// `encryptedKeyValue` is touched.
pub fn agile_package_key(
    info: &AgileEncryptionInfo,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, OffcryptoError> {
    let ke = &info.key_encryptor;
    let key_len = ke.key_bits / 8;

    let password_utf16 = Zeroizing::new(password_to_utf16le_bytes(password));
    let h = kdf::iterated_hash(&password_utf16, &ke.salt, ke.hash, ke.spin_count);

    let input_key = kdf::derive_block_key(&h, &VERIFIER_HASH_INPUT_BLOCK, ke.hash, ke.key_bits)?;
    let verifier_hash_input =
        aes_cbc_decrypt(&ke.encrypted_verifier_hash_input, &input_key, &ke.salt)?;
    let verifier_hash_input = verifier_hash_input
        .get(..VERIFIER_HASH_INPUT_LEN)
        .ok_or(OffcryptoError::CorruptHeader {
            context: "decrypted verifierHashInput is truncated",
        })?;

    let value_key = kdf::derive_block_key(&h, &VERIFIER_HASH_VALUE_BLOCK, ke.hash, ke.key_bits)?;
    let verifier_hash_value =
        aes_cbc_decrypt(&ke.encrypted_verifier_hash_value, &value_key, &ke.salt)?;

    let calculated = ke.hash.digest(verifier_hash_input);
    let expected = verifier_hash_value
        .get(..calculated.len())
        .ok_or(OffcryptoError::BadPassword)?;
    if !ct_eq(&calculated, expected) {
        return Err(OffcryptoError::BadPassword);
    }

    let key_value_key = kdf::derive_block_key(&h, &KEY_VALUE_BLOCK, ke.hash, ke.key_bits)?;
    let key_value = Zeroizing::new(aes_cbc_decrypt(
        &ke.encrypted_key_value,
        &key_value_key,
        &ke.salt,
    )?);
    if key_value.len() < key_len {
        return Err(OffcryptoError::CorruptHeader {
            context: "decrypted keyValue is shorter than keyBits",
        });
    }
    Ok(Zeroizing::new(key_value[..key_len].to_vec()))
}

/// `Hash(salt || block)` truncated to one AES block; used for segment and HMAC-field IVs.
fn derive_iv(salt: &[u8], block: &[u8], hash_alg: HashAlgorithm) -> [u8; AES_BLOCK_LEN] {
    let mut buf = Vec::with_capacity(salt.len() + block.len());
    buf.extend_from_slice(salt);
    buf.extend_from_slice(block);
    let digest = hash_alg.digest(&buf);

    let mut iv = [0u8; AES_BLOCK_LEN];
    let n = digest.len().min(AES_BLOCK_LEN);
    iv[..n].copy_from_slice(&digest[..n]);
    iv
}

/// Decrypt an agile-scheme `EncryptedPackage` stream.
pub(crate) fn decrypt_agile_package(
    info: &AgileEncryptionInfo,
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
    if let Some(max_spin) = options.limits.max_spin_count {
        if info.key_encryptor.spin_count > max_spin {
            return Err(OffcryptoError::CorruptHeader {
                context: "encryptedKey.spinCount exceeds the configured limit",
            });
        }
    }

    // Mandatory password verification; nothing of the package is decrypted on mismatch.
    let key = agile_package_key(info, password)?;

    if options.verify_integrity {
        verify_data_integrity(info, &key, encrypted_package)?;
    }

    // The segment IV is rederived per index from the key-data salt; segments are ciphertext
    // chunks, so the final (possibly short) segment is still block aligned.
    let mut out = Vec::with_capacity(ciphertext.len());
    for (index, segment) in ciphertext.chunks(SEGMENT_LEN).enumerate() {
        let index = u32::try_from(index).map_err(|_| OffcryptoError::CorruptHeader {
            context: "segment counter overflow",
        })?;
        let iv = derive_iv(&info.key_data.salt, &index.to_le_bytes(), info.key_encryptor.hash);
        let mut plain = aes_cbc_decrypt(segment, &key, &iv)?;
        out.append(&mut plain);
    }
    out.truncate(total_size as usize);
    Ok(out)
}

/// Verify the `dataIntegrity` HMAC over the entire `EncryptedPackage` stream bytes (size
/// prefix included).
pub(crate) fn verify_data_integrity(
    info: &AgileEncryptionInfo,
    key: &[u8],
    encrypted_package_stream: &[u8],
) -> Result<(), OffcryptoError> {
    let hash = info.key_data.hash;
    let digest_len = hash.digest_len();

    let key_iv = derive_iv(&info.key_data.salt, &HMAC_KEY_BLOCK, hash);
    let hmac_key_buf = Zeroizing::new(aes_cbc_decrypt(
        &info.data_integrity.encrypted_hmac_key,
        key,
        &key_iv,
    )?);
    let hmac_key = hmac_key_buf
        .get(..digest_len)
        .ok_or(OffcryptoError::CorruptHeader {
            context: "decrypted HMAC key is shorter than the hash size",
        })?;

    let value_iv = derive_iv(&info.key_data.salt, &HMAC_VALUE_BLOCK, hash);
    let hmac_value_buf = aes_cbc_decrypt(&info.data_integrity.encrypted_hmac_value, key, &value_iv)?;
    let expected = hmac_value_buf
        .get(..digest_len)
        .ok_or(OffcryptoError::CorruptHeader {
            context: "decrypted HMAC value is shorter than the hash size",
        })?;

    let computed = hmac_digest(hash, hmac_key, encrypted_package_stream)?;
    if !ct_eq(&computed, expected) {
        return Err(OffcryptoError::IntegrityCheckFailed);
    }
    Ok(())
}

/// Build the descriptor skeleton used by the (unimplemented) encrypt path.
///
/// Only the structural shape is produced; salts, verifier fields, and the encrypted key are
/// left empty until a real encrypt path exists.
pub(crate) fn encryption_descriptor() -> AgileEncryptionInfo {
    AgileEncryptionInfo {
        key_data: AgileKeyData {
            salt_size: 16,
            block_size: AES_BLOCK_LEN,
            key_bits: 256,
            hash_size: HashAlgorithm::Sha512.digest_len(),
            cipher_algorithm: "AES".to_string(),
            cipher_chaining: "ChainingModeCBC".to_string(),
            hash: HashAlgorithm::Sha512,
            salt: Vec::new(),
        },
        data_integrity: AgileDataIntegrity {
            encrypted_hmac_key: Vec::new(),
            encrypted_hmac_value: Vec::new(),
        },
        key_encryptor: AgilePasswordKeyEncryptor {
            spin_count: 100_000,
            salt_size: 16,
            block_size: AES_BLOCK_LEN,
            key_bits: 256,
            hash_size: HashAlgorithm::Sha512.digest_len(),
            cipher_algorithm: "AES".to_string(),
            cipher_chaining: "ChainingModeCBC".to_string(),
            hash: HashAlgorithm::Sha512,
            salt: Vec::new(),
            encrypted_verifier_hash_input: Vec::new(),
            encrypted_verifier_hash_value: Vec::new(),
            encrypted_key_value: Vec::new(),
        },
    }
}
