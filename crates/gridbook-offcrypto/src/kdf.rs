//! Password-based key derivation shared by both encryption schemes.
//!
//! Both schemes start from the same iterated hash chain (the "spin" loop) and then diverge:
//! the standard scheme expands the chain output with the CryptoAPI `CryptDeriveKey`
//! ipad/opad construction, while the agile scheme mixes in a fixed 8-byte block key per
//! derived-key purpose.
//!
//! Derivation never fails on a wrong password; it simply produces a key that the verifier
//! (or, for the standard scheme, the downstream package parser) rejects.

use zeroize::Zeroizing;

use crate::crypto::HashAlgorithm;
use crate::OffcryptoError;

/// The fixed spin count used by the standard (CryptoAPI) scheme.
///
/// The standard `EncryptionInfo` stream does not carry this value; Office uses a fixed 50k
/// iteration count for the password hash transform.
pub const STANDARD_SPIN_COUNT: u32 = 50_000;

/// Compute the iterated password hash `Hn`.
///
/// ```text
/// H0 = Hash(salt || password_utf16le)
/// for i in 0..spin_count: H = Hash(LE32(i) || H)
/// ```
///
/// The iterator prefix is re-emitted as a little-endian u32 every round rather than aliasing
/// an integer over the round buffer; the accumulator is always the previous round's digest.
pub fn iterated_hash(
    password_utf16le: &[u8],
    salt: &[u8],
    hash_alg: HashAlgorithm,
    spin_count: u32,
) -> Zeroizing<Vec<u8>> {
    let digest_len = hash_alg.digest_len();
    let mut h = Zeroizing::new(vec![0u8; digest_len]);

    let mut seed = Zeroizing::new(Vec::with_capacity(salt.len() + password_utf16le.len()));
    seed.extend_from_slice(salt);
    seed.extend_from_slice(password_utf16le);
    hash_alg.digest_into(&seed, &mut h);

    // Reuse one fixed-size round buffer instead of allocating per iteration.
    let mut round = Zeroizing::new(vec![0u8; 4 + digest_len]);
    for i in 0..spin_count {
        round[..4].copy_from_slice(&i.to_le_bytes());
        round[4..].copy_from_slice(&h);
        hash_alg.digest_into(&round, &mut h);
    }

    h
}

/// Compute `Hfinal = Hash(Hn || LE32(block))`, the standard scheme's block-mixing step.
pub fn block_hash(h: &[u8], block: u32, hash_alg: HashAlgorithm) -> Vec<u8> {
    let mut buf = Vec::with_capacity(h.len() + 4);
    buf.extend_from_slice(h);
    buf.extend_from_slice(&block.to_le_bytes());
    hash_alg.digest(&buf)
}

/// CryptoAPI `CryptDeriveKey` expansion from a hash value (standard scheme).
///
/// `X1 = Hash((0x36 * 64) ^ hfinal)`, `X2 = Hash((0x5C * 64) ^ hfinal)`, key is
/// `(X1 || X2)[..key_bits / 8]`.
pub fn crypt_derive_key(
    h_final: &[u8],
    hash_alg: HashAlgorithm,
    key_bits: usize,
) -> Result<Zeroizing<Vec<u8>>, OffcryptoError> {
    if key_bits == 0 || key_bits % 8 != 0 {
        return Err(OffcryptoError::CorruptHeader {
            context: "keySize must be a positive multiple of 8 bits",
        });
    }
    let key_len = key_bits / 8;

    let mut buf1 = Zeroizing::new([0x36u8; 64]);
    let mut buf2 = Zeroizing::new([0x5Cu8; 64]);
    for (i, b) in h_final.iter().take(64).enumerate() {
        buf1[i] ^= b;
        buf2[i] ^= b;
    }
    let x1 = Zeroizing::new(hash_alg.digest(&buf1[..]));
    let x2 = Zeroizing::new(hash_alg.digest(&buf2[..]));

    let mut out = Zeroizing::new(Vec::with_capacity(x1.len() + x2.len()));
    out.extend_from_slice(&x1);
    out.extend_from_slice(&x2);
    if key_len > out.len() {
        return Err(OffcryptoError::CorruptHeader {
            context: "keySize exceeds the derivable key material",
        });
    }
    out.truncate(key_len);
    Ok(out)
}

/// Agile per-purpose key: `Hash(Hn || block_key)` resized to `key_bits / 8` bytes.
///
/// The result is zero-extended when the digest is shorter than the requested key and
/// truncated otherwise.
pub fn derive_block_key(
    h: &[u8],
    block_key: &[u8; 8],
    hash_alg: HashAlgorithm,
    key_bits: usize,
) -> Result<Zeroizing<Vec<u8>>, OffcryptoError> {
    if key_bits == 0 || key_bits % 8 != 0 {
        return Err(OffcryptoError::CorruptHeader {
            context: "keyBits must be a positive multiple of 8",
        });
    }
    let key_len = key_bits / 8;

    let mut buf = Zeroizing::new(Vec::with_capacity(h.len() + block_key.len()));
    buf.extend_from_slice(h);
    buf.extend_from_slice(block_key);

    let mut key = Zeroizing::new(hash_alg.digest(&buf));
    key.resize(key_len, 0);
    Ok(key)
}
