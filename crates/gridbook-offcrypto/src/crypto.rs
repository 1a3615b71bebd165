//! Thin wrappers over the RustCrypto primitives used by both encryption schemes.
//!
//! All AES entry points validate key and ciphertext framing up front and return structured
//! errors; nothing in this module panics on malformed input.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac as _};
use sha1::{Digest as _, Sha1};
use sha2::Sha512;

use crate::OffcryptoError;

pub(crate) const AES_BLOCK_LEN: usize = 16;

/// Hash algorithms recognized by both `EncryptionInfo` formats.
///
/// The agile XML names its hash in the `hashAlgorithm` attribute; the standard binary header
/// fixes SHA-1 via the CryptoAPI `AlgIDHash` constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha512,
}

impl HashAlgorithm {
    /// Parse the `hashAlgorithm` attribute of an agile descriptor.
    pub(crate) fn parse_agile_name(name: &str) -> Result<Self, OffcryptoError> {
        match name {
            "SHA1" => Ok(HashAlgorithm::Sha1),
            "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(OffcryptoError::UnsupportedHash {
                context: "hashAlgorithm must be SHA1 or SHA512",
            }),
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Hash `data` into `out`, which must be exactly [`Self::digest_len`] bytes.
    ///
    /// Used by the key-derivation spin loop to avoid allocating a fresh digest per round.
    pub(crate) fn digest_into(self, data: &[u8], out: &mut [u8]) {
        match self {
            HashAlgorithm::Sha1 => out.copy_from_slice(&Sha1::digest(data)),
            HashAlgorithm::Sha512 => out.copy_from_slice(&Sha512::digest(data)),
        }
    }
}

pub(crate) fn aes_ecb_decrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<(), OffcryptoError> {
    if buf.len() % AES_BLOCK_LEN != 0 {
        return Err(OffcryptoError::CorruptHeader {
            context: "AES-ECB ciphertext length is not a multiple of 16",
        });
    }

    fn decrypt_with<C>(key: &[u8], buf: &mut [u8]) -> Result<(), OffcryptoError>
    where
        C: BlockDecrypt + KeyInit,
    {
        let cipher = C::new_from_slice(key).map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid AES key length",
        })?;
        for block in buf.chunks_mut(AES_BLOCK_LEN) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    match key.len() {
        16 => decrypt_with::<Aes128>(key, buf),
        24 => decrypt_with::<Aes192>(key, buf),
        32 => decrypt_with::<Aes256>(key, buf),
        _ => Err(OffcryptoError::CorruptHeader {
            context: "invalid AES key length",
        }),
    }
}

pub(crate) fn aes_cbc_decrypt(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
) -> Result<Vec<u8>, OffcryptoError> {
    if ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(OffcryptoError::CorruptHeader {
            context: "AES-CBC ciphertext length is not a multiple of 16",
        });
    }
    let iv = iv.get(..AES_BLOCK_LEN).ok_or(OffcryptoError::CorruptHeader {
        context: "AES-CBC IV must be at least 16 bytes",
    })?;

    fn decrypt_with<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), OffcryptoError>
    where
        C: BlockDecryptMut + KeyIvInit,
    {
        let cipher = C::new_from_slices(key, iv).map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid AES key length",
        })?;
        cipher
            .decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|_| OffcryptoError::CorruptHeader {
                context: "AES-CBC decryption failed",
            })?;
        Ok(())
    }

    let mut buf = ciphertext.to_vec();
    match key.len() {
        16 => decrypt_with::<cbc::Decryptor<Aes128>>(key, iv, &mut buf)?,
        24 => decrypt_with::<cbc::Decryptor<Aes192>>(key, iv, &mut buf)?,
        32 => decrypt_with::<cbc::Decryptor<Aes256>>(key, iv, &mut buf)?,
        _ => {
            return Err(OffcryptoError::CorruptHeader {
                context: "invalid AES key length",
            })
        }
    }
    Ok(buf)
}

/// HMAC over `data` keyed with `key`, using the digest picked by `hash_alg`.
pub(crate) fn hmac_digest(
    hash_alg: HashAlgorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, OffcryptoError> {
    let out = match hash_alg {
        HashAlgorithm::Sha1 => {
            let mut mac = <Hmac<Sha1> as hmac::Mac>::new_from_slice(key).map_err(|_| {
                OffcryptoError::CorruptHeader {
                    context: "invalid HMAC key",
                }
            })?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut mac = <Hmac<Sha512> as hmac::Mac>::new_from_slice(key).map_err(|_| {
                OffcryptoError::CorruptHeader {
                    context: "invalid HMAC key",
                }
            })?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncrypt;

    #[test]
    fn ecb_rejects_unaligned_ciphertext() {
        let mut buf = vec![0u8; 15];
        let err = aes_ecb_decrypt_in_place(&[0u8; 16], &mut buf).unwrap_err();
        assert!(matches!(err, OffcryptoError::CorruptHeader { .. }));
    }

    #[test]
    fn ecb_rejects_bad_key_length() {
        let mut buf = vec![0u8; 16];
        let err = aes_ecb_decrypt_in_place(&[0u8; 17], &mut buf).unwrap_err();
        assert!(matches!(err, OffcryptoError::CorruptHeader { .. }));
    }

    #[test]
    fn cbc_rejects_short_iv() {
        let err = aes_cbc_decrypt(&[0u8; 16], &[0u8; 16], &[0u8; 8]).unwrap_err();
        assert!(matches!(err, OffcryptoError::CorruptHeader { .. }));
    }

    #[test]
    fn ecb_roundtrips_a_block() {
        let key = [0x42u8; 16];
        let plain = *b"sixteen byte msg";

        let cipher = Aes128::new_from_slice(&key).expect("key");
        let mut block = GenericArray::clone_from_slice(&plain);
        cipher.encrypt_block(&mut block);

        let mut buf = block.to_vec();
        aes_ecb_decrypt_in_place(&key, &mut buf).expect("decrypt");
        assert_eq!(buf, plain);
    }

    #[test]
    fn cbc_roundtrips_two_blocks() {
        use cipher::BlockEncryptMut;

        let key = [0x24u8; 16];
        let iv = [0x99u8; 16];
        let plain = *b"exactly thirty-two bytes of data";

        let mut buf = plain.to_vec();
        cbc::Encryptor::<Aes128>::new_from_slices(&key, &iv)
            .expect("init")
            .encrypt_padded_mut::<NoPadding>(&mut buf, plain.len())
            .expect("encrypt");

        let decrypted = aes_cbc_decrypt(&buf, &key, &iv).expect("decrypt");
        assert_eq!(decrypted, plain);
    }
}
