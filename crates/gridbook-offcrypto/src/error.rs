use thiserror::Error;

/// Errors returned by this crate.
///
/// All errors are terminal for the current call; only [`OffcryptoError::BadPassword`] is worth
/// retrying (with a different password).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffcryptoError {
    /// A zero-length container was supplied.
    #[error("empty input")]
    EmptyInput,
    /// The input is not a valid OLE/CFB compound document.
    #[error("not an OLE compound document")]
    MalformedContainer,
    /// A header field is out of range, a length exceeds the remaining buffer, a reserved field is
    /// nonzero, or a provider string is not one of the known values.
    #[error("corrupt encryption header: {context}")]
    CorruptHeader { context: &'static str },
    /// The header describes a cipher other than AES.
    #[error("unsupported cipher algorithm: {context}")]
    UnsupportedCipher { context: &'static str },
    /// The header describes a hash algorithm outside the supported set.
    #[error("unsupported hash algorithm: {context}")]
    UnsupportedHash { context: &'static str },
    /// `<keyEncryptors>` carries an encryptor other than the password kind (e.g. certificate).
    #[error("unsupported key encryptor type")]
    UnsupportedKeyEncryptorType,
    /// The `EncryptionInfo` version word identifies a scheme we do not decrypt.
    #[error("unsupported encryption version {major}.{minor}")]
    UnsupportedEncryptionVersion { major: u16, minor: u16 },
    /// The version flags describe a configuration we do not decrypt (extensible encryption,
    /// non-AES CryptoAPI, ...).
    #[error("unsupported encryption configuration: {context}")]
    UnsupportedConfiguration { context: &'static str },
    /// The password verifier did not match the supplied password.
    #[error("invalid password")]
    BadPassword,
    /// The optional `dataIntegrity` HMAC over the `EncryptedPackage` stream did not match.
    #[error("data integrity check failed")]
    IntegrityCheckFailed,
    /// The declared plaintext size exceeds the configured output limit.
    #[error("decrypted package size {total_size} exceeds limit {max}")]
    OutputTooLarge { total_size: u64, max: u64 },
}
