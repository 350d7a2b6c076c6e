//! Primitive cryptographic operations used across the kage crates.

use std::fmt;

use chacha20poly1305::{
    aead::{self, Aead, KeyInit},
    ChaCha20Poly1305,
};
use hkdf::Hkdf;
use sha2::Sha256;

/// The length of a Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

/// Errors returned by [`aead_decrypt`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadError {
    /// The ciphertext did not have the length of the expected plaintext plus a tag.
    IncorrectCiphertextSize,
    /// The ciphertext failed to authenticate under the given key.
    Unauthenticated,
}

impl fmt::Display for AeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AeadError::IncorrectCiphertextSize => write!(f, "incorrect ciphertext size"),
            AeadError::Unauthenticated => write!(f, "ciphertext failed to authenticate"),
        }
    }
}

impl std::error::Error for AeadError {}

impl From<aead::Error> for AeadError {
    fn from(_: aead::Error) -> Self {
        AeadError::Unauthenticated
    }
}

/// `encrypt[key](plaintext)` - encrypts a message with a one-time key.
///
/// ChaCha20-Poly1305 from [RFC 7539] with a zero nonce.
///
/// [RFC 7539]: https://tools.ietf.org/html/rfc7539
pub fn aead_encrypt(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let c = ChaCha20Poly1305::new(key.into());
    c.encrypt(&[0; 12].into(), plaintext)
        .expect("we won't overflow the ChaCha20 block counter")
}

/// `decrypt[key](ciphertext)` - decrypts a message of an expected fixed size.
///
/// ChaCha20-Poly1305 from [RFC 7539] with a zero nonce.
///
/// The message size is checked before the cipher runs, so a ciphertext crafted to
/// decrypt under multiple keys is limited to the expected size.
///
/// [RFC 7539]: https://tools.ietf.org/html/rfc7539
pub fn aead_decrypt(key: &[u8; 32], size: usize, ciphertext: &[u8]) -> Result<Vec<u8>, AeadError> {
    if ciphertext.len() != size + TAG_LEN {
        return Err(AeadError::IncorrectCiphertextSize);
    }

    let c = ChaCha20Poly1305::new(key.into());
    Ok(c.decrypt(&[0; 12].into(), ciphertext)?)
}

/// `HKDF[salt, label](key, 32)`
///
/// HKDF from [RFC 5869] with SHA-256. An empty `salt` is equivalent to no salt.
///
/// [RFC 5869]: https://tools.ietf.org/html/rfc5869
pub fn hkdf(salt: &[u8], label: &[u8], ikm: &[u8]) -> [u8; 32] {
    let mut okm = [0; 32];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(label, &mut okm)
        .expect("okm is the correct length");
    okm
}
