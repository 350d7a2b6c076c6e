//! *Library for encrypting and decrypting age files*
//!
//! age is a simple, secure, and modern encryption format with small explicit keys, no
//! config options, and UNIX-style composability.
//!
//! The age specification is available at <https://age-encryption.org/v1>.
//!
//! An age file is a textual header of recipient stanzas, each wrapping the same random
//! file key, followed by a MAC over the header and the payload encrypted with
//! [STREAM](stream). This crate implements the two native recipient types:
//! [`x25519`] public keys and [`scrypt`] passphrases.
//!
//! # Examples
//!
//! ## Key-based encryption
//!
//! ```
//! use std::io::{Read, Write};
//! use std::iter;
//!
//! # fn run_main() -> Result<(), Box<dyn std::error::Error>> {
//! let key = kage::x25519::Identity::generate();
//! let pubkey = key.to_public();
//!
//! let plaintext = b"Hello world!";
//!
//! // Encrypt the plaintext to a ciphertext...
//! let encrypted = {
//!     let encryptor = kage::Encryptor::with_recipients(iter::once(&pubkey as _))?;
//!
//!     let mut encrypted = vec![];
//!     let mut writer = encryptor.wrap_output(&mut encrypted)?;
//!     writer.write_all(plaintext)?;
//!     writer.finish()?;
//!
//!     encrypted
//! };
//!
//! // ... and decrypt the obtained ciphertext to the plaintext again.
//! let decrypted = {
//!     let decryptor = kage::Decryptor::new(&encrypted[..])?;
//!
//!     let mut decrypted = vec![];
//!     let mut reader = decryptor.decrypt(iter::once(&key as &dyn kage::Identity))?;
//!     reader.read_to_end(&mut decrypted)?;
//!
//!     decrypted
//! };
//!
//! assert_eq!(decrypted, plaintext);
//! # Ok(())
//! # }
//! # run_main().unwrap();
//! ```
//!
//! ## Passphrase-based encryption
//!
//! ```
//! use kage::secrecy::Secret;
//!
//! # fn run_main() -> Result<(), Box<dyn std::error::Error>> {
//! let plaintext = b"Hello world!";
//! let passphrase = "this is not a good passphrase";
//!
//! let mut recipient = kage::scrypt::Recipient::new(Secret::new(passphrase.to_owned()));
//! // A low work factor keeps this example fast. Use the default in practice.
//! recipient.set_work_factor(10);
//!
//! let encrypted = kage::encrypt_and_armor(&recipient, plaintext)?;
//! assert!(encrypted.starts_with("-----BEGIN AGE ENCRYPTED FILE-----"));
//!
//! let identity = kage::scrypt::Identity::new(Secret::new(passphrase.to_owned()));
//! let decrypted = kage::decrypt(&identity, encrypted.as_bytes())?;
//!
//! assert_eq!(decrypted, plaintext);
//! # Ok(())
//! # }
//! # run_main().unwrap();
//! ```

#![forbid(unsafe_code)]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

use std::collections::HashSet;

mod error;
mod format;
mod i18n;
mod keys;
mod primitives;
mod protocol;
mod simple;
mod util;

pub mod encoding;
pub mod scrypt;
pub mod x25519;

pub use error::{DecryptError, EncryptError, HeaderError, UnwrapError};
pub use format::{AgeFile, Header, MAC_BYTES, NONCE_BYTES};
pub use i18n::localizer;
pub use kage_core::{
    format::{FileKey, Stanza},
    secrecy,
};
pub use primitives::{armor, stream};
pub use protocol::{Decryptor, Encryptor};
pub use simple::{
    decrypt, decrypt_file, decrypt_stream, encrypt, encrypt_and_armor, encrypt_stream,
    encrypt_to_file,
};

/// A public key or other value that can wrap an opaque file key to a recipient stanza.
///
/// Implementations of this trait might represent more than one recipient.
pub trait Recipient {
    /// Wraps the given file key, returning stanzas to be placed in an age file header.
    ///
    /// Implementations MUST NOT return more than one stanza per "actual recipient".
    ///
    /// This method is part of the `Recipient` trait to expose age's [one joint] for
    /// external implementations. You should not need to call this directly; instead, pass
    /// recipients to [`Encryptor::with_recipients`].
    ///
    /// [one joint]: https://www.imperialviolet.org/2016/05/16/agility.html
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError>;

    /// Returns this recipient as a [`RecipientWithLabels`], if it attaches labels to
    /// its stanzas.
    ///
    /// Recipients without labels are treated as having the empty label set.
    fn labeled(&self) -> Option<&dyn RecipientWithLabels> {
        None
    }

    /// Returns `true` if this recipient wraps the file key with a passphrase.
    ///
    /// A passphrase recipient must be the only recipient of a file, because anyone who
    /// can decrypt a file can also modify the header of any other file that shares its
    /// file key.
    fn is_passphrase(&self) -> bool {
        false
    }
}

/// A [`Recipient`] that also returns a set of labels describing its stanzas.
///
/// All recipients of a file must return the same set of labels. This lets a recipient
/// type enforce properties of the whole file, such as "every recipient is
/// post-quantum secure", without having to know the other recipient types.
pub trait RecipientWithLabels: Recipient {
    /// Wraps the given file key, returning stanzas to be placed in an age file header,
    /// and the labels that apply to them.
    ///
    /// Labels must be age "arbitrary string"s (`1*VCHAR` in ABNF).
    fn wrap_file_key_with_labels(
        &self,
        file_key: &FileKey,
    ) -> Result<(Vec<Stanza>, HashSet<String>), EncryptError>;
}

/// A private key or other value that can unwrap an opaque file key from a recipient
/// stanza.
pub trait Identity {
    /// Attempts to unwrap the given stanza with this identity.
    ///
    /// This method is part of the `Identity` trait to expose age's [one joint] for
    /// external implementations. You should not need to call this directly; instead, pass
    /// identities to [`Decryptor::decrypt`].
    ///
    /// Returns:
    /// - `Some(Ok(file_key))` on success.
    /// - `Some(Err(e))` if the stanza is for this identity but cannot be unwrapped.
    /// - `None` if the recipient stanza does not match this identity.
    ///
    /// [one joint]: https://www.imperialviolet.org/2016/05/16/agility.html
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>>;

    /// Attempts to unwrap any of the given stanzas, which are assumed to come from the
    /// same age file header, and therefore contain the same file key.
    ///
    /// The default implementation stops at the first stanza that either unwraps or fails
    /// to unwrap. If no stanza matches, it returns a recovered
    /// [`DecryptError::IncorrectIdentity`].
    fn unwrap_stanzas(&self, stanzas: &[Stanza]) -> Result<FileKey, UnwrapError> {
        match stanzas.iter().find_map(|stanza| self.unwrap_stanza(stanza)) {
            Some(Ok(file_key)) => Ok(file_key),
            Some(Err(e)) => Err(UnwrapError::Fatal(e)),
            None => Err(UnwrapError::Recovered(DecryptError::IncorrectIdentity)),
        }
    }
}
