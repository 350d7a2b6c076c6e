//! Error types.

use std::collections::HashSet;
use std::fmt;
use std::io;

use crate::{wfl, wlnfl};

/// Errors returned when parsing an age header.
///
/// Each variant identifies the header element that failed to parse. Parse failures are
/// never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderError {
    /// The first line was not the age v1 version line.
    InvalidVersion,
    /// A recipient stanza was malformed: a missing type, a body line that is too long or
    /// not canonical Base64, a missing final short body line, or a line that is neither
    /// a stanza nor the footer.
    InvalidRecipient,
    /// A stanza type or argument was not an arbitrary string (`1*VCHAR` in ABNF).
    InvalidArbitraryString,
    /// The footer line did not contain exactly one non-empty MAC argument.
    InvalidFooter,
    /// The footer's MAC argument was not canonical Base64 of a 32-byte MAC.
    InvalidHmacHeader,
    /// The file ended before the 16-byte payload nonce.
    MissingNonce,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::InvalidVersion => wfl!(f, "err-header-version"),
            HeaderError::InvalidRecipient => wfl!(f, "err-header-recipient"),
            HeaderError::InvalidArbitraryString => wfl!(f, "err-header-arbitrary-string"),
            HeaderError::InvalidFooter => wfl!(f, "err-header-footer"),
            HeaderError::InvalidHmacHeader => wfl!(f, "err-header-mac-encoding"),
            HeaderError::MissingNonce => wfl!(f, "err-header-missing-nonce"),
        }
    }
}

impl std::error::Error for HeaderError {}

/// The various errors that can be returned during the encryption process.
#[derive(Debug)]
pub enum EncryptError {
    /// The encryptor was given recipients that declare themselves incompatible.
    IncompatibleRecipients {
        /// The set of labels from the first recipient provided to the encryptor.
        l_labels: HashSet<String>,
        /// The set of labels from the first non-matching recipient.
        r_labels: HashSet<String>,
    },
    /// One or more of the labels from a recipient provided to the encryptor are invalid.
    ///
    /// Labels must be valid age "arbitrary string"s (`1*VCHAR` in ABNF).
    InvalidRecipientLabels(HashSet<String>),
    /// [`scrypt::Recipient`] was mixed with other recipients.
    ///
    /// [`scrypt::Recipient`]: crate::scrypt::Recipient
    InvalidScryptRecipient,
    /// An I/O error occurred during encryption.
    Io(io::Error),
    /// The encryptor was not given any recipients.
    NoRecipients,
}

impl From<io::Error> for EncryptError {
    fn from(e: io::Error) -> Self {
        EncryptError::Io(e)
    }
}

impl Clone for EncryptError {
    fn clone(&self) -> Self {
        match self {
            Self::IncompatibleRecipients { l_labels, r_labels } => Self::IncompatibleRecipients {
                l_labels: l_labels.clone(),
                r_labels: r_labels.clone(),
            },
            Self::InvalidRecipientLabels(labels) => Self::InvalidRecipientLabels(labels.clone()),
            Self::InvalidScryptRecipient => Self::InvalidScryptRecipient,
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::NoRecipients => Self::NoRecipients,
        }
    }
}

/// Formats a label set in a stable order.
fn print_labels(labels: &HashSet<String>) -> String {
    let mut sorted: Vec<_> = labels.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(", ")
}

impl fmt::Display for EncryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptError::IncompatibleRecipients { l_labels, r_labels } => {
                match (l_labels.is_empty(), r_labels.is_empty()) {
                    (true, true) => unreachable!("labels are compatible"),
                    (false, true) => wfl!(
                        f,
                        "err-incompatible-recipients-oneway",
                        labels = print_labels(l_labels),
                    ),
                    (true, false) => wfl!(
                        f,
                        "err-incompatible-recipients-oneway",
                        labels = print_labels(r_labels),
                    ),
                    (false, false) => wfl!(
                        f,
                        "err-incompatible-recipients-twoway",
                        left = print_labels(l_labels),
                        right = print_labels(r_labels),
                    ),
                }
            }
            EncryptError::InvalidRecipientLabels(labels) => wfl!(
                f,
                "err-invalid-recipient-labels",
                labels = print_labels(labels),
            ),
            EncryptError::InvalidScryptRecipient => wfl!(f, "err-mixed-recipient-passphrase"),
            EncryptError::Io(e) => e.fmt(f),
            EncryptError::NoRecipients => wfl!(f, "err-missing-recipients"),
        }
    }
}

impl std::error::Error for EncryptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncryptError::Io(inner) => Some(inner),
            _ => None,
        }
    }
}

/// The various errors that can be returned during the decryption process.
#[derive(Debug)]
pub enum DecryptError {
    /// The age file used an excessive work factor for passphrase encryption.
    ExcessiveWork {
        /// The work factor required to decrypt.
        required: u8,
        /// The maximum work factor the identity was configured to accept.
        max: u8,
    },
    /// The age header failed to parse.
    Header(HeaderError),
    /// A wrapped file key had the wrong length.
    IncorrectCiphertextSize,
    /// The MAC in the age header did not match the header contents.
    IncorrectHmac,
    /// The identity did not match any stanza in the header.
    ///
    /// This is the recoverable failure that moves decryption on to the next identity.
    IncorrectIdentity,
    /// The header contained an `scrypt` stanza alongside other stanzas.
    InvalidScryptHeader,
    /// A stanza of a known type had the wrong number or size of arguments.
    InvalidStanza {
        /// The stanza's tag.
        tag: String,
    },
    /// An `scrypt` stanza's work factor was not a canonical decimal integer.
    InvalidWorkFactor,
    /// An I/O error occurred during decryption.
    Io(io::Error),
    /// An X25519 stanza's ephemeral share was a low-order point.
    LowOrderPoint,
    /// The decryptor was not given any identities.
    NoIdentities,
    /// None of the provided identities could be used to decrypt the age file.
    ///
    /// Contains the recoverable failure reported by each identity, in order.
    NoMatchingIdentities(Vec<DecryptError>),
}

impl Clone for DecryptError {
    fn clone(&self) -> Self {
        match self {
            Self::ExcessiveWork { required, max } => Self::ExcessiveWork {
                required: *required,
                max: *max,
            },
            Self::Header(e) => Self::Header(*e),
            Self::IncorrectCiphertextSize => Self::IncorrectCiphertextSize,
            Self::IncorrectHmac => Self::IncorrectHmac,
            Self::IncorrectIdentity => Self::IncorrectIdentity,
            Self::InvalidScryptHeader => Self::InvalidScryptHeader,
            Self::InvalidStanza { tag } => Self::InvalidStanza { tag: tag.clone() },
            Self::InvalidWorkFactor => Self::InvalidWorkFactor,
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::LowOrderPoint => Self::LowOrderPoint,
            Self::NoIdentities => Self::NoIdentities,
            Self::NoMatchingIdentities(errors) => Self::NoMatchingIdentities(errors.clone()),
        }
    }
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecryptError::ExcessiveWork { required, max } => {
                wlnfl!(f, "err-excessive-work")?;
                wfl!(
                    f,
                    "rec-excessive-work",
                    required = required.to_string(),
                    max = max.to_string(),
                )
            }
            DecryptError::Header(e) => e.fmt(f),
            DecryptError::IncorrectCiphertextSize => wfl!(f, "err-ciphertext-size"),
            DecryptError::IncorrectHmac => wfl!(f, "err-header-mac-invalid"),
            DecryptError::IncorrectIdentity => wfl!(f, "err-incorrect-identity"),
            DecryptError::InvalidScryptHeader => wfl!(f, "err-scrypt-not-alone"),
            DecryptError::InvalidStanza { tag } => {
                wfl!(f, "err-invalid-stanza", tag = tag.as_str())
            }
            DecryptError::InvalidWorkFactor => wfl!(f, "err-scrypt-work-factor"),
            DecryptError::Io(e) => e.fmt(f),
            DecryptError::LowOrderPoint => wfl!(f, "err-low-order-point"),
            DecryptError::NoIdentities => wfl!(f, "err-missing-identities"),
            DecryptError::NoMatchingIdentities(errors) => {
                wfl!(f, "err-no-matching-keys")?;
                for e in errors {
                    write!(f, "\n- {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl From<HeaderError> for DecryptError {
    fn from(e: HeaderError) -> Self {
        DecryptError::Header(e)
    }
}

impl From<io::Error> for DecryptError {
    fn from(e: io::Error) -> Self {
        DecryptError::Io(e)
    }
}

impl From<hmac::digest::MacError> for DecryptError {
    fn from(_: hmac::digest::MacError) -> Self {
        DecryptError::IncorrectHmac
    }
}

impl std::error::Error for DecryptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecryptError::Header(inner) => Some(inner),
            DecryptError::Io(inner) => Some(inner),
            _ => None,
        }
    }
}

/// The outcome of an [`Identity`] failing to unwrap a file key.
///
/// Decryption tries each identity in turn. A `Recovered` failure moves on to the next
/// identity and is reported in [`DecryptError::NoMatchingIdentities`] if no identity
/// matches, while a `Fatal` failure aborts decryption.
///
/// [`Identity`]: crate::Identity
#[derive(Clone, Debug)]
pub enum UnwrapError {
    /// The identity does not match any stanza.
    Recovered(DecryptError),
    /// The identity matched a stanza, but the stanza could not be unwrapped.
    Fatal(DecryptError),
}

impl fmt::Display for UnwrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnwrapError::Recovered(e) | UnwrapError::Fatal(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for UnwrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UnwrapError::Recovered(e) | UnwrapError::Fatal(e) => Some(e),
        }
    }
}
