//! The "scrypt" passphrase-based recipient type, native to age.

use kage_core::{
    format::{FileKey, Stanza, FILE_KEY_BYTES},
    primitives::{aead_decrypt, aead_encrypt, TAG_LEN},
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::{DecryptError, EncryptError},
    primitives::scrypt,
    util::{base64_arg, encode_arg},
};

pub(crate) const SCRYPT_RECIPIENT_TAG: &str = "scrypt";
const SCRYPT_SALT_LABEL: &[u8] = b"age-encryption.org/v1/scrypt";

const SALT_LEN: usize = 16;
const ENCRYPTED_FILE_KEY_BYTES: usize = FILE_KEY_BYTES + TAG_LEN;

/// The work factor used by [`Recipient`] unless configured otherwise.
pub const DEFAULT_WORK_FACTOR: u8 = 18;

/// The largest work factor accepted by [`Identity`] unless configured otherwise.
pub const DEFAULT_MAX_WORK_FACTOR: u8 = 22;

/// The range of work factors that can be configured.
const WORK_FACTOR_RANGE: std::ops::RangeInclusive<u8> = 1..=30;

/// `scrypt[SCRYPT_SALT_LABEL || salt, 2^log_n](passphrase)`
fn wrap_key(
    salt: &[u8; SALT_LEN],
    log_n: u8,
    passphrase: &SecretString,
) -> Option<Zeroizing<[u8; 32]>> {
    let mut inner_salt = [0; SCRYPT_SALT_LABEL.len() + SALT_LEN];
    inner_salt[..SCRYPT_SALT_LABEL.len()].copy_from_slice(SCRYPT_SALT_LABEL);
    inner_salt[SCRYPT_SALT_LABEL.len()..].copy_from_slice(salt);

    scrypt(&inner_salt, log_n, passphrase.expose_secret())
        .ok()
        .map(Zeroizing::new)
}

/// Parses a work factor, which must be a decimal integer without leading zeroes.
fn parse_work_factor(arg: &str) -> Option<u8> {
    match arg.as_bytes() {
        [b'1'..=b'9', rest @ ..] if rest.iter().all(u8::is_ascii_digit) => arg.parse().ok(),
        _ => None,
    }
}

/// A passphrase-based recipient. Anyone with the passphrase can decrypt the file.
///
/// If an `scrypt::Recipient` is used, it must be the only recipient for the file: it
/// can't be mixed with other recipient types and can't be used multiple times for the
/// same file.
///
/// This API should only be used with a passphrase that was provided by (or generated
/// for) a human. For programmatic use cases, instead generate an [`x25519::Identity`].
///
/// [`x25519::Identity`]: crate::x25519::Identity
pub struct Recipient {
    passphrase: SecretString,
    log_n: u8,
}

impl Recipient {
    /// Constructs a new `Recipient` with the given passphrase.
    ///
    /// The scrypt work factor defaults to [`DEFAULT_WORK_FACTOR`], which takes around a
    /// second on a modern machine.
    pub fn new(passphrase: SecretString) -> Self {
        Self {
            passphrase,
            log_n: DEFAULT_WORK_FACTOR,
        }
    }

    /// Sets the scrypt work factor to `N = 2^log_n`.
    ///
    /// # Panics
    ///
    /// Panics if `log_n` is not between 1 and 30 inclusive.
    pub fn set_work_factor(&mut self, log_n: u8) {
        assert!(
            WORK_FACTOR_RANGE.contains(&log_n),
            "work factor must be between 1 and 30"
        );
        self.log_n = log_n;
    }
}

impl crate::Recipient for Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let mut salt = [0; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let enc_key = wrap_key(&salt, self.log_n, &self.passphrase)
            .expect("work factor was checked when it was set");
        let encrypted_file_key = aead_encrypt(&enc_key, file_key.expose_secret());

        Ok(vec![Stanza {
            tag: SCRYPT_RECIPIENT_TAG.to_owned(),
            args: vec![encode_arg(&salt), format!("{}", self.log_n)],
            body: encrypted_file_key,
        }])
    }

    fn is_passphrase(&self) -> bool {
        true
    }
}

/// A passphrase-based identity.
pub struct Identity {
    passphrase: SecretString,
    max_work_factor: u8,
}

impl Identity {
    /// Constructs a new `Identity` with the given passphrase.
    ///
    /// Files with a work factor above [`DEFAULT_MAX_WORK_FACTOR`] are rejected.
    pub fn new(passphrase: SecretString) -> Self {
        Self {
            passphrase,
            max_work_factor: DEFAULT_MAX_WORK_FACTOR,
        }
    }

    /// Sets the maximum accepted scrypt work factor to `N = 2^max_log_n`.
    ///
    /// This bounds the CPU and memory that an untrusted file can make decryption spend.
    ///
    /// # Panics
    ///
    /// Panics if `max_log_n` is not between 1 and 30 inclusive.
    pub fn set_max_work_factor(&mut self, max_log_n: u8) {
        assert!(
            WORK_FACTOR_RANGE.contains(&max_log_n),
            "maximum work factor must be between 1 and 30"
        );
        self.max_work_factor = max_log_n;
    }
}

impl crate::Identity for Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        if stanza.tag != SCRYPT_RECIPIENT_TAG {
            return None;
        }

        let invalid_stanza = || {
            Some(Err(DecryptError::InvalidStanza {
                tag: SCRYPT_RECIPIENT_TAG.to_owned(),
            }))
        };

        let (salt, log_n) = match &stanza.args[..] {
            [salt, log_n] => (salt, log_n),
            _ => return invalid_stanza(),
        };
        let salt = match base64_arg::<_, SALT_LEN>(salt) {
            Some(salt) => salt,
            None => return invalid_stanza(),
        };
        let log_n = match parse_work_factor(log_n) {
            Some(log_n) => log_n,
            None => return Some(Err(DecryptError::InvalidWorkFactor)),
        };

        if log_n > self.max_work_factor {
            return Some(Err(DecryptError::ExcessiveWork {
                required: log_n,
                max: self.max_work_factor,
            }));
        }
        if stanza.body.len() != ENCRYPTED_FILE_KEY_BYTES {
            return Some(Err(DecryptError::IncorrectCiphertextSize));
        }

        let enc_key = match wrap_key(&salt, log_n, &self.passphrase) {
            Some(enc_key) => enc_key,
            None => return Some(Err(DecryptError::InvalidWorkFactor)),
        };

        // This AEAD is not robust, so an attacker could craft a message that decrypts
        // under two different keys (meaning two different passphrases) and then use an
        // error side-channel in an online decryption oracle to learn if either key is
        // correct. This is deemed acceptable because the use case (an online decryption
        // oracle) is not recommended, and the security loss is only one bit.
        //
        // A wrong passphrase is reported like a non-matching key.
        aead_decrypt(&enc_key, FILE_KEY_BYTES, &stanza.body)
            .ok()
            .map(|mut pt| {
                // It's ours!
                let mut file_key = [0; FILE_KEY_BYTES];
                file_key.copy_from_slice(&pt);
                pt.zeroize();
                Ok(file_key.into())
            })
    }
}

#[cfg(test)]
mod tests {
    use kage_core::format::Stanza;
    use secrecy::{ExposeSecret, SecretString};
    use test_case::test_case;

    use super::{parse_work_factor, Identity, Recipient, SCRYPT_RECIPIENT_TAG};
    use crate::{DecryptError, Identity as _, Recipient as _, UnwrapError};

    fn passphrase(s: &str) -> SecretString {
        SecretString::new(s.to_owned())
    }

    fn wrapped_stanza(log_n: u8) -> Stanza {
        let mut recipient = Recipient::new(passphrase("mypass1"));
        recipient.set_work_factor(log_n);
        recipient.wrap_file_key(&[9; 16].into()).unwrap().remove(0)
    }

    #[test]
    fn wrap_and_unwrap() {
        let stanza = wrapped_stanza(2);
        assert_eq!(stanza.tag, SCRYPT_RECIPIENT_TAG);
        assert_eq!(stanza.args[1], "2");
        assert_eq!(stanza.body.len(), 32);

        let file_key = Identity::new(passphrase("mypass1"))
            .unwrap_stanzas(&[stanza])
            .unwrap();
        assert_eq!(file_key.expose_secret(), &[9; 16]);
    }

    #[test]
    fn wrong_passphrase_is_recoverable() {
        let stanza = wrapped_stanza(2);
        assert!(matches!(
            Identity::new(passphrase("wrong")).unwrap_stanzas(&[stanza]),
            Err(UnwrapError::Recovered(DecryptError::IncorrectIdentity))
        ));
    }

    #[test]
    fn rejects_excessive_work() {
        let stanza = wrapped_stanza(5);
        let mut identity = Identity::new(passphrase("mypass1"));
        identity.set_max_work_factor(4);
        assert!(matches!(
            identity.unwrap_stanza(&stanza),
            Some(Err(DecryptError::ExcessiveWork {
                required: 5,
                max: 4
            }))
        ));
    }

    #[test_case("1", Some(1))]
    #[test_case("18", Some(18))]
    #[test_case("0", None ; "zero")]
    #[test_case("018", None ; "leading zero")]
    #[test_case("+18", None ; "sign")]
    #[test_case(" 18", None ; "space")]
    #[test_case("", None ; "empty")]
    #[test_case("1a", None ; "not a number")]
    #[test_case("256", None ; "too large")]
    fn work_factor_encoding(arg: &str, expected: Option<u8>) {
        assert_eq!(parse_work_factor(arg), expected);
    }

    #[test]
    fn malformed_stanzas_are_fatal() {
        let identity = Identity::new(passphrase("mypass1"));

        let mut bad_work_factor = wrapped_stanza(2);
        bad_work_factor.args[1] = "02".to_owned();
        assert!(matches!(
            identity.unwrap_stanza(&bad_work_factor),
            Some(Err(DecryptError::InvalidWorkFactor))
        ));

        let mut missing_arg = wrapped_stanza(2);
        missing_arg.args.pop();
        assert!(matches!(
            identity.unwrap_stanza(&missing_arg),
            Some(Err(DecryptError::InvalidStanza { tag })) if tag == "scrypt"
        ));

        let mut short_salt = wrapped_stanza(2);
        short_salt.args[0] = "AAAA".to_owned();
        assert!(matches!(
            identity.unwrap_stanza(&short_salt),
            Some(Err(DecryptError::InvalidStanza { .. }))
        ));

        let mut long_body = wrapped_stanza(2);
        long_body.body.push(0);
        assert!(matches!(
            identity.unwrap_stanza(&long_body),
            Some(Err(DecryptError::IncorrectCiphertextSize))
        ));
    }

    #[test]
    fn other_stanzas_do_not_match() {
        let mut stanza = wrapped_stanza(2);
        stanza.tag = "X25519".to_owned();
        assert!(Identity::new(passphrase("mypass1"))
            .unwrap_stanza(&stanza)
            .is_none());
    }

    #[test]
    #[should_panic]
    fn work_factor_must_be_in_range() {
        Recipient::new(passphrase("mypass1")).set_work_factor(31);
    }
}
