//! The "x25519" recipient type, native to age.

use kage_core::{
    format::{FileKey, Stanza, FILE_KEY_BYTES},
    primitives::{aead_decrypt, aead_encrypt, hkdf, TAG_LEN},
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    encoding,
    error::{DecryptError, EncryptError},
    util::{base64_arg, encode_arg},
};

// Use lower-case HRP to avoid https://github.com/rust-bitcoin/rust-bech32/issues/40
const SECRET_KEY_PREFIX: &str = "age-secret-key-";
const PUBLIC_KEY_PREFIX: &str = "age";

pub(crate) const X25519_RECIPIENT_TAG: &str = "X25519";
const X25519_RECIPIENT_KEY_LABEL: &[u8] = b"age-encryption.org/v1/X25519";

const EPK_LEN_BYTES: usize = 32;
const ENCRYPTED_FILE_KEY_BYTES: usize = FILE_KEY_BYTES + TAG_LEN;

fn parse_bech32(s: &str, expected_hrp: &str) -> Result<[u8; 32], &'static str> {
    let (hrp, mut data) = encoding::decode(s).map_err(|_| "invalid Bech32 encoding")?;
    let res = if hrp != expected_hrp {
        Err("incorrect HRP")
    } else {
        data[..].try_into().map_err(|_| "incorrect key length")
    };
    data.zeroize();
    res
}

/// `HKDF[epk || pk, "age-encryption.org/v1/X25519"](shared_secret)`
fn wrap_key(epk: &PublicKey, pk: &PublicKey, shared_secret: &[u8]) -> [u8; 32] {
    let mut salt = [0; 64];
    salt[..32].copy_from_slice(epk.as_bytes());
    salt[32..].copy_from_slice(pk.as_bytes());
    hkdf(&salt, X25519_RECIPIENT_KEY_LABEL, shared_secret)
}

/// The standard age identity type, which can decrypt files encrypted to the
/// corresponding [`Recipient`].
#[derive(Clone)]
pub struct Identity(StaticSecret);

impl std::str::FromStr for Identity {
    type Err = &'static str;

    /// Parses an X25519 identity from a string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bech32(s, SECRET_KEY_PREFIX)
            .map(StaticSecret::from)
            .map(Identity)
    }
}

impl Identity {
    /// Generates a new secret key.
    pub fn generate() -> Self {
        Identity(StaticSecret::random_from_rng(OsRng))
    }

    /// Serializes this secret key as a string.
    pub fn to_string(&self) -> SecretString {
        let mut sk_bytes = self.0.to_bytes();
        let mut encoded =
            encoding::encode(SECRET_KEY_PREFIX, &sk_bytes).expect("HRP and key are valid");
        let ret = SecretString::new(encoded.to_uppercase());

        // Clear intermediates
        sk_bytes.zeroize();
        encoded.zeroize();

        ret
    }

    /// Returns the recipient key for this secret key.
    pub fn to_public(&self) -> Recipient {
        Recipient((&self.0).into())
    }
}

impl crate::Identity for Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        if stanza.tag != X25519_RECIPIENT_TAG {
            return None;
        }

        // A stanza we cannot parse is treated like one for another X25519 key.
        let epk: PublicKey = match &stanza.args[..] {
            [arg] => base64_arg::<_, EPK_LEN_BYTES>(arg)?.into(),
            _ => return None,
        };
        if stanza.body.len() != ENCRYPTED_FILE_KEY_BYTES {
            return Some(Err(DecryptError::IncorrectCiphertextSize));
        }

        let pk: PublicKey = (&self.0).into();
        let shared_secret = self.0.diffie_hellman(&epk);
        if !shared_secret.was_contributory() {
            return Some(Err(DecryptError::LowOrderPoint));
        }

        let enc_key = wrap_key(&epk, &pk, shared_secret.as_bytes());

        // A failure to decrypt is non-fatal (we try to decrypt the recipient stanza with
        // other X25519 keys), because we cannot tell which key matches a particular
        // stanza.
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

/// The standard age public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient(PublicKey);

impl std::str::FromStr for Recipient {
    type Err = &'static str;

    /// Parses a recipient key from a string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bech32(s, PUBLIC_KEY_PREFIX)
            .map(PublicKey::from)
            .map(Recipient)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            encoding::encode(PUBLIC_KEY_PREFIX, self.0.as_bytes()).expect("HRP and key are valid")
        )
    }
}

impl crate::Recipient for Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let esk = EphemeralSecret::random_from_rng(OsRng);
        let epk: PublicKey = (&esk).into();
        let shared_secret = esk.diffie_hellman(&self.0);

        let enc_key = wrap_key(&epk, &self.0, shared_secret.as_bytes());
        let encrypted_file_key = aead_encrypt(&enc_key, file_key.expose_secret());

        Ok(vec![Stanza {
            tag: X25519_RECIPIENT_TAG.to_owned(),
            args: vec![encode_arg(epk.as_bytes())],
            body: encrypted_file_key,
        }])
    }
}
