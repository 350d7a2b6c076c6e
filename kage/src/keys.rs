//! Key derivation for the header MAC and the payload.

use kage_core::{
    format::{FileKey, FILE_KEY_BYTES},
    primitives::hkdf,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};

use crate::{
    error::DecryptError,
    format::{Header, Nonce},
    primitives::{stream::PayloadKey, HmacKey},
};

const HEADER_KEY_LABEL: &[u8] = b"header";
const PAYLOAD_KEY_LABEL: &[u8] = b"payload";

pub(crate) fn new_file_key() -> FileKey {
    let mut file_key = [0; FILE_KEY_BYTES];
    OsRng.fill_bytes(&mut file_key);
    file_key.into()
}

/// `HKDF[salt = none, "header"](file_key)`, the key for the header MAC.
pub(crate) fn mac_key(file_key: &FileKey) -> HmacKey {
    HmacKey(Secret::new(hkdf(
        &[],
        HEADER_KEY_LABEL,
        file_key.expose_secret(),
    )))
}

/// `HKDF[nonce, "payload"](file_key)`, the key for the payload stream.
pub(crate) fn payload_key(file_key: &FileKey, nonce: &Nonce) -> PayloadKey {
    PayloadKey(Secret::new(hkdf(
        nonce.as_ref(),
        PAYLOAD_KEY_LABEL,
        file_key.expose_secret(),
    )))
}

/// Verifies the header MAC, and only then derives the payload key.
pub(crate) fn v1_payload_key(
    file_key: &FileKey,
    header: &Header,
    nonce: &Nonce,
) -> Result<PayloadKey, DecryptError> {
    header.verify_mac(mac_key(file_key))?;
    Ok(payload_key(file_key, nonce))
}
