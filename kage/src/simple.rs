//! One-shot entry points over [`Encryptor`] and [`Decryptor`].

use std::io::{self, Read, Write};
use std::iter;

use crate::{
    armor::{ArmoredWriter, Format},
    error::{DecryptError, EncryptError},
    stream::StreamReader,
    AgeFile, Decryptor, Encryptor, Identity, Recipient,
};

/// Encrypts the given plaintext to the given recipient.
///
/// To encrypt to more than one recipient, use [`encrypt_stream`] or
/// [`Encryptor::with_recipients`].
///
/// This function returns binary ciphertext. To obtain an ASCII-armored text string, use
/// [`encrypt_and_armor`].
pub fn encrypt(recipient: &impl Recipient, plaintext: &[u8]) -> Result<Vec<u8>, EncryptError> {
    let mut ciphertext = Vec::with_capacity(plaintext.len());
    encrypt_stream(
        iter::once(recipient as &dyn Recipient),
        plaintext,
        &mut ciphertext,
        false,
    )?;
    Ok(ciphertext)
}

/// Encrypts the given plaintext to the given recipient, and wraps the ciphertext in ASCII
/// armor.
pub fn encrypt_and_armor(
    recipient: &impl Recipient,
    plaintext: &[u8],
) -> Result<String, EncryptError> {
    let mut ciphertext = Vec::with_capacity(plaintext.len());
    encrypt_stream(
        iter::once(recipient as &dyn Recipient),
        plaintext,
        &mut ciphertext,
        true,
    )?;
    Ok(String::from_utf8(ciphertext).expect("is armored"))
}

/// Encrypts everything read from `input` to the given recipients, writing the age file
/// to `output`.
///
/// If `armor` is `true`, the age file is wrapped in ASCII armor. Returns `output` once the
/// age file has been completely written.
pub fn encrypt_stream<'a, R: Read, W: Write>(
    recipients: impl IntoIterator<Item = &'a dyn Recipient>,
    mut input: R,
    output: W,
    armor: bool,
) -> Result<W, EncryptError> {
    let encryptor = Encryptor::with_recipients(recipients.into_iter())?;
    let format = if armor {
        Format::AsciiArmor
    } else {
        Format::Binary
    };

    let mut writer = encryptor.wrap_output(ArmoredWriter::wrap_output(output, format)?)?;
    io::copy(&mut input, &mut writer)?;
    Ok(writer.finish()?.finish()?)
}

/// Encrypts everything read from `input` to the given recipients, returning the age file
/// in memory.
pub fn encrypt_to_file<'a, R: Read>(
    recipients: impl IntoIterator<Item = &'a dyn Recipient>,
    input: R,
) -> Result<AgeFile, EncryptError> {
    Encryptor::with_recipients(recipients.into_iter())?.encrypt_to_file(input)
}

/// Decrypts the given ciphertext with the given identity.
///
/// ASCII-armored ciphertexts are detected and handled automatically.
pub fn decrypt(identity: &impl Identity, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    decrypt_stream(
        iter::once(identity as &dyn Identity),
        ciphertext,
        Vec::with_capacity(ciphertext.len()),
    )
}

/// Decrypts the age file read from `input` with the first of `identities` that matches,
/// writing the plaintext to `output`.
///
/// ASCII-armored input is detected and handled automatically. Returns `output` once the
/// whole payload has been decrypted.
///
/// Plaintext is written to `output` as each chunk is authenticated. If an error is
/// returned, `output` may have received a prefix of the plaintext.
pub fn decrypt_stream<'a, R: Read, W: Write>(
    identities: impl IntoIterator<Item = &'a dyn Identity>,
    input: R,
    mut output: W,
) -> Result<W, DecryptError> {
    let decryptor = Decryptor::new(input)?;
    let mut reader = decryptor.decrypt(identities.into_iter())?;
    io::copy(&mut reader, &mut output)?;
    output.flush()?;
    Ok(output)
}

/// Decrypts an in-memory age file with the first of `identities` that matches.
///
/// If successful, returns a reader that will provide the plaintext.
pub fn decrypt_file<'a, 'b>(
    identities: impl IntoIterator<Item = &'a dyn Identity>,
    file: &'b AgeFile,
) -> Result<StreamReader<&'b [u8]>, DecryptError> {
    Decryptor::from_age_file(file)?.decrypt(identities.into_iter())
}
