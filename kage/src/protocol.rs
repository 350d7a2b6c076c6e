//! Encryption and decryption routines for age.

use kage_core::format::{is_arbitrary_string, FileKey, Stanza};
use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::{
    error::{DecryptError, EncryptError, UnwrapError},
    format::{AgeFile, Header, Nonce},
    keys::{mac_key, new_file_key, payload_key, v1_payload_key},
    primitives::{
        armor::ArmoredReader,
        stream::{PayloadKey, Stream, StreamReader, StreamWriter},
    },
    Identity, Recipient,
};

/// Encryptor for creating an age file.
pub struct Encryptor<'a> {
    recipients: Vec<&'a dyn Recipient>,
}

impl<'a> Encryptor<'a> {
    /// Constructs an `Encryptor` that will create an age file encrypted to a list of
    /// recipients.
    ///
    /// Returns an error if no recipients are provided, or if a passphrase recipient is
    /// provided alongside other recipients. No key material has been generated when
    /// either error is returned.
    pub fn with_recipients(
        recipients: impl Iterator<Item = &'a dyn Recipient>,
    ) -> Result<Self, EncryptError> {
        let recipients: Vec<_> = recipients.collect();

        if recipients.is_empty() {
            return Err(EncryptError::NoRecipients);
        }
        if recipients.len() > 1 && recipients.iter().any(|r| r.is_passphrase()) {
            return Err(EncryptError::InvalidScryptRecipient);
        }

        Ok(Encryptor { recipients })
    }

    /// Wraps the file key for every recipient, checking that their labels agree.
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let mut stanzas = vec![];
        let mut control: Option<HashSet<String>> = None;

        for recipient in &self.recipients {
            let (mut r_stanzas, labels) = match recipient.labeled() {
                Some(labeled) => labeled.wrap_file_key_with_labels(file_key)?,
                None => (recipient.wrap_file_key(file_key)?, HashSet::new()),
            };

            if !labels.iter().all(is_arbitrary_string) {
                return Err(EncryptError::InvalidRecipientLabels(labels));
            }

            match &control {
                None => control = Some(labels),
                Some(l_labels) if *l_labels != labels => {
                    return Err(EncryptError::IncompatibleRecipients {
                        l_labels: l_labels.clone(),
                        r_labels: labels,
                    });
                }
                Some(_) => (),
            }

            stanzas.append(&mut r_stanzas);
        }

        Ok(stanzas)
    }

    /// Generates a file key and nonce, and builds the header that wraps them.
    fn prepare(self) -> Result<(Header, Nonce, PayloadKey), EncryptError> {
        let file_key = new_file_key();
        let stanzas = self.wrap_file_key(&file_key)?;
        log::debug!(
            "Wrapped file key for {} recipients into {} stanzas",
            self.recipients.len(),
            stanzas.len()
        );

        let header = Header::new(stanzas, mac_key(&file_key));
        let nonce = Nonce::random();
        let payload_key = payload_key(&file_key, &nonce);

        Ok((header, nonce, payload_key))
    }

    /// Creates a wrapper around a writer that will encrypt its input.
    ///
    /// Returns errors from the underlying writer while writing the header.
    ///
    /// To ASCII armor the output, pass an [`ArmoredWriter`] as `output`, and call
    /// [`ArmoredWriter::finish`] on the writer returned by [`StreamWriter::finish`].
    ///
    /// You **MUST** call [`StreamWriter::finish`] when you are done writing, in order to
    /// finish the encryption process. Failing to call [`StreamWriter::finish`] will
    /// result in a truncated file that will fail to decrypt.
    ///
    /// [`ArmoredWriter`]: crate::armor::ArmoredWriter
    /// [`ArmoredWriter::finish`]: crate::armor::ArmoredWriter::finish
    pub fn wrap_output<W: Write>(self, mut output: W) -> Result<StreamWriter<W>, EncryptError> {
        let (header, nonce, payload_key) = self.prepare()?;
        header.write(&mut output)?;
        output.write_all(nonce.as_ref())?;

        Ok(Stream::encrypt(payload_key, output))
    }

    /// Encrypts everything read from `input` into an in-memory [`AgeFile`].
    pub fn encrypt_to_file<R: Read>(self, mut input: R) -> Result<AgeFile, EncryptError> {
        let (header, nonce, payload_key) = self.prepare()?;

        let mut writer = Stream::encrypt(payload_key, nonce.as_ref().to_vec());
        io::copy(&mut input, &mut writer)?;
        let body = writer.finish()?;

        Ok(AgeFile::new(header, body))
    }
}

/// Decryptor for an age file.
pub struct Decryptor<R> {
    /// The age file, positioned at the start of the payload.
    input: R,
    /// The age file's header.
    header: Header,
    /// The age file's payload nonce.
    nonce: Nonce,
}

impl<R: Read> Decryptor<BufReader<ArmoredReader<R>>> {
    /// Attempts to create a decryptor for an age file, which may be ASCII armored.
    ///
    /// Returns an error if the input does not contain a valid age header.
    pub fn new(input: R) -> Result<Self, DecryptError> {
        Decryptor::new_buffered(BufReader::new(ArmoredReader::new(input)))
    }
}

impl<R: BufRead> Decryptor<R> {
    /// Attempts to create a decryptor for a binary age file.
    ///
    /// Returns an error if the input does not contain a valid age header.
    ///
    /// This is the same as [`Decryptor::new`], but avoids wrapping `input` in a
    /// [`BufReader`], and does not detect ASCII armor.
    pub fn new_buffered(mut input: R) -> Result<Self, DecryptError> {
        let header = Header::read(&mut input)?;
        Decryptor::from_parts(input, header)
    }
}

impl<'a> Decryptor<&'a [u8]> {
    /// Creates a decryptor for an age file that has already been parsed.
    pub fn from_age_file(file: &'a AgeFile) -> Result<Self, DecryptError> {
        Decryptor::from_parts(file.body(), file.header().clone())
    }
}

impl<R: Read> Decryptor<R> {
    fn from_parts(mut input: R, header: Header) -> Result<Self, DecryptError> {
        // Enforce structural requirements on the v1 header.
        header.check_scrypt_exclusivity()?;
        let nonce = Nonce::read(&mut input)?;

        Ok(Decryptor {
            input,
            header,
            nonce,
        })
    }

    /// The header of the age file.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns `true` if the age file is encrypted to a passphrase.
    pub fn is_scrypt(&self) -> bool {
        self.header.has_scrypt_stanza()
    }

    /// Attempts to decrypt the age file.
    ///
    /// The identities are tried in order. An identity that does not match any stanza is
    /// skipped; any other failure stops decryption. The header MAC is verified with the
    /// first file key that is unwrapped.
    ///
    /// If successful, returns a reader that will provide the plaintext.
    pub fn decrypt<'b>(
        self,
        identities: impl Iterator<Item = &'b dyn Identity>,
    ) -> Result<StreamReader<R>, DecryptError> {
        let file_key = self.unwrap_file_key(identities)?;
        let payload_key = v1_payload_key(&file_key, &self.header, &self.nonce)?;
        Ok(Stream::decrypt(payload_key, self.input))
    }

    fn unwrap_file_key<'b>(
        &self,
        identities: impl Iterator<Item = &'b dyn Identity>,
    ) -> Result<FileKey, DecryptError> {
        let mut failures = vec![];

        for (i, identity) in identities.enumerate() {
            match identity.unwrap_stanzas(self.header.recipients()) {
                Ok(file_key) => {
                    log::debug!("Identity {} unwrapped the file key", i);
                    return Ok(file_key);
                }
                Err(UnwrapError::Recovered(e)) => {
                    log::trace!("Identity {} did not match: {}", i, e);
                    failures.push(e);
                }
                Err(UnwrapError::Fatal(e)) => return Err(e),
            }
        }

        if failures.is_empty() {
            Err(DecryptError::NoIdentities)
        } else {
            Err(DecryptError::NoMatchingIdentities(failures))
        }
    }
}
