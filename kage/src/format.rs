//! The age file format.

use std::io::{self, BufRead, Read, Write};

use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
use kage_core::format::{
    is_arbitrary_string, read as stanza_read, Stanza, BODY_LINE_COLUMNS, FOOTER_PREFIX,
    STANZA_PREFIX,
};
use rand::{rngs::OsRng, RngCore};

use crate::{
    error::{DecryptError, HeaderError},
    primitives::{HmacKey, HmacWriter},
};

const V1_MAGIC: &str = "age-encryption.org/v1";

/// The length of the header MAC.
pub const MAC_BYTES: usize = 32;

/// The length of the payload nonce that follows the header.
pub const NONCE_BYTES: usize = 16;

/// The header of an age file.
///
/// A `Header` always carries a 32-byte MAC over its own serialization. Stanzas keep the
/// order in which they were written or parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    recipients: Vec<Stanza>,
    mac: [u8; MAC_BYTES],
}

impl Header {
    pub(crate) fn new(recipients: Vec<Stanza>, mac_key: HmacKey) -> Self {
        let mut header = Header {
            recipients,
            mac: [0; MAC_BYTES],
        };

        let mut mac = HmacWriter::new(mac_key);
        cookie_factory::gen(write::header_minus_mac(&header), &mut mac)
            .expect("can serialize Header into HmacWriter");
        header.mac.copy_from_slice(&mac.finalize().into_bytes());

        header
    }

    /// The recipient stanzas in this header.
    pub fn recipients(&self) -> &[Stanza] {
        &self.recipients
    }

    /// The MAC from this header's footer.
    pub fn mac(&self) -> &[u8; MAC_BYTES] {
        &self.mac
    }

    /// Returns `true` if this header contains an `scrypt` stanza.
    pub(crate) fn has_scrypt_stanza(&self) -> bool {
        self.recipients
            .iter()
            .any(|s| s.tag == crate::scrypt::SCRYPT_RECIPIENT_TAG)
    }

    /// Checks that an `scrypt` stanza, if present, is the only stanza.
    pub(crate) fn check_scrypt_exclusivity(&self) -> Result<(), DecryptError> {
        if self.has_scrypt_stanza() && self.recipients.len() != 1 {
            Err(DecryptError::InvalidScryptHeader)
        } else {
            Ok(())
        }
    }

    pub(crate) fn verify_mac(&self, mac_key: HmacKey) -> Result<(), hmac::digest::MacError> {
        let mut mac = HmacWriter::new(mac_key);
        cookie_factory::gen(write::header_minus_mac(self), &mut mac)
            .expect("can serialize Header into HmacWriter");
        mac.verify(&self.mac)
    }

    /// Parses a header from the start of `input`.
    ///
    /// Reads exactly up to and including the footer's newline, leaving `input`
    /// positioned at the payload nonce.
    pub fn read<R: BufRead>(mut input: R) -> Result<Self, DecryptError> {
        let mut line = vec![];

        match next_line(&mut input, &mut line)? {
            Some(V1_MAGIC) => (),
            _ => return Err(HeaderError::InvalidVersion.into()),
        }

        let mut recipients = vec![];
        let mac = loop {
            let l = next_line(&mut input, &mut line)?.ok_or(HeaderError::InvalidRecipient)?;
            if l.starts_with(FOOTER_PREFIX) {
                break read::footer(l)?;
            } else if l.starts_with(STANZA_PREFIX) {
                let (tag, args) = read::stanza_line(l)?;
                let body = read::stanza_body(&mut input, &mut line)?;
                recipients.push(Stanza { tag, args, body });
            } else {
                return Err(HeaderError::InvalidRecipient.into());
            }
        };

        Ok(Header { recipients, mac })
    }

    /// Serializes this header.
    pub fn write<W: Write>(&self, mut output: W) -> io::Result<()> {
        cookie_factory::gen(write::header(self), &mut output)
            .map(|_| ())
            .map_err(|e| {
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("failed to write header: {}", e),
                )
            })
    }
}

/// Reads a newline-terminated line into `buf`, returning it without the newline.
///
/// Returns `None` if the input ends before a newline, or if the line is not UTF-8.
fn next_line<'a, R: BufRead>(input: &mut R, buf: &'a mut Vec<u8>) -> io::Result<Option<&'a str>> {
    buf.clear();
    input.read_until(b'\n', buf)?;
    Ok(match buf.split_last() {
        Some((b'\n', line)) => std::str::from_utf8(line).ok(),
        _ => None,
    })
}

mod read {
    use super::*;

    /// Parses the first line of a stanza into its tag and arguments.
    pub(super) fn stanza_line(line: &str) -> Result<(String, Vec<String>), HeaderError> {
        let (_, tokens) =
            stanza_read::stanza_line(line).map_err(|_| HeaderError::InvalidRecipient)?;

        match tokens.split_first() {
            Some((tag, _)) if tag.is_empty() => Err(HeaderError::InvalidRecipient),
            Some((tag, args)) => {
                if is_arbitrary_string(tag) && args.iter().all(is_arbitrary_string) {
                    Ok((tag.to_string(), args.iter().map(|s| s.to_string()).collect()))
                } else {
                    Err(HeaderError::InvalidArbitraryString)
                }
            }
            None => Err(HeaderError::InvalidRecipient),
        }
    }

    /// Reads stanza body lines up to and including the first short line.
    pub(super) fn stanza_body<R: BufRead>(
        input: &mut R,
        line: &mut Vec<u8>,
    ) -> Result<Vec<u8>, DecryptError> {
        let mut body = vec![];
        loop {
            let l = next_line(input, line)?.ok_or(HeaderError::InvalidRecipient)?;
            let (_, decoded) =
                stanza_read::body_line(l).map_err(|_| HeaderError::InvalidRecipient)?;
            body.extend_from_slice(&decoded);
            if l.len() < BODY_LINE_COLUMNS {
                break Ok(body);
            }
        }
    }

    /// Parses the footer line into the header MAC.
    pub(super) fn footer(line: &str) -> Result<[u8; MAC_BYTES], HeaderError> {
        let (_, args) = stanza_read::footer_line(line).map_err(|_| HeaderError::InvalidFooter)?;
        match args[..] {
            [mac] if !mac.is_empty() => BASE64_STANDARD_NO_PAD
                .decode(mac)
                .ok()
                .and_then(|mac| mac.try_into().ok())
                .ok_or(HeaderError::InvalidHmacHeader),
            _ => Err(HeaderError::InvalidFooter),
        }
    }
}

mod write {
    use cookie_factory::{
        combinator::string, multi::all, sequence::tuple, SerializeFn, WriteContext,
    };
    use kage_core::format::write::stanza;

    use super::*;

    /// The serialization covered by the header MAC, ending with the footer prefix.
    pub(super) fn header_minus_mac<'a, W: 'a + Write>(h: &'a Header) -> impl SerializeFn<W> + 'a {
        tuple((
            string(V1_MAGIC),
            string("\n"),
            all(h.recipients.iter().map(stanza)),
            string(FOOTER_PREFIX),
        ))
    }

    pub(super) fn header<'a, W: 'a + Write>(h: &'a Header) -> impl SerializeFn<W> + 'a {
        move |w: WriteContext<W>| {
            let encoded_mac = BASE64_STANDARD_NO_PAD.encode(h.mac);
            tuple((
                header_minus_mac(h),
                string(" "),
                string(encoded_mac),
                string("\n"),
            ))(w)
        }
    }
}

/// The 16-byte nonce from which the payload key is derived.
pub(crate) struct Nonce([u8; NONCE_BYTES]);

impl AsRef<[u8]> for Nonce {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; NONCE_BYTES]> for Nonce {
    fn from(bytes: [u8; NONCE_BYTES]) -> Self {
        Nonce(bytes)
    }
}

impl Nonce {
    pub(crate) fn random() -> Self {
        let mut nonce = [0; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        Nonce(nonce)
    }

    /// Reads the nonce that follows the header.
    pub(crate) fn read<R: Read>(input: &mut R) -> Result<Self, DecryptError> {
        let mut nonce = [0; NONCE_BYTES];
        input.read_exact(&mut nonce).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => HeaderError::MissingNonce.into(),
            _ => DecryptError::Io(e),
        })?;
        Ok(Nonce(nonce))
    }
}

/// A complete age file held in memory: the header, followed by the payload nonce and the
/// STREAM ciphertext.
///
/// The payload is not interpreted beyond splitting off the nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgeFile {
    header: Header,
    body: Vec<u8>,
}

impl AgeFile {
    pub(crate) fn new(header: Header, body: Vec<u8>) -> Self {
        AgeFile { header, body }
    }

    /// Parses an age file from a binary (non-armored) input.
    pub fn read<R: Read>(input: R) -> Result<Self, DecryptError> {
        let mut input = io::BufReader::new(input);
        let header = Header::read(&mut input)?;

        let mut body = vec![];
        input.read_to_end(&mut body)?;
        if body.len() < NONCE_BYTES {
            return Err(HeaderError::MissingNonce.into());
        }

        Ok(AgeFile { header, body })
    }

    /// Serializes this age file.
    pub fn write<W: Write>(&self, mut output: W) -> io::Result<()> {
        self.header.write(&mut output)?;
        output.write_all(&self.body)
    }

    /// The header of this file.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The payload nonce followed by the STREAM ciphertext.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::{AgeFile, Header};
    use crate::error::{DecryptError, HeaderError};

    const TEST_HEADER: &str = "age-encryption.org/v1
-> X25519 CJM36AHmTbdHSuOQL+NESqyVQE75f2e610iRdLPEN20
C3ZAeY64NXS4QFrksLm3EGz+uPRyI0eQsWw7LWbbYig
-> X25519 ytazqsbmUnPwVWMVx0c1X9iUtGdY4yAB08UQTY2hNCI
N3pgrXkbIn/RrVt0T0G3sQr1wGWuclqKxTSWHSqGdkc
-> ssh-rsa mhir0Q
xD7o4VEOu1t7KZQ1gDgq2FPzBEeSRqbnqvQEXdLRYy143BxR6oFxsUUJCRB0ErXA
mgmZq7tIm5ZyY89OmqZztOgG2tEB1TZvX3Q8oXESBuFjBBQkKaMLkaqh5GjcGRrZ
e5MmTXRdEyNPRl8qpystNZR1q2rEDUHSEJInVLW8OtvQRG8P303VpjnOUU53FSBw
yXxDtzxKxeloceFubn/HWGcR0mHU+1e9l39myQEUZjIoqFIELXvh9o6RUgYzaAI+
m/uPLMQdlIkiOOdbsrE6tFesRLZNHAYspeRKI9MJ++Xg9i7rutU34ZM+1BL6KgZf
J9FSm+GFHiVWpr1MfYCo/w
-> some-other-recipient mhir0Q BjH7FA 37
m/uPLMQdlIkiOOdbsrE6tFesRLZNHAYspeRKI9MJ++Xg9i7rutU34ZM+1BL6KgZf
J9FSm+GFHiVWpr1MfYCo/w
-> no-args

--- fgMiVLJHMlg9fW7CVG/hPS5EAU4Zeg19LyCP7SoH5nA
";

    fn header_error(data: &str) -> HeaderError {
        match Header::read(data.as_bytes()) {
            Err(DecryptError::Header(e)) => e,
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Invalid header was parsed without error"),
        }
    }

    #[test]
    fn parse_header() {
        let h = Header::read(TEST_HEADER.as_bytes()).unwrap();
        assert_eq!(h.recipients().len(), 5);
        assert_eq!(h.recipients()[2].tag, "ssh-rsa");
        assert_eq!(h.recipients()[3].args, ["mhir0Q", "BjH7FA", "37"]);
        assert!(h.recipients()[4].args.is_empty());
        assert!(h.recipients()[4].body.is_empty());

        let mut data = vec![];
        h.write(&mut data).unwrap();
        assert_eq!(std::str::from_utf8(&data), Ok(TEST_HEADER));
    }

    #[test]
    fn header_read_stops_after_footer() {
        let mut file = TEST_HEADER.as_bytes().to_vec();
        file.extend_from_slice(&[0xff; 40]);
        let mut input = &file[..];
        Header::read(&mut input).unwrap();
        assert_eq!(input, &[0xff; 40][..]);
    }

    #[test_case("age-encryption.org/v2\n--- AAAA\n" ; "other version")]
    #[test_case("age-encryption.org/v1 \n--- AAAA\n" ; "trailing space")]
    #[test_case("age-encryption.org/v1\r\n--- AAAA\n" ; "carriage return")]
    #[test_case("" ; "empty")]
    fn invalid_version(data: &str) {
        assert_eq!(header_error(data), HeaderError::InvalidVersion);
    }

    #[test_case("age-encryption.org/v1\n->\n\n--- AAAA\n" ; "missing type")]
    #[test_case("age-encryption.org/v1\n-> \n\n--- AAAA\n" ; "empty type")]
    #[test_case("age-encryption.org/v1\n->X25519\n\n--- AAAA\n" ; "missing space")]
    #[test_case("age-encryption.org/v1\n-> X25519\n" ; "truncated body")]
    #[test_case("age-encryption.org/v1\n-> X25519\nTm8gcGFkZGluZyE=\n--- AAAA\n" ; "padded body")]
    #[test_case("age-encryption.org/v1\n-> X25519\nAB\n--- AAAA\n" ; "non canonical body")]
    #[test_case("age-encryption.org/v1\n-> X25519\nxD7o4VEOu1t7KZQ1gDgq2FPzBEeSRqbnqvQEXdLRYy143BxR6oFxsUUJCRB0ErXAAAAA\n--- AAAA\n" ; "long body line")]
    #[test_case("age-encryption.org/v1\n-> X25519\nxD7o4VEOu1t7KZQ1gDgq2FPzBEeSRqbnqvQEXdLRYy143BxR6oFxsUUJCRB0ErXA\n--- AAAA\n" ; "missing short line")]
    #[test_case("age-encryption.org/v1\nX25519\n\n--- AAAA\n" ; "not a stanza")]
    #[test_case("age-encryption.org/v1\n" ; "missing footer")]
    fn invalid_recipient(data: &str) {
        assert_eq!(header_error(data), HeaderError::InvalidRecipient);
    }

    #[test_case("age-encryption.org/v1\n-> X25519 a\u{e9}\n\n--- AAAA\n" ; "non ascii")]
    #[test_case("age-encryption.org/v1\n-> X25519  b\n\n--- AAAA\n" ; "empty argument")]
    #[test_case("age-encryption.org/v1\n-> X25519 b \n\n--- AAAA\n" ; "trailing space")]
    #[test_case("age-encryption.org/v1\n-> X25519\tb\n\n--- AAAA\n" ; "tab")]
    fn invalid_arbitrary_string(data: &str) {
        assert_eq!(header_error(data), HeaderError::InvalidArbitraryString);
    }

    #[test_case("age-encryption.org/v1\n---\n" ; "no mac")]
    #[test_case("age-encryption.org/v1\n--- \n" ; "empty mac")]
    #[test_case("age-encryption.org/v1\n--- a b\n" ; "two macs")]
    #[test_case("age-encryption.org/v1\n---fgMiVLJHMlg9fW7CVG/hPS5EAU4Zeg19LyCP7SoH5nA\n" ; "missing space")]
    fn invalid_footer(data: &str) {
        assert_eq!(header_error(data), HeaderError::InvalidFooter);
    }

    #[test_case("age-encryption.org/v1\n--- fgMiVLJHMlg9fW7CVG/hPS5EAU4Zeg19LyCP7SoH5\n" ; "short mac")]
    #[test_case("age-encryption.org/v1\n--- fgMiVLJHMlg9fW7CVG/hPS5EAU4Zeg19LyCP7SoH5nB\n" ; "non canonical mac")]
    #[test_case("age-encryption.org/v1\n--- fgMiVLJHMlg9fW7CVG/hPS5EAU4Zeg19LyCP7SoH5nA=\n" ; "padded mac")]
    fn invalid_mac_encoding(data: &str) {
        assert_eq!(header_error(data), HeaderError::InvalidHmacHeader);
    }

    #[test]
    fn age_file_requires_nonce() {
        let mut file = TEST_HEADER.as_bytes().to_vec();
        file.extend_from_slice(&[7; 15]);
        assert!(matches!(
            AgeFile::read(&file[..]),
            Err(DecryptError::Header(HeaderError::MissingNonce))
        ));

        file.push(7);
        let age_file = AgeFile::read(&file[..]).unwrap();
        assert_eq!(age_file.body(), &[7; 16]);

        let mut data = vec![];
        age_file.write(&mut data).unwrap();
        assert_eq!(data, file);
    }
}
