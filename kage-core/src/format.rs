//! Stanza types and the line grammar of the age v1 header.

use secrecy::{ExposeSecret, Secret};

/// The prefix of a stanza's first line.
pub const STANZA_PREFIX: &str = "->";

/// The prefix of the header's footer line.
pub const FOOTER_PREFIX: &str = "---";

/// The length of a file key.
pub const FILE_KEY_BYTES: usize = 16;

/// The number of Base64 columns in a full stanza body line.
pub const BODY_LINE_COLUMNS: usize = 64;

/// A file key for encrypting or decrypting an age file.
///
/// The key is zeroized when dropped.
pub struct FileKey(Secret<[u8; FILE_KEY_BYTES]>);

impl From<[u8; FILE_KEY_BYTES]> for FileKey {
    fn from(file_key: [u8; FILE_KEY_BYTES]) -> Self {
        FileKey(Secret::new(file_key))
    }
}

impl ExposeSecret<[u8; FILE_KEY_BYTES]> for FileKey {
    fn expose_secret(&self) -> &[u8; FILE_KEY_BYTES] {
        self.0.expose_secret()
    }
}

/// A section of the age header that encapsulates the file key as encrypted to a specific
/// recipient.
///
/// Stanzas of types this library does not understand are carried through parsing and
/// serialization unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stanza {
    /// A tag identifying this stanza type.
    pub tag: String,
    /// Zero or more arguments.
    pub args: Vec<String>,
    /// The body of the stanza, usually containing a wrapped [`FileKey`].
    pub body: Vec<u8>,
}

/// Checks whether the string is a valid age "arbitrary string" (`1*VCHAR` in ABNF).
pub fn is_arbitrary_string<S: AsRef<str>>(s: &S) -> bool {
    let s = s.as_ref();
    !s.is_empty() && s.bytes().all(is_vchar)
}

fn is_vchar(c: u8) -> bool {
    (33..=126).contains(&c)
}

/// Decoding operations for header lines.
///
/// Each parser consumes a single line with its trailing newline already removed. The
/// caller decides which error a failure maps to.
pub mod read {
    use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
    use nom::{
        bytes::complete::{tag, take_till, take_while_m_n},
        character::complete::char,
        combinator::{all_consuming, map_res},
        multi::many0,
        sequence::preceded,
        IResult,
    };

    use super::{BODY_LINE_COLUMNS, FOOTER_PREFIX, STANZA_PREFIX};

    fn is_base64_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '+' || c == '/'
    }

    /// Splits the remainder of a line into its SP-prefixed tokens.
    ///
    /// Tokens are not validated here, so consecutive spaces produce empty tokens.
    fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
        many0(preceded(char(' '), take_till(|c| c == ' ')))(input)
    }

    /// Tokenizes the first line of a stanza into its type and arguments.
    ///
    /// The returned tokens are unvalidated; an empty vector means the line had no type.
    pub fn stanza_line(input: &str) -> IResult<&str, Vec<&str>> {
        all_consuming(preceded(tag(STANZA_PREFIX), tokens))(input)
    }

    /// Tokenizes the footer line into its arguments.
    pub fn footer_line(input: &str) -> IResult<&str, Vec<&str>> {
        all_consuming(preceded(tag(FOOTER_PREFIX), tokens))(input)
    }

    /// Reads and decodes a single line of a stanza body.
    ///
    /// The line must be canonical unpadded Base64 of at most 64 columns. Whether it
    /// terminates the body is determined by its length.
    pub fn body_line(input: &str) -> IResult<&str, Vec<u8>> {
        all_consuming(map_res(
            take_while_m_n(0, BODY_LINE_COLUMNS, is_base64_char),
            |line: &str| BASE64_STANDARD_NO_PAD.decode(line),
        ))(input)
    }

}

/// Encoding operations for header lines.
pub mod write {
    use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
    use cookie_factory::{
        combinator::string,
        multi::separated_list,
        sequence::{pair, tuple},
        SerializeFn, WriteContext,
    };
    use std::io::Write;
    use std::iter;

    use super::{Stanza, BODY_LINE_COLUMNS, STANZA_PREFIX};

    fn wrapped_encoded_data<'a, W: 'a + Write>(data: &[u8]) -> impl SerializeFn<W> + 'a {
        let encoded = BASE64_STANDARD_NO_PAD.encode(data);

        move |mut w: WriteContext<W>| {
            let mut rest = encoded.as_str();
            loop {
                let (line, tail) = rest.split_at(rest.len().min(BODY_LINE_COLUMNS));
                w = pair(string(line), string("\n"))(w)?;

                // The last body line is always short, and empty if necessary.
                if line.len() < BODY_LINE_COLUMNS {
                    break Ok(w);
                }
                rest = tail;
            }
        }
    }

    /// Writes an age stanza from its parts.
    ///
    /// A stanza with no arguments has no trailing space after its tag.
    pub fn age_stanza<'a, W: 'a + Write, S: AsRef<str>>(
        tag: &'a str,
        args: &'a [S],
        body: &'a [u8],
    ) -> impl SerializeFn<W> + 'a {
        tuple((
            string(STANZA_PREFIX),
            string(" "),
            separated_list(
                string(" "),
                iter::once(tag)
                    .chain(args.iter().map(|s| s.as_ref()))
                    .map(string),
            ),
            string("\n"),
            wrapped_encoded_data(body),
        ))
    }

    /// Writes a [`Stanza`].
    pub fn stanza<'a, W: 'a + Write>(s: &'a Stanza) -> impl SerializeFn<W> + 'a {
        age_stanza(&s.tag, &s.args, &s.body)
    }
}
