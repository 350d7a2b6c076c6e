//! The ASCII armor envelope for age files.

use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    prelude::BASE64_STANDARD_NO_PAD,
    Engine,
};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use zeroize::Zeroizing;

use crate::wfl;

const ARMORED_COLUMNS_PER_LINE: usize = 64;
const ARMORED_BYTES_PER_LINE: usize = ARMORED_COLUMNS_PER_LINE / 4 * 3;
const ARMORED_BEGIN_MARKER: &str = "-----BEGIN AGE ENCRYPTED FILE-----";
const ARMORED_END_MARKER: &str = "-----END AGE ENCRYPTED FILE-----";
const MAX_WHITESPACE: usize = 1024;

/// Armor lines are canonical base64, but other implementations pad them.
const ARMOR_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The format of an age file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// age binary format.
    Binary,
    /// ASCII armored encoding.
    AsciiArmor,
}

enum ArmorIs<W> {
    Enabled {
        inner: W,
        line: Zeroizing<Vec<u8>>,
    },
    Disabled {
        inner: W,
    },
}

/// Writer that optionally applies the age ASCII armor envelope.
pub struct ArmoredWriter<W: Write>(ArmorIs<W>);

impl<W: Write> ArmoredWriter<W> {
    /// Wraps the given output in an `ArmoredWriter` that will apply the given [`Format`].
    pub fn wrap_output(mut inner: W, format: Format) -> io::Result<Self> {
        match format {
            Format::AsciiArmor => {
                inner.write_all(ARMORED_BEGIN_MARKER.as_bytes())?;
                inner.write_all(b"\n")?;
                Ok(ArmoredWriter(ArmorIs::Enabled {
                    inner,
                    line: Zeroizing::new(Vec::with_capacity(ARMORED_BYTES_PER_LINE)),
                }))
            }
            Format::Binary => Ok(ArmoredWriter(ArmorIs::Disabled { inner })),
        }
    }

    /// Writes the end of the armor envelope, if any.
    ///
    /// You **MUST** call `finish` when you are done writing, in order to finish the
    /// armoring process. Failing to call `finish` will result in a truncated file that
    /// will fail to decrypt.
    pub fn finish(self) -> io::Result<W> {
        match self.0 {
            ArmorIs::Enabled { mut inner, line } => {
                // The last line is short, full, or empty for an empty payload.
                write_line(&mut inner, &line)?;
                inner.write_all(ARMORED_END_MARKER.as_bytes())?;
                inner.write_all(b"\n")?;
                Ok(inner)
            }
            ArmorIs::Disabled { inner } => Ok(inner),
        }
    }
}

fn write_line<W: Write>(inner: &mut W, data: &[u8]) -> io::Result<()> {
    inner.write_all(BASE64_STANDARD_NO_PAD.encode(data).as_bytes())?;
    inner.write_all(b"\n")
}

impl<W: Write> Write for ArmoredWriter<W> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            ArmorIs::Enabled { inner, line } => {
                let mut written = 0;
                while !buf.is_empty() {
                    if line.len() == ARMORED_BYTES_PER_LINE {
                        write_line(inner, line)?;
                        line.clear();
                    }

                    let to_write = buf.len().min(ARMORED_BYTES_PER_LINE - line.len());
                    line.extend_from_slice(&buf[..to_write]);
                    written += to_write;
                    buf = &buf[to_write..];
                }
                Ok(written)
            }
            ArmorIs::Disabled { inner } => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            ArmorIs::Enabled { inner, .. } => inner.flush(),
            ArmorIs::Disabled { inner } => inner.flush(),
        }
    }
}

/// Errors that can occur while reading an armored age file.
///
/// These are returned inside an [`io::Error`] of kind [`io::ErrorKind::InvalidData`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmoredReadError {
    /// More than 1024 bytes of whitespace preceded the begin marker.
    TooMuchLeadingWhitespace,
    /// The first non-whitespace line was not the begin marker.
    InvalidFirstLine,
    /// A line was longer than 64 columns.
    LineTooLong,
    /// A line was not canonical base64.
    NotCanonicalBase64,
    /// A short line was followed by something other than the end marker.
    InvalidClosingLine,
    /// The input ended before the end marker.
    MissingClosingLine,
    /// There was non-whitespace data after the end marker.
    TrailingData,
    /// More than 1024 bytes of whitespace followed the end marker.
    TooMuchTrailingWhitespace,
}

impl fmt::Display for ArmoredReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmoredReadError::TooMuchLeadingWhitespace => {
                wfl!(f, "err-armor-leading-whitespace")
            }
            ArmoredReadError::InvalidFirstLine => wfl!(f, "err-armor-first-line"),
            ArmoredReadError::LineTooLong => wfl!(f, "err-armor-line-too-long"),
            ArmoredReadError::NotCanonicalBase64 => wfl!(f, "err-armor-not-canonical"),
            ArmoredReadError::InvalidClosingLine => wfl!(f, "err-armor-closing-line"),
            ArmoredReadError::MissingClosingLine => wfl!(f, "err-armor-missing-closing-line"),
            ArmoredReadError::TrailingData => wfl!(f, "err-armor-trailing-data"),
            ArmoredReadError::TooMuchTrailingWhitespace => {
                wfl!(f, "err-armor-trailing-whitespace")
            }
        }
    }
}

impl std::error::Error for ArmoredReadError {}

impl From<ArmoredReadError> for io::Error {
    fn from(e: ArmoredReadError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_whitespace(data: &[u8]) -> bool {
    data.iter().all(|b| b.is_ascii_whitespace())
}

/// Reader that will parse the age ASCII armor format if detected.
///
/// Input is treated as armored if its first line is the begin marker or consists only
/// of whitespace. Anything else is passed through unmodified.
pub struct ArmoredReader<R: Read> {
    inner: BufReader<R>,
    is_armored: Option<bool>,
    line_buf: Zeroizing<Vec<u8>>,
    line_pos: usize,
    byte_buf: Zeroizing<Vec<u8>>,
    byte_pos: usize,
    found_short_line: bool,
    found_end: bool,
}

impl<R: Read> ArmoredReader<R> {
    /// Wraps a reader, detecting the armor envelope on the first read.
    pub fn new(inner: R) -> Self {
        ArmoredReader {
            inner: BufReader::new(inner),
            is_armored: None,
            line_buf: Zeroizing::new(Vec::with_capacity(ARMORED_COLUMNS_PER_LINE + 2)),
            line_pos: 0,
            byte_buf: Zeroizing::new(Vec::with_capacity(ARMORED_BYTES_PER_LINE)),
            byte_pos: 0,
            found_short_line: false,
            found_end: false,
        }
    }

    /// Reads at most `limit` bytes, stopping after the first newline.
    fn read_bounded_line(&mut self, limit: usize) -> io::Result<usize> {
        self.line_buf.clear();
        (&mut self.inner)
            .take(limit as u64)
            .read_until(b'\n', &mut self.line_buf)
    }

    fn detect_armor(&mut self) -> io::Result<bool> {
        self.read_bounded_line(MAX_WHITESPACE + 2)?;
        self.line_pos = 0;
        Ok(self.line_buf.starts_with(ARMORED_BEGIN_MARKER.as_bytes())
            || (!self.line_buf.is_empty() && is_whitespace(&self.line_buf)))
    }

    /// Consumes leading whitespace and the begin marker. The first line is already in
    /// `line_buf`.
    fn read_begin_marker(&mut self) -> io::Result<()> {
        let mut whitespace = 0;
        while !self.line_buf.is_empty() && is_whitespace(&self.line_buf) {
            whitespace += self.line_buf.len();
            if whitespace > MAX_WHITESPACE {
                return Err(ArmoredReadError::TooMuchLeadingWhitespace.into());
            }
            self.read_bounded_line(MAX_WHITESPACE + 2)?;
        }

        if strip_line_ending(&self.line_buf) == ARMORED_BEGIN_MARKER.as_bytes() {
            Ok(())
        } else {
            Err(ArmoredReadError::InvalidFirstLine.into())
        }
    }

    /// Decodes the next body line into `byte_buf`, or consumes the end marker.
    fn read_body_line(&mut self) -> io::Result<()> {
        // Allow for CRLF, and one more byte to detect overlong lines.
        if self.read_bounded_line(ARMORED_COLUMNS_PER_LINE + 3)? == 0 {
            return Err(ArmoredReadError::MissingClosingLine.into());
        }

        let line = strip_line_ending(&self.line_buf);
        if line == ARMORED_END_MARKER.as_bytes() {
            self.found_end = true;
            return self.read_trailing_whitespace();
        }
        // '-' is outside the Base64 alphabet, so this can only be a damaged end marker.
        if self.found_short_line || line.starts_with(b"-") {
            return Err(ArmoredReadError::InvalidClosingLine.into());
        }
        if line.len() > ARMORED_COLUMNS_PER_LINE {
            return Err(ArmoredReadError::LineTooLong.into());
        }

        let decoded = ARMOR_ENGINE
            .decode(line)
            .map_err(|_| ArmoredReadError::NotCanonicalBase64)?;
        if decoded.len() < ARMORED_BYTES_PER_LINE {
            self.found_short_line = true;
        }
        self.byte_buf = Zeroizing::new(decoded);
        self.byte_pos = 0;

        Ok(())
    }

    fn read_trailing_whitespace(&mut self) -> io::Result<()> {
        let mut trailing = vec![];
        (&mut self.inner)
            .take(MAX_WHITESPACE as u64 + 1)
            .read_to_end(&mut trailing)?;

        if !is_whitespace(&trailing) {
            Err(ArmoredReadError::TrailingData.into())
        } else if trailing.len() > MAX_WHITESPACE {
            Err(ArmoredReadError::TooMuchTrailingWhitespace.into())
        } else {
            Ok(())
        }
    }

    fn read_armored(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.byte_pos < self.byte_buf.len() {
                let to_read = buf.len().min(self.byte_buf.len() - self.byte_pos);
                buf[..to_read]
                    .copy_from_slice(&self.byte_buf[self.byte_pos..self.byte_pos + to_read]);
                self.byte_pos += to_read;
                return Ok(to_read);
            }
            if self.found_end {
                return Ok(0);
            }
            self.read_body_line()?;
        }
    }

    fn read_binary(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Return any leftover data from armor detection first.
        if self.line_pos < self.line_buf.len() {
            let to_read = buf.len().min(self.line_buf.len() - self.line_pos);
            buf[..to_read].copy_from_slice(&self.line_buf[self.line_pos..self.line_pos + to_read]);
            self.line_pos += to_read;
            Ok(to_read)
        } else {
            self.inner.read(buf)
        }
    }
}

impl<R: Read> Read for ArmoredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let is_armored = match self.is_armored {
            Some(is_armored) => is_armored,
            None => {
                let is_armored = self.detect_armor()?;
                self.is_armored = Some(is_armored);
                if is_armored {
                    self.read_begin_marker()?;
                }
                is_armored
            }
        };

        if is_armored {
            self.read_armored(buf)
        } else {
            self.read_binary(buf)
        }
    }
}
