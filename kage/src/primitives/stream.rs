//! I/O helper structs for age file encryption and decryption.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305,
};
use secrecy::{ExposeSecret, Secret, SecretVec};
use std::fmt;
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

use crate::wfl;

const CHUNK_SIZE: usize = 64 * 1024;
const TAG_SIZE: usize = 16;
const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;
const COUNTER_BYTES: usize = 11;

pub(crate) struct PayloadKey(pub(crate) Secret<[u8; 32]>);

/// Errors that can occur while processing a STREAM-encrypted payload.
///
/// These are returned inside an [`io::Error`]; use [`io::Error::get_ref`] and
/// [`std::error::Error::downcast_ref`] to recover them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// The payload ended before its last chunk.
    Truncated,
    /// The last chunk contained no plaintext, but was not the only chunk.
    EmptyLastChunk,
    /// A chunk with no plaintext was written somewhere other than an empty payload.
    EmptyChunk,
    /// A chunk failed to authenticate.
    DecryptionFailed,
    /// The payload continued after its last chunk.
    TrailingData,
    /// The chunk counter would wrap around.
    CounterOverflow,
    /// The last chunk has already been processed.
    Finished,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Truncated => wfl!(f, "err-stream-truncated"),
            StreamError::EmptyLastChunk => wfl!(f, "err-stream-last-chunk-empty"),
            StreamError::EmptyChunk => wfl!(f, "err-stream-empty-chunk"),
            StreamError::DecryptionFailed => wfl!(f, "err-stream-decryption"),
            StreamError::TrailingData => wfl!(f, "err-stream-trailing-data"),
            StreamError::CounterOverflow => wfl!(f, "err-stream-counter-overflow"),
            StreamError::Finished => wfl!(f, "err-stream-finished"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<StreamError> for io::Error {
    fn from(e: StreamError) -> Self {
        let kind = match e {
            StreamError::Truncated => io::ErrorKind::UnexpectedEof,
            StreamError::EmptyChunk => io::ErrorKind::InvalidInput,
            StreamError::Finished => io::ErrorKind::WriteZero,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

/// The nonce used in age's STREAM encryption.
///
/// Structured as 11 bytes of big endian counter, and 1 byte of last block flag
/// (`0x00 / 0x01`).
#[derive(Clone, Copy, Default)]
struct Nonce([u8; 12]);

impl Nonce {
    /// Increments the chunk counter, returning `true` if it wrapped around to zero.
    fn increment_counter(&mut self) -> bool {
        for b in self.0[..COUNTER_BYTES].iter_mut().rev() {
            let (next, carry) = b.overflowing_add(1);
            *b = next;
            if !carry {
                return false;
            }
        }
        true
    }

    fn is_first(&self) -> bool {
        self.0[..COUNTER_BYTES].iter().all(|b| *b == 0)
    }

    fn is_last(&self) -> bool {
        self.0[COUNTER_BYTES] != 0
    }

    fn set_last(&mut self, last: bool) {
        self.0[COUNTER_BYTES] = u8::from(last);
    }
}

/// `STREAM[key](plaintext)`
///
/// The [STREAM] construction for online authenticated encryption, instantiated with
/// ChaCha20-Poly1305 in 64KiB chunks, and a nonce structure of 11 bytes of big endian
/// counter, and 1 byte of last block flag (0x00 / 0x01).
///
/// [STREAM]: https://eprint.iacr.org/2015/189.pdf
pub(crate) struct Stream {
    aead: ChaCha20Poly1305,
    nonce: Nonce,
}

impl Stream {
    fn new(key: PayloadKey) -> Self {
        Stream {
            aead: ChaCha20Poly1305::new(key.0.expose_secret().into()),
            nonce: Nonce::default(),
        }
    }

    /// Wraps `STREAM` encryption under the given `key` around a writer.
    ///
    /// `key` must **never** be repeated across multiple streams. In age this is
    /// achieved by deriving the key with [`HKDF`] from both a random file key and a
    /// random nonce.
    ///
    /// [`HKDF`]: kage_core::primitives::hkdf
    pub(crate) fn encrypt<W: Write>(key: PayloadKey, inner: W) -> StreamWriter<W> {
        StreamWriter {
            stream: Self::new(key),
            inner,
            chunk: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE)),
        }
    }

    /// Wraps `STREAM` decryption under the given `key` around a reader.
    pub(crate) fn decrypt<R: Read>(key: PayloadKey, inner: R) -> StreamReader<R> {
        StreamReader {
            stream: Self::new(key),
            inner,
            encrypted_chunk: vec![0; ENCRYPTED_CHUNK_SIZE],
            encrypted_pos: 0,
            chunk: None,
            chunk_pos: 0,
            failed: None,
        }
    }

    fn encrypt_chunk(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>, StreamError> {
        assert!(chunk.len() <= CHUNK_SIZE);

        if self.nonce.is_last() {
            return Err(StreamError::Finished);
        }
        // Only an empty payload is encrypted to an empty chunk.
        if chunk.is_empty() && !(last && self.nonce.is_first()) {
            return Err(StreamError::EmptyChunk);
        }

        self.nonce.set_last(last);
        let encrypted = self
            .aead
            .encrypt(&self.nonce.0.into(), chunk)
            .expect("we will never hit chacha20::MAX_BLOCKS because of the chunk size");
        if !last && self.nonce.increment_counter() {
            return Err(StreamError::CounterOverflow);
        }

        Ok(encrypted)
    }

    #[cfg(test)]
    fn decrypt_chunk(&mut self, chunk: &[u8], last: bool) -> Result<SecretVec<u8>, StreamError> {
        let decrypted = self.open_chunk(chunk, last)?;
        self.advance(last)?;
        Ok(decrypted)
    }

    /// Authenticates and decrypts a chunk under the current nonce, without moving the
    /// stream forward.
    fn open_chunk(&self, chunk: &[u8], last: bool) -> Result<SecretVec<u8>, StreamError> {
        assert!(chunk.len() <= ENCRYPTED_CHUNK_SIZE);

        if self.nonce.is_last() {
            return Err(StreamError::Finished);
        }

        let mut nonce = self.nonce;
        nonce.set_last(last);
        self.aead
            .decrypt(&nonce.0.into(), chunk)
            .map(SecretVec::new)
            .map_err(|_| StreamError::DecryptionFailed)
    }

    /// Records that the chunk under the current nonce has been accepted.
    fn advance(&mut self, last: bool) -> Result<(), StreamError> {
        self.nonce.set_last(last);
        if !last && self.nonce.increment_counter() {
            return Err(StreamError::CounterOverflow);
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.nonce.is_last()
    }
}

/// Writes an encrypted age file.
pub struct StreamWriter<W: Write> {
    stream: Stream,
    inner: W,
    chunk: Zeroizing<Vec<u8>>,
}

impl<W: Write> StreamWriter<W> {
    /// Writes the final chunk of the age file.
    ///
    /// You **MUST** call `finish` when you are done writing, in order to finish the
    /// encryption process. Failing to call `finish` will result in a truncated file that
    /// will fail to decrypt.
    pub fn finish(mut self) -> io::Result<W> {
        let encrypted = self.stream.encrypt_chunk(&self.chunk, true)?;
        self.inner.write_all(&encrypted)?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let mut bytes_written = 0;

        while !buf.is_empty() {
            // A full chunk is only sealed once more data arrives, because the last
            // chunk must be sealed in finish().
            if self.chunk.len() == CHUNK_SIZE {
                let encrypted = self.stream.encrypt_chunk(&self.chunk, false)?;
                self.inner.write_all(&encrypted)?;
                self.chunk.clear();
            }

            let to_write = buf.len().min(CHUNK_SIZE - self.chunk.len());
            self.chunk.extend_from_slice(&buf[..to_write]);
            bytes_written += to_write;
            buf = &buf[to_write..];
        }

        Ok(bytes_written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Provides access to a decrypted age file.
///
/// Chunks are authenticated before any of their plaintext is returned. Reaching the end
/// of the plaintext means the whole payload, including its last chunk, was authentic.
pub struct StreamReader<R> {
    stream: Stream,
    inner: R,
    encrypted_chunk: Vec<u8>,
    encrypted_pos: usize,
    chunk: Option<SecretVec<u8>>,
    chunk_pos: usize,
    /// Set once the payload is known to be invalid; every later read returns it.
    failed: Option<StreamError>,
}

impl<R: Read> StreamReader<R> {
    fn fill_encrypted_chunk(&mut self) -> io::Result<()> {
        while self.encrypted_pos < ENCRYPTED_CHUNK_SIZE {
            match self
                .inner
                .read(&mut self.encrypted_chunk[self.encrypted_pos..])
            {
                Ok(0) => break,
                Ok(n) => self.encrypted_pos += n,
                Err(e) => match e.kind() {
                    io::ErrorKind::Interrupted => (),
                    _ => return Err(e),
                },
            }
        }
        Ok(())
    }

    fn fail(&mut self, e: StreamError) -> io::Error {
        self.failed = Some(e);
        e.into()
    }

    fn decrypt_chunk(&mut self) -> io::Result<()> {
        let len = self.encrypted_pos;
        self.encrypted_pos = 0;
        let chunk = &self.encrypted_chunk[..len];

        if chunk.is_empty() {
            // Stream has ended before seeing the last chunk.
            return Err(self.fail(StreamError::Truncated));
        }

        // A short chunk can only be the last chunk. A full chunk is usually not, except
        // when the plaintext is a multiple of the chunk size, so on failure we try
        // again as the last chunk.
        let mut last = chunk.len() < ENCRYPTED_CHUNK_SIZE;
        if last && chunk.len() == TAG_SIZE && !self.stream.nonce.is_first() {
            return Err(self.fail(StreamError::EmptyLastChunk));
        }

        let opened = match self.stream.open_chunk(chunk, last) {
            Err(StreamError::DecryptionFailed) if !last => {
                last = true;
                self.stream.open_chunk(chunk, true)
            }
            res => res,
        };
        let decrypted = opened.map_err(|e| self.fail(e))?;

        // The last chunk is only accepted once nothing follows it.
        if last {
            self.ensure_no_trailing_data()?;
        }
        self.stream.advance(last).map_err(|e| self.fail(e))?;

        self.chunk = Some(decrypted);
        self.chunk_pos = 0;

        Ok(())
    }

    fn ensure_no_trailing_data(&mut self) -> io::Result<()> {
        let mut probe = [0; 1];
        loop {
            match self.inner.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => return Err(self.fail(StreamError::TrailingData)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
    }

    fn read_from_chunk(&mut self, buf: &mut [u8]) -> usize {
        let chunk = match &self.chunk {
            Some(chunk) => chunk.expose_secret(),
            None => return 0,
        };

        let to_read = buf.len().min(chunk.len() - self.chunk_pos);
        buf[..to_read].copy_from_slice(&chunk[self.chunk_pos..self.chunk_pos + to_read]);
        self.chunk_pos += to_read;

        if self.chunk_pos == chunk.len() {
            // We've finished with the current chunk.
            self.chunk = None;
        }

        to_read
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.failed {
            return Err(e.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.chunk.is_none() {
            if self.stream.is_complete() {
                return Ok(0);
            }
            self.fill_encrypted_chunk()?;
            self.decrypt_chunk()?;
        }

        Ok(self.read_from_chunk(buf))
    }
}
