//! Streaming decompression of a single archive entry.
//!
//! A reader owns nothing of the archive but a shared handle on its byte
//! source and a copy of the resolved entry's geometry, so readers outlive
//! lookups and any number of them can run over the same archive. Decryption
//! sits below the inflater: compressed bytes come off the source, through
//! the entry's cipher, and only then into deflate.

use crate::crypto::{AesCtrCipher, TraditionalCipher};
use crate::entry::{METHOD_DEFLATE, METHOD_STORE};
use crate::errors::{Error, ErrorKind};
use crate::source::ReaderAt;
use flate2::{Decompress, FlushDecompress, Status};
use std::sync::Arc;

/// Compressed bytes are pulled through the cipher in chunks of this size
/// before being fed to the inflater.
const READ_BUFFER_LEN: usize = 16 * 1024;

/// Replayed bytes are decoded and discarded in chunks of this size when a
/// seek has to re-inflate from the start of the entry.
const SEEK_DISCARD_LEN: usize = 512;

pub(crate) enum CryptoState {
    Plain,
    Traditional(TraditionalCipher),
    Aes(AesCtrCipher),
}

struct InflateState {
    stream: Decompress,
    buffer: Vec<u8>,
    in_pos: usize,
    in_end: usize,
}

impl InflateState {
    fn new() -> InflateState {
        InflateState {
            // zip entries are raw deflate streams, no zlib wrapper
            stream: Decompress::new(false),
            buffer: vec![0u8; READ_BUFFER_LEN],
            in_pos: 0,
            in_end: 0,
        }
    }

    fn reset(&mut self) {
        self.stream.reset(false);
        self.in_pos = 0;
        self.in_end = 0;
    }
}

/// An open entry positioned somewhere in its decoded data.
///
/// Obtained from [`ZipArchive::open_read`](crate::ZipArchive::open_read).
/// The cursor starts at 0 and advances by exactly the bytes delivered;
/// partial reads are safe.
pub struct ZipReader<R> {
    source: Arc<R>,
    method: u16,
    uncompressed_size: u64,
    /// Physical offset of the first compressed payload byte, past any
    /// encryption header or salt.
    payload_offset: u64,
    /// Compressed payload length, excluding encryption overhead.
    payload_len: u64,
    compressed_pos: u64,
    uncompressed_pos: u64,
    inflate: Option<Box<InflateState>>,
    crypto: CryptoState,
}

impl<R> std::fmt::Debug for ZipReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipReader")
            .field("method", &self.method)
            .field("uncompressed_size", &self.uncompressed_size)
            .field("payload_offset", &self.payload_offset)
            .field("payload_len", &self.payload_len)
            .field("compressed_pos", &self.compressed_pos)
            .field("uncompressed_pos", &self.uncompressed_pos)
            .finish()
    }
}

impl<R: ReaderAt> ZipReader<R> {
    pub(crate) fn new(
        source: Arc<R>,
        method: u16,
        uncompressed_size: u64,
        payload_offset: u64,
        payload_len: u64,
        crypto: CryptoState,
    ) -> ZipReader<R> {
        let inflate = (method == METHOD_DEFLATE).then(|| Box::new(InflateState::new()));
        ZipReader {
            source,
            method,
            uncompressed_size,
            payload_offset,
            payload_len,
            compressed_pos: 0,
            uncompressed_pos: 0,
            inflate,
            crypto,
        }
    }

    /// Reads up to `buf.len()` decoded bytes at the current position,
    /// returning how many were delivered. Returns 0 only at end of data.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let avail = self.uncompressed_size - self.uncompressed_pos;
        let want = (buf.len() as u64).min(avail) as usize;
        if want == 0 {
            return Ok(0);
        }

        if self.method == METHOD_STORE {
            read_decrypted(
                &*self.source,
                &mut self.crypto,
                self.payload_offset,
                &mut self.compressed_pos,
                &mut buf[..want],
            )?;
            self.uncompressed_pos += want as u64;
            return Ok(want);
        }

        let Some(state) = self.inflate.as_deref_mut() else {
            return Err(Error::corrupt("deflated entry without an inflater"));
        };

        let mut produced = 0usize;
        let result = loop {
            if state.in_pos == state.in_end && self.compressed_pos < self.payload_len {
                let fill =
                    (self.payload_len - self.compressed_pos).min(READ_BUFFER_LEN as u64) as usize;
                if let Err(e) = read_decrypted(
                    &*self.source,
                    &mut self.crypto,
                    self.payload_offset,
                    &mut self.compressed_pos,
                    &mut state.buffer[..fill],
                ) {
                    break Err(e);
                }
                state.in_pos = 0;
                state.in_end = fill;
            }

            let before_in = state.stream.total_in();
            let before_out = state.stream.total_out();
            let status = state.stream.decompress(
                &state.buffer[state.in_pos..state.in_end],
                &mut buf[produced..want],
                FlushDecompress::Sync,
            );
            state.in_pos += (state.stream.total_in() - before_in) as usize;
            produced += (state.stream.total_out() - before_out) as usize;

            match status {
                Ok(Status::Ok) => {}
                Ok(Status::StreamEnd) | Ok(Status::BufError) => break Ok(()),
                Err(_) => break Err(Error::corrupt("invalid deflate stream")),
            }

            if produced == want {
                break Ok(());
            }
            if state.in_pos == state.in_end && self.compressed_pos >= self.payload_len {
                // compressed data exhausted without reaching the declared
                // uncompressed size
                break Ok(());
            }
        };

        self.uncompressed_pos += produced as u64;
        match result {
            // an error after partial progress still delivers the bytes; the
            // cursor reflects exactly what the caller got
            Err(e) if produced == 0 => Err(e),
            _ => Ok(produced),
        }
    }

    /// The current position in the decoded data.
    pub fn tell(&self) -> u64 {
        self.uncompressed_pos
    }

    /// The total decoded length.
    pub fn len(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn is_empty(&self) -> bool {
        self.uncompressed_size == 0
    }

    /// Repositions the cursor.
    ///
    /// Plain stored entries and AES entries reseat directly: both can derive
    /// their state from the absolute offset. Deflated and traditionally
    /// encrypted entries cannot; seeking backward rewinds to the start of the
    /// payload and re-decodes forward, discarding everything before `pos`.
    pub fn seek(&mut self, pos: u64) -> Result<(), Error> {
        if pos > self.uncompressed_size {
            return Err(ErrorKind::PastEof.into());
        }

        let sequential_keystream = matches!(self.crypto, CryptoState::Traditional(_));
        if self.method == METHOD_STORE && !sequential_keystream {
            if let CryptoState::Aes(cipher) = &mut self.crypto {
                cipher.seek_to(pos);
            }
            self.compressed_pos = pos;
            self.uncompressed_pos = pos;
            return Ok(());
        }

        if pos < self.uncompressed_pos {
            if let Some(state) = self.inflate.as_deref_mut() {
                state.reset();
            }
            if let CryptoState::Traditional(cipher) = &mut self.crypto {
                cipher.rewind();
            }
            self.compressed_pos = 0;
            self.uncompressed_pos = 0;
        }

        let mut scratch = [0u8; SEEK_DISCARD_LEN];
        while self.uncompressed_pos < pos {
            let step = (pos - self.uncompressed_pos).min(SEEK_DISCARD_LEN as u64) as usize;
            let read = self.read(&mut scratch[..step])?;
            if read != step {
                return Err(Error::io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "entry data ended while seeking",
                )));
            }
        }

        Ok(())
    }

    /// An independent reader over the same entry, positioned at 0.
    ///
    /// The original's cursor is not inherited; encrypted entries restart
    /// from the verified initial key state.
    pub fn duplicate(&self) -> ZipReader<R> {
        let crypto = match &self.crypto {
            CryptoState::Plain => CryptoState::Plain,
            CryptoState::Traditional(cipher) => CryptoState::Traditional(cipher.duplicate()),
            CryptoState::Aes(cipher) => CryptoState::Aes(cipher.duplicate()),
        };

        ZipReader::new(
            Arc::clone(&self.source),
            self.method,
            self.uncompressed_size,
            self.payload_offset,
            self.payload_len,
            crypto,
        )
    }

    /// Part of the open-file contract; archives are read-only.
    pub fn write(&mut self, _buf: &[u8]) -> Result<usize, Error> {
        Err(ErrorKind::ReadOnly.into())
    }

    /// Nothing to flush on a read-only handle.
    pub fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl<R: ReaderAt> std::io::Read for ZipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        ZipReader::read(self, buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

impl<R: ReaderAt> std::io::Seek for ZipReader<R> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            std::io::SeekFrom::Start(n) => Some(n),
            std::io::SeekFrom::End(n) => self.uncompressed_size.checked_add_signed(n),
            std::io::SeekFrom::Current(n) => self.uncompressed_pos.checked_add_signed(n),
        };
        let target = target.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek before start")
        })?;
        ZipReader::seek(self, target)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(target)
    }
}

/// Reads the next `buf.len()` compressed bytes and runs them through the
/// entry's cipher. All compressed reads funnel through here so the two
/// stream ciphers observe every byte exactly once and in order.
fn read_decrypted<R: ReaderAt>(
    source: &R,
    crypto: &mut CryptoState,
    payload_offset: u64,
    compressed_pos: &mut u64,
    buf: &mut [u8],
) -> Result<(), Error> {
    source
        .read_exact_at(buf, payload_offset + *compressed_pos)
        .map_err(Error::io)?;

    match crypto {
        CryptoState::Plain => {}
        CryptoState::Traditional(cipher) => cipher.decrypt(buf),
        CryptoState::Aes(cipher) => cipher.decrypt(buf),
    }

    *compressed_pos += buf.len() as u64;
    Ok(())
}
