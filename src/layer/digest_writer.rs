//! Write-through digesting of layer streams.
//!
//! Bytes written to a [`DigestWriter`] flow through this chain:
//!
//! ```text
//! HashingWriter (diffID) -> gzip -> HashingWriter (digest) -> BufWriter (4 MiB) -> File
//! ```
//!
//! so the uncompressed digest, the compressed digest and the compressed
//! byte count are all known after a single pass.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use sha2::{Digest as _, Sha256};

use crate::error::{ImgforgeError, LayerErrorKind, Result};
use crate::model::Digest;

/// Size of the compressed output buffer.
pub const OUTPUT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// OS byte written into the gzip header ("unknown").
const GZIP_OS_UNKNOWN: u8 = 255;

/// A writer that hashes and counts every byte it forwards.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes forwarded so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Split into the wrapped writer, the digest and the byte count
    pub fn into_parts(self) -> (W, Digest, u64) {
        (self.inner, Digest::from_hasher(self.hasher), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Both digests of a finished layer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDigests {
    /// SHA-256 of the uncompressed bytes
    pub diff_id: Digest,
    /// SHA-256 of the compressed bytes
    pub digest: Digest,
    /// Compressed size as reported by the file system after the flush
    pub size: u64,
    /// Uncompressed byte count
    pub uncompressed_size: u64,
}

type Chain = HashingWriter<GzEncoder<HashingWriter<BufWriter<File>>>>;

/// Streaming compressor computing the diffID and blob digest in one pass.
pub struct DigestWriter {
    chain: Chain,
}

impl DigestWriter {
    /// Open `path` for writing, truncating it.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            ImgforgeError::layer(
                format!("creating {}", path.display()),
                LayerErrorKind::OpenSink(e),
            )
        })?;
        Ok(Self::new(file))
    }

    /// Wrap an already open file.
    pub fn new(file: File) -> Self {
        let buffered = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, file);
        let encoder = GzBuilder::new()
            .mtime(0)
            .operating_system(GZIP_OS_UNKNOWN)
            .write(HashingWriter::new(buffered), Compression::default());
        Self {
            chain: HashingWriter::new(encoder),
        }
    }

    /// Close the compressor, flush to disk and report the digests.
    pub fn finish(self) -> Result<StreamDigests> {
        let (encoder, diff_id, uncompressed_size) = self.chain.into_parts();
        let compressed = encoder.finish().map_err(|e| {
            ImgforgeError::layer("finishing layer stream", LayerErrorKind::CompressorClose(e))
        })?;
        let (buffered, digest, _) = compressed.into_parts();
        let file = buffered.into_inner().map_err(|e| {
            ImgforgeError::layer("finishing layer stream", LayerErrorKind::Flush(e.into_error()))
        })?;
        file.sync_all().map_err(|e| {
            ImgforgeError::layer("finishing layer stream", LayerErrorKind::Flush(e))
        })?;
        let size = file
            .metadata()
            .map_err(|e| ImgforgeError::layer("finishing layer stream", LayerErrorKind::Stat(e)))?
            .len();

        Ok(StreamDigests {
            diff_id,
            digest,
            size,
            uncompressed_size,
        })
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.chain.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.chain.flush()
    }
}
