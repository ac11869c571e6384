//! Compression codec for snapshot artifacts.
//!
//! Writers fan every stored byte out to the file and a SHA-256 accumulator,
//! with the compressor layered on top, so the checksum always covers the
//! bytes as they sit on disk. Readers expose the logical (decompressed)
//! stream.

use flate2::Compression as GzLevel;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SnapshotError};

/// Artifact compression mode as recorded in the manifest.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    #[default]
    Zstd,
}

impl Compression {
    pub const ALL: [Compression; 3] = [Compression::None, Compression::Gzip, Compression::Zstd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// File-name suffix appended after the engine's base extension.
    pub fn suffix(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            _ => Err(SnapshotError::InvalidCompression(s.to_string())),
        }
    }
}

/// Compression mode plus encoder levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    pub compression: Compression,
    pub zstd_level: i32,
    pub gzip_level: u32,
}

impl Codec {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            zstd_level: 3,
            gzip_level: 6,
        }
    }

    pub fn with_levels(mut self, zstd_level: i32, gzip_level: u32) -> Self {
        self.zstd_level = zstd_level;
        self.gzip_level = gzip_level.min(9);
        self
    }

    /// Create (or truncate) `path` and return a compressing, hashing writer.
    pub fn create(&self, path: &Path) -> Result<CodecWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let sink = HashingWriter::new(file);
        let encoder = match self.compression {
            Compression::None => Encoder::Plain(sink),
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(sink, GzLevel::new(self.gzip_level))),
            Compression::Zstd => Encoder::Zstd(
                zstd::stream::write::Encoder::new(sink, self.zstd_level)
                    .map_err(|e| SnapshotError::stream("zstd encoder", e))?,
            ),
        };
        Ok(CodecWriter { encoder })
    }

    /// Open `path` and return a reader over its decompressed content.
    pub fn open(&self, path: &Path) -> Result<CodecReader> {
        open_reader(path, self.compression)
    }
}

/// Checksum and stored size of a finished artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDigest {
    pub sha256: String,
    pub size: u64,
}

struct HashingWriter {
    inner: BufWriter<File>,
    hasher: Sha256,
    written: u64,
}

impl HashingWriter {
    fn new(file: File) -> Self {
        Self {
            inner: BufWriter::new(file),
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> Result<ArtifactDigest> {
        let file = self
            .inner
            .into_inner()
            .map_err(|e| SnapshotError::stream("flushing artifact", e.into_error()))?;
        file.sync_all()
            .map_err(|e| SnapshotError::stream("syncing artifact", e))?;
        Ok(ArtifactDigest {
            sha256: hex::encode(self.hasher.finalize()),
            size: self.written,
        })
    }
}

impl Write for HashingWriter {
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

enum Encoder {
    Plain(HashingWriter),
    Gzip(GzEncoder<HashingWriter>),
    Zstd(zstd::stream::write::Encoder<'static, HashingWriter>),
}

/// Write side of the codec. Must be finished with [`CodecWriter::close`];
/// dropping it leaves a truncated artifact that callers are expected to discard.
pub struct CodecWriter {
    encoder: Encoder,
}

impl CodecWriter {
    /// Finish the compressor, then flush and sync the file. Returns the
    /// checksum over the stored bytes.
    pub fn close(self) -> Result<ArtifactDigest> {
        let sink = match self.encoder {
            Encoder::Plain(w) => w,
            Encoder::Gzip(e) => e
                .finish()
                .map_err(|e| SnapshotError::stream("closing gzip stream", e))?,
            Encoder::Zstd(e) => e
                .finish()
                .map_err(|e| SnapshotError::stream("closing zstd stream", e))?,
        };
        sink.finish()
    }
}

impl Write for CodecWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.encoder {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.encoder {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(e) => e.flush(),
            Encoder::Zstd(e) => e.flush(),
        }
    }
}

/// Read side of the codec, yielding the logical payload.
pub enum CodecReader {
    Plain(BufReader<File>),
    Gzip(MultiGzDecoder<BufReader<File>>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<File>>),
}

pub fn open_reader(path: &Path, compression: Compression) -> Result<CodecReader> {
    let file = BufReader::new(File::open(path)?);
    Ok(match compression {
        Compression::None => CodecReader::Plain(file),
        Compression::Gzip => CodecReader::Gzip(MultiGzDecoder::new(file)),
        Compression::Zstd => CodecReader::Zstd(
            zstd::stream::read::Decoder::with_buffer(file)
                .map_err(|e| SnapshotError::stream("zstd decoder", e))?,
        ),
    })
}

impl Read for CodecReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CodecReader::Plain(r) => r.read(buf),
            CodecReader::Gzip(r) => r.read(buf),
            CodecReader::Zstd(r) => r.read(buf),
        }
    }
}
