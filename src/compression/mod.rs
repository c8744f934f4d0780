//! Block compression: the codecs a container may store record payloads with.
//!
//! # Identity rules
//! Every compression scheme has a frozen one-byte id.  That id is written
//! into every block header and is the only thing a reader uses to pick the
//! decompressor.  An id is never reused, even if a scheme is retired.
//!
//! A reader that meets an unknown id MUST fail that block; it never guesses.

use std::io::{self, Read, Write};
use thiserror::Error;

// ── Frozen ids ──────────────────────────────────────────────────────────────

pub const ID_NONE:   u8 = 0;
pub const ID_ZSTD:   u8 = 1;
pub const ID_LZ4:    u8 = 2;
pub const ID_BROTLI: u8 = 3;
pub const ID_LZMA:   u8 = 4;

/// Default Zstd level used by containers and the index block.
pub const DEFAULT_LEVEL: i32 = 3;

// ── Compression enum ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    None,
    #[default]
    Zstd,
    Lz4,
    Brotli,
    Lzma,
}

impl Compression {
    /// On-disk id.
    #[inline]
    pub fn id(self) -> u8 {
        match self {
            Compression::None   => ID_NONE,
            Compression::Zstd   => ID_ZSTD,
            Compression::Lz4    => ID_LZ4,
            Compression::Brotli => ID_BROTLI,
            Compression::Lzma   => ID_LZMA,
        }
    }

    /// Returns `None` if the id is not recognised by this build.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            ID_NONE   => Some(Compression::None),
            ID_ZSTD   => Some(Compression::Zstd),
            ID_LZ4    => Some(Compression::Lz4),
            ID_BROTLI => Some(Compression::Brotli),
            ID_LZMA   => Some(Compression::Lzma),
            _         => None,
        }
    }

    /// Human-readable name (diagnostics and CLI).
    pub fn name(self) -> &'static str {
        match self {
            Compression::None   => "none",
            Compression::Zstd   => "zstd",
            Compression::Lz4    => "lz4",
            Compression::Brotli => "brotli",
            Compression::Lzma   => "lzma",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"   => Some(Compression::None),
            "zstd"   => Some(Compression::Zstd),
            "lz4"    => Some(Compression::Lz4),
            "brotli" => Some(Compression::Brotli),
            "lzma"   => Some(Compression::Lzma),
            _        => None,
        }
    }

    pub fn compress(self, data: &[u8], level: i32) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd => zstd::encode_all(data, level)
                .map_err(|e| CompressionError::Compress(e.to_string())),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Compression::Brotli => {
                let quality = level.clamp(0, 11) as u32;
                let mut out = Vec::new();
                {
                    let mut w = brotli::CompressorWriter::new(&mut out, 4096, quality, 22);
                    w.write_all(data).map_err(|e| CompressionError::Compress(e.to_string()))?;
                }
                Ok(out)
            }
            Compression::Lzma => {
                let mut out = Vec::new();
                lzma_rs::lzma_compress(&mut io::Cursor::new(data), &mut out)
                    .map_err(|e| CompressionError::Compress(e.to_string()))?;
                Ok(out)
            }
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd => zstd::decode_all(data)
                .map_err(|e| CompressionError::Decompress(e.to_string())),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| CompressionError::Decompress(e.to_string())),
            Compression::Brotli => {
                let mut out = Vec::new();
                brotli::Decompressor::new(data, 4096)
                    .read_to_end(&mut out)
                    .map_err(|e| CompressionError::Decompress(e.to_string()))?;
                Ok(out)
            }
            Compression::Lzma => {
                let mut out = Vec::new();
                lzma_rs::lzma_decompress(&mut io::Cursor::new(data), &mut out)
                    .map_err(|e| CompressionError::Decompress(e.to_string()))?;
                Ok(out)
            }
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Compression error: {0}")]
    Compress(String),
    #[error("Decompression error: {0}")]
    Decompress(String),
    #[error("Unknown compression id {0}, cannot decode without it")]
    UnknownId(u8),
}
