//! Self-describing blocks: a fixed 60-byte little-endian header followed by
//! the stored (possibly compressed) payload.
//!
//! | Field          | Size | Notes                                  |
//! |----------------|------|----------------------------------------|
//! | magic          | 4    | `0x4B4C4254` ("TBLK")                  |
//! | block_type     | 1    | record = 1, index = 2                  |
//! | compression    | 1    | see [`crate::compression`]             |
//! | kind           | 1    | [`RecordKind`] id (0 for index blocks) |
//! | flags          | 1    | reserved, 0                            |
//! | orig_size      | 8    | payload size before compression        |
//! | stored_size    | 8    | bytes that follow the header           |
//! | content_hash   | 32   | BLAKE3 of the original payload         |
//! | checksum       | 4    | CRC32 of the stored payload            |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use crc32fast::Hasher;
use thiserror::Error;

use crate::compression::{Compression, CompressionError};
use crate::value::RecordKind;

pub const BLOCK_MAGIC: u32 = 0x4B4C_4254;
pub const BLOCK_HEADER_SIZE: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Record,
    Index,
}

impl BlockType {
    fn id(self) -> u8 {
        match self {
            BlockType::Record => 1,
            BlockType::Index  => 2,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(BlockType::Record),
            2 => Some(BlockType::Index),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Bad block magic {0:#010x}")]
    BadMagic(u32),
    #[error("Unknown block type {0}")]
    UnknownType(u8),
    #[error("Unknown record kind {0}")]
    UnknownKind(u8),
    #[error("Payload checksum mismatch")]
    ChecksumMismatch,
    #[error("Content hash mismatch after decompression")]
    HashMismatch,
    #[error("Size mismatch: header says {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub block_type:   BlockType,
    pub compression:  Compression,
    pub kind:         RecordKind,
    pub orig_size:    u64,
    pub stored_size:  u64,
    pub content_hash: [u8; 32],
    pub checksum:     u32,
}

impl BlockHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(BLOCK_MAGIC)?;
        writer.write_u8(self.block_type.id())?;
        writer.write_u8(self.compression.id())?;
        writer.write_u8(self.kind.id())?;
        writer.write_u8(0)?;
        writer.write_u64::<LittleEndian>(self.orig_size)?;
        writer.write_u64::<LittleEndian>(self.stored_size)?;
        writer.write_all(&self.content_hash)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, BlockError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != BLOCK_MAGIC {
            return Err(BlockError::BadMagic(magic));
        }
        let type_id = reader.read_u8()?;
        let block_type = BlockType::from_id(type_id).ok_or(BlockError::UnknownType(type_id))?;
        let comp_id = reader.read_u8()?;
        let compression = Compression::from_id(comp_id)
            .ok_or(CompressionError::UnknownId(comp_id))?;
        let kind_id = reader.read_u8()?;
        let kind = RecordKind::from_id(kind_id).ok_or(BlockError::UnknownKind(kind_id))?;
        let _flags = reader.read_u8()?;
        let orig_size = reader.read_u64::<LittleEndian>()?;
        let stored_size = reader.read_u64::<LittleEndian>()?;
        let mut content_hash = [0u8; 32];
        reader.read_exact(&mut content_hash)?;
        let checksum = reader.read_u32::<LittleEndian>()?;
        Ok(Self { block_type, compression, kind, orig_size, stored_size, content_hash, checksum })
    }
}

/// Compress `data` and build its header.
pub fn encode_block(
    block_type:  BlockType,
    kind:        RecordKind,
    data:        &[u8],
    compression: Compression,
    level:       i32,
) -> Result<(BlockHeader, Vec<u8>), BlockError> {
    let stored = compression.compress(data, level)?;
    let mut hasher = Hasher::new();
    hasher.update(&stored);
    let header = BlockHeader {
        block_type,
        compression,
        kind,
        orig_size:    data.len() as u64,
        stored_size:  stored.len() as u64,
        content_hash: blake3::hash(data).into(),
        checksum:     hasher.finalize(),
    };
    Ok((header, stored))
}

/// Read the `stored_size` bytes that follow `header`.  The size field is not
/// covered by the payload checksum, so it is never trusted for allocation:
/// a short read is reported as a size mismatch.
pub fn read_payload<R: Read>(reader: R, header: &BlockHeader) -> Result<Vec<u8>, BlockError> {
    let mut payload = Vec::new();
    reader.take(header.stored_size).read_to_end(&mut payload)?;
    if payload.len() as u64 != header.stored_size {
        return Err(BlockError::SizeMismatch { expected: header.stored_size, actual: payload.len() as u64 });
    }
    Ok(payload)
}

/// Verify and decompress a payload read after `header`.
pub fn decode_block(header: &BlockHeader, payload: &[u8]) -> Result<Vec<u8>, BlockError> {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != header.checksum {
        return Err(BlockError::ChecksumMismatch);
    }
    let data = header.compression.decompress(payload)?;
    if data.len() as u64 != header.orig_size {
        return Err(BlockError::SizeMismatch { expected: header.orig_size, actual: data.len() as u64 });
    }
    if <[u8; 32]>::from(blake3::hash(&data)) != header.content_hash {
        return Err(BlockError::HashMismatch);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_fixed_size() {
        let (header, _) = encode_block(BlockType::Record, RecordKind::Text, b"abc", Compression::None, 0).unwrap();
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), BLOCK_HEADER_SIZE);
        let back = BlockHeader::read(&buf[..]).unwrap();
        assert_eq!(back.kind, RecordKind::Text);
        assert_eq!(back.block_type, BlockType::Record);
        assert_eq!(back.orig_size, 3);
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let data = b"some record payload".repeat(4);
        let (header, mut payload) =
            encode_block(BlockType::Record, RecordKind::Bytes, &data, Compression::Zstd, 3).unwrap();
        assert_eq!(decode_block(&header, &payload).unwrap(), data);

        payload[0] ^= 0x55;
        assert!(matches!(decode_block(&header, &payload), Err(BlockError::ChecksumMismatch)));
    }

    #[test]
    fn truncated_payload_is_a_size_mismatch() {
        let (mut header, payload) =
            encode_block(BlockType::Record, RecordKind::Bytes, b"short", Compression::None, 0).unwrap();
        header.stored_size = u64::MAX >> 1;
        assert!(matches!(
            read_payload(&payload[..], &header),
            Err(BlockError::SizeMismatch { actual: 5, .. })
        ));
    }
}
