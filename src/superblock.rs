use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use uuid::Uuid;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"TBX1";
pub const VERSION: u32 = 1;
/// Bytes reserved at offset 0.  The encoded fields use 64 exactly.
pub const SUPERBLOCK_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum SuperblockError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("Superblock checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("Container was never finalized")]
    Unfinalized,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Superblock {
    pub version:      u32,
    pub uuid:         Uuid,
    pub index_offset: u64,
    pub index_size:   u64,
    /// Unix seconds at creation.
    pub created_at:   i64,
    pub flags:        u64,
}

impl Superblock {
    pub fn new() -> Self {
        Self {
            version:      VERSION,
            uuid:         Uuid::new_v4(),
            index_offset: 0,
            index_size:   0,
            created_at:   chrono::Utc::now().timestamp(),
            flags:        0,
        }
    }

    fn encode_body(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
        buf.write_all(MAGIC)?;
        buf.write_u32::<LittleEndian>(self.version)?;
        buf.write_all(self.uuid.as_bytes())?;
        buf.write_u64::<LittleEndian>(self.index_offset)?;
        buf.write_u64::<LittleEndian>(self.index_size)?;
        buf.write_i64::<LittleEndian>(self.created_at)?;
        buf.write_u64::<LittleEndian>(self.flags)?;
        Ok(buf)
    }

    /// Write exactly [`SUPERBLOCK_SIZE`] bytes: fields, CRC32 of the fields,
    /// zero padding.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let mut buf = self.encode_body()?;
        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        buf.resize(SUPERBLOCK_SIZE, 0);
        writer.write_all(&buf)
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, SuperblockError> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        reader.read_exact(&mut raw)?;
        if raw.iter().all(|b| *b == 0) {
            return Err(SuperblockError::Unfinalized);
        }
        let mut cur = &raw[..];

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SuperblockError::InvalidMagic);
        }
        let version = cur.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(SuperblockError::UnsupportedVersion(version));
        }
        let mut uuid_bytes = [0u8; 16];
        cur.read_exact(&mut uuid_bytes)?;
        let uuid = Uuid::from_bytes(uuid_bytes);
        let index_offset = cur.read_u64::<LittleEndian>()?;
        let index_size = cur.read_u64::<LittleEndian>()?;
        let created_at = cur.read_i64::<LittleEndian>()?;
        let flags = cur.read_u64::<LittleEndian>()?;

        let body_len = SUPERBLOCK_SIZE - cur.len();
        let stored = cur.read_u32::<LittleEndian>()?;
        let computed = crc32fast::hash(&raw[..body_len]);
        if stored != computed {
            return Err(SuperblockError::ChecksumMismatch { stored, computed });
        }

        Ok(Self { version, uuid, index_offset, index_size, created_at, flags })
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut sb = Superblock::new();
        sb.index_offset = 4096;
        sb.index_size = 321;
        let mut buf = Vec::new();
        sb.write(&mut buf).unwrap();
        assert_eq!(buf.len(), SUPERBLOCK_SIZE);

        let back = Superblock::read(&buf[..]).unwrap();
        assert_eq!(back.uuid, sb.uuid);
        assert_eq!(back.index_offset, 4096);
        assert_eq!(back.index_size, 321);
        assert_eq!(back.created_at, sb.created_at);
    }

    #[test]
    fn rejects_damage() {
        let mut buf = Vec::new();
        Superblock::new().write(&mut buf).unwrap();

        let mut flipped = buf.clone();
        flipped[30] ^= 0xff;
        assert!(matches!(Superblock::read(&flipped[..]), Err(SuperblockError::ChecksumMismatch { .. })));

        let mut bad_magic = buf.clone();
        bad_magic[0] = b'X';
        assert!(matches!(Superblock::read(&bad_magic[..]), Err(SuperblockError::InvalidMagic)));

        let zeros = [0u8; SUPERBLOCK_SIZE];
        assert!(matches!(Superblock::read(&zeros[..]), Err(SuperblockError::Unfinalized)));
    }
}
