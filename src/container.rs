//! Container engine: writer and reader for `.tbx` files.
//!
//! # Layout
//! ```text
//! [ superblock (64 B) | record block | record block | ... | INDEX block ]
//! ```
//! The superblock is written as zeros first and patched in place by
//! [`ContainerWriter::finalize`], so an interrupted write is recognisable
//! as unfinalized rather than silently truncated.
//!
//! # Writer
//! [`ContainerWriter`] appends one block per record as records arrive.
//! Identical payloads of the same kind are written once; later records
//! point at the existing block.  Groups exist only in the index.
//!
//! # Reader
//! [`ContainerReader`] reads the superblock and the INDEX block up front.
//! Every record read verifies the block checksum, the decompressed size and
//! the BLAKE3 content hash.
//!
//! # Handles
//! [`Container::create`] and [`Container::open`] wrap a `File` that is
//! released when the writer or reader is dropped, on every exit path.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::block::{decode_block, encode_block, read_payload, BlockError, BlockHeader, BlockType};
use crate::compression::{Compression, DEFAULT_LEVEL};
use crate::index::{GroupNode, GroupView, Index, NodeError, RecordEntry};
use crate::path::{ContainerPath, PathError};
use crate::superblock::{Superblock, SuperblockError, SUPERBLOCK_SIZE};
use crate::value::{Record, RecordKind};

/// Conventional file extension for containers.
pub const CONTAINER_EXTENSION: &str = "tbx";

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("{0} already exists")]
    DestinationExists(PathBuf),
    #[error("cannot derive a root name from {0}")]
    InvalidRootName(PathBuf),
    #[error("container is already finalized")]
    Finalized,
    #[error("expected an INDEX block at offset {0}")]
    MissingIndex(u64),
    #[error("corrupt index: {0}")]
    CorruptIndex(#[source] serde_json::Error),
    #[error("record {path}: {source}")]
    Record { path: ContainerPath, #[source] source: BlockError },
    #[error(transparent)]
    Superblock(#[from] SuperblockError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── WriteOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`ContainerWriter`].
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub compression: Compression,
    pub level:       i32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { compression: Compression::Zstd, level: DEFAULT_LEVEL }
    }
}

/// Outcome of one [`ContainerWriter::write_record`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    pub size:         u64,
    pub stored_size:  u64,
    /// The payload matched an earlier record and no new block was written.
    pub deduplicated: bool,
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct ContainerWriter<W: Write + Seek> {
    writer:         W,
    pub superblock: Superblock,
    pub index:      Index,
    pub options:    WriteOptions,
    // (BLAKE3 of payload, kind) → (block offset, stored size)
    dedup:          HashMap<([u8; 32], RecordKind), (u64, u64)>,
    finalized:      bool,
}

impl<W: Write + Seek> ContainerWriter<W> {
    pub fn new(mut writer: W, root_name: &str, options: WriteOptions) -> Result<Self, ContainerError> {
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&[0u8; SUPERBLOCK_SIZE])?; // patched on finalize
        Ok(Self {
            writer,
            superblock: Superblock::new(),
            index: Index::new(root_name),
            options,
            dedup: HashMap::new(),
            finalized: false,
        })
    }

    pub fn root_name(&self) -> &str {
        &self.index.root_name
    }

    /// Create an empty group; its parent must exist and the name be free.
    pub fn create_group(&mut self, path: &ContainerPath) -> Result<(), ContainerError> {
        if self.finalized {
            return Err(ContainerError::Finalized);
        }
        self.index.create_group(path)?;
        debug!(group = %path, "created group");
        Ok(())
    }

    /// Write `record` at `path`.  Nothing reaches the file unless the path
    /// is free and its parent group exists.
    pub fn write_record(
        &mut self,
        path:        &ContainerPath,
        record:      &Record,
        source_name: Option<&str>,
    ) -> Result<Written, ContainerError> {
        if self.finalized {
            return Err(ContainerError::Finalized);
        }
        let parent = path.parent().ok_or(NodeError::RootIsGroup)?;
        self.index.group(&parent)?;
        if self.index.node(path).is_some() {
            return Err(NodeError::AlreadyExists(path.clone()).into());
        }

        let hash: [u8; 32] = blake3::hash(&record.data).into();
        let (offset, stored_size, deduplicated) = match self.dedup.get(&(hash, record.kind)) {
            Some(&(offset, stored)) => (offset, stored, true),
            None => {
                let (header, payload) = encode_block(
                    BlockType::Record,
                    record.kind,
                    &record.data,
                    self.options.compression,
                    self.options.level,
                )?;
                let offset = self.writer.stream_position()?;
                header.write(&mut self.writer)?;
                self.writer.write_all(&payload)?;
                let stored = payload.len() as u64;
                self.dedup.insert((hash, record.kind), (offset, stored));
                (offset, stored, false)
            }
        };

        self.index.insert_record(path, RecordEntry {
            offset,
            kind:         record.kind,
            size:         record.data.len() as u64,
            stored_size,
            content_hash: hash,
            source_name:  source_name.map(str::to_owned),
        })?;
        debug!(record = %path, size = record.data.len(), deduplicated, "wrote record");

        Ok(Written { size: record.data.len() as u64, stored_size, deduplicated })
    }

    /// Write the INDEX block and patch the superblock.  Must be called once.
    pub fn finalize(&mut self) -> Result<(), ContainerError> {
        if self.finalized {
            return Err(ContainerError::Finalized);
        }
        self.index.compute_root_hash();
        let index_payload = self.index.to_bytes().map_err(ContainerError::CorruptIndex)?;

        // The index is always Zstd, whatever the records use.
        let (idx_header, idx_on_disk) = encode_block(
            BlockType::Index,
            RecordKind::Json,
            &index_payload,
            Compression::Zstd,
            DEFAULT_LEVEL,
        )?;
        let index_offset = self.writer.stream_position()?;
        idx_header.write(&mut self.writer)?;
        self.writer.write_all(&idx_on_disk)?;

        self.superblock.index_offset = index_offset;
        self.superblock.index_size = idx_on_disk.len() as u64;
        self.writer.seek(SeekFrom::Start(0))?;
        self.superblock.write(&mut self.writer)?;
        self.writer.flush()?;
        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct ContainerReader<R: Read + Seek> {
    reader:         R,
    pub superblock: Superblock,
    pub index:      Index,
}

impl<R: Read + Seek> ContainerReader<R> {
    pub fn new(mut reader: R) -> Result<Self, ContainerError> {
        reader.seek(SeekFrom::Start(0))?;
        let superblock = Superblock::read(&mut reader)?;

        reader.seek(SeekFrom::Start(superblock.index_offset))?;
        let header = BlockHeader::read(&mut reader)?;
        if header.block_type != BlockType::Index {
            return Err(ContainerError::MissingIndex(superblock.index_offset));
        }
        let payload = read_payload(&mut reader, &header)?;
        let raw = decode_block(&header, &payload)?;
        let index = Index::from_bytes(&raw).map_err(ContainerError::CorruptIndex)?;

        Ok(Self { reader, superblock, index })
    }

    pub fn root_name(&self) -> &str {
        &self.index.root_name
    }

    pub fn group(&self, path: &ContainerPath) -> Result<&GroupNode, ContainerError> {
        Ok(self.index.group(path)?)
    }

    pub fn group_view<'a>(&'a self, path: &'a ContainerPath) -> Result<GroupView<'a>, ContainerError> {
        Ok(GroupView::new(path, self.index.group(path)?))
    }

    /// Number of children of the group at `path`.
    pub fn len(&self, path: &ContainerPath) -> Result<usize, ContainerError> {
        Ok(self.index.group(path)?.len())
    }

    pub fn contains(&self, path: &ContainerPath) -> bool {
        path.is_root() || self.index.node(path).is_some()
    }

    /// Verified payload bytes of the record at `path`.
    pub fn read_raw(&mut self, path: &ContainerPath) -> Result<Vec<u8>, ContainerError> {
        let entry = self.index.record(path)?.clone();
        self.read_entry(&entry)
            .map_err(|source| ContainerError::Record { path: path.clone(), source })
    }

    pub fn read_record(&mut self, path: &ContainerPath) -> Result<Record, ContainerError> {
        let kind = self.index.record(path)?.kind;
        Ok(Record { kind, data: self.read_raw(path)? })
    }

    fn read_entry(&mut self, entry: &RecordEntry) -> Result<Vec<u8>, BlockError> {
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let header = BlockHeader::read(&mut self.reader)?;
        let payload = read_payload(&mut self.reader, &header)?;
        let data = decode_block(&header, &payload)?;
        if header.content_hash != entry.content_hash {
            return Err(BlockError::HashMismatch);
        }
        Ok(data)
    }
}

// ── File-level entry points ──────────────────────────────────────────────────

pub type FileWriter = ContainerWriter<BufWriter<File>>;
pub type FileReader = ContainerReader<BufReader<File>>;

pub struct Container;

impl Container {
    /// Create a new container file.  Refuses to overwrite an existing file.
    /// The root name is the file's stem.
    pub fn create<P: AsRef<Path>>(path: P, options: WriteOptions) -> Result<FileWriter, ContainerError> {
        let path = path.as_ref();
        let root_name = root_name_for(path)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ContainerError::DestinationExists(path.to_owned()),
                _ => ContainerError::Io(e),
            })?;
        ContainerWriter::new(BufWriter::new(file), &root_name, options)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileReader, ContainerError> {
        ContainerReader::new(BufReader::new(File::open(path)?))
    }
}

/// Root identifier for a container stored at `path`: its stem.
pub fn root_name_for(path: &Path) -> Result<String, ContainerError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ContainerError::InvalidRootName(path.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cp(s: &str) -> ContainerPath {
        ContainerPath::parse(s).unwrap()
    }

    fn build() -> Vec<u8> {
        let mut w = ContainerWriter::new(Cursor::new(Vec::new()), "root", WriteOptions::default()).unwrap();
        w.create_group(&cp("/sub")).unwrap();
        w.write_record(&cp("/a"), &Record::bytes(&b"alpha"[..]), Some("a.txt")).unwrap();
        w.write_record(&cp("/sub/b"), &Record::text("beta"), Some("b.txt")).unwrap();
        w.finalize().unwrap();
        w.into_inner().into_inner()
    }

    #[test]
    fn write_then_read_back() {
        let mut r = ContainerReader::new(Cursor::new(build())).unwrap();
        assert_eq!(r.root_name(), "root");
        assert_eq!(r.len(&ContainerPath::root()).unwrap(), 2);
        assert_eq!(r.read_raw(&cp("/a")).unwrap(), b"alpha");
        let b = r.read_record(&cp("/sub/b")).unwrap();
        assert_eq!(b, Record::text("beta"));
        assert_eq!(r.index.record(&cp("/sub/b")).unwrap().source_name.as_deref(), Some("b.txt"));
    }

    #[test]
    fn identical_payloads_share_a_block() {
        let mut w = ContainerWriter::new(Cursor::new(Vec::new()), "root", WriteOptions::default()).unwrap();
        let first = w.write_record(&cp("/x"), &Record::bytes(&b"same"[..]), None).unwrap();
        let second = w.write_record(&cp("/y"), &Record::bytes(&b"same"[..]), None).unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(
            w.index.record(&cp("/x")).unwrap().offset,
            w.index.record(&cp("/y")).unwrap().offset,
        );
    }

    #[test]
    fn collisions_write_nothing() {
        let mut w = ContainerWriter::new(Cursor::new(Vec::new()), "root", WriteOptions::default()).unwrap();
        w.write_record(&cp("/x"), &Record::bytes(&b"1"[..]), None).unwrap();
        let before = w.writer.get_ref().len();
        let err = w.write_record(&cp("/x"), &Record::bytes(&b"2"[..]), None).unwrap_err();
        assert!(matches!(err, ContainerError::Node(NodeError::AlreadyExists(_))));
        let err = w.write_record(&cp("/missing/x"), &Record::bytes(&b"3"[..]), None).unwrap_err();
        assert!(matches!(err, ContainerError::Node(NodeError::NotFound(_))));
        assert_eq!(w.writer.get_ref().len(), before);
    }

    #[test]
    fn missing_paths_are_reported() {
        let mut r = ContainerReader::new(Cursor::new(build())).unwrap();
        assert!(matches!(r.read_raw(&cp("/nope")), Err(ContainerError::Node(NodeError::NotFound(_)))));
        assert!(matches!(r.read_raw(&cp("/sub")), Err(ContainerError::Node(NodeError::NotARecord(_)))));
    }

    #[test]
    fn unfinalized_container_is_rejected() {
        let w = ContainerWriter::new(Cursor::new(Vec::new()), "root", WriteOptions::default()).unwrap();
        let bytes = w.into_inner().into_inner();
        assert!(matches!(
            ContainerReader::new(Cursor::new(bytes)),
            Err(ContainerError::Superblock(SuperblockError::Unfinalized))
        ));
    }

    #[test]
    fn root_name_is_file_stem() {
        assert_eq!(root_name_for(Path::new("/out/root.tbx")).unwrap(), "root");
        assert_eq!(root_name_for(Path::new("data.tar.gz")).unwrap(), "data.tar");
        assert!(root_name_for(Path::new("/")).is_err());
    }

    // Offset of the most significant byte of `stored_size` in a block header.
    const STORED_SIZE_HIGH_BYTE: usize = 16 + 7;

    #[test]
    fn corrupt_record_size_is_an_error_not_an_abort() {
        let mut bytes = build();
        // The first record block starts right after the superblock.
        bytes[SUPERBLOCK_SIZE + STORED_SIZE_HIGH_BYTE] = 0x7f;
        let mut r = ContainerReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            r.read_raw(&cp("/a")),
            Err(ContainerError::Record { source: BlockError::SizeMismatch { .. }, .. })
        ));
        assert_eq!(r.read_raw(&cp("/sub/b")).unwrap(), b"beta");
    }

    #[test]
    fn corrupt_index_size_fails_open() {
        let mut bytes = build();
        let offset = Superblock::read(&bytes[..]).unwrap().index_offset as usize;
        bytes[offset + STORED_SIZE_HIGH_BYTE] = 0x7f;
        assert!(matches!(
            ContainerReader::new(Cursor::new(bytes)),
            Err(ContainerError::Block(BlockError::SizeMismatch { .. }))
        ));
    }
}
