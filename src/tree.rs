//! Directory tree → container serializer.
//!
//! The walk is depth-first.  Inside each directory, files are written
//! before subdirectories are entered, and both are visited in file-name
//! order, so the same tree always produces the same container layout.
//!
//! # Failure isolation
//! Anything that goes wrong with a single file (it cannot be read, no
//! encoder accepts it, its record name collides with a sibling) or with a
//! single subdirectory (its group cannot be created, it cannot be listed)
//! is logged, recorded in the [`ConversionReport`], and skipped.  Only the
//! preconditions of a run are fatal: a missing source root, a destination
//! that exists or cannot be created, and failures of the container itself.

use std::fs;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::container::{Container, ContainerError, ContainerWriter, WriteOptions, Written};
use crate::path::{extension, ContainerPath, PathError, PathMapper};
use crate::registry::{self, CodecError, CodecRegistry};
use crate::value::Record;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Conditions that abort a whole run.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("{0} is not a valid directory")]
    SourceNotDirectory(PathBuf),
    #[error("{0} already exists")]
    DestinationExists(PathBuf),
    #[error("cannot create {path}: {source}")]
    Create { path: PathBuf, #[source] source: ContainerError },
    #[error("{path}: {source}")]
    Root { path: PathBuf, #[source] source: ItemError },
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Why a single file or directory was skipped.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("no encoder registered for extension {0:?}")]
    Unsupported(String),
    #[error("encoder failed: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("cannot list: {0}")]
    Walk(#[from] walkdir::Error),
}

// ── Options & report ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    /// Fail files whose extension has no registered encoder instead of
    /// storing their raw bytes.
    pub require_typed: bool,
    /// Follow symbolic links.  When off, links are skipped.
    pub follow_links:  bool,
}

#[derive(Debug)]
pub struct FileFailure {
    pub path:  PathBuf,
    pub error: ItemError,
}

#[derive(Debug, Default)]
pub struct ConversionReport {
    /// Groups created below the container root.
    pub groups:       usize,
    pub records:      usize,
    pub bytes_read:   u64,
    /// Records that reused an identical earlier payload.
    pub deduplicated: usize,
    /// Entries that are neither regular files nor directories.
    pub skipped:      Vec<PathBuf>,
    pub failures:     Vec<FileFailure>,
}

impl ConversionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: PathBuf, error: ItemError) {
        warn!("{} could not be added: {}", path.display(), error);
        self.failures.push(FileFailure { path, error });
    }
}

// ── Serializer ───────────────────────────────────────────────────────────────

pub struct TreeSerializer<'r> {
    registry: &'r CodecRegistry<Record>,
    options:  ConvertOptions,
}

impl<'r> TreeSerializer<'r> {
    pub fn new(registry: &'r CodecRegistry<Record>, options: ConvertOptions) -> Self {
        Self { registry, options }
    }

    /// Mirror `source_root` into `writer`.
    ///
    /// With `is_root` the directory's contents land directly in the
    /// container's root group; otherwise a group named after the
    /// directory is created under the root first.
    pub fn convert<W: Write + Seek>(
        &self,
        source_root: &Path,
        writer:      &mut ContainerWriter<W>,
        is_root:     bool,
    ) -> Result<ConversionReport, ConvertError> {
        if !source_root.is_dir() {
            return Err(ConvertError::SourceNotDirectory(source_root.to_owned()));
        }
        let mut mapper = PathMapper::new(source_root, writer.root_name());
        if !is_root {
            let base = source_root
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| PathError::NonUtf8(source_root.to_owned()))?;
            mapper = mapper.with_prefix(ContainerPath::root().child(base)?);
        }

        info!("converting {} into container root {:?}", source_root.display(), writer.root_name());
        let mut report = ConversionReport::default();
        self.convert_dir(source_root, &mapper, writer, is_root, &mut report)
            .map_err(|source| ConvertError::Root { path: source_root.to_owned(), source })?;

        info!(
            groups = report.groups,
            records = report.records,
            bytes = report.bytes_read,
            failures = report.failures.len(),
            "conversion finished",
        );
        Ok(report)
    }

    fn convert_dir<W: Write + Seek>(
        &self,
        dir:     &Path,
        mapper:  &PathMapper,
        writer:  &mut ContainerWriter<W>,
        is_root: bool,
        report:  &mut ConversionReport,
    ) -> Result<(), ItemError> {
        if !is_root {
            let group = mapper.map(dir)?;
            writer.create_group(&group)?;
            report.groups += 1;
        }

        let mut subdirs = Vec::new();
        let listing = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.options.follow_links)
            .sort_by_file_name();

        for entry in listing {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_owned).unwrap_or_else(|| dir.to_owned());
                    report.fail(path, e.into());
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                subdirs.push(entry.into_path());
            } else if file_type.is_file() {
                match self.convert_file(entry.path(), mapper, writer) {
                    Ok(written) => {
                        report.records += 1;
                        report.bytes_read += written.size;
                        if written.deduplicated {
                            report.deduplicated += 1;
                        }
                    }
                    Err(e) => report.fail(entry.into_path(), e),
                }
            } else {
                debug!("skipping {} (not a regular file or directory)", entry.path().display());
                report.skipped.push(entry.into_path());
            }
        }

        for sub in subdirs {
            if let Err(e) = self.convert_dir(&sub, mapper, writer, false, report) {
                report.fail(sub, e);
            }
        }
        Ok(())
    }

    fn convert_file<W: Write + Seek>(
        &self,
        path:   &Path,
        mapper: &PathMapper,
        writer: &mut ContainerWriter<W>,
    ) -> Result<Written, ItemError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PathError::NonUtf8(path.to_owned()))?;
        let ext = extension(file_name);

        let encode = if self.options.require_typed {
            self.registry.resolve(ext)
        } else {
            self.registry.resolve_or_fallback(ext)
        }
        .ok_or_else(|| ItemError::Unsupported(ext.to_owned()))?;

        let record_path = mapper.map_record(path)?;
        let data = fs::read(path)?;
        let record = encode(data.as_slice())?;
        Ok(writer.write_record(&record_path, &record, Some(file_name))?)
    }
}

// ── File-level driver ────────────────────────────────────────────────────────

/// Convert `source_root` into a new container file at `destination`.
///
/// The container's root name is `destination`'s stem.  An existing
/// destination is never overwritten.  If the run fails after the file was
/// created, the partial file is removed.
pub fn convert_tree(
    source_root:   &Path,
    destination:   &Path,
    registry:      &CodecRegistry<Record>,
    options:       ConvertOptions,
    write_options: WriteOptions,
) -> Result<ConversionReport, ConvertError> {
    if !source_root.is_dir() {
        return Err(ConvertError::SourceNotDirectory(source_root.to_owned()));
    }
    if destination.exists() {
        return Err(ConvertError::DestinationExists(destination.to_owned()));
    }

    let mut writer = Container::create(destination, write_options).map_err(|e| match e {
        ContainerError::DestinationExists(p) => ConvertError::DestinationExists(p),
        other => ConvertError::Create { path: destination.to_owned(), source: other },
    })?;

    let serializer = TreeSerializer::new(registry, options);
    let result = serializer
        .convert(source_root, &mut writer, true)
        .and_then(|report| {
            writer.finalize()?;
            Ok(report)
        });
    drop(writer);

    if result.is_err() {
        if let Err(e) = fs::remove_file(destination) {
            warn!("could not remove partial container {}: {}", destination.display(), e);
        }
    }
    result
}

/// [`convert_tree`] with a snapshot of the process-wide registry.
pub fn convert_tree_with_global(
    source_root:   &Path,
    destination:   &Path,
    options:       ConvertOptions,
    write_options: WriteOptions,
) -> Result<ConversionReport, ConvertError> {
    let registry = registry::global_snapshot();
    convert_tree(source_root, destination, &registry, options, write_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerReader;
    use std::io::Cursor;

    fn cp(s: &str) -> ContainerPath {
        ContainerPath::parse(s).unwrap()
    }

    #[test]
    fn nested_under_named_group_when_not_root() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photos");
        fs::create_dir_all(src.join("2024")).unwrap();
        fs::write(src.join("index.txt"), b"list").unwrap();
        fs::write(src.join("2024").join("a.bin"), b"\x00\x01").unwrap();

        let registry = CodecRegistry::with_defaults();
        let mut writer =
            ContainerWriter::new(Cursor::new(Vec::new()), "library", WriteOptions::default()).unwrap();
        let report = TreeSerializer::new(&registry, ConvertOptions::default())
            .convert(&src, &mut writer, false)
            .unwrap();
        writer.finalize().unwrap();

        assert_eq!(report.groups, 2);
        assert_eq!(report.records, 2);
        let mut r = ContainerReader::new(Cursor::new(writer.into_inner().into_inner())).unwrap();
        assert_eq!(r.read_raw(&cp("/photos/index")).unwrap(), b"list");
        assert_eq!(r.read_raw(&cp("/photos/2024/a")).unwrap(), b"\x00\x01");
    }

    #[test]
    fn strict_mode_rejects_unregistered_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.json"), b"{}").unwrap();
        fs::write(dir.path().join("raw.dat"), b"xx").unwrap();

        let registry = CodecRegistry::with_defaults();
        let mut writer =
            ContainerWriter::new(Cursor::new(Vec::new()), "root", WriteOptions::default()).unwrap();
        let options = ConvertOptions { require_typed: true, ..Default::default() };
        let report = TreeSerializer::new(&registry, options)
            .convert(dir.path(), &mut writer, true)
            .unwrap();

        assert_eq!(report.records, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(&report.failures[0].error, ItemError::Unsupported(ext) if ext == "dat"));
    }

    #[test]
    fn missing_source_is_fatal() {
        let registry = CodecRegistry::with_defaults();
        let mut writer =
            ContainerWriter::new(Cursor::new(Vec::new()), "root", WriteOptions::default()).unwrap();
        let err = TreeSerializer::new(&registry, ConvertOptions::default())
            .convert(Path::new("/definitely/not/here"), &mut writer, true)
            .unwrap_err();
        assert!(matches!(err, ConvertError::SourceNotDirectory(_)));
    }
}
