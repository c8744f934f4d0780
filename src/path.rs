//! Container paths and the filesystem → container path mapper.
//!
//! A [`ContainerPath`] is an absolute, slash-separated sequence of names.
//! The root group is the empty path and displays as `/`.
//!
//! [`PathMapper`] turns a source file or directory into the container path
//! it mirrors.  The path relative to the source root is found component by
//! component; when the source path does not literally start with the
//! source root (relative vs. absolute spellings, symlinked parents) the
//! mapper falls back to the *first component* equal to the root name.  A
//! directory that repeats the root's name deeper in the tree, or merely
//! contains it as a substring, is therefore never mistaken for the root.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path segment in {0:?}")]
    EmptySegment(String),
    #[error("invalid path segment {0:?}")]
    InvalidSegment(String),
    #[error("{0} is not valid UTF-8")]
    NonUtf8(PathBuf),
    #[error("{path} is not inside source root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

// ── ContainerPath ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContainerPath {
    segments: Vec<String>,
}

impl ContainerPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `"a/b"` or `"/a/b"`.  A single trailing slash is tolerated.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut path = Self::root();
        for seg in trimmed.split('/') {
            if seg.is_empty() {
                return Err(PathError::EmptySegment(s.to_owned()));
            }
            path.push(seg)?;
        }
        Ok(path)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<ContainerPath> {
        if self.is_root() {
            return None;
        }
        Some(Self { segments: self.segments[..self.segments.len() - 1].to_vec() })
    }

    pub fn push(&mut self, segment: &str) -> Result<(), PathError> {
        validate_segment(segment)?;
        self.segments.push(segment.to_owned());
        Ok(())
    }

    /// `self` followed by one validated segment.
    pub fn child(&self, segment: &str) -> Result<ContainerPath, PathError> {
        let mut out = self.clone();
        out.push(segment)?;
        Ok(out)
    }

    /// `self` followed by every segment of `rel`.
    pub fn join(&self, rel: &ContainerPath) -> ContainerPath {
        let mut segments = self.segments.clone();
        segments.extend(rel.segments.iter().cloned());
        Self { segments }
    }

    pub fn starts_with(&self, prefix: &ContainerPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.segments {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for ContainerPath {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_segment(seg: &str) -> Result<(), PathError> {
    if seg.is_empty() {
        return Err(PathError::EmptySegment(seg.to_owned()));
    }
    if seg == "." || seg == ".." || seg.contains('/') || seg.contains('\0') {
        return Err(PathError::InvalidSegment(seg.to_owned()));
    }
    Ok(())
}

// ── Mapping ─────────────────────────────────────────────────────────────────

/// Map `source_path` below `source_root` to a container path under the root
/// group.  `root_name` is the container's root identifier (the output
/// file's stem) and is only used when the prefix match fails.
pub fn map_path(
    source_path: &Path,
    root_name:   &str,
    source_root: &Path,
) -> Result<ContainerPath, PathError> {
    PathMapper::new(source_root, root_name).map(source_path)
}

/// Record name for a file: its name with the final extension stripped.
pub fn record_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        // A leading dot marks a hidden file, not an extension.
        Some(0) | None => file_name,
        Some(i) => &file_name[..i],
    }
}

/// Extension used for registry lookup; empty when there is none.
pub fn extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => "",
        Some(i) => &file_name[i + 1..],
    }
}

#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: PathBuf,
    root_name:   String,
    prefix:      ContainerPath,
}

impl PathMapper {
    pub fn new(source_root: impl Into<PathBuf>, root_name: impl Into<String>) -> Self {
        Self {
            source_root: source_root.into(),
            root_name:   root_name.into(),
            prefix:      ContainerPath::root(),
        }
    }

    /// Place every mapped path under `prefix` instead of the root group.
    pub fn with_prefix(mut self, prefix: ContainerPath) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    pub fn prefix(&self) -> &ContainerPath {
        &self.prefix
    }

    /// Container path mirroring `source_path` (a directory or a file, names
    /// kept as they are).
    pub fn map(&self, source_path: &Path) -> Result<ContainerPath, PathError> {
        let rel = self.relative_components(source_path)?;
        let mut out = self.prefix.clone();
        for comp in rel {
            out.push(comp)?;
        }
        Ok(out)
    }

    /// Like [`map`](Self::map) but with the leaf's extension stripped.
    pub fn map_record(&self, file_path: &Path) -> Result<ContainerPath, PathError> {
        let mapped = self.map(file_path)?;
        match (mapped.parent(), mapped.name()) {
            (Some(parent), Some(name)) if mapped.depth() > self.prefix.depth() => {
                parent.child(record_name(name))
            }
            _ => Err(PathError::OutsideRoot {
                path: file_path.to_owned(),
                root: self.source_root.clone(),
            }),
        }
    }

    fn relative_components<'p>(&self, source_path: &'p Path) -> Result<Vec<&'p str>, PathError> {
        let names = normal_components(source_path)?;

        let root_names = normal_components(&self.source_root)?;
        let root_is_absolute = self.source_root.has_root();
        let has_prefix = names.len() >= root_names.len()
            && names.iter().zip(&root_names).all(|(a, b)| a == b);
        if source_path.has_root() == root_is_absolute && has_prefix {
            return Ok(names[root_names.len()..].to_vec());
        }

        // First component equal to the root name, never a substring match.
        match names.iter().position(|c| *c == self.root_name) {
            Some(i) => Ok(names[i + 1..].to_vec()),
            None => Err(PathError::OutsideRoot {
                path: source_path.to_owned(),
                root: self.source_root.clone(),
            }),
        }
    }
}

fn normal_components(path: &Path) -> Result<Vec<&str>, PathError> {
    let mut out = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => {
                let s = os.to_str().ok_or_else(|| PathError::NonUtf8(path.to_owned()))?;
                out.push(s);
            }
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(out)
}
