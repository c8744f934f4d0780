//! Trials: logical records assembled from several container entries.
//!
//! A dataset type implements [`TrialSource`] to say what trial `i` is made
//! of ([`TrialSource::trial_parts`]), how each named part is decoded
//! ([`TrialSource::trial_codecs`]), and how decoded parts become an
//! `(input, target)` pair ([`TrialSource::assemble`]).  [`read_trial`]
//! drives those three steps against an open container; [`TrialDataset`]
//! adds counting, bounds checks, slicing and handle management.
//!
//! A part whose name has a codec must be a container path and is read and
//! decoded.  A part without one must be an inline value and is passed
//! through as is, which is how per-trial flags (for example a randomly
//! drawn augmentation switch) reach `assemble`.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use thiserror::Error;

use crate::container::{ContainerError, ContainerReader};
use crate::index::{GroupView, NodeError};
use crate::path::{ContainerPath, PathError};
use crate::registry::{CodecError, CodecRegistry};
use crate::value::Value;

pub mod dataset;

pub use dataset::{DatasetError, IndexError, Slice, TrialDataset};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum TrialError {
    #[error("{path} not found in trial {index}")]
    PathNotFound { path: ContainerPath, index: usize },
    #[error("part {part:?} of trial {index} is a path but has no codec")]
    MissingCodec { part: String, index: usize },
    #[error("part {part:?} of trial {index} has a codec but no path")]
    ExpectedPath { part: String, index: usize },
    #[error("decoding part {part:?} of trial {index}: {source}")]
    Decode { part: String, index: usize, #[source] source: CodecError },
    #[error("trial {index} has no part {part:?}")]
    MissingPart { part: String, index: usize },
    #[error("part {part:?} of trial {index} is {found}, expected {expected}")]
    PartType { part: String, index: usize, expected: &'static str, found: &'static str },
    #[error("assembling trial {index}: {reason}")]
    Assemble { index: usize, reason: String },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Container(#[from] ContainerError),
}

// ── Declared parts ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Relative to the dataset root; read and decoded.
    Path(ContainerPath),
    /// Carried through unchanged.
    Inline(Value),
}

/// What trial `i` consists of, as declared by [`TrialSource::trial_parts`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialParts {
    parts: BTreeMap<String, Part>,
}

impl TrialParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, name: impl Into<String>, path: ContainerPath) -> Self {
        self.parts.insert(name.into(), Part::Path(path));
        self
    }

    pub fn inline(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parts.insert(name.into(), Part::Inline(value.into()));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, part: Part) {
        self.parts.insert(name.into(), part);
    }

    pub fn get(&self, name: &str) -> Option<&Part> {
        self.parts.get(name)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl IntoIterator for TrialParts {
    type Item = (String, Part);
    type IntoIter = std::collections::btree_map::IntoIter<String, Part>;
    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

// ── Resolved parts ───────────────────────────────────────────────────────────

/// Decoded and pass-through values handed to [`TrialSource::assemble`].
#[derive(Debug, Clone, PartialEq)]
pub struct Parts {
    index:  usize,
    values: BTreeMap<String, Value>,
}

impl Parts {
    pub fn new(index: usize, values: BTreeMap<String, Value>) -> Self {
        Self { index, values }
    }

    /// Index of the trial these parts belong to.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, name: &str) -> Result<&Value, TrialError> {
        self.values.get(name).ok_or_else(|| self.missing(name))
    }

    pub fn take(&mut self, name: &str) -> Result<Value, TrialError> {
        self.values.remove(name).ok_or_else(|| self.missing(name))
    }

    pub fn take_bytes(&mut self, name: &str) -> Result<Vec<u8>, TrialError> {
        match self.take(name)? {
            Value::Bytes(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(self.wrong_type(name, "bytes", &other)),
        }
    }

    pub fn take_text(&mut self, name: &str) -> Result<String, TrialError> {
        match self.take(name)? {
            Value::Text(s) => Ok(s),
            other => Err(self.wrong_type(name, "text", &other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, TrialError> {
        let v = self.get(name)?;
        v.as_bool().ok_or_else(|| self.wrong_type(name, "bool", v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn missing(&self, name: &str) -> TrialError {
        TrialError::MissingPart { part: name.to_owned(), index: self.index }
    }

    fn wrong_type(&self, name: &str, expected: &'static str, found: &Value) -> TrialError {
        TrialError::PartType {
            part: name.to_owned(),
            index: self.index,
            expected,
            found: found.type_name(),
        }
    }
}

// ── Collaborator contract ────────────────────────────────────────────────────

/// The capability set a concrete dataset implements.
pub trait TrialSource {
    type Input;
    type Target;

    /// Group inside the container that holds the trials.  Its child count
    /// is the dataset length.
    fn root(&self) -> ContainerPath;

    /// Declare the parts of trial `index`.  `group` is the dataset root.
    fn trial_parts(&self, index: usize, group: &GroupView<'_>) -> Result<TrialParts, TrialError>;

    /// Decoders keyed by part name.
    fn trial_codecs(&self) -> &CodecRegistry<Value>;

    /// Shape decoded parts into `(input, target)`.  Either side may be a
    /// tuple for multi-input or multi-target records.
    fn assemble(&self, parts: Parts) -> Result<(Self::Input, Self::Target), TrialError>;
}

/// Read trial `index` of `source` from `reader`, where `root` is the
/// dataset's root group.
pub fn read_trial<S, R>(
    source: &S,
    index:  usize,
    reader: &mut ContainerReader<R>,
    root:   &ContainerPath,
) -> Result<(S::Input, S::Target), TrialError>
where
    S: TrialSource + ?Sized,
    R: Read + Seek,
{
    let declared = {
        let view = reader.group_view(root)?;
        source.trial_parts(index, &view)?
    };
    let codecs = source.trial_codecs();

    let mut values = BTreeMap::new();
    for (name, part) in declared {
        let value = match (codecs.resolve(&name), part) {
            (Some(decode), Part::Path(rel)) => {
                let path = root.join(&rel);
                let raw = reader.read_raw(&path).map_err(|e| match e {
                    ContainerError::Node(
                        NodeError::NotFound(_) | NodeError::NotARecord(_) | NodeError::NotAGroup(_),
                    ) => TrialError::PathNotFound { path: path.clone(), index },
                    other => TrialError::Container(other),
                })?;
                decode(raw.as_slice())
                    .map_err(|source| TrialError::Decode { part: name.clone(), index, source })?
            }
            (Some(_), Part::Inline(_)) => return Err(TrialError::ExpectedPath { part: name, index }),
            (None, Part::Path(_)) => return Err(TrialError::MissingCodec { part: name, index }),
            (None, Part::Inline(value)) => value,
        };
        values.insert(name, value);
    }

    source.assemble(Parts::new(index, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerWriter, WriteOptions};
    use crate::registry::decode;
    use crate::value::Record;
    use std::io::Cursor;

    fn cp(s: &str) -> ContainerPath {
        ContainerPath::parse(s).unwrap()
    }

    struct Labelled {
        codecs: CodecRegistry<Value>,
        extra:  Option<(&'static str, Part)>,
    }

    impl Labelled {
        fn new() -> Self {
            let mut codecs = CodecRegistry::new();
            codecs.register("label", decode::utf8);
            codecs.register("blob", decode::bytes);
            Self { codecs, extra: None }
        }
    }

    impl TrialSource for Labelled {
        type Input = (Vec<u8>, bool);
        type Target = String;

        fn root(&self) -> ContainerPath {
            cp("/trials")
        }

        fn trial_parts(&self, index: usize, _group: &GroupView<'_>) -> Result<TrialParts, TrialError> {
            let base = ContainerPath::root().child(&index.to_string())?;
            let mut parts = TrialParts::new()
                .path("blob", base.child("blob")?)
                .path("label", base.child("label")?)
                .inline("flip", index % 2 == 1);
            if let Some((name, part)) = &self.extra {
                parts.insert(*name, part.clone());
            }
            Ok(parts)
        }

        fn trial_codecs(&self) -> &CodecRegistry<Value> {
            &self.codecs
        }

        fn assemble(&self, mut parts: Parts) -> Result<(Self::Input, Self::Target), TrialError> {
            let flip = parts.bool("flip")?;
            let mut blob = parts.take_bytes("blob")?;
            if flip {
                blob.reverse();
            }
            Ok(((blob, flip), parts.take_text("label")?))
        }
    }

    fn container() -> ContainerReader<Cursor<Vec<u8>>> {
        let mut w = ContainerWriter::new(Cursor::new(Vec::new()), "set", WriteOptions::default()).unwrap();
        w.create_group(&cp("/trials")).unwrap();
        for (i, label) in ["cat", "dog"].iter().enumerate() {
            w.create_group(&cp(&format!("/trials/{i}"))).unwrap();
            w.write_record(&cp(&format!("/trials/{i}/blob")), &Record::bytes(vec![1, 2, 3]), None).unwrap();
            w.write_record(&cp(&format!("/trials/{i}/label")), &Record::text(*label), None).unwrap();
        }
        w.write_record(&cp("/trials/1/broken"), &Record::bytes(vec![0xff]), None).unwrap();
        w.finalize().unwrap();
        ContainerReader::new(Cursor::new(w.into_inner().into_inner())).unwrap()
    }

    #[test]
    fn decodes_paths_and_passes_inline_values() {
        let mut r = container();
        let src = Labelled::new();
        let ((blob, flip), label) = read_trial(&src, 0, &mut r, &cp("/trials")).unwrap();
        assert_eq!((blob, flip, label.as_str()), (vec![1, 2, 3], false, "cat"));

        let ((blob, flip), label) = read_trial(&src, 1, &mut r, &cp("/trials")).unwrap();
        assert_eq!((blob, flip, label.as_str()), (vec![3, 2, 1], true, "dog"));
    }

    #[test]
    fn missing_path_names_path_and_index() {
        let mut r = container();
        let mut src = Labelled::new();
        src.codecs.register("extra", decode::bytes);
        src.extra = Some(("extra", Part::Path(cp("/5/nothing"))));
        match read_trial(&src, 0, &mut r, &cp("/trials")) {
            Err(TrialError::PathNotFound { path, index }) => {
                assert_eq!(path, cp("/trials/5/nothing"));
                assert_eq!(index, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn codec_and_part_kind_must_agree() {
        let mut r = container();
        let mut src = Labelled::new();
        src.extra = Some(("unknown", Part::Path(cp("/0/blob"))));
        assert!(matches!(
            read_trial(&src, 0, &mut r, &cp("/trials")),
            Err(TrialError::MissingCodec { .. })
        ));

        let mut src = Labelled::new();
        src.extra = Some(("label", Part::Inline(Value::from("inline"))));
        assert!(matches!(
            read_trial(&src, 0, &mut r, &cp("/trials")),
            Err(TrialError::ExpectedPath { .. })
        ));
    }

    #[test]
    fn decode_failures_propagate() {
        let mut r = container();
        let mut src = Labelled::new();
        src.codecs.register("broken", decode::utf8);
        src.extra = Some(("broken", Part::Path(cp("/1/broken"))));
        assert!(matches!(
            read_trial(&src, 1, &mut r, &cp("/trials")),
            Err(TrialError::Decode { index: 1, .. })
        ));
    }
}
