//! Indexed, sliceable view over the trials in a container.
//!
//! The length is the child count of the dataset root, read once at
//! [`TrialDataset::open`].  Every access opens the container, reads what it
//! needs and drops the handle before returning, so no file stays open
//! between calls and a dataset can be shared by independent readers.  A
//! container rewritten after `open` is not noticed: the cached length is
//! kept, and trials that no longer exist surface as
//! [`TrialError::PathNotFound`].

use std::ops::{Range, RangeFrom, RangeFull, RangeTo};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::{read_trial, TrialError, TrialSource};
use crate::container::{Container, ContainerError, FileReader};
use crate::index::NodeError;
use crate::path::ContainerPath;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    #[error("requested trial with negative index {index}")]
    Negative { index: isize },
    #[error("requested trial {index} for dataset of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("slice step cannot be zero")]
    ZeroStep,
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, #[source] source: ContainerError },
    #[error("dataset root {0} not found")]
    RootNotFound(ContainerPath),
    #[error("dataset root {0} is not a group")]
    RootNotGroup(ContainerPath),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Trial(#[from] TrialError),
}

pub type Trial<S> = (<S as TrialSource>::Input, <S as TrialSource>::Target);

// ── Slices ───────────────────────────────────────────────────────────────────

/// `start:stop:step` with the usual half-open, negative-from-the-end
/// semantics.  Out-of-range bounds are clamped, never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slice {
    pub start: Option<isize>,
    pub stop:  Option<isize>,
    pub step:  Option<isize>,
}

impl Slice {
    pub fn new(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Self {
        Self { start, stop, step }
    }

    pub fn full() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: isize) -> Self {
        self.step = Some(step);
        self
    }

    /// Concrete positions selected in a sequence of `len` items, in order.
    pub fn indices(&self, len: usize) -> Result<Vec<usize>, IndexError> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(IndexError::ZeroStep);
        }
        let len = isize::try_from(len).unwrap_or(isize::MAX);
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(b) if b < 0 => (b + len).max(lower),
            Some(b) => b.min(upper),
        };
        let (start, stop) = if step < 0 {
            (clamp(self.start, upper), clamp(self.stop, lower))
        } else {
            (clamp(self.start, lower), clamp(self.stop, upper))
        };

        // Count first so that huge steps never have to be added to a position.
        let span = if step > 0 { stop - start } else { start - stop };
        let count = if span > 0 { (span as usize - 1) / step.unsigned_abs() + 1 } else { 0 };
        Ok((0..count).map(|k| (start + k as isize * step) as usize).collect())
    }
}

fn to_bound(i: usize) -> isize {
    isize::try_from(i).unwrap_or(isize::MAX)
}

impl From<Range<usize>> for Slice {
    fn from(r: Range<usize>) -> Self {
        Self::new(Some(to_bound(r.start)), Some(to_bound(r.end)), None)
    }
}

impl From<RangeFrom<usize>> for Slice {
    fn from(r: RangeFrom<usize>) -> Self {
        Self::new(Some(to_bound(r.start)), None, None)
    }
}

impl From<RangeTo<usize>> for Slice {
    fn from(r: RangeTo<usize>) -> Self {
        Self::new(None, Some(to_bound(r.end)), None)
    }
}

impl From<RangeFull> for Slice {
    fn from(_: RangeFull) -> Self {
        Self::full()
    }
}

// ── Dataset ──────────────────────────────────────────────────────────────────

pub struct TrialDataset<S: TrialSource> {
    source_path: PathBuf,
    root:        ContainerPath,
    len:         usize,
    source:      S,
}

impl<S: TrialSource> TrialDataset<S> {
    /// Bind `source` to the container at `path` and count its trials.
    pub fn open<P: AsRef<Path>>(path: P, source: S) -> Result<Self, DatasetError> {
        let source_path = path.as_ref().to_owned();
        let root = source.root();
        let reader = open_reader(&source_path)?;
        let len = root_len(&reader, &root)?;
        debug!(container = %source_path.display(), root = %root, len, "opened dataset");
        Ok(Self { source_path, root, len, source })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn root(&self) -> &ContainerPath {
        &self.root
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Trial `index`.  Negative indices are rejected, not wrapped.
    pub fn get(&self, index: isize) -> Result<Trial<S>, DatasetError> {
        let i = self.check(index)?;
        let mut reader = self.reader()?;
        Ok(read_trial(&self.source, i, &mut reader, &self.root)?)
    }

    /// Every trial selected by `slice`, through a single container handle.
    pub fn get_slice(&self, slice: impl Into<Slice>) -> Result<Vec<Trial<S>>, DatasetError> {
        let positions = slice.into().indices(self.len)?;
        self.read_all(&positions)
    }

    /// Trials at `indices`, in the given order, duplicates included.  All
    /// indices are checked before anything is read.
    pub fn get_many(&self, indices: &[isize]) -> Result<Vec<Trial<S>>, DatasetError> {
        let positions = indices
            .iter()
            .map(|&i| self.check(i))
            .collect::<Result<Vec<_>, _>>()?;
        self.read_all(&positions)
    }

    /// Trials in index order, one container open per item.
    pub fn iter(&self) -> impl Iterator<Item = Result<Trial<S>, DatasetError>> + '_ {
        (0..self.len).map(move |i| self.get(i as isize))
    }

    fn read_all(&self, positions: &[usize]) -> Result<Vec<Trial<S>>, DatasetError> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        let mut reader = self.reader()?;
        positions
            .iter()
            .map(|&i| read_trial(&self.source, i, &mut reader, &self.root).map_err(DatasetError::from))
            .collect()
    }

    fn check(&self, index: isize) -> Result<usize, IndexError> {
        if index < 0 {
            return Err(IndexError::Negative { index });
        }
        let index = index as usize;
        if index >= self.len {
            return Err(IndexError::OutOfRange { index, len: self.len });
        }
        Ok(index)
    }

    fn reader(&self) -> Result<FileReader, DatasetError> {
        let reader = open_reader(&self.source_path)?;
        root_len(&reader, &self.root)?;
        Ok(reader)
    }
}

#[cfg(test)]
thread_local! {
    static OPENS: std::cell::Cell<usize> = std::cell::Cell::new(0);
}

fn open_reader(path: &Path) -> Result<FileReader, DatasetError> {
    #[cfg(test)]
    OPENS.with(|n| n.set(n.get() + 1));
    Container::open(path).map_err(|source| DatasetError::Open { path: path.to_owned(), source })
}

fn root_len(reader: &FileReader, root: &ContainerPath) -> Result<usize, DatasetError> {
    match reader.len(root) {
        Ok(n) => Ok(n),
        Err(ContainerError::Node(NodeError::NotAGroup(_))) => Err(DatasetError::RootNotGroup(root.clone())),
        Err(ContainerError::Node(_)) => Err(DatasetError::RootNotFound(root.clone())),
        Err(e) => Err(TrialError::Container(e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::WriteOptions;
    use crate::index::GroupView;
    use crate::registry::{decode, CodecRegistry};
    use crate::trial::{Parts, TrialParts};
    use crate::value::{Record, Value};
    use proptest::prelude::*;

    struct Words {
        codecs: CodecRegistry<Value>,
    }

    impl TrialSource for Words {
        type Input = String;
        type Target = usize;

        fn root(&self) -> ContainerPath {
            ContainerPath::root()
        }

        fn trial_parts(&self, index: usize, _group: &GroupView<'_>) -> Result<TrialParts, TrialError> {
            let base = ContainerPath::root().child(&index.to_string())?;
            Ok(TrialParts::new().path("word", base.child("word")?))
        }

        fn trial_codecs(&self) -> &CodecRegistry<Value> {
            &self.codecs
        }

        fn assemble(&self, mut parts: Parts) -> Result<(String, usize), TrialError> {
            let index = parts.index();
            Ok((parts.take_text("word")?, index))
        }
    }

    fn opens() -> usize {
        OPENS.with(|n| n.replace(0))
    }

    #[test]
    fn batch_reads_open_the_container_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.tbx");
        let mut w = Container::create(&path, WriteOptions::default()).unwrap();
        for (i, word) in ["zero", "one", "two"].iter().enumerate() {
            let group = ContainerPath::root().child(&i.to_string()).unwrap();
            w.create_group(&group).unwrap();
            w.write_record(&group.child("word").unwrap(), &Record::text(*word), None).unwrap();
        }
        w.finalize().unwrap();
        drop(w);

        let mut codecs = CodecRegistry::new();
        codecs.register("word", decode::utf8);
        let ds = TrialDataset::open(&path, Words { codecs }).unwrap();
        assert_eq!(ds.len(), 3);
        opens();

        assert_eq!(ds.get_slice(..).unwrap().len(), 3);
        assert_eq!(opens(), 1);

        let picked = ds.get_many(&[2, 0, 2, 1]).unwrap();
        assert_eq!(picked[0], ("two".to_owned(), 2));
        assert_eq!(picked[2], ("two".to_owned(), 2));
        assert_eq!(opens(), 1);

        assert!(ds.get_many(&[0, 3]).is_err());
        assert_eq!(opens(), 0);

        assert_eq!(ds.get(1).unwrap(), ("one".to_owned(), 1));
        assert_eq!(opens(), 1);

        assert_eq!(ds.iter().count(), 3);
        assert_eq!(opens(), 3);
    }

    fn sl(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Vec<usize> {
        Slice::new(start, stop, step).indices(5).unwrap()
    }

    #[test]
    fn slices_follow_half_open_semantics() {
        assert_eq!(sl(None, None, None), [0, 1, 2, 3, 4]);
        assert_eq!(sl(Some(1), Some(3), None), [1, 2]);
        assert_eq!(sl(Some(-2), None, None), [3, 4]);
        assert_eq!(sl(None, Some(-1), None), [0, 1, 2, 3]);
        assert_eq!(sl(None, None, Some(2)), [0, 2, 4]);
        assert_eq!(sl(Some(3), Some(1), None), Vec::<usize>::new());
    }

    #[test]
    fn slices_clamp_and_reverse() {
        assert_eq!(sl(Some(-100), Some(100), None), [0, 1, 2, 3, 4]);
        assert_eq!(sl(None, None, Some(-1)), [4, 3, 2, 1, 0]);
        assert_eq!(sl(Some(3), Some(0), Some(-2)), [3, 1]);
        assert_eq!(sl(Some(10), None, Some(-2)), [4, 2, 0]);
        assert_eq!(Slice::full().indices(0).unwrap(), Vec::<usize>::new());
        assert_eq!(Slice::full().with_step(0).indices(5), Err(IndexError::ZeroStep));
    }

    #[test]
    fn ranges_convert_to_slices() {
        assert_eq!(Slice::from(1usize..4).indices(5).unwrap(), [1, 2, 3]);
        assert_eq!(Slice::from(3usize..).indices(5).unwrap(), [3, 4]);
        assert_eq!(Slice::from(..2usize).indices(5).unwrap(), [0, 1]);
        assert_eq!(Slice::from(..).indices(2).unwrap(), [0, 1]);
        assert_eq!(Slice::from(usize::MAX..).indices(5).unwrap(), Vec::<usize>::new());
        assert_eq!(Slice::from(..usize::MAX).indices(3).unwrap(), [0, 1, 2]);
    }

    #[test]
    fn extreme_steps_select_at_most_one_position() {
        assert_eq!(sl(Some(1), None, Some(isize::MAX)), [1]);
        assert_eq!(sl(None, None, Some(isize::MAX)), [0]);
        assert_eq!(sl(None, None, Some(isize::MIN + 1)), [4]);
        assert_eq!(sl(Some(2), None, Some(isize::MIN)), [2]);
        assert_eq!(
            Slice::new(Some(isize::MIN), Some(isize::MAX), None).indices(3).unwrap(),
            [0, 1, 2]
        );
    }

    proptest! {
        #[test]
        fn slice_positions_stay_in_bounds_and_ordered(
            len in 0usize..20,
            start in proptest::option::of(-25isize..25),
            stop in proptest::option::of(-25isize..25),
            step in prop_oneof![-4isize..0, 1isize..5],
        ) {
            let picked = Slice::new(start, stop, Some(step)).indices(len).unwrap();
            prop_assert!(picked.iter().all(|&i| i < len));
            for pair in picked.windows(2) {
                prop_assert_eq!(pair[1] as isize - pair[0] as isize, step);
            }
        }

        #[test]
        fn reversed_full_slice_mirrors_forward(len in 0usize..20) {
            let mut forward = Slice::full().indices(len).unwrap();
            forward.reverse();
            prop_assert_eq!(Slice::full().with_step(-1).indices(len).unwrap(), forward);
        }
    }
}
