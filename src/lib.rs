pub mod compression;
pub mod value;
pub mod registry;
pub mod path;
pub mod superblock;
pub mod block;
pub mod index;
pub mod container;
pub mod tree;
pub mod trial;

pub use compression::Compression;
pub use value::{Record, RecordKind, Value};
pub use registry::{CodecError, CodecRegistry, register_global};
pub use path::{ContainerPath, PathMapper, map_path};
pub use superblock::Superblock;
pub use index::{GroupView, Index, Node};
pub use container::{Container, ContainerError, ContainerReader, ContainerWriter, WriteOptions};
pub use tree::{ConversionReport, ConvertError, ConvertOptions, TreeSerializer, convert_tree};
pub use trial::{Part, Parts, TrialError, TrialParts, TrialSource, read_trial};
pub use trial::dataset::{DatasetError, IndexError, Slice, TrialDataset};
