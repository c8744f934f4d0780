//! The container's group tree, stored as one JSON INDEX block.
//!
//! Groups keep their children in a `BTreeMap`, so sibling names are unique
//! by construction and listing order is stable.

use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use thiserror::Error;

use crate::path::ContainerPath;
use crate::value::RecordKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("{0} not found")]
    NotFound(ContainerPath),
    #[error("{0} is not a group")]
    NotAGroup(ContainerPath),
    #[error("{0} is not a record")]
    NotARecord(ContainerPath),
    #[error("{0} already exists")]
    AlreadyExists(ContainerPath),
    #[error("the root is always a group")]
    RootIsGroup,
}

/// Location and shape of one record's block.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub offset:       u64,
    pub kind:         RecordKind,
    pub size:         u64,
    pub stored_size:  u64,
    pub content_hash: [u8; 32],
    /// File name the record was created from, extension included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name:  Option<String>,
}

impl RecordEntry {
    /// File name to restore this record under.  `source_name` comes from
    /// the container and is used only if it is a single plain component;
    /// otherwise `record_name` is returned.
    pub fn file_name<'a>(&'a self, record_name: &'a str) -> &'a str {
        match self.source_name.as_deref() {
            Some(name) if is_plain_file_name(name) => name,
            _ => record_name,
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == name
    )
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct GroupNode {
    #[serde(default)]
    pub children: BTreeMap<String, Node>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Group(GroupNode),
    Record(RecordEntry),
}

impl Node {
    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            Node::Group(g) => Some(g),
            Node::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordEntry> {
        match self {
            Node::Record(r) => Some(r),
            Node::Group(_) => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_))
    }
}

impl GroupNode {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Resolve `rel` below this group.
    pub fn get(&self, rel: &ContainerPath) -> Option<&Node> {
        let (first, rest) = rel.segments().split_first()?;
        let mut node = self.children.get(first)?;
        for seg in rest {
            node = node.as_group()?.children.get(seg)?;
        }
        Some(node)
    }

    fn get_group_mut(&mut self, rel: &ContainerPath) -> Result<&mut GroupNode, NodeError> {
        let mut group = self;
        for (depth, seg) in rel.segments().iter().enumerate() {
            let prefix = || ContainerPath::parse(&rel.segments()[..=depth].join("/")).unwrap_or_default();
            group = match group.children.get_mut(seg) {
                Some(Node::Group(g)) => g,
                Some(Node::Record(_)) => return Err(NodeError::NotAGroup(prefix())),
                None => return Err(NodeError::NotFound(prefix())),
            };
        }
        Ok(group)
    }
}

/// Read-only view of one group, handed to trial declarations.
#[derive(Debug, Clone, Copy)]
pub struct GroupView<'a> {
    path:  &'a ContainerPath,
    group: &'a GroupNode,
}

impl<'a> GroupView<'a> {
    pub fn new(path: &'a ContainerPath, group: &'a GroupNode) -> Self {
        Self { path, group }
    }

    pub fn path(&self) -> &ContainerPath {
        self.path
    }

    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    /// Child names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'a str> {
        self.group.children.keys().map(String::as_str)
    }

    /// Name of the `i`-th child in sorted order.
    pub fn nth_name(&self, i: usize) -> Option<&'a str> {
        self.group.children.keys().nth(i).map(String::as_str)
    }

    pub fn get(&self, rel: &ContainerPath) -> Option<&'a Node> {
        self.group.get(rel)
    }

    pub fn contains(&self, rel: &ContainerPath) -> bool {
        self.get(rel).is_some()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Index {
    /// Identifier of the root group (the container file's stem).
    pub root_name: String,
    pub root:      GroupNode,
    /// BLAKE3 over every record's path and content hash, in path order.
    pub root_hash: [u8; 32],
}

impl Index {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self { root_name: root_name.into(), root: GroupNode::default(), root_hash: [0u8; 32] }
    }

    pub fn node(&self, path: &ContainerPath) -> Option<&Node> {
        self.root.get(path)
    }

    pub fn group(&self, path: &ContainerPath) -> Result<&GroupNode, NodeError> {
        if path.is_root() {
            return Ok(&self.root);
        }
        match self.node(path) {
            Some(Node::Group(g)) => Ok(g),
            Some(Node::Record(_)) => Err(NodeError::NotAGroup(path.clone())),
            None => Err(NodeError::NotFound(path.clone())),
        }
    }

    pub fn record(&self, path: &ContainerPath) -> Result<&RecordEntry, NodeError> {
        match self.node(path) {
            Some(Node::Record(r)) => Ok(r),
            Some(Node::Group(_)) => Err(NodeError::NotARecord(path.clone())),
            None if path.is_root() => Err(NodeError::NotARecord(path.clone())),
            None => Err(NodeError::NotFound(path.clone())),
        }
    }

    /// Create an empty group.  The parent must already exist.
    pub fn create_group(&mut self, path: &ContainerPath) -> Result<(), NodeError> {
        self.insert(path, Node::Group(GroupNode::default()))
    }

    pub fn insert_record(&mut self, path: &ContainerPath, entry: RecordEntry) -> Result<(), NodeError> {
        self.insert(path, Node::Record(entry))
    }

    fn insert(&mut self, path: &ContainerPath, node: Node) -> Result<(), NodeError> {
        let (parent, name) = match (path.parent(), path.name()) {
            (Some(p), Some(n)) => (p, n.to_owned()),
            _ => return Err(NodeError::RootIsGroup),
        };
        let group = self.root.get_group_mut(&parent)?;
        if group.children.contains_key(&name) {
            return Err(NodeError::AlreadyExists(path.clone()));
        }
        group.children.insert(name, node);
        Ok(())
    }

    /// Every node below the root, parents before children, siblings sorted.
    pub fn walk(&self) -> Vec<(ContainerPath, &Node)> {
        let mut out = Vec::new();
        walk_into(&self.root, &ContainerPath::root(), &mut out);
        out
    }

    pub fn record_count(&self) -> usize {
        self.walk().iter().filter(|(_, n)| !n.is_group()).count()
    }

    pub fn group_count(&self) -> usize {
        self.walk().iter().filter(|(_, n)| n.is_group()).count()
    }

    pub fn compute_root_hash(&mut self) {
        let mut hasher = blake3::Hasher::new();
        for (path, node) in self.walk() {
            if let Node::Record(r) = node {
                hasher.update(path.to_string().as_bytes());
                hasher.update(&r.content_hash);
            }
        }
        self.root_hash = hasher.finalize().into();
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

fn walk_into<'a>(group: &'a GroupNode, at: &ContainerPath, out: &mut Vec<(ContainerPath, &'a Node)>) {
    for (name, node) in &group.children {
        let mut path = at.clone();
        // Names already passed validation on insert.
        if path.push(name).is_err() {
            continue;
        }
        out.push((path.clone(), node));
        if let Node::Group(g) = node {
            walk_into(g, &path, out);
        }
    }
}
