// Copyright 2021 The Strata Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Error, Formatter};

use thiserror::Error;

/// Length in bytes of every object identifier.
pub const ID_LENGTH: usize = 20;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct CommitId(Vec<u8>);

impl Debug for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("CommitId").field(&self.hex()).finish()
    }
}

impl CommitId {
    pub fn new(value: Vec<u8>) -> Self {
        Self(value)
    }

    /// The distinguished all-zero id meaning "absent" or "no mapping".
    pub fn null() -> Self {
        Self(vec![0; ID_LENGTH])
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn from_hex(hex: &str) -> Self {
        Self(hex::decode(hex).unwrap())
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct TreeId(Vec<u8>);

impl Debug for TreeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("TreeId").field(&self.hex()).finish()
    }
}

impl TreeId {
    pub fn new(value: Vec<u8>) -> Self {
        Self(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn from_hex(hex: &str) -> Self {
        Self(hex::decode(hex).unwrap())
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct FeatureId(Vec<u8>);

impl Debug for FeatureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("FeatureId").field(&self.hex()).finish()
    }
}

impl FeatureId {
    pub fn new(value: Vec<u8>) -> Self {
        Self(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn from_hex(hex: &str) -> Self {
        Self(hex::decode(hex).unwrap())
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct FeatureTypeId(Vec<u8>);

impl Debug for FeatureTypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("FeatureTypeId").field(&self.hex()).finish()
    }
}

impl FeatureTypeId {
    pub fn new(value: Vec<u8>) -> Self {
        Self(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn from_hex(hex: &str) -> Self {
        Self(hex::decode(hex).unwrap())
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct MillisSinceEpoch(pub u64);

#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Timestamp {
    pub timestamp: MillisSinceEpoch,
    // time zone offset in minutes
    pub tz_offset: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(chrono::offset::Local::now())
    }

    pub fn from_datetime<Tz: chrono::TimeZone<Offset = chrono::offset::FixedOffset>>(
        datetime: chrono::DateTime<Tz>,
    ) -> Self {
        Self {
            timestamp: MillisSinceEpoch(datetime.timestamp_millis() as u64),
            tz_offset: datetime.offset().local_minus_utc() / 60,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Commit {
    pub parents: Vec<CommitId>,
    pub root_tree: TreeId,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    /// The first parent, used as the base for computing the changes a commit
    /// introduces. `None` for root commits.
    pub fn mainline_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }
}

/// Axis-aligned envelope of a feature's geometry, in the layer's coordinate
/// reference system.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Display for PropertyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            PropertyValue::String(value) => write!(f, "{value}"),
            PropertyValue::Integer(value) => write!(f, "{value}"),
            PropertyValue::Float(value) => write!(f, "{value}"),
            PropertyValue::Boolean(value) => write!(f, "{value}"),
        }
    }
}

/// A geospatial feature: an optional geometry envelope plus a string-keyed
/// attribute map.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Feature {
    pub bbox: Option<BoundingBox>,
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Geometry,
}

/// Schema shared by the features of a layer.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct FeatureType {
    pub name: String,
    pub fields: BTreeMap<String, FieldType>,
}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum TreeValue {
    Feature {
        id: FeatureId,
        feature_type: FeatureTypeId,
    },
    Subtree(TreeId),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TreeEntry<'a> {
    name: &'a str,
    value: &'a TreeValue,
}

impl<'a> TreeEntry<'a> {
    pub fn new(name: &'a str, value: &'a TreeValue) -> Self {
        TreeEntry { name, value }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn value(&self) -> &'a TreeValue {
        self.value
    }
}

pub struct TreeEntriesIterator<'a> {
    iter: std::collections::btree_map::Iter<'a, String, TreeValue>,
}

impl<'a> Iterator for TreeEntriesIterator<'a> {
    type Item = TreeEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(name, value)| TreeEntry {
            name: name.as_str(),
            value,
        })
    }
}

/// A content-addressed set of named entries. Entries of the root tree are
/// layers; entries of a layer tree are features.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct Tree {
    entries: BTreeMap<String, TreeValue>,
}

impl Tree {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> TreeEntriesIterator<'_> {
        TreeEntriesIterator {
            iter: self.entries.iter(),
        }
    }

    pub fn set(&mut self, name: String, value: TreeValue) {
        self.entries.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn value(&self, name: &str) -> Option<&TreeValue> {
        self.entries.get(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Object not found")]
    NotFound,
    #[error("Error: {0}")]
    Other(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

pub trait Backend: Send + Sync + Debug {
    fn empty_tree_id(&self) -> &TreeId;

    fn has_commit(&self, id: &CommitId) -> BackendResult<bool>;

    fn read_commit(&self, id: &CommitId) -> BackendResult<Commit>;

    fn write_commit(&self, contents: &Commit) -> BackendResult<CommitId>;

    fn read_tree(&self, id: &TreeId) -> BackendResult<Tree>;

    fn write_tree(&self, contents: &Tree) -> BackendResult<TreeId>;

    fn read_feature(&self, id: &FeatureId) -> BackendResult<Feature>;

    fn write_feature(&self, contents: &Feature) -> BackendResult<FeatureId>;

    fn read_feature_type(&self, id: &FeatureTypeId) -> BackendResult<FeatureType>;

    fn write_feature_type(&self, contents: &FeatureType) -> BackendResult<FeatureTypeId>;
}
