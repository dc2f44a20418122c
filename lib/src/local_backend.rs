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
use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use blake2::digest::consts::U20;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, PersistError};

use crate::backend::{
    Backend, BackendError, BackendResult, BoundingBox, Commit, CommitId, Feature, FeatureId,
    FeatureType, FeatureTypeId, FieldType, MillisSinceEpoch, PropertyValue, Signature, Timestamp,
    Tree, TreeId, TreeValue,
};

type Blake2b160 = Blake2b<U20>;

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Other(err.to_string())
    }
}

/// Content-addressed object store keeping one JSON-encoded file per object.
/// An object's id is the Blake2b-160 digest of its canonical encoding.
#[derive(Debug)]
pub struct LocalBackend {
    path: PathBuf,
    empty_tree_id: TreeId,
}

impl LocalBackend {
    pub fn init(store_path: PathBuf) -> BackendResult<Self> {
        fs::create_dir_all(store_path.join("commits"))?;
        fs::create_dir_all(store_path.join("trees"))?;
        fs::create_dir_all(store_path.join("features"))?;
        fs::create_dir_all(store_path.join("featuretypes"))?;
        let backend = Self::load(store_path);
        let empty_tree_id = backend.write_tree(&Tree::default())?;
        assert_eq!(empty_tree_id, backend.empty_tree_id);
        Ok(backend)
    }

    pub fn load(store_path: PathBuf) -> Self {
        let empty_tree_bytes = serde_json::to_vec(&tree_to_wire(&Tree::default())).unwrap();
        let empty_tree_id = TreeId::new(content_hash(&empty_tree_bytes));
        LocalBackend {
            path: store_path,
            empty_tree_id,
        }
    }

    fn commit_path(&self, id: &CommitId) -> PathBuf {
        self.path.join("commits").join(id.hex())
    }

    fn tree_path(&self, id: &TreeId) -> PathBuf {
        self.path.join("trees").join(id.hex())
    }

    fn feature_path(&self, id: &FeatureId) -> PathBuf {
        self.path.join("features").join(id.hex())
    }

    fn feature_type_path(&self, id: &FeatureTypeId) -> PathBuf {
        self.path.join("featuretypes").join(id.hex())
    }

    /// Writes the canonical encoding of an object under its digest. The
    /// store is content-addressed: a file already sitting at the target
    /// holds these exact bytes, so losing the rename to another writer is a
    /// success.
    fn write_object(
        &self,
        bytes: &[u8],
        path: impl FnOnce(Vec<u8>) -> PathBuf,
    ) -> BackendResult<Vec<u8>> {
        let temp_file = NamedTempFile::new_in(&self.path)?;
        temp_file.as_file().write_all(bytes)?;
        let id_bytes = content_hash(bytes);
        let target = path(id_bytes.clone());
        if let Err(PersistError { error, .. }) = temp_file.persist(&target) {
            if !target.exists() {
                return Err(error.into());
            }
        }
        Ok(id_bytes)
    }
}

fn content_hash(bytes: &[u8]) -> Vec<u8> {
    Blake2b160::digest(bytes).to_vec()
}

fn not_found_to_backend_error(err: std::io::Error) -> BackendError {
    if err.kind() == ErrorKind::NotFound {
        BackendError::NotFound
    } else {
        BackendError::from(err)
    }
}

impl Backend for LocalBackend {
    fn empty_tree_id(&self) -> &TreeId {
        &self.empty_tree_id
    }

    fn has_commit(&self, id: &CommitId) -> BackendResult<bool> {
        Ok(self.commit_path(id).exists())
    }

    fn read_commit(&self, id: &CommitId) -> BackendResult<Commit> {
        let buf = fs::read(self.commit_path(id)).map_err(not_found_to_backend_error)?;
        let wire: CommitWire = serde_json::from_slice(&buf)?;
        commit_from_wire(&wire)
    }

    fn write_commit(&self, commit: &Commit) -> BackendResult<CommitId> {
        let bytes = serde_json::to_vec(&commit_to_wire(commit))?;
        let id_bytes = self.write_object(&bytes, |id| {
            self.commit_path(&CommitId::new(id))
        })?;
        Ok(CommitId::new(id_bytes))
    }

    fn read_tree(&self, id: &TreeId) -> BackendResult<Tree> {
        let buf = fs::read(self.tree_path(id)).map_err(not_found_to_backend_error)?;
        let wire: TreeWire = serde_json::from_slice(&buf)?;
        tree_from_wire(&wire)
    }

    fn write_tree(&self, tree: &Tree) -> BackendResult<TreeId> {
        let bytes = serde_json::to_vec(&tree_to_wire(tree))?;
        let id_bytes = self.write_object(&bytes, |id| self.tree_path(&TreeId::new(id)))?;
        Ok(TreeId::new(id_bytes))
    }

    fn read_feature(&self, id: &FeatureId) -> BackendResult<Feature> {
        let buf = fs::read(self.feature_path(id)).map_err(not_found_to_backend_error)?;
        let wire: FeatureWire = serde_json::from_slice(&buf)?;
        Ok(feature_from_wire(&wire))
    }

    fn write_feature(&self, feature: &Feature) -> BackendResult<FeatureId> {
        let bytes = serde_json::to_vec(&feature_to_wire(feature))?;
        let id_bytes = self.write_object(&bytes, |id| self.feature_path(&FeatureId::new(id)))?;
        Ok(FeatureId::new(id_bytes))
    }

    fn read_feature_type(&self, id: &FeatureTypeId) -> BackendResult<FeatureType> {
        let buf = fs::read(self.feature_type_path(id)).map_err(not_found_to_backend_error)?;
        let wire: FeatureTypeWire = serde_json::from_slice(&buf)?;
        feature_type_from_wire(&wire)
    }

    fn write_feature_type(&self, feature_type: &FeatureType) -> BackendResult<FeatureTypeId> {
        let bytes = serde_json::to_vec(&feature_type_to_wire(feature_type))?;
        let id_bytes =
            self.write_object(&bytes, |id| self.feature_type_path(&FeatureTypeId::new(id)))?;
        Ok(FeatureTypeId::new(id_bytes))
    }
}

fn id_bytes_from_hex(hex: &str) -> BackendResult<Vec<u8>> {
    hex::decode(hex).map_err(|_| BackendError::Other(format!("bad object id {hex}")))
}

#[derive(Serialize, Deserialize)]
struct SignatureWire {
    name: String,
    email: String,
    timestamp: u64,
    tz_offset: i32,
}

#[derive(Serialize, Deserialize)]
struct CommitWire {
    parents: Vec<String>,
    root_tree: String,
    author: SignatureWire,
    committer: SignatureWire,
    message: String,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TreeValueWire {
    Feature { id: String, feature_type: String },
    Subtree { id: String },
}

#[derive(Serialize, Deserialize)]
struct TreeWire {
    entries: BTreeMap<String, TreeValueWire>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PropertyValueWire {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Serialize, Deserialize)]
struct FeatureWire {
    bbox: Option<[f64; 4]>,
    properties: BTreeMap<String, PropertyValueWire>,
}

#[derive(Serialize, Deserialize)]
struct FeatureTypeWire {
    name: String,
    fields: BTreeMap<String, String>,
}

fn signature_to_wire(signature: &Signature) -> SignatureWire {
    SignatureWire {
        name: signature.name.clone(),
        email: signature.email.clone(),
        timestamp: signature.timestamp.timestamp.0,
        tz_offset: signature.timestamp.tz_offset,
    }
}

fn signature_from_wire(wire: &SignatureWire) -> Signature {
    Signature {
        name: wire.name.clone(),
        email: wire.email.clone(),
        timestamp: Timestamp {
            timestamp: MillisSinceEpoch(wire.timestamp),
            tz_offset: wire.tz_offset,
        },
    }
}

fn commit_to_wire(commit: &Commit) -> CommitWire {
    CommitWire {
        parents: commit.parents.iter().map(|p| p.hex()).collect(),
        root_tree: commit.root_tree.hex(),
        author: signature_to_wire(&commit.author),
        committer: signature_to_wire(&commit.committer),
        message: commit.message.clone(),
    }
}

fn commit_from_wire(wire: &CommitWire) -> BackendResult<Commit> {
    let parents = wire
        .parents
        .iter()
        .map(|p| Ok(CommitId::new(id_bytes_from_hex(p)?)))
        .collect::<BackendResult<Vec<_>>>()?;
    Ok(Commit {
        parents,
        root_tree: TreeId::new(id_bytes_from_hex(&wire.root_tree)?),
        author: signature_from_wire(&wire.author),
        committer: signature_from_wire(&wire.committer),
        message: wire.message.clone(),
    })
}

fn tree_to_wire(tree: &Tree) -> TreeWire {
    let mut entries = BTreeMap::new();
    for entry in tree.entries() {
        let value = match entry.value() {
            TreeValue::Feature { id, feature_type } => TreeValueWire::Feature {
                id: id.hex(),
                feature_type: feature_type.hex(),
            },
            TreeValue::Subtree(id) => TreeValueWire::Subtree { id: id.hex() },
        };
        entries.insert(entry.name().to_string(), value);
    }
    TreeWire { entries }
}

fn tree_from_wire(wire: &TreeWire) -> BackendResult<Tree> {
    let mut tree = Tree::default();
    for (name, value_wire) in &wire.entries {
        let value = match value_wire {
            TreeValueWire::Feature { id, feature_type } => TreeValue::Feature {
                id: FeatureId::new(id_bytes_from_hex(id)?),
                feature_type: FeatureTypeId::new(id_bytes_from_hex(feature_type)?),
            },
            TreeValueWire::Subtree { id } => {
                TreeValue::Subtree(TreeId::new(id_bytes_from_hex(id)?))
            }
        };
        tree.set(name.clone(), value);
    }
    Ok(tree)
}

fn feature_to_wire(feature: &Feature) -> FeatureWire {
    let properties = feature
        .properties
        .iter()
        .map(|(name, value)| {
            let value = match value {
                PropertyValue::String(v) => PropertyValueWire::String(v.clone()),
                PropertyValue::Integer(v) => PropertyValueWire::Integer(*v),
                PropertyValue::Float(v) => PropertyValueWire::Float(*v),
                PropertyValue::Boolean(v) => PropertyValueWire::Boolean(*v),
            };
            (name.clone(), value)
        })
        .collect();
    FeatureWire {
        bbox: feature
            .bbox
            .map(|bbox| [bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y]),
        properties,
    }
}

fn feature_from_wire(wire: &FeatureWire) -> Feature {
    let properties = wire
        .properties
        .iter()
        .map(|(name, value)| {
            let value = match value {
                PropertyValueWire::String(v) => PropertyValue::String(v.clone()),
                PropertyValueWire::Integer(v) => PropertyValue::Integer(*v),
                PropertyValueWire::Float(v) => PropertyValue::Float(*v),
                PropertyValueWire::Boolean(v) => PropertyValue::Boolean(*v),
            };
            (name.clone(), value)
        })
        .collect();
    Feature {
        bbox: wire
            .bbox
            .map(|[min_x, min_y, max_x, max_y]| BoundingBox::new(min_x, min_y, max_x, max_y)),
        properties,
    }
}

fn field_type_to_wire(field_type: &FieldType) -> String {
    match field_type {
        FieldType::String => "string",
        FieldType::Integer => "integer",
        FieldType::Float => "float",
        FieldType::Boolean => "boolean",
        FieldType::Geometry => "geometry",
    }
    .to_string()
}

fn field_type_from_wire(wire: &str) -> BackendResult<FieldType> {
    match wire {
        "string" => Ok(FieldType::String),
        "integer" => Ok(FieldType::Integer),
        "float" => Ok(FieldType::Float),
        "boolean" => Ok(FieldType::Boolean),
        "geometry" => Ok(FieldType::Geometry),
        _ => Err(BackendError::Other(format!("bad field type {wire}"))),
    }
}

fn feature_type_to_wire(feature_type: &FeatureType) -> FeatureTypeWire {
    FeatureTypeWire {
        name: feature_type.name.clone(),
        fields: feature_type
            .fields
            .iter()
            .map(|(name, field_type)| (name.clone(), field_type_to_wire(field_type)))
            .collect(),
    }
}

fn feature_type_from_wire(wire: &FeatureTypeWire) -> BackendResult<FeatureType> {
    let fields = wire
        .fields
        .iter()
        .map(|(name, field_type)| Ok((name.clone(), field_type_from_wire(field_type)?)))
        .collect::<BackendResult<BTreeMap<_, _>>>()?;
    Ok(FeatureType {
        name: wire.name.clone(),
        fields,
    })
}
