// Copyright 2022 The Strata Authors
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

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::backend::CommitId;

/// Property marking a commit as the projection of a filtered original.
pub const SPARSE_PROPERTY: &str = "sparse";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Cannot map the null commit id")]
    NullMapping,
    #[error("Error: {0}")]
    Other(String),
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        GraphError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Other(err.to_string())
    }
}

pub type GraphResult<T> = Result<T, GraphError>;

/// The commit-graph database: parent lists, string-keyed properties, and the
/// bidirectional original↔projected commit mapping used by sparse
/// replication.
pub trait CommitGraph: Send + Sync + Debug {
    fn put(&self, id: &CommitId, parents: &[CommitId]) -> GraphResult<()>;

    /// Parents of a commit. Unknown commits have no parents, which makes
    /// them roots to the traverser.
    fn parents(&self, id: &CommitId) -> GraphResult<Vec<CommitId>>;

    fn contains(&self, id: &CommitId) -> GraphResult<bool>;

    fn set_property(&self, id: &CommitId, key: &str, value: &str) -> GraphResult<()>;

    fn property(&self, id: &CommitId, key: &str) -> GraphResult<Option<String>>;

    /// Installs both directions of the mapping at the same instant.
    fn map(&self, original: &CommitId, projected: &CommitId) -> GraphResult<()>;

    /// The other side of the mapping, `None` when unmapped. The null id is
    /// never mapped.
    fn mapping(&self, id: &CommitId) -> GraphResult<Option<CommitId>>;
}

#[derive(Clone, Debug, Default)]
struct GraphNode {
    parents: Vec<CommitId>,
    properties: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default)]
struct GraphContents {
    nodes: HashMap<CommitId, GraphNode>,
    mappings: HashMap<CommitId, CommitId>,
}

/// Commit-graph database persisted as a single JSON file.
#[derive(Debug)]
pub struct SimpleCommitGraph {
    path: PathBuf,
    contents: Mutex<GraphContents>,
}

#[derive(Serialize, Deserialize, Default)]
struct GraphFileWire {
    commits: BTreeMap<String, GraphNodeWire>,
    mappings: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Default)]
struct GraphNodeWire {
    parents: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

fn id_from_hex(hex: &str) -> GraphResult<CommitId> {
    let bytes = hex::decode(hex).map_err(|_| GraphError::Other(format!("bad commit id {hex}")))?;
    Ok(CommitId::new(bytes))
}

fn contents_to_wire(contents: &GraphContents) -> GraphFileWire {
    let mut wire = GraphFileWire::default();
    for (id, node) in &contents.nodes {
        wire.commits.insert(
            id.hex(),
            GraphNodeWire {
                parents: node.parents.iter().map(|p| p.hex()).collect(),
                properties: node.properties.clone(),
            },
        );
    }
    for (from, to) in &contents.mappings {
        wire.mappings.insert(from.hex(), to.hex());
    }
    wire
}

fn contents_from_wire(wire: GraphFileWire) -> GraphResult<GraphContents> {
    let mut contents = GraphContents::default();
    for (hex, node_wire) in wire.commits {
        let parents = node_wire
            .parents
            .iter()
            .map(|p| id_from_hex(p))
            .collect::<GraphResult<Vec<_>>>()?;
        contents.nodes.insert(
            id_from_hex(&hex)?,
            GraphNode {
                parents,
                properties: node_wire.properties,
            },
        );
    }
    for (from, to) in wire.mappings {
        contents
            .mappings
            .insert(id_from_hex(&from)?, id_from_hex(&to)?);
    }
    Ok(contents)
}

impl SimpleCommitGraph {
    pub fn init(dir: PathBuf) -> GraphResult<Self> {
        fs::create_dir_all(&dir)?;
        Self::load(dir)
    }

    pub fn load(dir: PathBuf) -> GraphResult<Self> {
        let path = dir.join("graph.json");
        let contents = match fs::read(&path) {
            Ok(buf) => contents_from_wire(serde_json::from_slice(&buf)?)?,
            Err(err) if err.kind() == ErrorKind::NotFound => GraphContents::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(SimpleCommitGraph {
            path,
            contents: Mutex::new(contents),
        })
    }

    fn save(&self, contents: &GraphContents) -> GraphResult<()> {
        let buf = serde_json::to_vec_pretty(&contents_to_wire(contents))?;
        let dir = self.path.parent().expect("graph file has a parent");
        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(&buf)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| GraphError::Other(err.to_string()))?;
        Ok(())
    }
}

impl CommitGraph for SimpleCommitGraph {
    fn put(&self, id: &CommitId, parents: &[CommitId]) -> GraphResult<()> {
        let mut contents = self.contents.lock().unwrap();
        contents.nodes.entry(id.clone()).or_default().parents = parents.to_vec();
        self.save(&contents)
    }

    fn parents(&self, id: &CommitId) -> GraphResult<Vec<CommitId>> {
        let contents = self.contents.lock().unwrap();
        Ok(contents
            .nodes
            .get(id)
            .map(|node| node.parents.clone())
            .unwrap_or_default())
    }

    fn contains(&self, id: &CommitId) -> GraphResult<bool> {
        let contents = self.contents.lock().unwrap();
        Ok(contents.nodes.contains_key(id))
    }

    fn set_property(&self, id: &CommitId, key: &str, value: &str) -> GraphResult<()> {
        let mut contents = self.contents.lock().unwrap();
        contents
            .nodes
            .entry(id.clone())
            .or_default()
            .properties
            .insert(key.to_string(), value.to_string());
        self.save(&contents)
    }

    fn property(&self, id: &CommitId, key: &str) -> GraphResult<Option<String>> {
        let contents = self.contents.lock().unwrap();
        Ok(contents
            .nodes
            .get(id)
            .and_then(|node| node.properties.get(key).cloned()))
    }

    fn map(&self, original: &CommitId, projected: &CommitId) -> GraphResult<()> {
        if original.is_null() || projected.is_null() {
            return Err(GraphError::NullMapping);
        }
        let mut contents = self.contents.lock().unwrap();
        contents
            .mappings
            .insert(original.clone(), projected.clone());
        contents
            .mappings
            .insert(projected.clone(), original.clone());
        self.save(&contents)
    }

    fn mapping(&self, id: &CommitId) -> GraphResult<Option<CommitId>> {
        if id.is_null() {
            return Ok(None);
        }
        let contents = self.contents.lock().unwrap();
        Ok(contents.mappings.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> CommitId {
        CommitId::from_bytes(name.as_bytes())
    }

    #[test]
    fn test_parents_and_contains() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = SimpleCommitGraph::init(temp_dir.path().join("graph")).unwrap();
        assert!(!graph.contains(&id("B")).unwrap());
        // Unknown commits are roots
        assert_eq!(graph.parents(&id("B")).unwrap(), vec![]);

        graph.put(&id("A"), &[]).unwrap();
        graph.put(&id("B"), &[id("A")]).unwrap();
        assert!(graph.contains(&id("B")).unwrap());
        assert_eq!(graph.parents(&id("B")).unwrap(), vec![id("A")]);
    }

    #[test]
    fn test_mapping_both_directions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = SimpleCommitGraph::init(temp_dir.path().join("graph")).unwrap();
        assert_eq!(graph.mapping(&id("o")).unwrap(), None);
        graph.map(&id("o"), &id("p")).unwrap();
        assert_eq!(graph.mapping(&id("o")).unwrap(), Some(id("p")));
        assert_eq!(graph.mapping(&id("p")).unwrap(), Some(id("o")));
    }

    #[test]
    fn test_null_mapping() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = SimpleCommitGraph::init(temp_dir.path().join("graph")).unwrap();
        assert_eq!(graph.mapping(&CommitId::null()).unwrap(), None);
        assert!(graph.map(&CommitId::null(), &id("p")).is_err());
    }

    #[test]
    fn test_properties() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = SimpleCommitGraph::init(temp_dir.path().join("graph")).unwrap();
        graph.put(&id("A"), &[]).unwrap();
        assert_eq!(graph.property(&id("A"), SPARSE_PROPERTY).unwrap(), None);
        graph.set_property(&id("A"), SPARSE_PROPERTY, "true").unwrap();
        assert_eq!(
            graph.property(&id("A"), SPARSE_PROPERTY).unwrap(),
            Some("true".to_string())
        );
    }

    #[test]
    fn test_reload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("graph");
        {
            let graph = SimpleCommitGraph::init(dir.clone()).unwrap();
            graph.put(&id("A"), &[]).unwrap();
            graph.put(&id("B"), &[id("A")]).unwrap();
            graph.map(&id("A"), &id("a")).unwrap();
            graph.set_property(&id("a"), SPARSE_PROPERTY, "true").unwrap();
        }
        let graph = SimpleCommitGraph::load(dir).unwrap();
        assert_eq!(graph.parents(&id("B")).unwrap(), vec![id("A")]);
        assert_eq!(graph.mapping(&id("a")).unwrap(), Some(id("A")));
        assert_eq!(
            graph.property(&id("a"), SPARSE_PROPERTY).unwrap(),
            Some("true".to_string())
        );
    }
}
