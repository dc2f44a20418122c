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

//! Diff and patch over the two-level feature tree (root entries are layers,
//! layer entries are features).

use std::collections::{BTreeMap, BTreeSet};

use crate::backend::{
    Backend, BackendError, BackendResult, FeatureId, FeatureTypeId, Tree, TreeId, TreeValue,
};

/// A feature entry within a layer tree.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FeatureEntry {
    pub id: FeatureId,
    pub feature_type: FeatureTypeId,
}

/// One changed feature: the layer it lives in, its name, and the entry
/// before and after. `before == None` is an addition, `after == None` a
/// removal; a diff never produces an entry with neither side.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TreeDiffEntry {
    pub layer: String,
    pub name: String,
    pub before: Option<FeatureEntry>,
    pub after: Option<FeatureEntry>,
}

impl TreeDiffEntry {
    /// The side the change is about: the new state for additions and
    /// modifications, the old one for removals.
    pub fn value(&self) -> &FeatureEntry {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .expect("a diff entry changes at least one side")
    }
}

fn layer_tree(store: &dyn Backend, value: Option<&TreeValue>) -> BackendResult<Tree> {
    match value {
        Some(TreeValue::Subtree(id)) => store.read_tree(id),
        Some(TreeValue::Feature { .. }) => Err(BackendError::Other(
            "feature entry at tree root".to_string(),
        )),
        None => Ok(Tree::default()),
    }
}

fn layer_features(
    store: &dyn Backend,
    value: Option<&TreeValue>,
) -> BackendResult<BTreeMap<String, FeatureEntry>> {
    let tree = layer_tree(store, value)?;
    let mut features = BTreeMap::new();
    for entry in tree.entries() {
        match entry.value() {
            TreeValue::Feature { id, feature_type } => {
                features.insert(
                    entry.name().to_string(),
                    FeatureEntry {
                        id: id.clone(),
                        feature_type: feature_type.clone(),
                    },
                );
            }
            TreeValue::Subtree(_) => {
                return Err(BackendError::Other(
                    "subtree entry below a layer".to_string(),
                ))
            }
        }
    }
    Ok(features)
}

/// Computes the feature-level changes between two root trees.
pub fn diff_trees(
    store: &dyn Backend,
    from: &TreeId,
    to: &TreeId,
) -> BackendResult<Vec<TreeDiffEntry>> {
    let mut entries = vec![];
    if from == to {
        return Ok(entries);
    }
    let from_root = store.read_tree(from)?;
    let to_root = store.read_tree(to)?;
    let layers: BTreeSet<String> = from_root
        .entries()
        .chain(to_root.entries())
        .map(|entry| entry.name().to_string())
        .collect();
    for layer in layers {
        if from_root.value(&layer) == to_root.value(&layer) {
            continue;
        }
        let from_features = layer_features(store, from_root.value(&layer))?;
        let to_features = layer_features(store, to_root.value(&layer))?;
        let names: BTreeSet<String> = from_features
            .keys()
            .chain(to_features.keys())
            .cloned()
            .collect();
        for name in names {
            let before = from_features.get(&name).cloned();
            let after = to_features.get(&name).cloned();
            if before != after {
                entries.push(TreeDiffEntry {
                    layer: layer.clone(),
                    name,
                    before,
                    after,
                });
            }
        }
    }
    Ok(entries)
}

/// Applies feature-level changes on top of `base`, writing the modified
/// layer trees and the new root tree to the store. A layer emptied by the
/// changes is dropped from the root.
pub fn apply_diff(
    store: &dyn Backend,
    base: &TreeId,
    entries: &[TreeDiffEntry],
) -> BackendResult<TreeId> {
    let mut root = store.read_tree(base)?;
    let mut by_layer: BTreeMap<&str, Vec<&TreeDiffEntry>> = BTreeMap::new();
    for entry in entries {
        by_layer.entry(entry.layer.as_str()).or_default().push(entry);
    }
    for (layer, changes) in by_layer {
        let mut tree = layer_tree(store, root.value(layer))?;
        for change in changes {
            match &change.after {
                Some(FeatureEntry { id, feature_type }) => tree.set(
                    change.name.clone(),
                    TreeValue::Feature {
                        id: id.clone(),
                        feature_type: feature_type.clone(),
                    },
                ),
                None => tree.remove(&change.name),
            }
        }
        if tree.is_empty() {
            root.remove(layer);
        } else {
            let layer_id = store.write_tree(&tree)?;
            root.set(layer.to_string(), TreeValue::Subtree(layer_id));
        }
    }
    store.write_tree(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_backend::LocalBackend;

    fn feature_entry(seed: u8) -> FeatureEntry {
        FeatureEntry {
            id: FeatureId::from_bytes(&[seed; 20]),
            feature_type: FeatureTypeId::from_bytes(&[0xfe; 20]),
        }
    }

    fn feature_value(seed: u8) -> TreeValue {
        let entry = feature_entry(seed);
        TreeValue::Feature {
            id: entry.id,
            feature_type: entry.feature_type,
        }
    }

    fn write_root(store: &dyn Backend, layers: &[(&str, &[(&str, TreeValue)])]) -> TreeId {
        let mut root = Tree::default();
        for (layer, features) in layers {
            let mut tree = Tree::default();
            for (name, value) in *features {
                tree.set(name.to_string(), value.clone());
            }
            let id = store.write_tree(&tree).unwrap();
            root.set(layer.to_string(), TreeValue::Subtree(id));
        }
        store.write_tree(&root).unwrap()
    }

    #[test]
    fn test_diff_empty_to_populated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalBackend::init(temp_dir.path().to_owned()).unwrap();
        let to = write_root(&store, &[("roads", &[("road.1", feature_value(1))])]);

        let entries = diff_trees(&store, store.empty_tree_id(), &to).unwrap();
        assert_eq!(
            entries,
            vec![TreeDiffEntry {
                layer: "roads".to_string(),
                name: "road.1".to_string(),
                before: None,
                after: Some(feature_entry(1)),
            }]
        );
        assert_eq!(entries[0].value(), &feature_entry(1));
    }

    #[test]
    fn test_diff_modify_and_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalBackend::init(temp_dir.path().to_owned()).unwrap();
        let from = write_root(
            &store,
            &[
                ("roads", &[("road.1", feature_value(1)), ("road.2", feature_value(2))]),
                ("parks", &[("park.1", feature_value(3))]),
            ],
        );
        let to = write_root(
            &store,
            &[
                ("roads", &[("road.1", feature_value(9))]),
                ("parks", &[("park.1", feature_value(3))]),
            ],
        );

        let entries = diff_trees(&store, &from, &to).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&TreeDiffEntry {
            layer: "roads".to_string(),
            name: "road.1".to_string(),
            before: Some(feature_entry(1)),
            after: Some(feature_entry(9)),
        }));
        assert!(entries.contains(&TreeDiffEntry {
            layer: "roads".to_string(),
            name: "road.2".to_string(),
            before: Some(feature_entry(2)),
            after: None,
        }));
        // A removal is judged by its old side
        let removal = entries.iter().find(|entry| entry.after.is_none()).unwrap();
        assert_eq!(removal.value(), &feature_entry(2));
    }

    #[test]
    fn test_diff_rejects_nested_subtree() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalBackend::init(temp_dir.path().to_owned()).unwrap();
        let mut layer = Tree::default();
        layer.set(
            "oops".to_string(),
            TreeValue::Subtree(store.empty_tree_id().clone()),
        );
        let layer_id = store.write_tree(&layer).unwrap();
        let mut root = Tree::default();
        root.set("roads".to_string(), TreeValue::Subtree(layer_id));
        let root_id = store.write_tree(&root).unwrap();

        let result = diff_trees(&store, store.empty_tree_id(), &root_id);
        assert_eq!(
            result,
            Err(BackendError::Other("subtree entry below a layer".to_string()))
        );
    }

    #[test]
    fn test_apply_diff_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalBackend::init(temp_dir.path().to_owned()).unwrap();
        let from = write_root(&store, &[("roads", &[("road.1", feature_value(1))])]);
        let to = write_root(
            &store,
            &[
                ("roads", &[("road.1", feature_value(1)), ("road.2", feature_value(2))]),
                ("parks", &[("park.1", feature_value(3))]),
            ],
        );

        let entries = diff_trees(&store, &from, &to).unwrap();
        let rebuilt = apply_diff(&store, &from, &entries).unwrap();
        assert_eq!(rebuilt, to);
    }

    #[test]
    fn test_apply_diff_drops_empty_layer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalBackend::init(temp_dir.path().to_owned()).unwrap();
        let base = write_root(&store, &[("roads", &[("road.1", feature_value(1))])]);

        let entries = vec![TreeDiffEntry {
            layer: "roads".to_string(),
            name: "road.1".to_string(),
            before: Some(feature_entry(1)),
            after: None,
        }];
        let rebuilt = apply_diff(&store, &base, &entries).unwrap();
        assert_eq!(rebuilt, *store.empty_tree_id());
    }
}
