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

use std::fs;
use std::path::Path;
use std::sync::Arc;

use strata_lib::backend::{
    Backend as _, BoundingBox, Commit, CommitId, Feature, FeatureType, FeatureTypeId, FieldType,
    MillisSinceEpoch, PropertyValue, Signature, Timestamp,
};
use strata_lib::commit_graph::CommitGraph as _;
use strata_lib::repo::Repo;
use strata_lib::settings::UserSettings;
use strata_lib::trees::{apply_diff, FeatureEntry, TreeDiffEntry};
use tempfile::TempDir;

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("strata-test-")
        .tempdir()
        .unwrap()
}

pub fn base_config() -> config::ConfigBuilder<config::builder::DefaultState> {
    config::Config::builder().add_source(config::File::from_str(
        r#"
            user.name = "Test User"
            user.email = "test.user@example.com"
        "#,
        config::FileFormat::Toml,
    ))
}

pub fn user_settings() -> UserSettings {
    let config = base_config().build().unwrap();
    UserSettings::from_config(config)
}

pub fn test_signature() -> Signature {
    Signature {
        name: "Test User".to_string(),
        email: "test.user@example.com".to_string(),
        timestamp: Timestamp {
            timestamp: MillisSinceEpoch(0),
            tz_offset: 0,
        },
    }
}

/// A point feature at the given coordinates.
pub fn feature_at(x: f64, y: f64) -> Feature {
    Feature {
        bbox: Some(BoundingBox::new(x, y, x, y)),
        properties: Default::default(),
    }
}

/// A feature with the given envelope and string attributes.
pub fn feature_with(bbox: Option<BoundingBox>, attributes: &[(&str, &str)]) -> Feature {
    Feature {
        bbox,
        properties: attributes
            .iter()
            .map(|(name, value)| (name.to_string(), PropertyValue::String(value.to_string())))
            .collect(),
    }
}

pub struct TestRepo {
    _temp_dir: TempDir,
    pub repo: Arc<Repo>,
}

impl TestRepo {
    pub fn init() -> Self {
        let temp_dir = new_temp_dir();
        let root = temp_dir.path().join("repo");
        fs::create_dir(&root).unwrap();
        let repo = Repo::init(&user_settings(), root.to_str().unwrap()).unwrap();
        Self {
            _temp_dir: temp_dir,
            repo,
        }
    }

    /// Initializes a sparse clone whose filter file has the given contents.
    pub fn init_sparse(filter_contents: &str) -> Self {
        let temp_dir = new_temp_dir();
        let root = temp_dir.path().join("repo");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("sparse-filter.ini"), filter_contents).unwrap();
        let repo =
            Repo::init_sparse(&user_settings(), root.to_str().unwrap(), "sparse-filter.ini")
                .unwrap();
        Self {
            _temp_dir: temp_dir,
            repo,
        }
    }
}

fn default_feature_type() -> FeatureType {
    FeatureType {
        name: "feature".to_string(),
        fields: [("geom".to_string(), FieldType::Geometry)].into_iter().collect(),
    }
}

/// Builds commits over feature layers, recording each one in the
/// repository's commit graph.
pub struct CommitGraphBuilder<'repo> {
    repo: &'repo Repo,
    feature_type: FeatureTypeId,
}

impl<'repo> CommitGraphBuilder<'repo> {
    pub fn new(repo: &'repo Repo) -> Self {
        let feature_type = repo
            .store()
            .write_feature_type(&default_feature_type())
            .unwrap();
        CommitGraphBuilder { repo, feature_type }
    }

    /// Writes a commit whose tree is the mainline parent's tree with the
    /// given features upserted into `layer`.
    pub fn commit_with_features(
        &mut self,
        parents: &[&CommitId],
        layer: &str,
        features: &[(&str, Feature)],
    ) -> CommitId {
        let changes = features
            .iter()
            .map(|(name, feature)| {
                let feature_id = self.repo.store().write_feature(feature).unwrap();
                TreeDiffEntry {
                    layer: layer.to_string(),
                    name: name.to_string(),
                    before: None,
                    after: Some(FeatureEntry {
                        id: feature_id,
                        feature_type: self.feature_type.clone(),
                    }),
                }
            })
            .collect::<Vec<_>>();
        self.commit_with_changes(parents, &changes)
    }

    fn commit_with_changes(&mut self, parents: &[&CommitId], changes: &[TreeDiffEntry]) -> CommitId {
        let store = self.repo.store();
        let base_tree = match parents.first() {
            Some(parent) => store.read_commit(parent).unwrap().root_tree,
            None => store.empty_tree_id().clone(),
        };
        let root_tree = apply_diff(store.as_ref(), &base_tree, changes).unwrap();
        let commit = Commit {
            parents: parents.iter().map(|parent| (*parent).clone()).collect(),
            root_tree,
            author: test_signature(),
            committer: test_signature(),
            message: format!("test commit {}", rand::random::<u32>()),
        };
        let id = store.write_commit(&commit).unwrap();
        self.repo.graph().put(&id, &commit.parents).unwrap();
        id
    }
}

pub fn assert_no_forgotten_test_files(test_dir: &Path) {
    let runner_path = test_dir.join("runner.rs");
    let runner = fs::read_to_string(&runner_path).unwrap();
    let entries = fs::read_dir(test_dir).unwrap();
    for entry in entries {
        let path = entry.unwrap().path();
        if let Some(ext) = path.extension() {
            let name = path.file_stem().unwrap();
            if ext == "rs" && name != "runner" {
                let search = format!("mod {};", name.to_str().unwrap());
                assert!(
                    runner.contains(&search),
                    "missing `{search}` declaration in {}",
                    runner_path.display()
                );
            }
        }
    }
}
