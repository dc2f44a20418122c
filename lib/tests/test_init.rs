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

use std::fs;

use assert_matches::assert_matches;
use strata_lib::backend::Backend as _;
use strata_lib::repo::{Repo, RepoInitError};
use testutils::{feature_at, new_temp_dir, user_settings, TestRepo};

#[test]
fn test_init_and_load() {
    let temp_dir = new_temp_dir();
    let root = temp_dir.path().join("repo");
    fs::create_dir(&root).unwrap();
    let settings = user_settings();

    let repo = Repo::init(&settings, root.to_str().unwrap()).unwrap();
    assert!(repo.repo_path().is_dir());
    assert!(repo.repo_path().join("store").join("commits").is_dir());
    let tree = repo.store().read_tree(repo.store().empty_tree_id()).unwrap();
    assert!(tree.is_empty());

    let reloaded = Repo::load(&settings, root.to_str().unwrap()).unwrap();
    assert_eq!(reloaded.store().empty_tree_id(), repo.store().empty_tree_id());
}

#[test]
fn test_init_file_url() {
    let temp_dir = new_temp_dir();
    let root = temp_dir.path().join("repo");
    fs::create_dir(&root).unwrap();
    let url = format!("file://{}", root.to_str().unwrap());
    let repo = Repo::init(&user_settings(), &url).unwrap();
    assert!(repo.repo_path().is_dir());
}

#[test]
fn test_init_rejects_non_local_root() {
    assert_matches!(
        Repo::init(&user_settings(), "https://example.net/basemap"),
        Err(RepoInitError::NonLocalRoot(_))
    );
}

#[test]
fn test_missing_sparse_filter() {
    let test_repo = TestRepo::init();
    assert_matches!(
        test_repo.repo.sparse_filter(),
        Err(RepoInitError::MissingSparseFilter)
    );
}

#[test]
fn test_sparse_filter_from_config() {
    let test_repo = TestRepo::init_sparse("[roads]\nbbox = 0, 0, 1, 1\n");
    let filter = test_repo.repo.sparse_filter().unwrap();
    assert!(filter.matches("roads", &feature_at(0.5, 0.5)));
    assert!(!filter.matches("roads", &feature_at(5.0, 5.0)));
}
