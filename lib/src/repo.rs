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

//! Repository assembly: the object store, reference database, commit graph,
//! and settings wired together under a repository root.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::commit_graph::{CommitGraph, GraphError, SimpleCommitGraph};
use crate::filter::{FilterError, RepositoryFilter};
use crate::local_backend::LocalBackend;
use crate::ref_store::{RefStore, RefStoreError, RefStoreResult};
use crate::settings::{RepoSettings, UserSettings};
use crate::simple_ref_store::SimpleRefStore;
use crate::transaction::TxRefStore;

pub const REPO_DIR: &str = ".strata";

#[derive(Debug, Error)]
pub enum RepoInitError {
    #[error("The repository root must be a local file system path: {0}")]
    NonLocalRoot(String),
    #[error("No sparse filter is configured (config key sparse.filter)")]
    MissingSparseFilter,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    RefStore(#[from] RefStoreError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct Repo {
    repo_path: PathBuf,
    store: Arc<dyn Backend>,
    ref_store: Arc<dyn RefStore>,
    graph: Arc<dyn CommitGraph>,
    settings: RepoSettings,
}

impl Repo {
    /// Initializes a repository under `root`, which may be a plain path or a
    /// `file://` URL. Other URL schemes are rejected.
    pub fn init(user_settings: &UserSettings, root: &str) -> Result<Arc<Repo>, RepoInitError> {
        let root_path = local_root_path(root)?;
        let repo_path = root_path.join(REPO_DIR);
        fs::create_dir_all(&repo_path)?;
        let store = LocalBackend::init(repo_path.join("store"))?;
        let ref_store = SimpleRefStore::init(repo_path.join("refs"))?;
        let graph = SimpleCommitGraph::init(repo_path.join("graph"))?;
        let settings = user_settings.with_repo(&repo_path)?;
        Ok(Arc::new(Repo {
            repo_path,
            store: Arc::new(store),
            ref_store: Arc::new(ref_store),
            graph: Arc::new(graph),
            settings,
        }))
    }

    /// Initializes a sparse clone: like `init`, but records the filter file
    /// (relative to the repository root) in the repository config.
    pub fn init_sparse(
        user_settings: &UserSettings,
        root: &str,
        filter_file: &str,
    ) -> Result<Arc<Repo>, RepoInitError> {
        let root_path = local_root_path(root)?;
        let repo_path = root_path.join(REPO_DIR);
        fs::create_dir_all(&repo_path)?;
        fs::write(
            repo_path.join("config"),
            format!("[sparse]\nfilter = \"{filter_file}\"\n"),
        )?;
        Self::init(user_settings, root)
    }

    pub fn load(user_settings: &UserSettings, root: &str) -> Result<Arc<Repo>, RepoInitError> {
        let root_path = local_root_path(root)?;
        let repo_path = root_path.join(REPO_DIR);
        let store = LocalBackend::load(repo_path.join("store"));
        let ref_store = SimpleRefStore::load(repo_path.join("refs"));
        let graph = SimpleCommitGraph::load(repo_path.join("graph"))?;
        let settings = user_settings.with_repo(&repo_path)?;
        Ok(Arc::new(Repo {
            repo_path,
            store: Arc::new(store),
            ref_store: Arc::new(ref_store),
            graph: Arc::new(graph),
            settings,
        }))
    }

    pub fn repo_path(&self) -> &PathBuf {
        &self.repo_path
    }

    pub fn store(&self) -> &Arc<dyn Backend> {
        &self.store
    }

    pub fn ref_store(&self) -> &Arc<dyn RefStore> {
        &self.ref_store
    }

    pub fn graph(&self) -> &Arc<dyn CommitGraph> {
        &self.graph
    }

    pub fn settings(&self) -> &RepoSettings {
        &self.settings
    }

    /// Opens a transaction-scoped view of the reference database.
    pub fn start_transaction(&self) -> RefStoreResult<TxRefStore> {
        TxRefStore::begin(self.ref_store.clone())
    }

    /// The filter of a sparse clone, loaded from the file the
    /// `sparse.filter` config key points at.
    pub fn sparse_filter(&self) -> Result<RepositoryFilter, RepoInitError> {
        let Some(filter_file) = self.settings.sparse_filter_path() else {
            return Err(RepoInitError::MissingSparseFilter);
        };
        let path = match self.repo_path.parent() {
            Some(root) => root.join(&filter_file),
            None => PathBuf::from(&filter_file),
        };
        Ok(RepositoryFilter::from_file(&path)?)
    }
}

fn local_root_path(root: &str) -> Result<PathBuf, RepoInitError> {
    if let Some(path) = root.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if root.contains("://") {
        return Err(RepoInitError::NonLocalRoot(root.to_string()));
    }
    Ok(PathBuf::from(root))
}
