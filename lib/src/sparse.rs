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

//! Sparse replication: fetch and push between a filtered local clone and a
//! full remote repository.
//!
//! A sparse clone holds projections of the remote's commits: each remote
//! commit is rewritten so that its tree only contains the features passing
//! the clone's [`RepositoryFilter`]. The commit-graph database records the
//! bidirectional original↔projected mapping, which both directions of the
//! protocol rely on to graft new commits onto already-transferred history.

use std::fmt::Debug;
use std::sync::Arc;

use itertools::Itertools;
use thiserror::Error;
use tracing::instrument;

use crate::backend::{
    Backend as _, BackendError, Commit, CommitId, Feature, FeatureId, FeatureType, FeatureTypeId,
    TreeId,
};
use crate::commit_graph::{CommitGraph as _, GraphError, SPARSE_PROPERTY};
use crate::dag_walk::{closest_common_ancestor_ok, gather_commits_ok, Evaluation};
use crate::filter::RepositoryFilter;
use crate::ref_store::{resolve_ref, RefStore as _, RefStoreError};
use crate::repo::Repo;
use crate::trees::{apply_diff, diff_trees, FeatureEntry, TreeDiffEntry};

/// Message of the projection emitted at the tip of a fetch when every change
/// was filtered out, so the fetched ref still has a commit to point at.
pub const PLACEHOLDER_COMMIT_MESSAGE: &str = "Placeholder Sparse Commit";

#[derive(Debug, Error)]
pub enum SparseRepoError {
    #[error("Sparse clone cannot be shallow")]
    ShallowClone,
    #[error("Nothing to push")]
    NothingToPush,
    #[error("The remote has changes the local repository does not")]
    RemoteHasChanges,
    #[error("No projection recorded for commit {0}")]
    MissingMapping(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    RefStore(#[from] RefStoreError),
}

pub type SparseRepoResult<T> = Result<T, SparseRepoError>;

/// A named pointer on either side of the replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub name: String,
    pub id: CommitId,
}

/// The changes a commit introduces, restricted through the repository
/// filter.
#[derive(Debug, Clone, Default)]
pub struct FilteredChanges {
    entries: Vec<TreeDiffEntry>,
    filtered: bool,
}

impl FilteredChanges {
    pub fn new(entries: Vec<TreeDiffEntry>, filtered: bool) -> Self {
        FilteredChanges { entries, filtered }
    }

    pub fn entries(&self) -> &[TreeDiffEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry was suppressed by the filter.
    pub fn was_filtered(&self) -> bool {
        self.filtered
    }
}

/// The operations a concrete replication protocol provides. Protocol
/// variants are instances of this trait; the replicator drives them without
/// knowing how the bytes travel.
pub trait RemoteRepo: Debug {
    fn parents(&self, id: &CommitId) -> SparseRepoResult<Vec<CommitId>>;

    fn read_commit(&self, id: &CommitId) -> SparseRepoResult<Commit>;

    fn read_feature(&self, id: &FeatureId) -> SparseRepoResult<Feature>;

    fn read_feature_type(&self, id: &FeatureTypeId) -> SparseRepoResult<FeatureType>;

    /// The diff `commit` introduces relative to its mainline parent,
    /// restricted to entries passing the clone's filter.
    fn filtered_changes(&self, commit: &Commit) -> SparseRepoResult<FilteredChanges>;

    fn remote_ref(&self, refspec: &str) -> SparseRepoResult<Option<Ref>>;

    fn update_remote_ref(&self, refspec: &str, id: &CommitId, delete: bool)
        -> SparseRepoResult<()>;

    /// Transmits one local commit to the remote and installs the reverse
    /// mapping in the local commit graph.
    fn push_sparse_commit(&self, id: &CommitId) -> SparseRepoResult<()>;

    /// Completes a push by moving the remote ref to the pushed tip.
    fn end_push(
        &self,
        refspec: &str,
        new_id: &CommitId,
        _original: Option<&CommitId>,
    ) -> SparseRepoResult<()> {
        self.update_remote_ref(refspec, new_id, false)
    }
}

/// Orchestrates fetch and push for a sparse clone.
#[derive(Debug)]
pub struct SparseReplicator {
    local: Arc<Repo>,
    remote: Box<dyn RemoteRepo>,
}

impl SparseReplicator {
    pub fn new(local: Arc<Repo>, remote: Box<dyn RemoteRepo>) -> Self {
        SparseReplicator { local, remote }
    }

    /// Fetches the history of `remote_ref`, projecting every new remote
    /// commit through the filter, and returns the projection of the tip.
    ///
    /// Commits are written strictly ancestors-first, so an interrupted fetch
    /// leaves a prefix of the history transferred and mapped; re-running it
    /// picks up where the previous run stopped.
    #[instrument(skip(self))]
    pub fn fetch(&self, remote_ref: &Ref, depth: Option<u32>) -> SparseRepoResult<CommitId> {
        if depth.is_some() {
            return Err(SparseRepoError::ShallowClone);
        }
        let graph = self.local.graph();
        let commits = gather_commits_ok(
            &remote_ref.id,
            |id| -> SparseRepoResult<Evaluation> {
                if graph.contains(id)? {
                    Ok(Evaluation::ExcludeAndPrune)
                } else {
                    Ok(Evaluation::IncludeAndContinue)
                }
            },
            |id| self.remote.parents(id),
        )?;
        tracing::info!(count = commits.len(), name = %remote_ref.name, "fetching commits");
        for (index, id) in commits.iter().enumerate() {
            let commit = self.remote.read_commit(id)?;
            let changes = self.remote.filtered_changes(&commit)?;
            graph.put(id, &commit.parents)?;
            let is_tip = index == commits.len() - 1;
            self.fetch_sparse_commit(id, &commit, &changes, is_tip)?;
        }
        Ok(graph.mapping(&remote_ref.id)?.unwrap_or_else(CommitId::null))
    }

    /// Projects one remote commit into the local store.
    fn fetch_sparse_commit(
        &self,
        id: &CommitId,
        commit: &Commit,
        changes: &FilteredChanges,
        is_tip: bool,
    ) -> SparseRepoResult<()> {
        let graph = self.local.graph();
        let store = self.local.store();
        let base_tree = self.base_tree_id(commit)?;
        if !changes.is_empty() {
            self.copy_changed_objects(changes.entries())?;
            let root_tree = apply_diff(store.as_ref(), &base_tree, changes.entries())?;
            let projected = Commit {
                parents: self.mapped_parents(commit)?,
                root_tree,
                author: commit.author.clone(),
                committer: commit.committer.clone(),
                message: commit.message.clone(),
            };
            let projected_id = store.write_commit(&projected)?;
            graph.put(&projected_id, &projected.parents)?;
            if changes.was_filtered() {
                graph.set_property(&projected_id, SPARSE_PROPERTY, "true")?;
            }
            graph.map(id, &projected_id)?;
        } else if is_tip {
            // The fetched ref must end up pointing at some local commit
            let projected = Commit {
                parents: self.mapped_parents(commit)?,
                root_tree: base_tree,
                author: commit.author.clone(),
                committer: commit.committer.clone(),
                message: PLACEHOLDER_COMMIT_MESSAGE.to_string(),
            };
            let projected_id = store.write_commit(&projected)?;
            graph.put(&projected_id, &projected.parents)?;
            graph.set_property(&projected_id, SPARSE_PROPERTY, "true")?;
            graph.map(id, &projected_id)?;
        } else {
            // Everything this commit changes is outside the filter: its
            // projection collapses into its mainline parent's projection,
            // which becomes sparse.
            let parent = commit
                .mainline_parent()
                .ok_or_else(|| SparseRepoError::MissingMapping(id.hex()))?;
            let projected_id = graph
                .mapping(parent)?
                .ok_or_else(|| SparseRepoError::MissingMapping(parent.hex()))?;
            graph.set_property(&projected_id, SPARSE_PROPERTY, "true")?;
            graph.map(id, &projected_id)?;
        }
        Ok(())
    }

    /// The tree the filtered changes apply on top of: the projection of the
    /// mainline parent, or the empty tree for a root commit.
    fn base_tree_id(&self, commit: &Commit) -> SparseRepoResult<TreeId> {
        match commit.mainline_parent() {
            None => Ok(self.local.store().empty_tree_id().clone()),
            Some(parent) => {
                let mapped = self
                    .local
                    .graph()
                    .mapping(parent)?
                    .ok_or_else(|| SparseRepoError::MissingMapping(parent.hex()))?;
                Ok(self.local.store().read_commit(&mapped)?.root_tree)
            }
        }
    }

    fn mapped_parents(&self, commit: &Commit) -> SparseRepoResult<Vec<CommitId>> {
        commit
            .parents
            .iter()
            .map(|parent| -> SparseRepoResult<CommitId> {
                self.local
                    .graph()
                    .mapping(parent)?
                    .ok_or_else(|| SparseRepoError::MissingMapping(parent.hex()))
            })
            .try_collect()
    }

    fn copy_changed_objects(&self, entries: &[TreeDiffEntry]) -> SparseRepoResult<()> {
        let store = self.local.store();
        for entry in entries {
            if let Some(FeatureEntry { id, feature_type }) = &entry.after {
                let feature = self.remote.read_feature(id)?;
                store.write_feature(&feature)?;
                let feature_type = self.remote.read_feature_type(feature_type)?;
                store.write_feature_type(&feature_type)?;
            }
        }
        Ok(())
    }

    /// Decides whether a push of `local_ref` to `refspec` may proceed.
    /// Returns the current remote ref, if any, so `end_push` can compare
    /// against it. `NothingToPush` and `RemoteHasChanges` are outcomes, not
    /// faults.
    pub fn check_push(&self, local_ref: &Ref, refspec: &str) -> SparseRepoResult<Option<Ref>> {
        let Some(remote_ref) = self.remote.remote_ref(refspec)? else {
            return Ok(None);
        };
        let graph = self.local.graph();
        let remote_mapped = graph
            .mapping(&remote_ref.id)?
            .unwrap_or_else(CommitId::null);
        if remote_mapped == local_ref.id {
            return Err(SparseRepoError::NothingToPush);
        }
        if !self.local.store().has_commit(&remote_mapped)? {
            return Err(SparseRepoError::RemoteHasChanges);
        }
        let common = closest_common_ancestor_ok(
            vec![remote_mapped.clone()],
            vec![local_ref.id.clone()],
            |id| -> SparseRepoResult<Vec<CommitId>> { Ok(graph.parents(id)?) },
        )?;
        match common {
            None => Err(SparseRepoError::RemoteHasChanges),
            Some(ancestor) if ancestor == local_ref.id => Err(SparseRepoError::NothingToPush),
            Some(ancestor) if ancestor == remote_mapped => Ok(Some(remote_ref)),
            Some(_) => Err(SparseRepoError::RemoteHasChanges),
        }
    }

    /// Pushes the history of `local_ref` to the remote `refspec`.
    #[instrument(skip(self))]
    pub fn push(&self, local_ref: &Ref, refspec: &str) -> SparseRepoResult<()> {
        let original = self.check_push(local_ref, refspec)?;
        let graph = self.local.graph();
        let commits = gather_commits_ok(
            &local_ref.id,
            |id| -> SparseRepoResult<Evaluation> {
                if graph.mapping(id)?.is_some() {
                    // Already pushed (or fetched from the remote)
                    Ok(Evaluation::ExcludeAndPrune)
                } else {
                    Ok(Evaluation::IncludeAndContinue)
                }
            },
            |id| -> SparseRepoResult<Vec<CommitId>> { Ok(graph.parents(id)?) },
        )?;
        tracing::info!(count = commits.len(), refspec, "pushing commits");
        for id in &commits {
            self.remote.push_sparse_commit(id)?;
        }
        let new_id = graph
            .mapping(&local_ref.id)?
            .ok_or_else(|| SparseRepoError::MissingMapping(local_ref.id.hex()))?;
        self.remote
            .end_push(refspec, &new_id, original.as_ref().map(|r| &r.id))
    }
}

/// Local-filesystem variant of the protocol: the "remote" is another
/// repository opened in-process.
#[derive(Debug)]
pub struct LocalRemote {
    local: Arc<Repo>,
    remote: Arc<Repo>,
    filter: RepositoryFilter,
}

impl LocalRemote {
    pub fn new(local: Arc<Repo>, remote: Arc<Repo>, filter: RepositoryFilter) -> Self {
        LocalRemote {
            local,
            remote,
            filter,
        }
    }
}

impl RemoteRepo for LocalRemote {
    fn parents(&self, id: &CommitId) -> SparseRepoResult<Vec<CommitId>> {
        Ok(self.remote.graph().parents(id)?)
    }

    fn read_commit(&self, id: &CommitId) -> SparseRepoResult<Commit> {
        Ok(self.remote.store().read_commit(id)?)
    }

    fn read_feature(&self, id: &FeatureId) -> SparseRepoResult<Feature> {
        Ok(self.remote.store().read_feature(id)?)
    }

    fn read_feature_type(&self, id: &FeatureTypeId) -> SparseRepoResult<FeatureType> {
        Ok(self.remote.store().read_feature_type(id)?)
    }

    fn filtered_changes(&self, commit: &Commit) -> SparseRepoResult<FilteredChanges> {
        let store = self.remote.store();
        let base = match commit.mainline_parent() {
            None => store.empty_tree_id().clone(),
            Some(parent) => store.read_commit(parent)?.root_tree,
        };
        let mut entries = vec![];
        let mut filtered = false;
        for entry in diff_trees(store.as_ref(), &base, &commit.root_tree)? {
            let feature = store.read_feature(&entry.value().id)?;
            if self.filter.matches(&entry.layer, &feature) {
                entries.push(entry);
            } else {
                filtered = true;
            }
        }
        Ok(FilteredChanges::new(entries, filtered))
    }

    fn remote_ref(&self, refspec: &str) -> SparseRepoResult<Option<Ref>> {
        let id = resolve_ref(self.remote.ref_store().as_ref(), refspec)?;
        Ok(id.map(|id| Ref {
            name: refspec.to_string(),
            id,
        }))
    }

    fn update_remote_ref(
        &self,
        refspec: &str,
        id: &CommitId,
        delete: bool,
    ) -> SparseRepoResult<()> {
        let refs = self.remote.ref_store();
        if delete {
            refs.remove(refspec)?;
        } else {
            refs.put_ref(refspec, id)?;
        }
        Ok(())
    }

    fn push_sparse_commit(&self, id: &CommitId) -> SparseRepoResult<()> {
        let local_store = self.local.store();
        let remote_store = self.remote.store();
        let graph = self.local.graph();
        let commit = local_store.read_commit(id)?;

        let local_base = match commit.mainline_parent() {
            None => local_store.empty_tree_id().clone(),
            Some(parent) => local_store.read_commit(parent)?.root_tree,
        };
        let entries = diff_trees(local_store.as_ref(), &local_base, &commit.root_tree)?;
        for entry in &entries {
            if let Some(FeatureEntry { id, feature_type }) = &entry.after {
                let feature = local_store.read_feature(id)?;
                remote_store.write_feature(&feature)?;
                let feature_type = local_store.read_feature_type(feature_type)?;
                remote_store.write_feature_type(&feature_type)?;
            }
        }

        // Graft the local changes onto the remote tree of the mainline
        // parent's original.
        let remote_base = match commit.mainline_parent() {
            None => remote_store.empty_tree_id().clone(),
            Some(parent) => {
                let mapped = graph
                    .mapping(parent)?
                    .ok_or_else(|| SparseRepoError::MissingMapping(parent.hex()))?;
                remote_store.read_commit(&mapped)?.root_tree
            }
        };
        let root_tree = apply_diff(remote_store.as_ref(), &remote_base, &entries)?;
        let mapped_parents = commit
            .parents
            .iter()
            .map(|parent| -> SparseRepoResult<CommitId> {
                graph
                    .mapping(parent)?
                    .ok_or_else(|| SparseRepoError::MissingMapping(parent.hex()))
            })
            .try_collect()?;
        let remote_commit = Commit {
            parents: mapped_parents,
            root_tree,
            author: commit.author.clone(),
            committer: commit.committer.clone(),
            message: commit.message.clone(),
        };
        let remote_id = remote_store.write_commit(&remote_commit)?;
        self.remote.graph().put(&remote_id, &remote_commit.parents)?;
        graph.map(id, &remote_id)?;
        Ok(())
    }
}
