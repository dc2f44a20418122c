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

//! The reference database contract: a flat mapping from slash-delimited
//! names to commit ids or symbolic targets.

use std::collections::BTreeMap;
use std::fmt::Debug;

use thiserror::Error;

use crate::backend::CommitId;

/// Points to the current branch (or commit, when detached).
pub const HEAD_REF: &str = "HEAD";
/// Head of the working tree.
pub const WORK_HEAD_REF: &str = "WORK_HEAD";
/// Head of the staging area.
pub const STAGE_HEAD_REF: &str = "STAGE_HEAD";
/// Namespace of all user-visible refs (branch heads, tags, remotes).
pub const USER_REFS_PREFIX: &str = "refs/";

const SYMBOLIC_PREFIX: &str = "ref: ";

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RefValue {
    Id(CommitId),
    Symbolic(String),
}

impl RefValue {
    /// Parses the stored form: 40 hex digits for a direct ref, `ref: <name>`
    /// for a symbolic one.
    pub fn parse(stored: &str) -> RefStoreResult<RefValue> {
        if let Some(target) = stored.strip_prefix(SYMBOLIC_PREFIX) {
            Ok(RefValue::Symbolic(target.to_string()))
        } else {
            let bytes = hex::decode(stored)
                .map_err(|_| RefStoreError::InvalidRef(stored.to_string()))?;
            Ok(RefValue::Id(CommitId::new(bytes)))
        }
    }

    pub fn serialize(&self) -> String {
        match self {
            RefValue::Id(id) => id.hex(),
            RefValue::Symbolic(target) => format!("{SYMBOLIC_PREFIX}{target}"),
        }
    }

    pub fn as_id(&self) -> Option<&CommitId> {
        match self {
            RefValue::Id(id) => Some(id),
            RefValue::Symbolic(_) => None,
        }
    }

    pub fn as_symbolic(&self) -> Option<&str> {
        match self {
            RefValue::Id(_) => None,
            RefValue::Symbolic(target) => Some(target),
        }
    }
}

#[derive(Debug, Error)]
pub enum RefStoreError {
    #[error("Lock on the reference database timed out")]
    LockTimeout,
    #[error("Invalid ref value: {0}")]
    InvalidRef(String),
    #[error("Error: {0}")]
    Other(String),
}

impl From<std::io::Error> for RefStoreError {
    fn from(err: std::io::Error) -> Self {
        RefStoreError::Other(err.to_string())
    }
}

pub type RefStoreResult<T> = Result<T, RefStoreError>;

pub trait RefStore: Send + Sync + Debug {
    /// Takes the database-wide lock. Callers bracket compound updates with
    /// `lock`/`unlock`; reads and single writes do not require it.
    fn lock(&self) -> RefStoreResult<()>;

    fn unlock(&self) -> RefStoreResult<()>;

    /// Returns the id of a direct ref, `None` if the name is absent or
    /// symbolic.
    fn get_ref(&self, name: &str) -> RefStoreResult<Option<CommitId>>;

    /// Returns the target of a symbolic ref, `None` if the name is absent or
    /// direct.
    fn get_sym_ref(&self, name: &str) -> RefStoreResult<Option<String>>;

    fn put_ref(&self, name: &str, id: &CommitId) -> RefStoreResult<()>;

    fn put_sym_ref(&self, name: &str, target: &str) -> RefStoreResult<()>;

    /// Removes a ref, returning its prior value.
    fn remove(&self, name: &str) -> RefStoreResult<Option<RefValue>>;

    /// Removes every ref under `prefix`, returning the removed entries.
    fn remove_all(&self, prefix: &str) -> RefStoreResult<BTreeMap<String, RefValue>>;

    fn get_all(&self) -> RefStoreResult<BTreeMap<String, RefValue>>;

    fn get_all_under(&self, prefix: &str) -> RefStoreResult<BTreeMap<String, RefValue>>;
}

/// Reads a ref regardless of whether it is direct or symbolic.
pub fn get_ref_value(store: &dyn RefStore, name: &str) -> RefStoreResult<Option<RefValue>> {
    if let Some(id) = store.get_ref(name)? {
        return Ok(Some(RefValue::Id(id)));
    }
    Ok(store.get_sym_ref(name)?.map(RefValue::Symbolic))
}

/// Writes a ref value of either kind.
pub fn put_ref_value(store: &dyn RefStore, name: &str, value: &RefValue) -> RefStoreResult<()> {
    match value {
        RefValue::Id(id) => store.put_ref(name, id),
        RefValue::Symbolic(target) => store.put_sym_ref(name, target),
    }
}

/// Resolves `name` to a commit id, following at most one symbolic
/// indirection. Returns `None` when the name is absent or dangling.
pub fn resolve_ref(store: &dyn RefStore, name: &str) -> RefStoreResult<Option<CommitId>> {
    if let Some(id) = store.get_ref(name)? {
        return Ok(Some(id));
    }
    match store.get_sym_ref(name)? {
        Some(target) => store.get_ref(&target),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct() {
        let stored = "aa15b1f5e5bba1a2a2d1f5e5bba1a2a2d1f5e5bb";
        let value = RefValue::parse(stored).unwrap();
        assert_eq!(value, RefValue::Id(CommitId::from_hex(stored)));
        assert_eq!(value.serialize(), stored);
    }

    #[test]
    fn test_parse_symbolic() {
        let value = RefValue::parse("ref: refs/heads/master").unwrap();
        assert_eq!(value, RefValue::Symbolic("refs/heads/master".to_string()));
        assert_eq!(value.serialize(), "ref: refs/heads/master");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(RefValue::parse("not hex at all").is_err());
    }
}
