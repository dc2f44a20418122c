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

//! A per-transaction view of the reference database.
//!
//! Commands running inside a transaction are handed a [`TxRefStore`] instead
//! of the shared store. It implements the same [`RefStore`] contract, but
//! confines every read and write to a private `transactions/<uuid>/`
//! namespace, so the command needs no awareness of transactions at all.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::backend::CommitId;
use crate::ref_store::{
    get_ref_value, put_ref_value, RefStore, RefStoreResult, RefValue, HEAD_REF, STAGE_HEAD_REF,
    USER_REFS_PREFIX, WORK_HEAD_REF,
};

const TRANSACTIONS_NAMESPACE: &str = "transactions/";
const ORIG_NAMESPACE: &str = "orig/";

const HEAD_REFS: [&str; 3] = [HEAD_REF, WORK_HEAD_REF, STAGE_HEAD_REF];

/// Namespaced decorator over a [`RefStore`].
///
/// At begin, the current head refs and every ref under `refs/` are copied
/// into the live namespace `transactions/<uuid>/`; the `refs/` entries are
/// additionally snapshotted into `transactions/<uuid>/orig/`. Writes land in
/// the live namespace only. Reads prefer live and fall back to orig, so a
/// ref deleted inside the transaction reverts to its snapshotted value.
#[derive(Debug)]
pub struct TxRefStore {
    base: Arc<dyn RefStore>,
    tx_id: String,
    live_prefix: String,
    orig_prefix: String,
}

impl TxRefStore {
    /// Opens a fresh transaction view, snapshotting the live refs.
    pub fn begin(base: Arc<dyn RefStore>) -> RefStoreResult<TxRefStore> {
        let tx_id = Uuid::new_v4().to_string();
        let live_prefix = format!("{TRANSACTIONS_NAMESPACE}{tx_id}/");
        let orig_prefix = format!("{live_prefix}{ORIG_NAMESPACE}");
        let view = TxRefStore {
            base,
            tx_id,
            live_prefix,
            orig_prefix,
        };
        for name in HEAD_REFS {
            if let Some(value) = get_ref_value(view.base.as_ref(), name)? {
                put_ref_value(view.base.as_ref(), &view.live_key(name), &value)?;
            }
        }
        for (name, value) in view.base.get_all_under(USER_REFS_PREFIX)? {
            put_ref_value(view.base.as_ref(), &view.live_key(&name), &value)?;
            put_ref_value(view.base.as_ref(), &view.orig_key(&name), &value)?;
        }
        Ok(view)
    }

    pub fn id(&self) -> &str {
        &self.tx_id
    }

    /// Publishes the transaction's refs to their external names and deletes
    /// the transaction namespace. The base store's lock is held while the
    /// refs are overlaid.
    pub fn commit(self) -> RefStoreResult<()> {
        self.base.lock()?;
        let result = self.publish();
        self.base.unlock()?;
        result?;
        self.base.remove_all(&self.live_prefix)?;
        Ok(())
    }

    /// Discards the transaction, deleting its namespace. The base store is
    /// left byte-identical to its state before `begin()`.
    pub fn abort(self) -> RefStoreResult<()> {
        self.base.remove_all(&self.live_prefix)?;
        Ok(())
    }

    fn publish(&self) -> RefStoreResult<()> {
        for (name, value) in self.base.get_all_under(&self.live_prefix)? {
            let external = &name[self.live_prefix.len()..];
            if external.starts_with(ORIG_NAMESPACE) {
                continue;
            }
            put_ref_value(self.base.as_ref(), external, &self.externalize_value(value))?;
        }
        Ok(())
    }

    fn live_key(&self, name: &str) -> String {
        format!("{}{}", self.live_prefix, name)
    }

    fn orig_key(&self, name: &str) -> String {
        format!("{}{}", self.orig_prefix, name)
    }

    /// Symbolic targets handed back to the caller must not leak the
    /// transaction namespace.
    fn externalize_target(&self, target: String) -> String {
        match target.strip_prefix(&self.live_prefix) {
            Some(stripped) => stripped.to_string(),
            None => target,
        }
    }

    fn externalize_value(&self, value: RefValue) -> RefValue {
        match value {
            RefValue::Symbolic(target) => RefValue::Symbolic(self.externalize_target(target)),
            value @ RefValue::Id(_) => value,
        }
    }

    /// Reads `orig/<prefix>` and overlays `live/<prefix>` on top, with all
    /// keys and symbolic targets translated back to external form.
    fn overlaid_under(&self, prefix: &str) -> RefStoreResult<BTreeMap<String, RefValue>> {
        let mut result = BTreeMap::new();
        for (name, value) in self.base.get_all_under(&self.orig_key(prefix))? {
            let external = name[self.orig_prefix.len()..].to_string();
            result.insert(external, self.externalize_value(value));
        }
        for (name, value) in self.base.get_all_under(&self.live_key(prefix))? {
            let external = name[self.live_prefix.len()..].to_string();
            if external.starts_with(ORIG_NAMESPACE) {
                continue;
            }
            result.insert(external, self.externalize_value(value));
        }
        Ok(result)
    }
}

impl RefStore for TxRefStore {
    fn lock(&self) -> RefStoreResult<()> {
        self.base.lock()
    }

    fn unlock(&self) -> RefStoreResult<()> {
        self.base.unlock()
    }

    fn get_ref(&self, name: &str) -> RefStoreResult<Option<CommitId>> {
        if let Some(id) = self.base.get_ref(&self.live_key(name))? {
            return Ok(Some(id));
        }
        self.base.get_ref(&self.orig_key(name))
    }

    fn get_sym_ref(&self, name: &str) -> RefStoreResult<Option<String>> {
        if let Some(target) = self.base.get_sym_ref(&self.live_key(name))? {
            return Ok(Some(self.externalize_target(target)));
        }
        Ok(self
            .base
            .get_sym_ref(&self.orig_key(name))?
            .map(|target| self.externalize_target(target)))
    }

    fn put_ref(&self, name: &str, id: &CommitId) -> RefStoreResult<()> {
        self.base.put_ref(&self.live_key(name), id)
    }

    fn put_sym_ref(&self, name: &str, target: &str) -> RefStoreResult<()> {
        self.base.put_sym_ref(&self.live_key(name), target)
    }

    fn remove(&self, name: &str) -> RefStoreResult<Option<RefValue>> {
        let prior = self.base.remove(&self.live_key(name))?;
        Ok(prior.map(|value| self.externalize_value(value)))
    }

    fn remove_all(&self, prefix: &str) -> RefStoreResult<BTreeMap<String, RefValue>> {
        let mut removed = BTreeMap::new();
        for name in self.base.get_all_under(&self.live_key(prefix))?.into_keys() {
            let external = name[self.live_prefix.len()..].to_string();
            if external.starts_with(ORIG_NAMESPACE) {
                continue;
            }
            if let Some(value) = self.base.remove(&name)? {
                removed.insert(external, self.externalize_value(value));
            }
        }
        Ok(removed)
    }

    fn get_all(&self) -> RefStoreResult<BTreeMap<String, RefValue>> {
        self.overlaid_under("")
    }

    fn get_all_under(&self, prefix: &str) -> RefStoreResult<BTreeMap<String, RefValue>> {
        self.overlaid_under(prefix)
    }
}
