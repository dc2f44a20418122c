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

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use itertools::Itertools;

use crate::backend::CommitId;
use crate::lock::{FileLock, FileLockError};
use crate::ref_store::{RefStore, RefStoreError, RefStoreResult, RefValue};

impl From<FileLockError> for RefStoreError {
    fn from(err: FileLockError) -> Self {
        match err {
            FileLockError::Timeout(_) => RefStoreError::LockTimeout,
            FileLockError::Io { .. } => RefStoreError::Other(err.to_string()),
        }
    }
}

/// Reference database keeping one file per ref under a root directory. The
/// slash-delimited ref name is the file's path relative to the root.
#[derive(Debug)]
pub struct SimpleRefStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Mutex<Option<FileLock>>,
}

impl SimpleRefStore {
    pub fn init(path: PathBuf) -> RefStoreResult<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self::load(path))
    }

    pub fn load(path: PathBuf) -> Self {
        let lock_path = path.with_extension("lock");
        SimpleRefStore {
            path,
            lock_path,
            lock: Mutex::new(None),
        }
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn read(&self, name: &str) -> RefStoreResult<Option<RefValue>> {
        match fs::read_to_string(self.ref_path(name)) {
            Ok(stored) => Ok(Some(RefValue::parse(stored.trim_end())?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, name: &str, value: &RefValue) -> RefStoreResult<()> {
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", value.serialize()))?;
        Ok(())
    }

    fn collect_refs(
        &self,
        dir: &Path,
        out: &mut BTreeMap<String, RefValue>,
    ) -> RefStoreResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_refs(&path, out)?;
            } else {
                let rel = path
                    .strip_prefix(&self.path)
                    .map_err(|err| RefStoreError::Other(err.to_string()))?;
                let name = rel.iter().map(|c| c.to_string_lossy()).join("/");
                let stored = fs::read_to_string(&path)?;
                out.insert(name, RefValue::parse(stored.trim_end())?);
            }
        }
        Ok(())
    }
}

impl RefStore for SimpleRefStore {
    fn lock(&self) -> RefStoreResult<()> {
        let file_lock = FileLock::lock(self.lock_path.clone())?;
        *self.lock.lock().unwrap() = Some(file_lock);
        Ok(())
    }

    fn unlock(&self) -> RefStoreResult<()> {
        *self.lock.lock().unwrap() = None;
        Ok(())
    }

    fn get_ref(&self, name: &str) -> RefStoreResult<Option<CommitId>> {
        Ok(self.read(name)?.and_then(|value| value.as_id().cloned()))
    }

    fn get_sym_ref(&self, name: &str) -> RefStoreResult<Option<String>> {
        Ok(self
            .read(name)?
            .and_then(|value| value.as_symbolic().map(|target| target.to_string())))
    }

    fn put_ref(&self, name: &str, id: &CommitId) -> RefStoreResult<()> {
        self.write(name, &RefValue::Id(id.clone()))
    }

    fn put_sym_ref(&self, name: &str, target: &str) -> RefStoreResult<()> {
        self.write(name, &RefValue::Symbolic(target.to_string()))
    }

    fn remove(&self, name: &str) -> RefStoreResult<Option<RefValue>> {
        let prior = self.read(name)?;
        match fs::remove_file(self.ref_path(name)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(prior)
    }

    fn remove_all(&self, prefix: &str) -> RefStoreResult<BTreeMap<String, RefValue>> {
        let removed = self.get_all_under(prefix)?;
        let dir = self.path.join(prefix.trim_end_matches('/'));
        if !prefix.is_empty() && prefix.ends_with('/') && dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        } else {
            for name in removed.keys() {
                fs::remove_file(self.ref_path(name))?;
            }
        }
        Ok(removed)
    }

    fn get_all(&self) -> RefStoreResult<BTreeMap<String, RefValue>> {
        let mut out = BTreeMap::new();
        self.collect_refs(&self.path, &mut out)?;
        Ok(out)
    }

    fn get_all_under(&self, prefix: &str) -> RefStoreResult<BTreeMap<String, RefValue>> {
        let all = self.get_all()?;
        Ok(all
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ref_store::resolve_ref;

    fn new_store() -> (tempfile::TempDir, SimpleRefStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SimpleRefStore::init(temp_dir.path().join("refs")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_put_get_remove() {
        let (_temp_dir, store) = new_store();
        let id = CommitId::from_hex("aa15b1f5e5bba1a2a2d1f5e5bba1a2a2d1f5e5bb");
        assert_eq!(store.get_ref("refs/heads/master").unwrap(), None);
        store.put_ref("refs/heads/master", &id).unwrap();
        assert_eq!(store.get_ref("refs/heads/master").unwrap(), Some(id.clone()));
        // A direct ref is not visible as a symbolic one
        assert_eq!(store.get_sym_ref("refs/heads/master").unwrap(), None);
        let removed = store.remove("refs/heads/master").unwrap();
        assert_eq!(removed, Some(RefValue::Id(id)));
        assert_eq!(store.get_ref("refs/heads/master").unwrap(), None);
    }

    #[test]
    fn test_symbolic_resolution() {
        let (_temp_dir, store) = new_store();
        let id = CommitId::from_hex("aa15b1f5e5bba1a2a2d1f5e5bba1a2a2d1f5e5bb");
        store.put_ref("refs/heads/master", &id).unwrap();
        store.put_sym_ref("HEAD", "refs/heads/master").unwrap();
        assert_eq!(
            store.get_sym_ref("HEAD").unwrap(),
            Some("refs/heads/master".to_string())
        );
        assert_eq!(store.get_ref("HEAD").unwrap(), None);
        assert_eq!(resolve_ref(&store, "HEAD").unwrap(), Some(id));
        // Dangling symbolic ref
        store.put_sym_ref("HEAD", "refs/heads/gone").unwrap();
        assert_eq!(resolve_ref(&store, "HEAD").unwrap(), None);
    }

    #[test]
    fn test_get_all_under_and_remove_all() {
        let (_temp_dir, store) = new_store();
        let id1 = CommitId::from_hex("1111111111111111111111111111111111111111");
        let id2 = CommitId::from_hex("2222222222222222222222222222222222222222");
        store.put_ref("refs/heads/master", &id1).unwrap();
        store.put_ref("refs/heads/topic", &id2).unwrap();
        store.put_ref("HEAD", &id1).unwrap();

        let under = store.get_all_under("refs/").unwrap();
        assert_eq!(under.len(), 2);
        assert_eq!(
            under.get("refs/heads/master"),
            Some(&RefValue::Id(id1.clone()))
        );

        let removed = store.remove_all("refs/").unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.get_all().unwrap().len(), 1);
        assert_eq!(store.get_ref("HEAD").unwrap(), Some(id1));
    }

    #[test]
    fn test_lock_creates_and_removes_lock_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SimpleRefStore::init(temp_dir.path().join("refs")).unwrap();
        let lock_path = temp_dir.path().join("refs.lock");
        store.lock().unwrap();
        assert!(lock_path.exists());
        store.unlock().unwrap();
        assert!(!lock_path.exists());
    }
}
