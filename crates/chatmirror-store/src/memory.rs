//! In-process store backed by a mutex-guarded map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;

use crate::error::StoreError;
use crate::identity::Identity;
use crate::record::{Record, RecordKind};
use crate::store::{Store, UnitOfWork};

type Key = (RecordKind, Identity);
type Table = HashMap<Key, Value>;

/// Records are kept in their serialized form so reads hand out fresh copies
/// and a record type change shows up as an encoding error, just like the
/// `SQLite` backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of every kind.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Store for MemoryStore {
    type Unit<'a> = MemoryUnit<'a>;

    fn begin(&self) -> Result<MemoryUnit<'_>, StoreError> {
        Ok(MemoryUnit {
            table: self.records.lock(),
            staged: HashMap::new(),
        })
    }
}

/// Holds the store lock for its whole lifetime. Writes are staged and only
/// reach the table on `commit`.
pub struct MemoryUnit<'a> {
    table: MutexGuard<'a, Table>,
    /// `None` marks a staged removal.
    staged: HashMap<Key, Option<Value>>,
}

impl MemoryUnit<'_> {
    fn current(&self, key: &Key) -> Option<&Value> {
        match self.staged.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.table.get(key),
        }
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn fetch_by_identity<R: Record>(
        &mut self,
        identity: &Identity,
    ) -> Result<Option<R>, StoreError> {
        let key = (R::KIND, identity.clone());
        self.current(&key)
            .map(|value| R::deserialize(value).map_err(StoreError::from))
            .transpose()
    }

    fn fetch_batch<R: Record>(
        &mut self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, R>, StoreError> {
        let mut found = HashMap::with_capacity(identities.len());
        for identity in identities {
            if let Some(record) = self.fetch_by_identity::<R>(identity)? {
                found.insert(identity.clone(), record);
            }
        }
        Ok(found)
    }

    fn insert<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let key = (R::KIND, record.identity().clone());
        if self.current(&key).is_some() {
            return Err(StoreError::Duplicate {
                kind: R::KIND,
                identity: key.1,
            });
        }
        let value = serde_json::to_value(record)?;
        self.staged.insert(key, Some(value));
        Ok(())
    }

    fn update<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let key = (R::KIND, record.identity().clone());
        if self.current(&key).is_none() {
            return Err(StoreError::NotFound {
                kind: R::KIND,
                identity: key.1,
            });
        }
        let value = serde_json::to_value(record)?;
        self.staged.insert(key, Some(value));
        Ok(())
    }

    fn remove<R: Record>(&mut self, identity: &Identity) -> Result<bool, StoreError> {
        let key = (R::KIND, identity.clone());
        let existed = self.current(&key).is_some();
        if existed {
            self.staged.insert(key, None);
        }
        Ok(existed)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        for (key, value) in self.staged.drain() {
            match value {
                Some(value) => {
                    self.table.insert(key, value);
                }
                None => {
                    self.table.remove(&key);
                }
            }
        }
        Ok(())
    }
}
