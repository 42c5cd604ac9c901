//! A unit of work paired with its read-through cache.

use std::collections::HashMap;

use crate::cache::SessionCache;
use crate::error::StoreError;
use crate::identity::Identity;
use crate::record::Record;
use crate::store::UnitOfWork;

/// Result of [`Session::load_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome<R> {
    Created(R),
    Found(R),
}

impl<R> CreateOutcome<R> {
    pub fn into_inner(self) -> R {
        match self {
            Self::Created(record) | Self::Found(record) => record,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Every lookup checks the cache before the store, and every write lands
/// in both, so a record is never inserted twice within one session.
pub struct Session<U> {
    unit: U,
    cache: SessionCache,
}

impl<U: UnitOfWork> Session<U> {
    pub fn new(unit: U) -> Self {
        Self {
            unit,
            cache: SessionCache::new(),
        }
    }

    pub fn load<R: Record>(&mut self, identity: &Identity) -> Result<Option<R>, StoreError> {
        if let Some(hit) = self.cache.get::<R>(identity) {
            return Ok(Some(hit.clone()));
        }
        let fetched = self.unit.fetch_by_identity::<R>(identity)?;
        if let Some(record) = &fetched {
            self.cache.put(record.clone());
        }
        Ok(fetched)
    }

    /// Cache hits are served directly; the misses go to the store in a
    /// single batch fetch.
    pub fn load_batch<R: Record>(
        &mut self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, R>, StoreError> {
        let mut found = HashMap::with_capacity(identities.len());
        let mut misses = Vec::new();
        for identity in identities {
            match self.cache.get::<R>(identity) {
                Some(hit) => {
                    found.insert(identity.clone(), hit.clone());
                }
                None => misses.push(identity.clone()),
            }
        }

        if !misses.is_empty() {
            misses.sort();
            misses.dedup();
            for (identity, record) in self.unit.fetch_batch::<R>(&misses)? {
                self.cache.put(record.clone());
                found.insert(identity, record);
            }
        }
        Ok(found)
    }

    pub fn insert<R: Record>(&mut self, record: R) -> Result<(), StoreError> {
        self.unit.insert(&record)?;
        self.cache.put(record);
        Ok(())
    }

    pub fn update<R: Record>(&mut self, record: R) -> Result<(), StoreError> {
        self.unit.update(&record)?;
        self.cache.put(record);
        Ok(())
    }

    pub fn remove<R: Record>(&mut self, identity: &Identity) -> Result<bool, StoreError> {
        self.cache.remove::<R>(identity);
        self.unit.remove::<R>(identity)
    }

    /// Load the record, or insert the one produced by `create`.
    pub fn load_or_create<R, F>(
        &mut self,
        identity: &Identity,
        create: F,
    ) -> Result<CreateOutcome<R>, StoreError>
    where
        R: Record,
        F: FnOnce() -> R,
    {
        if let Some(existing) = self.load::<R>(identity)? {
            return Ok(CreateOutcome::Found(existing));
        }
        let record = create();
        self.insert(record.clone())?;
        Ok(CreateOutcome::Created(record))
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.unit.commit()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chatmirror_protocol::ChannelId;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::memory::MemoryStore;
    use crate::record::{ChannelRecord, ReadRecord};
    use crate::store::Store;

    /// Counts how often the session falls through to the unit.
    struct CountingUnit<U> {
        inner: U,
        fetches: usize,
    }

    impl<U: UnitOfWork> UnitOfWork for CountingUnit<U> {
        fn fetch_by_identity<R: Record>(
            &mut self,
            identity: &Identity,
        ) -> Result<Option<R>, StoreError> {
            self.fetches += 1;
            self.inner.fetch_by_identity(identity)
        }

        fn fetch_batch<R: Record>(
            &mut self,
            identities: &[Identity],
        ) -> Result<HashMap<Identity, R>, StoreError> {
            self.fetches += 1;
            self.inner.fetch_batch(identities)
        }

        fn insert<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
            self.inner.insert(record)
        }

        fn update<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
            self.inner.update(record)
        }

        fn remove<R: Record>(&mut self, identity: &Identity) -> Result<bool, StoreError> {
            self.inner.remove::<R>(identity)
        }

        fn commit(self) -> Result<(), StoreError> {
            self.inner.commit()
        }
    }

    fn channel(id: &str) -> ChannelRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        ChannelRecord {
            identity: Identity::simple(id).unwrap(),
            cid: ChannelId::from(id),
            name: None,
            created_at: at,
            updated_at: at,
            member_count: 0,
            watcher_count: 0,
            unread_count: 0,
            members: BTreeSet::new(),
            queries: BTreeSet::new(),
            extra_data: Vec::new(),
        }
    }

    #[test]
    fn second_load_is_served_from_cache() {
        let store = MemoryStore::new();
        let mut session = Session::new(CountingUnit {
            inner: store.begin().unwrap(),
            fetches: 0,
        });
        session.insert(channel("messaging:c1")).unwrap();

        let identity = Identity::simple("messaging:c1").unwrap();
        assert!(session.load::<ChannelRecord>(&identity).unwrap().is_some());
        assert!(session.load::<ChannelRecord>(&identity).unwrap().is_some());
        assert_eq!(session.unit.fetches, 0);
    }

    #[test]
    fn miss_falls_through_to_store() {
        let store = MemoryStore::new();
        {
            let mut session = Session::new(store.begin().unwrap());
            session.insert(channel("messaging:c1")).unwrap();
            session.commit().unwrap();
        }

        let mut session = Session::new(CountingUnit {
            inner: store.begin().unwrap(),
            fetches: 0,
        });
        let identity = Identity::simple("messaging:c1").unwrap();
        assert!(session.load::<ChannelRecord>(&identity).unwrap().is_some());
        assert!(session.load::<ChannelRecord>(&identity).unwrap().is_some());
        assert_eq!(session.unit.fetches, 1);
    }

    #[test]
    fn load_batch_fetches_only_misses_once() {
        let store = MemoryStore::new();
        let mut session = Session::new(CountingUnit {
            inner: store.begin().unwrap(),
            fetches: 0,
        });
        session.insert(channel("messaging:c1")).unwrap();

        let ids = vec![
            Identity::simple("messaging:c1").unwrap(),
            Identity::simple("messaging:c2").unwrap(),
            Identity::simple("messaging:c3").unwrap(),
        ];
        let found = session.load_batch::<ChannelRecord>(&ids).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(session.unit.fetches, 1);
    }

    #[test]
    fn load_or_create_never_duplicates() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let cid = ChannelId::from("messaging:c1");
        let identity = crate::identity::read_identity(&cid, "u1").unwrap();
        let make = || ReadRecord {
            identity: identity.clone(),
            cid: cid.clone(),
            user_id: "u1".into(),
            last_read: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        };

        let first = session.load_or_create(&identity, make).unwrap();
        let second = session.load_or_create(&identity, make).unwrap();
        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.into_inner(), second.into_inner());
    }
}
