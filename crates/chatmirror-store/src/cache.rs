//! Per-session read-through cache.

use std::any::Any;
use std::collections::HashMap;

use crate::identity::Identity;
use crate::record::{Record, RecordKind};

/// Records already loaded or written in the current session, keyed by
/// `(kind, identity)`.
///
/// There is no eviction: the cache lives exactly as long as its session and
/// is never shared across sessions. A miss says nothing about the store.
#[derive(Default)]
pub struct SessionCache {
    entries: HashMap<(RecordKind, Identity), Box<dyn Any + Send>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<R: Record>(&self, identity: &Identity) -> Option<&R> {
        self.entries
            .get(&(R::KIND, identity.clone()))
            .and_then(|entry| entry.downcast_ref::<R>())
    }

    pub fn put<R: Record>(&mut self, record: R) {
        let key = (R::KIND, record.identity().clone());
        self.entries.insert(key, Box::new(record));
    }

    pub fn remove<R: Record>(&mut self, identity: &Identity) {
        self.entries.remove(&(R::KIND, identity.clone()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::record::ReadRecord;

    fn read(user: &str) -> ReadRecord {
        let cid = chatmirror_protocol::ChannelId::from("messaging:c1");
        ReadRecord {
            identity: crate::identity::read_identity(&cid, user).unwrap(),
            cid,
            user_id: user.into(),
            last_read: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn put_then_get() {
        let mut cache = SessionCache::new();
        let record = read("u1");
        let identity = record.identity.clone();
        cache.put(record.clone());

        assert_eq!(cache.get::<ReadRecord>(&identity), Some(&record));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn kinds_do_not_share_slots() {
        let mut cache = SessionCache::new();
        let record = read("u1");
        let identity = record.identity.clone();
        cache.put(record);

        // Same identity string, different record kind.
        assert!(cache.get::<crate::record::MemberRecord>(&identity).is_none());
    }

    #[test]
    fn remove_forgets_entry() {
        let mut cache = SessionCache::new();
        let record = read("u1");
        let identity = record.identity.clone();
        cache.put(record);
        cache.remove::<ReadRecord>(&identity);

        assert!(cache.is_empty());
    }
}
