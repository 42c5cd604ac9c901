use chatmirror_protocol::UserPayload;

use super::{encode_extra_data, is_newer_optional, reconcile, Reconcile, Reconciled};
use crate::error::{IdentityError, ReconcileError};
use crate::identity::Identity;
use crate::record::UserRecord;
use crate::session::Session;
use crate::store::UnitOfWork;

impl Reconcile for UserRecord {
    type Payload = UserPayload;
    type Context = ();

    fn identity_of(payload: &UserPayload, _: &()) -> Result<Identity, IdentityError> {
        Identity::simple(&payload.id)
    }

    fn create(identity: Identity, payload: &UserPayload, _: &()) -> Self {
        let mut record = Self {
            identity,
            id: payload.id.clone(),
            name: None,
            image_url: None,
            role: None,
            online: false,
            banned: false,
            created_at: None,
            updated_at: None,
            last_active_at: None,
            teams: Vec::new(),
            extra_data: Vec::new(),
        };
        record.apply(payload);
        record
    }

    fn is_newer(&self, payload: &UserPayload) -> bool {
        // An `{id}` reference names the user without describing them.
        if payload.is_reference() {
            return false;
        }
        is_newer_optional(payload.updated_at, self.updated_at)
    }

    fn apply(&mut self, payload: &UserPayload) {
        self.name.clone_from(&payload.name);
        self.image_url.clone_from(&payload.image_url);
        self.role.clone_from(&payload.role);
        self.online = payload.online;
        self.banned = payload.banned;
        self.created_at = payload.created_at;
        self.updated_at = payload.updated_at;
        self.last_active_at = payload.last_active_at;
        self.teams.clone_from(&payload.teams);
        self.extra_data = encode_extra_data(&payload.extra_data);
    }
}

pub fn reconcile_user<U: UnitOfWork>(
    session: &mut Session<U>,
    payload: &UserPayload,
) -> Result<(UserRecord, Reconciled), ReconcileError> {
    reconcile(session, payload, &())
}

/// Presence changes only touch the online flag and activity stamp; the rest
/// of the profile is left to `user.updated`.
pub fn update_presence<U: UnitOfWork>(
    session: &mut Session<U>,
    payload: &UserPayload,
) -> Result<UserRecord, ReconcileError> {
    let identity = UserRecord::identity_of(payload, &())?;
    let Some(mut record) = session.load::<UserRecord>(&identity)? else {
        let record = UserRecord::create(identity, payload, &());
        session.insert(record.clone())?;
        return Ok(record);
    };

    let last_active_at = payload.last_active_at.or(record.last_active_at);
    if record.online != payload.online || record.last_active_at != last_active_at {
        record.online = payload.online;
        record.last_active_at = last_active_at;
        session.update(record.clone())?;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::Store;

    fn user(name: &str, minute: Option<u32>) -> UserPayload {
        let mut payload = UserPayload::with_id("u1");
        payload.name = Some(name.into());
        payload.updated_at = minute.map(|m| Utc.with_ymd_and_hms(2024, 3, 1, 10, m, 0).unwrap());
        payload
    }

    #[test]
    fn newer_profile_replaces_older() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());

        reconcile_user(&mut session, &user("Ada", Some(1))).unwrap();
        let (record, outcome) = reconcile_user(&mut session, &user("Ada L.", Some(2))).unwrap();
        assert_eq!(outcome, Reconciled::Updated);
        assert_eq!(record.name.as_deref(), Some("Ada L."));

        let (record, outcome) = reconcile_user(&mut session, &user("Stale", Some(1))).unwrap();
        assert_eq!(outcome, Reconciled::Unchanged);
        assert_eq!(record.name.as_deref(), Some("Ada L."));
    }

    #[test]
    fn untimestamped_payload_never_overwrites_timestamped_record() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());

        reconcile_user(&mut session, &user("Ada", Some(1))).unwrap();
        let (record, outcome) = reconcile_user(&mut session, &user("Embedded", None)).unwrap();
        assert_eq!(outcome, Reconciled::Unchanged);
        assert_eq!(record.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn bare_reference_keeps_untimestamped_profile() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let mut profile = user("Ada", None);
        profile.teams = vec!["blue".into()];
        reconcile_user(&mut session, &profile).unwrap();

        let (record, outcome) = reconcile_user(&mut session, &UserPayload::with_id("u1")).unwrap();
        assert_eq!(outcome, Reconciled::Unchanged);
        assert_eq!(record.name.as_deref(), Some("Ada"));
        assert_eq!(record.teams, ["blue"]);

        // A fuller untimestamped payload still replaces the profile.
        let (record, outcome) = reconcile_user(&mut session, &user("Ada L.", None)).unwrap();
        assert_eq!(outcome, Reconciled::Updated);
        assert_eq!(record.name.as_deref(), Some("Ada L."));
    }

    #[test]
    fn extra_data_is_kept_as_raw_json() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let mut payload = user("Ada", Some(1));
        payload
            .extra_data
            .insert("colour".into(), serde_json::Value::String("green".into()));

        let (record, _) = reconcile_user(&mut session, &payload).unwrap();
        assert_eq!(record.extra_data, br#"{"colour":"green"}"#.to_vec());
    }

    #[test]
    fn presence_touches_only_online_state() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        reconcile_user(&mut session, &user("Ada", Some(1))).unwrap();

        let mut presence = UserPayload::with_id("u1");
        presence.online = true;
        let record = update_presence(&mut session, &presence).unwrap();

        assert!(record.online);
        assert_eq!(record.name.as_deref(), Some("Ada"));
    }
}
