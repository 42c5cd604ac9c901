use std::collections::BTreeSet;

use chatmirror_protocol::{ChannelId, MemberPayload, QueryHash, UserPayload};

use super::{reconcile, reconcile_many, Reconcile, Reconciled};
use crate::error::{IdentityError, ReconcileError};
use crate::identity::{member_identity, Identity};
use crate::record::{BanState, ChannelRecord, InviteState, MemberRecord, UserRecord};
use crate::session::Session;
use crate::store::UnitOfWork;

/// Channel scope and, when the members came from a member-list query, that
/// query's hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberContext {
    pub cid: ChannelId,
    pub query: Option<QueryHash>,
}

impl MemberContext {
    pub fn new(cid: ChannelId) -> Self {
        Self { cid, query: None }
    }

    pub fn with_query(mut self, query: QueryHash) -> Self {
        self.query = Some(query);
        self
    }
}

impl Reconcile for MemberRecord {
    type Payload = MemberPayload;
    type Context = MemberContext;

    fn identity_of(payload: &MemberPayload, ctx: &MemberContext) -> Result<Identity, IdentityError> {
        member_identity(&ctx.cid, &payload.user.id)
    }

    fn create(identity: Identity, payload: &MemberPayload, ctx: &MemberContext) -> Self {
        let mut record = Self {
            identity,
            cid: ctx.cid.clone(),
            user_id: payload.user.id.clone(),
            role: None,
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            ban: BanState::default(),
            invite: InviteState::default(),
            queries: BTreeSet::new(),
        };
        record.apply(payload);
        record
    }

    fn is_newer(&self, payload: &MemberPayload) -> bool {
        payload.updated_at > self.updated_at
    }

    fn apply(&mut self, payload: &MemberPayload) {
        // A payload without a role leaves the known role in place.
        if let Some(role) = &payload.role {
            self.role = Some(role.clone());
        }
        self.created_at = payload.created_at;
        self.updated_at = payload.updated_at;
        self.ban = BanState {
            is_banned: payload.is_banned.unwrap_or(false),
            is_shadow_banned: payload.is_shadow_banned.unwrap_or(false),
            expires_at: payload.ban_expires_at,
        };
        self.invite = InviteState {
            is_invited: payload.is_invited.unwrap_or(false),
            accepted_at: payload.invite_accepted_at,
            rejected_at: payload.invite_rejected_at,
        };
    }

    fn attach(&mut self, ctx: &MemberContext) -> bool {
        match &ctx.query {
            Some(query) => self.queries.insert(query.clone()),
            None => false,
        }
    }
}

/// Upsert one membership together with its user, and link it into the
/// channel's member set if the channel is known.
pub fn reconcile_member<U: UnitOfWork>(
    session: &mut Session<U>,
    payload: &MemberPayload,
    ctx: &MemberContext,
) -> Result<(MemberRecord, Reconciled), ReconcileError> {
    reconcile::<UserRecord, _>(session, &payload.user, &())?;
    let (member, outcome) = reconcile::<MemberRecord, _>(session, payload, ctx)?;
    link_members(session, &ctx.cid, std::iter::once(&member.identity))?;
    Ok((member, outcome))
}

/// Batch form of [`reconcile_member`]. Output is in request order.
pub fn reconcile_members<U: UnitOfWork>(
    session: &mut Session<U>,
    payloads: &[MemberPayload],
    ctx: &MemberContext,
) -> Result<Vec<MemberRecord>, ReconcileError> {
    let users: Vec<UserPayload> = payloads.iter().map(|m| m.user.clone()).collect();
    reconcile_many::<UserRecord, _>(session, &users, &())?;

    let members = reconcile_many::<MemberRecord, _>(session, payloads, ctx)?;
    link_members(session, &ctx.cid, members.iter().map(|m| &m.identity))?;
    Ok(members)
}

/// Delete a membership and unlink it from its channel. Returns whether a
/// record existed.
pub fn remove_member<U: UnitOfWork>(
    session: &mut Session<U>,
    cid: &ChannelId,
    user_id: &str,
) -> Result<bool, ReconcileError> {
    let identity = member_identity(cid, user_id)?;
    let removed = session.remove::<MemberRecord>(&identity)?;

    let channel_identity = Identity::simple(cid.as_str())?;
    if let Some(mut channel) = session.load::<ChannelRecord>(&channel_identity)? {
        if channel.members.remove(&identity) {
            session.update(channel)?;
        }
    }
    Ok(removed)
}

fn link_members<'a, U: UnitOfWork>(
    session: &mut Session<U>,
    cid: &ChannelId,
    members: impl Iterator<Item = &'a Identity>,
) -> Result<(), ReconcileError> {
    let channel_identity = Identity::simple(cid.as_str())?;
    let Some(mut channel) = session.load::<ChannelRecord>(&channel_identity)? else {
        return Ok(());
    };

    let mut changed = false;
    for identity in members {
        changed |= channel.members.insert(identity.clone());
    }
    if changed {
        session.update(channel)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chatmirror_protocol::Timestamp;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::Store;

    fn at(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
    }

    fn member(user: &str, role: Option<&str>, updated_minute: u32) -> MemberPayload {
        MemberPayload {
            user: UserPayload::with_id(user),
            role: role.map(str::to_string),
            created_at: at(0),
            updated_at: at(updated_minute),
            is_banned: None,
            is_shadow_banned: None,
            ban_expires_at: None,
            is_invited: None,
            invite_accepted_at: None,
            invite_rejected_at: None,
        }
    }

    fn ctx() -> MemberContext {
        MemberContext::new(ChannelId::from("messaging:c1"))
    }

    #[test]
    fn first_payload_creates_with_raw_role() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());

        let (record, outcome) =
            reconcile_member(&mut session, &member("u1", Some("moderator"), 0), &ctx()).unwrap();

        assert_eq!(outcome, Reconciled::Created);
        assert_eq!(record.role.as_deref(), Some("moderator"));
        assert_eq!(record.identity.as_str(), "12:messaging:c1u1");
        assert!(!record.ban.is_banned);
    }

    #[test]
    fn stale_payload_is_a_no_op() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());

        reconcile_member(&mut session, &member("u1", Some("moderator"), 1), &ctx()).unwrap();
        let (record, outcome) =
            reconcile_member(&mut session, &member("u1", Some("member"), 0), &ctx()).unwrap();

        assert_eq!(outcome, Reconciled::Unchanged);
        assert_eq!(record.role.as_deref(), Some("moderator"));
        assert_eq!(record.updated_at, at(1));
    }

    #[test]
    fn equal_timestamp_does_not_update() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());

        reconcile_member(&mut session, &member("u1", Some("moderator"), 1), &ctx()).unwrap();
        let (record, outcome) =
            reconcile_member(&mut session, &member("u1", Some("admin"), 1), &ctx()).unwrap();

        assert_eq!(outcome, Reconciled::Unchanged);
        assert_eq!(record.role.as_deref(), Some("moderator"));
    }

    #[test]
    fn replay_is_idempotent() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let payload = member("u1", Some("admin"), 2);

        let (first, _) = reconcile_member(&mut session, &payload, &ctx()).unwrap();
        let (second, outcome) = reconcile_member(&mut session, &payload, &ctx()).unwrap();

        assert_eq!(outcome, Reconciled::Unchanged);
        assert_eq!(first, second);
    }

    #[test]
    fn newer_payload_without_role_keeps_role() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());

        reconcile_member(&mut session, &member("u1", Some("admin"), 1), &ctx()).unwrap();
        let mut banned = member("u1", None, 2);
        banned.is_banned = Some(true);
        let (record, outcome) = reconcile_member(&mut session, &banned, &ctx()).unwrap();

        assert_eq!(outcome, Reconciled::Updated);
        assert_eq!(record.role.as_deref(), Some("admin"));
        assert!(record.ban.is_banned);
    }

    #[test]
    fn query_attachment_is_additive_even_when_stale() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let q1 = chatmirror_protocol::MemberListQuery::new(
            ChannelId::from("messaging:c1"),
            serde_json::json!({}),
        )
        .query_hash();
        let q2 = chatmirror_protocol::MemberListQuery::new(
            ChannelId::from("messaging:c1"),
            serde_json::json!({"banned": true}),
        )
        .query_hash();

        reconcile_member(&mut session, &member("u1", None, 2), &ctx().with_query(q1.clone()))
            .unwrap();
        let (record, outcome) =
            reconcile_member(&mut session, &member("u1", None, 1), &ctx().with_query(q2.clone()))
                .unwrap();

        assert_eq!(outcome, Reconciled::Unchanged);
        assert!(record.queries.contains(&q1));
        assert!(record.queries.contains(&q2));
    }

    #[test]
    fn batch_preserves_request_order_and_applies_duplicates() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        reconcile_member(&mut session, &member("u2", Some("member"), 0), &ctx()).unwrap();

        let payloads = vec![
            member("u3", None, 0),
            member("u1", Some("member"), 0),
            member("u2", Some("admin"), 5),
            member("u1", Some("owner"), 3),
        ];
        let records = reconcile_members(&mut session, &payloads, &ctx()).unwrap();

        let users: Vec<&str> = records.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(users, ["u3", "u1", "u2", "u1"]);
        assert_eq!(records[2].role.as_deref(), Some("admin"));
        // The later, newer duplicate of a freshly created member wins.
        assert_eq!(records[1].role.as_deref(), Some("owner"));
        assert_eq!(records[1], records[3]);
    }

    #[test]
    fn membership_links_into_known_channel_and_unlinks_on_remove() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let cid = ChannelId::from("messaging:c1");
        let channel = ChannelRecord {
            identity: Identity::simple(cid.as_str()).unwrap(),
            cid: cid.clone(),
            name: None,
            created_at: at(0),
            updated_at: at(0),
            member_count: 0,
            watcher_count: 0,
            unread_count: 0,
            members: BTreeSet::new(),
            queries: BTreeSet::new(),
            extra_data: Vec::new(),
        };
        session.insert(channel.clone()).unwrap();

        let (record, _) = reconcile_member(&mut session, &member("u1", None, 0), &ctx()).unwrap();
        let linked: ChannelRecord = session.load(&channel.identity).unwrap().unwrap();
        assert!(linked.members.contains(&record.identity));

        assert!(remove_member(&mut session, &cid, "u1").unwrap());
        let unlinked: ChannelRecord = session.load(&channel.identity).unwrap().unwrap();
        assert!(unlinked.members.is_empty());
        assert!(!remove_member(&mut session, &cid, "u1").unwrap());
    }
}
