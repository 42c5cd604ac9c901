use chatmirror_protocol::{ChannelId, MessagePayload, ReactionPayload, Timestamp, UserPayload};

use super::{encode_extra_data, reconcile, reconcile_many, Reconcile, Reconciled};
use crate::error::{IdentityError, ReconcileError};
use crate::identity::{reaction_identity, Identity};
use crate::record::{MessageRecord, ReactionRecord, UserRecord};
use crate::session::Session;
use crate::store::UnitOfWork;

impl Reconcile for MessageRecord {
    type Payload = MessagePayload;
    /// Channel to file the message under when the payload has no `cid`.
    type Context = Option<ChannelId>;

    fn identity_of(payload: &MessagePayload, _: &Option<ChannelId>) -> Result<Identity, IdentityError> {
        Identity::simple(&payload.id)
    }

    fn create(identity: Identity, payload: &MessagePayload, cid: &Option<ChannelId>) -> Self {
        let mut record = Self {
            identity,
            id: payload.id.clone(),
            cid: cid.clone(),
            user_id: payload.user.id.clone(),
            text: String::new(),
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            deleted_at: None,
            parent_id: None,
            reply_count: 0,
            extra_data: Vec::new(),
        };
        record.apply(payload);
        record
    }

    fn is_newer(&self, payload: &MessagePayload) -> bool {
        payload.updated_at > self.updated_at
    }

    fn apply(&mut self, payload: &MessagePayload) {
        if payload.cid.is_some() {
            self.cid.clone_from(&payload.cid);
        }
        self.user_id.clone_from(&payload.user.id);
        self.text.clone_from(&payload.text);
        self.created_at = payload.created_at;
        self.updated_at = payload.updated_at;
        self.deleted_at = payload.deleted_at;
        self.parent_id.clone_from(&payload.parent_id);
        self.reply_count = payload.reply_count;
        self.extra_data = encode_extra_data(&payload.extra_data);
    }
}

/// Upsert a message and its author.
pub fn reconcile_message<U: UnitOfWork>(
    session: &mut Session<U>,
    payload: &MessagePayload,
    cid: Option<&ChannelId>,
) -> Result<(MessageRecord, Reconciled), ReconcileError> {
    reconcile::<UserRecord, _>(session, &payload.user, &())?;
    reconcile::<MessageRecord, _>(session, payload, &cid.cloned())
}

/// Batch form of [`reconcile_message`]; output is in request order.
pub fn reconcile_messages<U: UnitOfWork>(
    session: &mut Session<U>,
    payloads: &[MessagePayload],
    cid: Option<&ChannelId>,
) -> Result<Vec<MessageRecord>, ReconcileError> {
    let authors: Vec<UserPayload> = payloads.iter().map(|m| m.user.clone()).collect();
    reconcile_many::<UserRecord, _>(session, &authors, &())?;
    reconcile_many::<MessageRecord, _>(session, payloads, &cid.cloned())
}

/// Soft-delete a message. The record is kept so threads and read markers
/// that point at it stay valid.
///
/// `deleted_at` falls back to `stamp` (the event time) and then to the
/// payload's own `updated_at` when the server did not send one.
pub fn mark_message_deleted<U: UnitOfWork>(
    session: &mut Session<U>,
    payload: &MessagePayload,
    cid: Option<&ChannelId>,
    stamp: Option<Timestamp>,
) -> Result<MessageRecord, ReconcileError> {
    let (mut record, _) = reconcile_message(session, payload, cid)?;
    if record.deleted_at.is_none() {
        record.deleted_at = Some(payload.deleted_at.or(stamp).unwrap_or(payload.updated_at));
        session.update(record.clone())?;
    }
    Ok(record)
}

impl Reconcile for ReactionRecord {
    type Payload = ReactionPayload;
    /// Reacting user, for payloads that do not carry `user_id` themselves.
    type Context = String;

    fn identity_of(payload: &ReactionPayload, user_id: &String) -> Result<Identity, IdentityError> {
        reaction_identity(
            &payload.message_id,
            payload.user_id.as_deref().unwrap_or(user_id),
            &payload.kind,
        )
    }

    fn create(identity: Identity, payload: &ReactionPayload, user_id: &String) -> Self {
        Self {
            identity,
            message_id: payload.message_id.clone(),
            user_id: payload.user_id.clone().unwrap_or_else(|| user_id.clone()),
            kind: payload.kind.clone(),
            score: payload.score,
            created_at: payload.created_at,
            updated_at: payload.effective_updated_at(),
        }
    }

    fn is_newer(&self, payload: &ReactionPayload) -> bool {
        payload.effective_updated_at() > self.updated_at
    }

    fn apply(&mut self, payload: &ReactionPayload) {
        self.score = payload.score;
        self.created_at = payload.created_at;
        self.updated_at = payload.effective_updated_at();
    }
}

/// Upsert a reaction along with the reacting user and the message it is on.
pub fn reconcile_reaction<U: UnitOfWork>(
    session: &mut Session<U>,
    reaction: &ReactionPayload,
    message: &MessagePayload,
    user: &UserPayload,
) -> Result<(ReactionRecord, Reconciled), ReconcileError> {
    reconcile::<UserRecord, _>(session, user, &())?;
    reconcile_message(session, message, None)?;
    reconcile::<ReactionRecord, _>(session, reaction, &user.id)
}

/// Delete a reaction. The message payload in the same event is still
/// reconciled since it carries the updated reaction tallies.
pub fn remove_reaction<U: UnitOfWork>(
    session: &mut Session<U>,
    reaction: &ReactionPayload,
    message: &MessagePayload,
    user: &UserPayload,
) -> Result<bool, ReconcileError> {
    reconcile_message(session, message, None)?;
    let identity = ReactionRecord::identity_of(reaction, &user.id)?;
    Ok(session.remove::<ReactionRecord>(&identity)?)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::Map;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::Store;

    fn at(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
    }

    fn message(text: &str, minute: u32) -> MessagePayload {
        MessagePayload {
            id: "m1".into(),
            text: text.into(),
            user: UserPayload::with_id("u1"),
            created_at: at(0),
            updated_at: at(minute),
            deleted_at: None,
            parent_id: None,
            reply_count: 0,
            cid: None,
            extra_data: Map::new(),
        }
    }

    fn like() -> ReactionPayload {
        ReactionPayload {
            kind: "like".into(),
            message_id: "m1".into(),
            user_id: None,
            score: 1,
            created_at: at(1),
            updated_at: None,
            extra_data: Map::new(),
        }
    }

    #[test]
    fn edit_replaces_text_and_keeps_fallback_cid() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let cid = ChannelId::from("messaging:c1");

        reconcile_message(&mut session, &message("hello", 0), Some(&cid)).unwrap();
        let (record, outcome) = reconcile_message(&mut session, &message("hello!", 1), None).unwrap();

        assert_eq!(outcome, Reconciled::Updated);
        assert_eq!(record.text, "hello!");
        assert_eq!(record.cid, Some(cid));
    }

    #[test]
    fn delete_is_soft_and_sticky() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        reconcile_message(&mut session, &message("hello", 0), None).unwrap();

        let record = mark_message_deleted(&mut session, &message("hello", 0), None, Some(at(9)))
            .unwrap();
        assert_eq!(record.deleted_at, Some(at(9)));

        // A later delete event does not move the stamp.
        let record = mark_message_deleted(&mut session, &message("hello", 0), None, Some(at(12)))
            .unwrap();
        assert_eq!(record.deleted_at, Some(at(9)));
    }

    #[test]
    fn reaction_upsert_and_remove() {
        let store = MemoryStore::new();
        let mut session = Session::new(store.begin().unwrap());
        let user = UserPayload::with_id("u2");

        let (record, outcome) =
            reconcile_reaction(&mut session, &like(), &message("hello", 0), &user).unwrap();
        assert_eq!(outcome, Reconciled::Created);
        assert_eq!(record.user_id, "u2");

        let (_, outcome) =
            reconcile_reaction(&mut session, &like(), &message("hello", 0), &user).unwrap();
        assert_eq!(outcome, Reconciled::Unchanged);

        assert!(remove_reaction(&mut session, &like(), &message("hello", 0), &user).unwrap());
        assert!(!remove_reaction(&mut session, &like(), &message("hello", 0), &user).unwrap());
    }
}
