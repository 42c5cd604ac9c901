use std::collections::BTreeSet;

use chatmirror_protocol::{ChannelId, ChannelPayload, MessageRead, QueryHash, Timestamp};

use super::member::{reconcile_members, MemberContext};
use super::{encode_extra_data, is_newer_optional, reconcile, Reconcile, Reconciled};
use crate::error::{IdentityError, ReconcileError};
use crate::identity::{read_identity, Identity};
use crate::record::{ChannelRecord, ReadRecord, UnreadCountsRecord, UserRecord};
use crate::session::Session;
use crate::store::UnitOfWork;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelContext {
    pub query: Option<QueryHash>,
}

impl Reconcile for ChannelRecord {
    type Payload = ChannelPayload;
    type Context = ChannelContext;

    fn identity_of(payload: &ChannelPayload, _: &ChannelContext) -> Result<Identity, IdentityError> {
        Identity::simple(payload.cid.as_str())
    }

    fn create(identity: Identity, payload: &ChannelPayload, _: &ChannelContext) -> Self {
        let mut record = Self {
            identity,
            cid: payload.cid.clone(),
            name: None,
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            member_count: 0,
            watcher_count: 0,
            unread_count: 0,
            members: BTreeSet::new(),
            queries: BTreeSet::new(),
            extra_data: Vec::new(),
        };
        record.apply(payload);
        record
    }

    fn is_newer(&self, payload: &ChannelPayload) -> bool {
        payload.updated_at > self.updated_at
    }

    // Watcher and unread counters come from their own events and are not
    // part of the channel payload.
    fn apply(&mut self, payload: &ChannelPayload) {
        self.name.clone_from(&payload.name);
        self.created_at = payload.created_at;
        self.updated_at = payload.updated_at;
        self.member_count = payload.member_count;
        self.extra_data = encode_extra_data(&payload.extra_data);
    }

    fn attach(&mut self, ctx: &ChannelContext) -> bool {
        match &ctx.query {
            Some(query) => self.queries.insert(query.clone()),
            None => false,
        }
    }
}

/// Upsert a channel and any members embedded in its payload.
pub fn reconcile_channel<U: UnitOfWork>(
    session: &mut Session<U>,
    payload: &ChannelPayload,
    ctx: &ChannelContext,
) -> Result<(ChannelRecord, Reconciled), ReconcileError> {
    let (channel, outcome) = reconcile::<ChannelRecord, _>(session, payload, ctx)?;
    if payload.members.is_empty() {
        return Ok((channel, outcome));
    }

    reconcile_members(session, &payload.members, &MemberContext::new(payload.cid.clone()))?;
    // Linking the members rewrote the channel's member set.
    let channel = session
        .load::<ChannelRecord>(&channel.identity)?
        .unwrap_or(channel);
    Ok((channel, outcome))
}

impl Reconcile for ReadRecord {
    type Payload = MessageRead;
    type Context = ChannelId;

    fn identity_of(payload: &MessageRead, cid: &ChannelId) -> Result<Identity, IdentityError> {
        read_identity(cid, &payload.user.id)
    }

    fn create(identity: Identity, payload: &MessageRead, cid: &ChannelId) -> Self {
        Self {
            identity,
            cid: cid.clone(),
            user_id: payload.user.id.clone(),
            last_read: payload.last_read,
        }
    }

    fn is_newer(&self, payload: &MessageRead) -> bool {
        payload.last_read > self.last_read
    }

    fn apply(&mut self, payload: &MessageRead) {
        self.last_read = payload.last_read;
    }
}

/// Move a user's read marker forward. Older receipts are ignored.
pub fn record_read<U: UnitOfWork>(
    session: &mut Session<U>,
    cid: &ChannelId,
    read: &MessageRead,
) -> Result<(ReadRecord, Reconciled), ReconcileError> {
    reconcile::<UserRecord, _>(session, &read.user, &())?;
    reconcile::<ReadRecord, _>(session, read, cid)
}

/// Set the live watcher count of a known channel. Unknown channels are left
/// alone and yield `None`.
pub fn update_watcher_count<U: UnitOfWork>(
    session: &mut Session<U>,
    cid: &ChannelId,
    watcher_count: u32,
) -> Result<Option<ChannelRecord>, ReconcileError> {
    update_channel_counter(session, cid, |channel| {
        std::mem::replace(&mut channel.watcher_count, watcher_count) != watcher_count
    })
}

/// Set the current user's unread count for a known channel.
pub fn set_channel_unread<U: UnitOfWork>(
    session: &mut Session<U>,
    cid: &ChannelId,
    unread_count: u32,
) -> Result<Option<ChannelRecord>, ReconcileError> {
    update_channel_counter(session, cid, |channel| {
        std::mem::replace(&mut channel.unread_count, unread_count) != unread_count
    })
}

fn update_channel_counter<U, F>(
    session: &mut Session<U>,
    cid: &ChannelId,
    set: F,
) -> Result<Option<ChannelRecord>, ReconcileError>
where
    U: UnitOfWork,
    F: FnOnce(&mut ChannelRecord) -> bool,
{
    let identity = Identity::simple(cid.as_str())?;
    let Some(mut channel) = session.load::<ChannelRecord>(&identity)? else {
        return Ok(None);
    };
    if set(&mut channel) {
        session.update(channel.clone())?;
    }
    Ok(Some(channel))
}

/// Account-wide unread counters as carried by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadCounts {
    pub total_unread_count: u32,
    pub unread_channels: Option<u32>,
    /// Envelope stamp of the carrying event.
    pub stamp: Option<Timestamp>,
}

impl Reconcile for UnreadCountsRecord {
    type Payload = UnreadCounts;
    type Context = ();

    fn identity_of(_: &UnreadCounts, _: &()) -> Result<Identity, IdentityError> {
        Identity::simple(Self::KEY)
    }

    fn create(identity: Identity, payload: &UnreadCounts, _: &()) -> Self {
        let mut record = Self {
            identity,
            total_unread_count: 0,
            unread_channels: None,
            updated_at: None,
        };
        record.apply(payload);
        record
    }

    fn is_newer(&self, payload: &UnreadCounts) -> bool {
        is_newer_optional(payload.stamp, self.updated_at)
    }

    fn apply(&mut self, payload: &UnreadCounts) {
        self.total_unread_count = payload.total_unread_count;
        // `message.new` carries no channel tally; keep the last known one.
        if payload.unread_channels.is_some() {
            self.unread_channels = payload.unread_channels;
        }
        self.updated_at = payload.stamp.or(self.updated_at);
    }
}

pub fn update_unread_counts<U: UnitOfWork>(
    session: &mut Session<U>,
    counts: &UnreadCounts,
) -> Result<(UnreadCountsRecord, Reconciled), ReconcileError> {
    reconcile(session, counts, &())
}
