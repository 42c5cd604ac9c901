//! Idempotent upserts of server payloads into local records.
//!
//! A payload creates its record when none exists and otherwise replaces the
//! record's mutable fields only when it is strictly newer. Replaying an old
//! or duplicate payload therefore never regresses state. Relationship
//! attachments (saved queries, channel member sets) only ever add.

mod channel;
mod member;
mod message;
mod user;

use std::collections::{BTreeSet, HashMap, HashSet};

use chatmirror_protocol::Timestamp;
use serde_json::{Map, Value};

use crate::error::{IdentityError, ReconcileError};
use crate::identity::Identity;
use crate::record::Record;
use crate::session::Session;
use crate::store::UnitOfWork;

pub use channel::{
    reconcile_channel, record_read, set_channel_unread, update_unread_counts,
    update_watcher_count, ChannelContext, UnreadCounts,
};
pub use member::{reconcile_member, reconcile_members, remove_member, MemberContext};
pub use message::{
    mark_message_deleted, reconcile_message, reconcile_messages, reconcile_reaction,
    remove_reaction,
};
pub use user::{reconcile_user, update_presence};

/// What a single upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Created,
    Updated,
    /// The payload was not newer than the stored record.
    Unchanged,
}

/// A record type that can be built from and merged with a server payload.
pub trait Reconcile: Record {
    type Payload;
    /// Whatever the payload alone does not carry (parent scope, query).
    type Context;

    fn identity_of(payload: &Self::Payload, ctx: &Self::Context)
        -> Result<Identity, IdentityError>;

    fn create(identity: Identity, payload: &Self::Payload, ctx: &Self::Context) -> Self;

    /// Whether `payload` is strictly newer than this record. Ties are not.
    fn is_newer(&self, payload: &Self::Payload) -> bool;

    /// Replace the mutable fields from `payload`.
    fn apply(&mut self, payload: &Self::Payload);

    /// Attach context relationships. Returns `true` if anything was added.
    fn attach(&mut self, _ctx: &Self::Context) -> bool {
        false
    }
}

/// Staleness for entities whose timestamp is optional. A payload without a
/// timestamp never overrides a record that has one.
pub(crate) fn is_newer_optional(payload: Option<Timestamp>, record: Option<Timestamp>) -> bool {
    match (payload, record) {
        (Some(payload), Some(record)) => payload > record,
        (None, Some(_)) => false,
        (_, None) => true,
    }
}

/// Custom attributes are stored as raw JSON bytes and only decoded when a
/// record is materialized.
pub(crate) fn encode_extra_data(extra: &Map<String, Value>) -> Vec<u8> {
    if extra.is_empty() {
        return Vec::new();
    }
    serde_json::to_vec(extra).unwrap_or_default()
}

/// Upsert one payload.
///
/// A stale payload leaves the record's fields alone, but relationships from
/// `ctx` are still attached and persisted.
pub fn reconcile<R, U>(
    session: &mut Session<U>,
    payload: &R::Payload,
    ctx: &R::Context,
) -> Result<(R, Reconciled), ReconcileError>
where
    R: Reconcile,
    U: UnitOfWork,
{
    let identity = R::identity_of(payload, ctx)?;

    let Some(mut record) = session.load::<R>(&identity)? else {
        let mut record = R::create(identity, payload, ctx);
        record.attach(ctx);
        session.insert(record.clone())?;
        return Ok((record, Reconciled::Created));
    };

    let newer = record.is_newer(payload);
    if newer {
        record.apply(payload);
    }
    let attached = record.attach(ctx);
    if newer || attached {
        session.update(record.clone())?;
    }

    let outcome = if newer {
        Reconciled::Updated
    } else {
        Reconciled::Unchanged
    };
    Ok((record, outcome))
}

/// Upsert many payloads in one pass.
///
/// Identities are resolved up front and fetched with a single batch lookup.
/// All creates happen before any update, then each remaining payload is
/// applied only if it is newer than what is held at that point. The result
/// holds one record per payload, in request order.
pub fn reconcile_many<R, U>(
    session: &mut Session<U>,
    payloads: &[R::Payload],
    ctx: &R::Context,
) -> Result<Vec<R>, ReconcileError>
where
    R: Reconcile,
    U: UnitOfWork,
{
    let identities = payloads
        .iter()
        .map(|payload| R::identity_of(payload, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = session.load_batch::<R>(&identities)?;

    let mut creators = HashSet::new();
    for (index, (payload, identity)) in payloads.iter().zip(&identities).enumerate() {
        if records.contains_key(identity) {
            continue;
        }
        let mut record = R::create(identity.clone(), payload, ctx);
        record.attach(ctx);
        session.insert(record.clone())?;
        records.insert(identity.clone(), record);
        creators.insert(index);
    }

    let mut dirty = BTreeSet::new();
    for (index, (payload, identity)) in payloads.iter().zip(&identities).enumerate() {
        if creators.contains(&index) {
            continue;
        }
        let Some(record) = records.get_mut(identity) else {
            continue;
        };
        let newer = record.is_newer(payload);
        if newer {
            record.apply(payload);
        }
        if record.attach(ctx) || newer {
            dirty.insert(identity.clone());
        }
    }

    for identity in &dirty {
        if let Some(record) = records.get(identity) {
            session.update(record.clone())?;
        }
    }

    Ok(project(&identities, &records))
}

fn project<R: Clone>(order: &[Identity], records: &HashMap<Identity, R>) -> Vec<R> {
    order
        .iter()
        .filter_map(|identity| records.get(identity).cloned())
        .collect()
}
