//! Carries out routed mutation intents inside one store session.

use chatmirror_protocol::{
    ChannelId, ChannelPayload, MemberPayload, MessagePayload, ReactionPayload, Timestamp,
    UserPayload,
};
use chatmirror_store::identity::{member_identity, reaction_identity, read_identity};
use chatmirror_store::reconcile::{
    mark_message_deleted, reconcile_channel, reconcile_member, reconcile_message,
    reconcile_reaction, reconcile_user, record_read, remove_member, remove_reaction,
    set_channel_unread, update_presence, update_unread_counts, update_watcher_count,
    ChannelContext, MemberContext, UnreadCounts,
};
use chatmirror_store::{
    Identity, IdentityError, ReconcileError, Record, Session, StoreError, UnitOfWork,
};
use thiserror::Error;

use crate::router::MutationIntent;

/// Why one intent could not be applied.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The event is unusable on its own (no channel scope, empty key). The
    /// batch carries on without it.
    #[error("{0}")]
    Skip(String),

    /// The store failed; the whole unit of work must be abandoned.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ReconcileError> for ApplyError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Identity(e) => Self::Skip(e.to_string()),
            ReconcileError::Store(e) => Self::Store(e),
        }
    }
}

fn require_cid(cid: Option<ChannelId>, scope: Option<&ChannelId>) -> Result<ChannelId, ApplyError> {
    cid.or_else(|| scope.cloned())
        .ok_or_else(|| ApplyError::Skip("channel event without cid and no channel scope".into()))
}

fn check_user(user: &UserPayload) -> Result<(), IdentityError> {
    Identity::simple(&user.id).map(drop)
}

fn check_member(cid: &ChannelId, member: &MemberPayload) -> Result<(), IdentityError> {
    member_identity(cid, &member.user.id)?;
    check_user(&member.user)
}

fn check_message(message: &MessagePayload) -> Result<(), IdentityError> {
    Identity::simple(&message.id)?;
    check_user(&message.user)
}

fn check_channel(channel: &ChannelPayload) -> Result<(), IdentityError> {
    Identity::simple(channel.cid.as_str())?;
    channel
        .members
        .iter()
        .try_for_each(|member| check_member(&channel.cid, member))
}

fn check_reaction(reaction: &ReactionPayload, user: &UserPayload) -> Result<(), IdentityError> {
    let reactor = reaction.user_id.as_deref().unwrap_or(&user.id);
    reaction_identity(&reaction.message_id, reactor, &reaction.kind).map(drop)
}

/// Derive every identity `intent` writes under. An intent that fails here
/// is rejected before it touches the session, so a skipped event leaves
/// nothing behind in the batch.
fn resolve_identities(intent: &MutationIntent, scope: Option<&ChannelId>) -> Result<(), ApplyError> {
    let resolved = match intent {
        MutationIntent::NotifyOnly | MutationIntent::UpdateUnreadCounts { .. } => Ok(()),

        MutationIntent::UpsertMember {
            cid,
            channel,
            member,
        } => {
            let cid = require_cid(cid.clone(), scope)?;
            channel
                .as_ref()
                .map_or(Ok(()), check_channel)
                .and_then(|()| check_member(&cid, member))
        }
        MutationIntent::RemoveMember { cid, user_id } => {
            let cid = require_cid(cid.clone(), scope)?;
            member_identity(&cid, user_id).map(drop)
        }

        MutationIntent::UpsertMessage {
            message,
            channel,
            cid,
            unread,
        } => {
            let unread_cid = message.cid.as_ref().or(cid.as_ref()).or(scope);
            channel
                .as_ref()
                .map_or(Ok(()), check_channel)
                .and_then(|()| check_message(message))
                .and_then(|()| match (unread_cid, unread.as_ref().and_then(|u| u.channel)) {
                    (Some(cid), Some(_)) => Identity::simple(cid.as_str()).map(drop),
                    _ => Ok(()),
                })
        }
        MutationIntent::MarkMessageDeleted { message, .. } => check_message(message),
        MutationIntent::RecordRead { cid, read } => {
            let cid = require_cid(cid.clone(), scope)?;
            read_identity(&cid, &read.user.id).map(drop)
        }

        MutationIntent::UpsertUser { user } | MutationIntent::UpdatePresence { user } => {
            check_user(user)
        }
        MutationIntent::UpsertChannel { channel } => check_channel(channel),
        MutationIntent::UpdateWatcherCount { cid, .. } => {
            let cid = require_cid(cid.clone(), scope)?;
            Identity::simple(cid.as_str()).map(drop)
        }

        MutationIntent::UpsertReaction {
            reaction,
            message,
            user,
        } => check_user(user)
            .and_then(|()| check_message(message))
            .and_then(|()| check_reaction(reaction, user)),
        // Removal never writes the reacting user.
        MutationIntent::RemoveReaction {
            reaction,
            message,
            user,
        } => check_message(message).and_then(|()| check_reaction(reaction, user)),
    };
    resolved.map_err(|e| ApplyError::Skip(e.to_string()))
}

/// Apply one intent. Returns the identity of the primary record touched,
/// if there is one.
///
/// `stamp` is the envelope's `created_at`; `scope` is the channel assumed
/// for channel events that do not name one. Every identity the intent needs
/// is derived before the first write.
pub fn apply_intent<U: UnitOfWork>(
    session: &mut Session<U>,
    intent: MutationIntent,
    stamp: Option<Timestamp>,
    scope: Option<&ChannelId>,
) -> Result<Option<Identity>, ApplyError> {
    resolve_identities(&intent, scope)?;

    let identity = match intent {
        MutationIntent::NotifyOnly => None,

        MutationIntent::UpsertMember {
            cid,
            channel,
            member,
        } => {
            let cid = require_cid(cid, scope)?;
            if let Some(channel) = &channel {
                reconcile_channel(session, channel, &ChannelContext::default())?;
            }
            let (record, _) = reconcile_member(session, &member, &MemberContext::new(cid))?;
            Some(record.identity)
        }
        MutationIntent::RemoveMember { cid, user_id } => {
            let cid = require_cid(cid, scope)?;
            if !remove_member(session, &cid, &user_id)? {
                tracing::debug!(cid = %cid, user = %user_id, "member already absent");
            }
            Some(member_identity(&cid, &user_id).map_err(ReconcileError::from)?)
        }

        MutationIntent::UpsertMessage {
            message,
            channel,
            cid,
            unread,
        } => {
            let cid = message.cid.clone().or(cid).or_else(|| scope.cloned());
            if let Some(channel) = &channel {
                reconcile_channel(session, channel, &ChannelContext::default())?;
            }
            let (record, _) = reconcile_message(session, &message, cid.as_ref())?;

            if let Some(unread) = unread {
                if let (Some(cid), Some(count)) = (&cid, unread.channel) {
                    set_channel_unread(session, cid, count)?;
                }
                update_unread_counts(
                    session,
                    &UnreadCounts {
                        total_unread_count: unread.total,
                        unread_channels: unread.channels,
                        stamp,
                    },
                )?;
            }
            Some(record.identity)
        }
        MutationIntent::MarkMessageDeleted { message, cid } => {
            let cid = message.cid.clone().or(cid).or_else(|| scope.cloned());
            let record = mark_message_deleted(session, &message, cid.as_ref(), stamp)?;
            Some(record.identity)
        }
        MutationIntent::RecordRead { cid, read } => {
            let cid = require_cid(cid, scope)?;
            let (record, _) = record_read(session, &cid, &read)?;
            Some(record.identity)
        }

        MutationIntent::UpsertUser { user } => {
            let (record, _) = reconcile_user(session, &user)?;
            Some(record.identity)
        }
        MutationIntent::UpdatePresence { user } => {
            let record = update_presence(session, &user)?;
            Some(record.identity)
        }

        MutationIntent::UpsertChannel { channel } => {
            let (record, _) = reconcile_channel(session, &channel, &ChannelContext::default())?;
            Some(record.identity)
        }
        MutationIntent::UpdateWatcherCount { cid, watcher_count } => {
            let cid = require_cid(cid, scope)?;
            update_watcher_count(session, &cid, watcher_count)?.map(|c| c.identity().clone())
        }
        MutationIntent::UpdateUnreadCounts { unread } => {
            let (record, _) = update_unread_counts(
                session,
                &UnreadCounts {
                    total_unread_count: unread.total,
                    unread_channels: unread.channels,
                    stamp,
                },
            )?;
            Some(record.identity)
        }

        MutationIntent::UpsertReaction {
            reaction,
            message,
            user,
        } => {
            let (record, _) = reconcile_reaction(session, &reaction, &message, &user)?;
            Some(record.identity)
        }
        MutationIntent::RemoveReaction {
            reaction,
            message,
            user,
        } => {
            remove_reaction(session, &reaction, &message, &user)?;
            let reactor = reaction.user_id.as_deref().unwrap_or(&user.id);
            Some(
                reaction_identity(&reaction.message_id, reactor, &reaction.kind)
                    .map_err(ReconcileError::from)?,
            )
        }
    };
    Ok(identity)
}
