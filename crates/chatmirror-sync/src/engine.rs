//! The synchronization engine: decode → route → reconcile → commit → notify.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chatmirror_protocol::{
    decode, ChannelId, ChannelPayload, ChannelsQuery, ChannelsResponse, DecodeError,
    MemberListQuery, MemberPayload, Sorting,
};
use chatmirror_store::identity::member_identity;
use chatmirror_store::materialize::{
    materialize_channel, materialize_member, materialize_message, ChannelMember, ChatChannel,
    ChatMessage,
};
use chatmirror_store::reconcile::{
    reconcile_members, reconcile_messages, record_read, update_watcher_count, ChannelContext,
    MemberContext,
};
use chatmirror_store::{
    reconcile_many, ChannelRecord, Identity, MemberRecord, MessageRecord, ReconcileError,
    Session, Store, UnreadCountsRecord, UserRecord,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::apply::{apply_intent, ApplyError};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::notification::{Notification, SyncSignal};
use crate::router::{route, Route};

/// An envelope that was dropped from a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEvent {
    /// Position in the submitted batch.
    pub index: usize,
    pub reason: String,
}

/// Outcome of [`SyncEngine::apply_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Events routed and applied, notify-only events included.
    pub applied: usize,
    /// Tags this client does not know.
    pub unsupported: Vec<String>,
    /// Known events that were malformed or could not be scoped.
    pub skipped: Vec<SkippedEvent>,
}

pub struct SyncEngine<S: Store> {
    store: S,
    config: SyncConfig,
    notifications: broadcast::Sender<Notification>,
}

impl<S: Store> SyncEngine<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            store,
            config,
            notifications,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub(crate) fn publish_signal(&self, signal: SyncSignal) {
        self.publish(Notification::Signal { signal });
    }

    fn publish(&self, notification: Notification) {
        // No subscribers is not an error.
        let _ = self.notifications.send(notification);
    }

    /// Apply a batch of raw envelopes as one unit of work.
    ///
    /// Bad envelopes are reported and skipped; a store failure abandons the
    /// whole batch. `scope` (or the configured default channel) is used for
    /// channel events without a `cid`. Subscribers hear about the batch only
    /// once it has committed.
    pub fn apply_batch(
        &self,
        envelopes: &[Value],
        scope: Option<&ChannelId>,
    ) -> Result<BatchReport, SyncError> {
        let scope = scope.or(self.config.default_channel.as_ref());
        let mut report = BatchReport::default();
        let mut pending = Vec::with_capacity(envelopes.len());
        let mut session = Session::new(self.store.begin()?);

        for (index, envelope) in envelopes.iter().enumerate() {
            let event = match decode(envelope) {
                Ok(event) => event,
                Err(DecodeError::UnsupportedType(tag)) => {
                    tracing::debug!(index, tag = %tag, "dropping unsupported event");
                    report.unsupported.push(tag);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping malformed event");
                    report.skipped.push(SkippedEvent {
                        index,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let Route { kind, intent } = route(&event);
            match apply_intent(&mut session, intent, event.created_at, scope) {
                Ok(identity) => {
                    report.applied += 1;
                    pending.push(Notification::Event { kind, identity });
                }
                Err(ApplyError::Skip(reason)) => {
                    tracing::warn!(index, kind = %kind, reason = %reason, "skipping event");
                    report.skipped.push(SkippedEvent { index, reason });
                }
                Err(ApplyError::Store(e)) => {
                    tracing::error!(index, kind = %kind, error = %e, "store failure, batch rolled back");
                    return Err(e.into());
                }
            }
        }

        session.commit()?;
        for notification in pending {
            self.publish(notification);
        }

        tracing::debug!(
            applied = report.applied,
            unsupported = report.unsupported.len(),
            skipped = report.skipped.len(),
            "batch applied"
        );
        Ok(report)
    }

    /// [`Self::apply_batch`] on the blocking pool.
    pub async fn apply_batch_async(
        self: &Arc<Self>,
        envelopes: Vec<Value>,
        scope: Option<ChannelId>,
    ) -> Result<BatchReport, SyncError> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.apply_batch(&envelopes, scope.as_ref()))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }

    /// Store the result of a channel list query: channels, their members,
    /// latest messages, read states and watcher counts. Channels are linked
    /// to the query when one is given.
    pub fn ingest_channels(
        &self,
        response: &ChannelsResponse,
        query: Option<&ChannelsQuery>,
    ) -> Result<Vec<ChatChannel>, SyncError> {
        let ctx = ChannelContext {
            query: query.map(ChannelsQuery::query_hash),
        };
        let mut session = Session::new(self.store.begin()?);

        // Every channel in one batch lookup; members are linked afterwards.
        let payloads: Vec<ChannelPayload> =
            response.channels.iter().map(|state| state.channel.clone()).collect();
        let identities = reconcile_many::<ChannelRecord, _>(&mut session, &payloads, &ctx)?
            .into_iter()
            .map(|channel| channel.identity)
            .collect::<Vec<_>>();

        for state in &response.channels {
            let cid = &state.channel.cid;
            let member_ctx = MemberContext::new(cid.clone());
            if !state.channel.members.is_empty() {
                reconcile_members(&mut session, &state.channel.members, &member_ctx)?;
            }
            reconcile_members(&mut session, &state.members, &member_ctx)?;
            reconcile_messages(&mut session, &state.messages, Some(cid))?;
            for read in &state.read {
                record_read(&mut session, cid, read)?;
            }
            if let Some(watchers) = state.watcher_count {
                update_watcher_count(&mut session, cid, watchers)?;
            }
        }

        let stored = session.load_batch::<ChannelRecord>(&identities)?;
        session.commit()?;
        let channels: Vec<ChatChannel> = identities
            .iter()
            .filter_map(|identity| stored.get(identity))
            .map(materialize_channel)
            .collect();

        tracing::debug!(channels = channels.len(), "channel query ingested");
        self.publish(Notification::ChannelsIngested {
            cids: channels.iter().map(|c| c.cid.clone()).collect(),
        });
        Ok(channels)
    }

    /// Store one page of a member list query and return the materialized
    /// members in the order the server sent them.
    pub fn ingest_members(
        &self,
        query: &MemberListQuery,
        members: &[MemberPayload],
    ) -> Result<Vec<ChannelMember>, SyncError> {
        let ctx = MemberContext::new(query.cid.clone()).with_query(query.query_hash());
        let mut session = Session::new(self.store.begin()?);

        let records = reconcile_members(&mut session, members, &ctx)?;
        let user_ids = user_identities(&records)?;
        let users = session.load_batch::<UserRecord>(&user_ids)?;
        session.commit()?;

        let views = materialize_members(&records, &users);
        self.publish(Notification::MembersIngested {
            cid: query.cid.clone(),
            count: views.len(),
        });
        Ok(views)
    }

    pub fn member(&self, cid: &ChannelId, user_id: &str) -> Result<Option<ChannelMember>, SyncError> {
        let identity = member_identity(cid, user_id).map_err(ReconcileError::from)?;
        let Some(member) = self.store.get::<MemberRecord>(&identity)? else {
            return Ok(None);
        };
        let user_identity = Identity::simple(&member.user_id).map_err(ReconcileError::from)?;
        let user = self.store.get::<UserRecord>(&user_identity)?;
        Ok(Some(materialize_member(&member, user.as_ref())))
    }

    /// Members linked to a stored channel, newest membership first.
    pub fn channel_members(&self, cid: &ChannelId) -> Result<Vec<ChannelMember>, SyncError> {
        let mut members = self.load_channel_members(cid)?;
        sort_members(&mut members, &[]);
        Ok(members)
    }

    /// Stored members that a member list query has returned so far, in the
    /// query's sort order.
    pub fn query_members(&self, query: &MemberListQuery) -> Result<Vec<ChannelMember>, SyncError> {
        let hash = query.query_hash();
        let (records, users) = self.load_channel_member_records(&query.cid)?;
        let mut members: Vec<ChannelMember> = records
            .iter()
            .filter(|m| m.queries.contains(&hash))
            .map(|m| materialize_member(m, users.get(&m.user_id)))
            .collect();
        sort_members(&mut members, &query.sort);
        Ok(members)
    }

    /// The most recently active members of a channel.
    pub fn last_active_members(
        &self,
        cid: &ChannelId,
        limit: usize,
    ) -> Result<Vec<ChannelMember>, SyncError> {
        let mut members = self.load_channel_members(cid)?;
        sort_members(
            &mut members,
            &[Sorting::new("last_active", false), Sorting::new("created_at", false)],
        );
        members.truncate(limit);
        Ok(members)
    }

    pub fn channel(&self, cid: &ChannelId) -> Result<Option<ChatChannel>, SyncError> {
        let identity = Identity::simple(cid.as_str()).map_err(ReconcileError::from)?;
        let channel = self.store.get::<ChannelRecord>(&identity)?;
        Ok(channel.as_ref().map(materialize_channel))
    }

    pub fn message(&self, id: &str) -> Result<Option<ChatMessage>, SyncError> {
        let identity = Identity::simple(id).map_err(ReconcileError::from)?;
        let message = self.store.get::<MessageRecord>(&identity)?;
        Ok(message.as_ref().map(materialize_message))
    }

    pub fn unread_counts(&self) -> Result<Option<UnreadCountsRecord>, SyncError> {
        let identity = Identity::simple(UnreadCountsRecord::KEY).map_err(ReconcileError::from)?;
        Ok(self.store.get(&identity)?)
    }

    fn load_channel_members(&self, cid: &ChannelId) -> Result<Vec<ChannelMember>, SyncError> {
        let (records, users) = self.load_channel_member_records(cid)?;
        Ok(records
            .iter()
            .map(|m| materialize_member(m, users.get(&m.user_id)))
            .collect())
    }

    /// Members of a channel plus their users keyed by user id.
    fn load_channel_member_records(
        &self,
        cid: &ChannelId,
    ) -> Result<(Vec<MemberRecord>, HashMap<String, UserRecord>), SyncError> {
        let identity = Identity::simple(cid.as_str()).map_err(ReconcileError::from)?;
        let Some(channel) = self.store.get::<ChannelRecord>(&identity)? else {
            return Ok((Vec::new(), HashMap::new()));
        };

        let member_ids: Vec<Identity> = channel.members.into_iter().collect();
        let records: Vec<MemberRecord> = self
            .store
            .get_batch::<MemberRecord>(&member_ids)?
            .into_values()
            .collect();
        let users = self
            .store
            .get_batch::<UserRecord>(&user_identities(&records)?)?
            .into_values()
            .map(|u| (u.id.clone(), u))
            .collect();
        Ok((records, users))
    }
}

fn user_identities(members: &[MemberRecord]) -> Result<Vec<Identity>, SyncError> {
    members
        .iter()
        .map(|m| Identity::simple(&m.user_id).map_err(|e| SyncError::from(ReconcileError::from(e))))
        .collect()
}

fn materialize_members(
    records: &[MemberRecord],
    users: &HashMap<Identity, UserRecord>,
) -> Vec<ChannelMember> {
    records
        .iter()
        .map(|m| {
            let user = Identity::simple(&m.user_id)
                .ok()
                .and_then(|identity| users.get(&identity));
            materialize_member(m, user)
        })
        .collect()
}

/// Sort by the given keys in order. Unknown fields are ignored; with no
/// usable key, newest membership first.
fn sort_members(members: &mut [ChannelMember], sort: &[Sorting]) {
    let default = [Sorting::new("created_at", false)];
    let keys: Vec<&Sorting> = sort.iter().filter(|s| is_member_sort_field(&s.field)).collect();
    let keys: Vec<&Sorting> = if keys.is_empty() {
        default.iter().collect()
    } else {
        keys
    };

    members.sort_by(|a, b| {
        keys.iter()
            .map(|key| {
                let ordering = compare_member_field(a, b, &key.field);
                if key.is_ascending() {
                    ordering
                } else {
                    ordering.reverse()
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

fn is_member_sort_field(field: &str) -> bool {
    matches!(
        field,
        "created_at" | "updated_at" | "name" | "user_id" | "id" | "last_active"
    )
}

fn compare_member_field(a: &ChannelMember, b: &ChannelMember, field: &str) -> Ordering {
    match field {
        "created_at" => a.member_created_at.cmp(&b.member_created_at),
        "updated_at" => a.member_updated_at.cmp(&b.member_updated_at),
        "name" => a.user.name.cmp(&b.user.name),
        "user_id" | "id" => a.user.id.cmp(&b.user.id),
        "last_active" => a.user.last_active_at.cmp(&b.user.last_active_at),
        _ => Ordering::Equal,
    }
}
