//! Event → mutation intent dispatch.
//!
//! Routing is pure: it only describes what should change. Applying the
//! intent is [`crate::apply`]'s job.

use chatmirror_protocol::{
    ChannelId, ChannelPayload, Event, EventBody, EventType, MemberPayload, MessagePayload,
    MessageRead, ReactionPayload, UserPayload,
};

/// A routed event: the envelope tag plus what it asks the store to do.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub kind: EventType,
    pub intent: MutationIntent,
}

/// Unread counters carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadTally {
    /// Unread count of the event's channel, when the event is channel-scoped.
    pub channel: Option<u32>,
    pub total: u32,
    pub channels: Option<u32>,
}

/// A declarative store mutation.
///
/// Channel-scoped intents carry the event's `cid` as sent; it may be absent
/// and is resolved against the batch scope when applied.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationIntent {
    UpsertMember {
        cid: Option<ChannelId>,
        /// Channel snapshot shipped with invitation notifications.
        channel: Option<ChannelPayload>,
        member: MemberPayload,
    },
    RemoveMember {
        cid: Option<ChannelId>,
        user_id: String,
    },
    UpsertMessage {
        message: MessagePayload,
        channel: Option<ChannelPayload>,
        cid: Option<ChannelId>,
        unread: Option<UnreadTally>,
    },
    MarkMessageDeleted {
        message: MessagePayload,
        cid: Option<ChannelId>,
    },
    RecordRead {
        cid: Option<ChannelId>,
        read: MessageRead,
    },
    UpsertUser {
        user: UserPayload,
    },
    UpdatePresence {
        user: UserPayload,
    },
    UpsertChannel {
        channel: ChannelPayload,
    },
    UpsertReaction {
        reaction: ReactionPayload,
        message: MessagePayload,
        user: UserPayload,
    },
    RemoveReaction {
        reaction: ReactionPayload,
        message: MessagePayload,
        user: UserPayload,
    },
    UpdateWatcherCount {
        cid: Option<ChannelId>,
        watcher_count: u32,
    },
    UpdateUnreadCounts {
        unread: UnreadTally,
    },
    /// Nothing to store; subscribers are still told the event happened.
    NotifyOnly,
}

impl MutationIntent {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::NotifyOnly)
    }
}

pub fn route(event: &Event) -> Route {
    Route {
        kind: event.kind,
        intent: intent_for(&event.body),
    }
}

fn intent_for(body: &EventBody) -> MutationIntent {
    match body {
        EventBody::HealthCheck { .. }
        | EventBody::ConnectionChanged { .. }
        | EventBody::ConnectionRecovered
        | EventBody::TypingStart { .. }
        | EventBody::TypingStop { .. } => MutationIntent::NotifyOnly,

        EventBody::MessageNew {
            message,
            unread_count,
            total_unread_count,
            channel,
            cid,
        } => MutationIntent::UpsertMessage {
            message: message.clone(),
            channel: channel.clone(),
            cid: cid.clone(),
            unread: Some(UnreadTally {
                channel: Some(*unread_count),
                total: *total_unread_count,
                channels: None,
            }),
        },
        EventBody::MessageUpdated { message, cid } => MutationIntent::UpsertMessage {
            message: message.clone(),
            channel: None,
            cid: cid.clone(),
            unread: None,
        },
        EventBody::MessageDeleted { message, cid } => MutationIntent::MarkMessageDeleted {
            message: message.clone(),
            cid: cid.clone(),
        },
        EventBody::MessageRead { read, cid } => MutationIntent::RecordRead {
            cid: cid.clone(),
            read: read.clone(),
        },

        EventBody::UserUpdated { user } | EventBody::NotificationMutesUpdated { me: user } => {
            MutationIntent::UpsertUser { user: user.clone() }
        }
        EventBody::UserPresenceChanged { user } => {
            MutationIntent::UpdatePresence { user: user.clone() }
        }
        EventBody::UserStartWatching {
            watcher_count, cid, ..
        }
        | EventBody::UserStopWatching {
            watcher_count, cid, ..
        } => MutationIntent::UpdateWatcherCount {
            cid: cid.clone(),
            watcher_count: *watcher_count,
        },

        EventBody::ReactionNew {
            reaction,
            message,
            user,
        } => MutationIntent::UpsertReaction {
            reaction: reaction.clone(),
            message: message.clone(),
            user: user.clone(),
        },
        EventBody::ReactionDeleted {
            reaction,
            message,
            user,
        } => MutationIntent::RemoveReaction {
            reaction: reaction.clone(),
            message: message.clone(),
            user: user.clone(),
        },

        EventBody::MemberAdded { member, cid } | EventBody::MemberUpdated { member, cid } => {
            MutationIntent::UpsertMember {
                cid: cid.clone(),
                channel: None,
                member: member.clone(),
            }
        }
        EventBody::MemberRemoved { user, cid } => MutationIntent::RemoveMember {
            cid: cid.clone(),
            user_id: user.id.clone(),
        },

        EventBody::ChannelUpdated { channel }
        | EventBody::NotificationAddedToChannel { channel } => MutationIntent::UpsertChannel {
            channel: channel.clone(),
        },

        EventBody::NotificationMarkRead {
            total_unread_count,
            unread_channels,
            ..
        } => MutationIntent::UpdateUnreadCounts {
            unread: UnreadTally {
                channel: None,
                total: *total_unread_count,
                channels: Some(*unread_channels),
            },
        },
        EventBody::NotificationInvited { channel, member }
        | EventBody::NotificationInviteAccepted { channel, member } => {
            MutationIntent::UpsertMember {
                cid: Some(channel.cid.clone()),
                channel: Some(channel.clone()),
                member: member.clone(),
            }
        }
        EventBody::NotificationRemovedFromChannel { channel, member } => {
            MutationIntent::RemoveMember {
                cid: Some(channel.cid.clone()),
                user_id: member.user.id.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chatmirror_protocol::decode;
    use serde_json::json;

    use super::*;

    const T1: &str = "2024-03-01T10:00:00Z";

    fn routed(envelope: serde_json::Value) -> Route {
        route(&decode(&envelope).unwrap())
    }

    #[test]
    fn liveness_and_typing_are_notify_only() {
        let health = routed(json!({"type": "health.check", "connection_id": "abc123"}));
        assert_eq!(health.kind, EventType::HealthCheck);
        assert!(!health.intent.is_mutation());

        let typing = routed(json!({"type": "typing.start", "user": {"id": "u1"}, "cid": "messaging:c1"}));
        assert_eq!(typing.intent, MutationIntent::NotifyOnly);

        let offline = routed(json!({"type": "connection.changed", "online": false}));
        assert_eq!(offline.intent, MutationIntent::NotifyOnly);
    }

    #[test]
    fn member_added_upserts_membership() {
        let route = routed(json!({
            "type": "member.added",
            "cid": "messaging:c1",
            "member": {"user": {"id": "u1"}, "created_at": T1, "updated_at": T1},
        }));

        let MutationIntent::UpsertMember { cid, channel, member } = route.intent else {
            panic!("expected a member upsert");
        };
        assert_eq!(cid, Some(ChannelId::from("messaging:c1")));
        assert!(channel.is_none());
        assert_eq!(member.user.id, "u1");
    }

    #[test]
    fn removed_from_channel_uses_channel_cid() {
        let route = routed(json!({
            "type": "notification.removed_from_channel",
            "channel": {"cid": "messaging:c9", "created_at": T1, "updated_at": T1},
            "member": {"user": {"id": "me"}, "created_at": T1, "updated_at": T1},
        }));

        assert_eq!(
            route.intent,
            MutationIntent::RemoveMember {
                cid: Some(ChannelId::from("messaging:c9")),
                user_id: "me".into(),
            }
        );
    }

    #[test]
    fn message_new_carries_unread_counters() {
        let route = routed(json!({
            "type": "notification.message_new",
            "cid": "messaging:c1",
            "message": {"id": "m1", "user": {"id": "u1"}, "created_at": T1, "updated_at": T1},
            "unread_count": 2,
            "total_unread_count": 9,
        }));

        assert_eq!(route.kind, EventType::NotificationMessageNew);
        let MutationIntent::UpsertMessage { unread, .. } = route.intent else {
            panic!("expected a message upsert");
        };
        assert_eq!(
            unread,
            Some(UnreadTally {
                channel: Some(2),
                total: 9,
                channels: None,
            })
        );
    }

    #[test]
    fn watching_updates_watcher_count() {
        let route = routed(json!({
            "type": "user.watching.stop",
            "cid": "messaging:c1",
            "user": {"id": "u1"},
            "watcher_count": 3,
        }));
        assert_eq!(
            route.intent,
            MutationIntent::UpdateWatcherCount {
                cid: Some(ChannelId::from("messaging:c1")),
                watcher_count: 3,
            }
        );
    }
}
