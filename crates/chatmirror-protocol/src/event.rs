use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::{
    ChannelId, ChannelPayload, MemberPayload, MessagePayload, MessageRead, ReactionPayload,
    UserPayload,
};
use crate::Timestamp;

/// Discriminator carried in the `type` field of every real-time envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "health.check")]
    HealthCheck,
    #[serde(rename = "connection.changed")]
    ConnectionChanged,
    #[serde(rename = "connection.recovered")]
    ConnectionRecovered,

    #[serde(rename = "message.new")]
    MessageNew,
    #[serde(rename = "message.updated")]
    MessageUpdated,
    #[serde(rename = "message.deleted")]
    MessageDeleted,
    #[serde(rename = "message.read")]
    MessageRead,

    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.presence.changed")]
    UserPresenceChanged,
    #[serde(rename = "user.watching.start")]
    UserStartWatching,
    #[serde(rename = "user.watching.stop")]
    UserStopWatching,

    #[serde(rename = "reaction.new")]
    ReactionNew,
    #[serde(rename = "reaction.deleted")]
    ReactionDeleted,

    #[serde(rename = "typing.start")]
    TypingStart,
    #[serde(rename = "typing.stop")]
    TypingStop,

    #[serde(rename = "member.added")]
    MemberAdded,
    #[serde(rename = "member.updated")]
    MemberUpdated,
    #[serde(rename = "member.removed")]
    MemberRemoved,

    #[serde(rename = "channel.updated")]
    ChannelUpdated,

    #[serde(rename = "notification.message_new")]
    NotificationMessageNew,
    #[serde(rename = "notification.mutes_updated")]
    NotificationMutesUpdated,
    #[serde(rename = "notification.mark_read")]
    NotificationMarkRead,
    #[serde(rename = "notification.added_to_channel")]
    NotificationAddedToChannel,
    #[serde(rename = "notification.invited")]
    NotificationInvited,
    #[serde(rename = "notification.invite_accepted")]
    NotificationInviteAccepted,
    #[serde(rename = "notification.removed_from_channel")]
    NotificationRemovedFromChannel,
}

impl EventType {
    /// Every tag the decoder understands.
    pub const ALL: [Self; 26] = [
        Self::HealthCheck,
        Self::ConnectionChanged,
        Self::ConnectionRecovered,
        Self::MessageNew,
        Self::MessageUpdated,
        Self::MessageDeleted,
        Self::MessageRead,
        Self::UserUpdated,
        Self::UserPresenceChanged,
        Self::UserStartWatching,
        Self::UserStopWatching,
        Self::ReactionNew,
        Self::ReactionDeleted,
        Self::TypingStart,
        Self::TypingStop,
        Self::MemberAdded,
        Self::MemberUpdated,
        Self::MemberRemoved,
        Self::ChannelUpdated,
        Self::NotificationMessageNew,
        Self::NotificationMutesUpdated,
        Self::NotificationMarkRead,
        Self::NotificationAddedToChannel,
        Self::NotificationInvited,
        Self::NotificationInviteAccepted,
        Self::NotificationRemovedFromChannel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HealthCheck => "health.check",
            Self::ConnectionChanged => "connection.changed",
            Self::ConnectionRecovered => "connection.recovered",
            Self::MessageNew => "message.new",
            Self::MessageUpdated => "message.updated",
            Self::MessageDeleted => "message.deleted",
            Self::MessageRead => "message.read",
            Self::UserUpdated => "user.updated",
            Self::UserPresenceChanged => "user.presence.changed",
            Self::UserStartWatching => "user.watching.start",
            Self::UserStopWatching => "user.watching.stop",
            Self::ReactionNew => "reaction.new",
            Self::ReactionDeleted => "reaction.deleted",
            Self::TypingStart => "typing.start",
            Self::TypingStop => "typing.stop",
            Self::MemberAdded => "member.added",
            Self::MemberUpdated => "member.updated",
            Self::MemberRemoved => "member.removed",
            Self::ChannelUpdated => "channel.updated",
            Self::NotificationMessageNew => "notification.message_new",
            Self::NotificationMutesUpdated => "notification.mutes_updated",
            Self::NotificationMarkRead => "notification.mark_read",
            Self::NotificationAddedToChannel => "notification.added_to_channel",
            Self::NotificationInvited => "notification.invited",
            Self::NotificationInviteAccepted => "notification.invite_accepted",
            Self::NotificationRemovedFromChannel => "notification.removed_from_channel",
        }
    }

    /// Look up a wire tag. `None` for tags outside the known set.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded real-time event.
///
/// `kind` and `created_at` describe the envelope, not the change it carries:
/// `message.new` and `notification.message_new` for the same message are the
/// same logical event, so equality only looks at `body`. Liveness events
/// carry no entity, so any two of them are equal whatever their connection.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventType,
    /// Server-side emission time, used for ordering only.
    pub created_at: Option<Timestamp>,
    pub body: EventBody,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        match (&self.body, &other.body) {
            (EventBody::HealthCheck { .. }, EventBody::HealthCheck { .. }) => true,
            (this, that) => this == that,
        }
    }
}

impl Event {
    /// Liveness events carry no entity payload.
    pub fn is_liveness(&self) -> bool {
        matches!(self.body, EventBody::HealthCheck { .. })
    }
}

/// Payload of an [`Event`], one variant per event shape.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    HealthCheck {
        connection_id: String,
        me: Option<UserPayload>,
    },
    ConnectionChanged {
        online: bool,
    },
    ConnectionRecovered,

    /// Shared by `message.new` and `notification.message_new`.
    MessageNew {
        message: MessagePayload,
        unread_count: u32,
        total_unread_count: u32,
        channel: Option<ChannelPayload>,
        cid: Option<ChannelId>,
    },
    MessageUpdated {
        message: MessagePayload,
        cid: Option<ChannelId>,
    },
    MessageDeleted {
        message: MessagePayload,
        cid: Option<ChannelId>,
    },
    MessageRead {
        read: MessageRead,
        cid: Option<ChannelId>,
    },

    UserUpdated {
        user: UserPayload,
    },
    UserPresenceChanged {
        user: UserPayload,
    },
    UserStartWatching {
        user: UserPayload,
        watcher_count: u32,
        cid: Option<ChannelId>,
    },
    UserStopWatching {
        user: UserPayload,
        watcher_count: u32,
        cid: Option<ChannelId>,
    },

    ReactionNew {
        reaction: ReactionPayload,
        message: MessagePayload,
        user: UserPayload,
    },
    ReactionDeleted {
        reaction: ReactionPayload,
        message: MessagePayload,
        user: UserPayload,
    },

    TypingStart {
        user: UserPayload,
        cid: Option<ChannelId>,
    },
    TypingStop {
        user: UserPayload,
        cid: Option<ChannelId>,
    },

    MemberAdded {
        member: MemberPayload,
        cid: Option<ChannelId>,
    },
    MemberUpdated {
        member: MemberPayload,
        cid: Option<ChannelId>,
    },
    MemberRemoved {
        user: UserPayload,
        cid: Option<ChannelId>,
    },

    ChannelUpdated {
        channel: ChannelPayload,
    },

    NotificationMutesUpdated {
        me: UserPayload,
    },
    NotificationMarkRead {
        unread_count: u32,
        total_unread_count: u32,
        unread_channels: u32,
    },
    NotificationAddedToChannel {
        channel: ChannelPayload,
    },
    NotificationInvited {
        channel: ChannelPayload,
        member: MemberPayload,
    },
    NotificationInviteAccepted {
        channel: ChannelPayload,
        member: MemberPayload,
    },
    NotificationRemovedFromChannel {
        channel: ChannelPayload,
        member: MemberPayload,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health_check(connection_id: &str) -> Event {
        Event {
            kind: EventType::HealthCheck,
            created_at: None,
            body: EventBody::HealthCheck {
                connection_id: connection_id.into(),
                me: None,
            },
        }
    }

    #[test]
    fn liveness_events_are_all_equal() {
        let mut other = health_check("def456");
        if let EventBody::HealthCheck { me, .. } = &mut other.body {
            *me = Some(UserPayload::with_id("me"));
        }
        assert_eq!(health_check("abc123"), other);
        assert_ne!(
            health_check("abc123"),
            Event {
                kind: EventType::ConnectionRecovered,
                created_at: None,
                body: EventBody::ConnectionRecovered,
            }
        );
    }

    #[test]
    fn tags_round_trip_through_lookup() {
        for kind in EventType::ALL {
            assert_eq!(EventType::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(EventType::from_tag("poll.closed"), None);
    }

    #[test]
    fn serde_names_match_wire_tags() {
        for kind in EventType::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().into()));
        }
    }
}
