//! Envelope → [`Event`] decoding.
//!
//! The `type` tag is read first and selects one decode path. Each path names
//! the fields it needs; nothing else in the envelope is looked at, so an
//! event never fails because of a field that belongs to another shape.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::event::{Event, EventBody, EventType};
use crate::payload::MessageRead;

/// Decode a raw JSON envelope.
pub fn decode_slice(raw: &[u8]) -> Result<Event, DecodeError> {
    let envelope: Value = serde_json::from_slice(raw)?;
    decode(&envelope)
}

/// Decode an already-parsed envelope.
pub fn decode(envelope: &Value) -> Result<Event, DecodeError> {
    let map = envelope.as_object().ok_or(DecodeError::NotAnObject)?;
    let kind = read_tag(map)?;
    let fields = Fields { kind, map };

    // Liveness pings carry nothing but the connection; even the ordering
    // stamp is left alone.
    let created_at = if kind == EventType::HealthCheck {
        None
    } else {
        fields.optional("created_at")?
    };
    let body = decode_body(&fields)?;
    Ok(Event {
        kind,
        created_at,
        body,
    })
}

fn read_tag(map: &Map<String, Value>) -> Result<EventType, DecodeError> {
    let tag = match map.get("type") {
        None | Some(Value::Null) => {
            return Err(DecodeError::MissingField {
                event_type: "envelope".into(),
                field: "type",
            })
        }
        Some(Value::String(tag)) => tag,
        Some(other) => {
            return Err(DecodeError::MalformedField {
                event_type: "envelope".into(),
                field: "type",
                reason: format!("expected a string, found {other}"),
            })
        }
    };
    EventType::from_tag(tag).ok_or_else(|| DecodeError::UnsupportedType(tag.clone()))
}

fn decode_body(f: &Fields<'_>) -> Result<EventBody, DecodeError> {
    let body = match f.kind {
        EventType::HealthCheck => EventBody::HealthCheck {
            connection_id: f.required("connection_id")?,
            me: f.optional("me")?,
        },
        EventType::ConnectionChanged => EventBody::ConnectionChanged {
            online: f.required("online")?,
        },
        EventType::ConnectionRecovered => EventBody::ConnectionRecovered,

        EventType::MessageNew | EventType::NotificationMessageNew => EventBody::MessageNew {
            message: f.required("message")?,
            unread_count: f.required("unread_count")?,
            total_unread_count: f.required("total_unread_count")?,
            channel: f.optional("channel")?,
            cid: f.optional("cid")?,
        },
        EventType::MessageUpdated => EventBody::MessageUpdated {
            message: f.required("message")?,
            cid: f.optional("cid")?,
        },
        EventType::MessageDeleted => EventBody::MessageDeleted {
            message: f.required("message")?,
            cid: f.optional("cid")?,
        },
        EventType::MessageRead => EventBody::MessageRead {
            read: MessageRead {
                user: f.required("user")?,
                last_read: f.required("created_at")?,
            },
            cid: f.optional("cid")?,
        },

        EventType::UserUpdated => EventBody::UserUpdated {
            user: f.required("user")?,
        },
        EventType::UserPresenceChanged => EventBody::UserPresenceChanged {
            user: f.required("user")?,
        },
        EventType::UserStartWatching => EventBody::UserStartWatching {
            user: f.required("user")?,
            watcher_count: f.required("watcher_count")?,
            cid: f.optional("cid")?,
        },
        EventType::UserStopWatching => EventBody::UserStopWatching {
            user: f.required("user")?,
            watcher_count: f.required("watcher_count")?,
            cid: f.optional("cid")?,
        },

        EventType::ReactionNew => EventBody::ReactionNew {
            reaction: f.required("reaction")?,
            message: f.required("message")?,
            user: f.required("user")?,
        },
        EventType::ReactionDeleted => EventBody::ReactionDeleted {
            reaction: f.required("reaction")?,
            message: f.required("message")?,
            user: f.required("user")?,
        },

        EventType::TypingStart => EventBody::TypingStart {
            user: f.required("user")?,
            cid: f.optional("cid")?,
        },
        EventType::TypingStop => EventBody::TypingStop {
            user: f.required("user")?,
            cid: f.optional("cid")?,
        },

        EventType::MemberAdded => EventBody::MemberAdded {
            member: f.required("member")?,
            cid: f.optional("cid")?,
        },
        EventType::MemberUpdated => EventBody::MemberUpdated {
            member: f.required("member")?,
            cid: f.optional("cid")?,
        },
        EventType::MemberRemoved => EventBody::MemberRemoved {
            user: f.required("user")?,
            cid: f.optional("cid")?,
        },

        EventType::ChannelUpdated => EventBody::ChannelUpdated {
            channel: f.required("channel")?,
        },

        EventType::NotificationMutesUpdated => EventBody::NotificationMutesUpdated {
            me: f.required("me")?,
        },
        EventType::NotificationMarkRead => EventBody::NotificationMarkRead {
            unread_count: f.required("unread_count")?,
            total_unread_count: f.required("total_unread_count")?,
            unread_channels: f.required("unread_channels")?,
        },
        EventType::NotificationAddedToChannel => EventBody::NotificationAddedToChannel {
            channel: f.required("channel")?,
        },
        EventType::NotificationInvited => EventBody::NotificationInvited {
            channel: f.required("channel")?,
            member: f.required("member")?,
        },
        EventType::NotificationInviteAccepted => EventBody::NotificationInviteAccepted {
            channel: f.required("channel")?,
            member: f.required("member")?,
        },
        EventType::NotificationRemovedFromChannel => EventBody::NotificationRemovedFromChannel {
            channel: f.required("channel")?,
            member: f.required("member")?,
        },
    };
    Ok(body)
}

/// Typed, strict access to the top-level fields of one envelope.
struct Fields<'a> {
    kind: EventType,
    map: &'a Map<String, Value>,
}

impl Fields<'_> {
    fn required<T: DeserializeOwned>(&self, field: &'static str) -> Result<T, DecodeError> {
        self.optional(field)?
            .ok_or_else(|| DecodeError::MissingField {
                event_type: self.kind.to_string(),
                field,
            })
    }

    /// `null` is treated the same as an absent field.
    fn optional<T: DeserializeOwned>(&self, field: &'static str) -> Result<Option<T>, DecodeError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| DecodeError::MalformedField {
                    event_type: self.kind.to_string(),
                    field,
                    reason: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const T1: &str = "2024-03-01T10:00:00Z";

    fn message_json(id: &str) -> Value {
        json!({
            "id": id,
            "text": "hello",
            "user": {"id": "u1"},
            "created_at": T1,
            "updated_at": T1,
        })
    }

    #[test]
    fn health_check_needs_only_connection_id() {
        let event = decode(&json!({"type": "health.check", "connection_id": "abc123"})).unwrap();

        assert!(event.is_liveness());
        assert_eq!(
            event.body,
            EventBody::HealthCheck {
                connection_id: "abc123".into(),
                me: None,
            }
        );
    }

    #[test]
    fn health_check_ignores_fields_of_other_shapes() {
        let event = decode(&json!({
            "type": "health.check",
            "connection_id": "abc123",
            "created_at": 42,
            "me": {"id": "me"},
        }))
        .unwrap();

        let EventBody::HealthCheck { me, .. } = event.body else {
            panic!("expected a liveness event");
        };
        assert_eq!(me.unwrap().id, "me");
    }

    #[test]
    fn health_check_without_connection_id_is_missing_field() {
        let err = decode(&json!({"type": "health.check"})).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingField { field: "connection_id", .. }
        ));
    }

    #[test]
    fn message_new_requires_message() {
        let err = decode(&json!({
            "type": "message.new",
            "unread_count": 1,
            "total_unread_count": 3,
        }))
        .unwrap_err();

        match err {
            DecodeError::MissingField { event_type, field } => {
                assert_eq!(event_type, "message.new");
                assert_eq!(field, "message");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn message_new_channel_is_optional() {
        let event = decode(&json!({
            "type": "message.new",
            "message": message_json("m1"),
            "unread_count": 1,
            "total_unread_count": 3,
        }))
        .unwrap();

        let EventBody::MessageNew {
            channel,
            unread_count,
            total_unread_count,
            ..
        } = event.body
        else {
            panic!("expected message.new");
        };
        assert!(channel.is_none());
        assert_eq!((unread_count, total_unread_count), (1, 3));
    }

    #[test]
    fn counters_are_not_coerced_from_strings() {
        let err = decode(&json!({
            "type": "message.new",
            "message": message_json("m1"),
            "unread_count": "1",
            "total_unread_count": 3,
        }))
        .unwrap_err();

        assert!(matches!(
            err,
            DecodeError::MalformedField { field: "unread_count", .. }
        ));
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = decode(&json!({"type": "poll.closed", "poll": {}})).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(err.to_string(), "unsupported event type: poll.closed");
    }

    #[test]
    fn envelope_shape_errors() {
        assert!(matches!(decode(&json!([1, 2])), Err(DecodeError::NotAnObject)));
        assert!(matches!(
            decode(&json!({"connection_id": "x"})),
            Err(DecodeError::MissingField { field: "type", .. })
        ));
        assert!(matches!(
            decode(&json!({"type": 7})),
            Err(DecodeError::MalformedField { field: "type", .. })
        ));
        assert!(matches!(
            decode_slice(b"{not json"),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn equality_ignores_tag_and_stamp() {
        let direct = decode(&json!({
            "type": "message.new",
            "message": message_json("m1"),
            "unread_count": 1,
            "total_unread_count": 3,
            "created_at": "2024-03-01T10:00:01Z",
        }))
        .unwrap();
        let notification = decode(&json!({
            "type": "notification.message_new",
            "message": message_json("m1"),
            "unread_count": 1,
            "total_unread_count": 3,
            "created_at": "2024-03-01T10:00:05Z",
        }))
        .unwrap();

        assert_ne!(direct.kind, notification.kind);
        assert_eq!(direct, notification);
    }

    #[test]
    fn equality_compares_counters() {
        let a = decode(&json!({
            "type": "notification.mark_read",
            "unread_count": 0,
            "total_unread_count": 4,
            "unread_channels": 2,
        }))
        .unwrap();
        let b = decode(&json!({
            "type": "notification.mark_read",
            "unread_count": 0,
            "total_unread_count": 5,
            "unread_channels": 2,
        }))
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn member_added_decodes_member_and_cid() {
        let event = decode(&json!({
            "type": "member.added",
            "cid": "messaging:c1",
            "member": {
                "user": {"id": "u1"},
                "created_at": T1,
                "updated_at": T1,
            },
        }))
        .unwrap();

        let EventBody::MemberAdded { member, cid } = event.body else {
            panic!("expected member.added");
        };
        assert_eq!(member.user.id, "u1");
        assert_eq!(cid.unwrap().as_str(), "messaging:c1");
    }

    #[test]
    fn message_read_takes_last_read_from_created_at() {
        let event = decode(&json!({
            "type": "message.read",
            "user": {"id": "u2"},
            "created_at": T1,
        }))
        .unwrap();

        let EventBody::MessageRead { read, .. } = event.body else {
            panic!("expected message.read");
        };
        assert_eq!(read.user.id, "u2");
        assert_eq!(read.last_read.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }
}
