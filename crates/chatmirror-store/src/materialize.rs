//! Read-facing views built from stored records.
//!
//! Materialization never fails: missing optional data falls back to
//! defaults and undecodable custom attributes become an empty map.

use std::collections::BTreeSet;

use chatmirror_protocol::{ChannelId, Timestamp};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::record::{ChannelRecord, MemberRecord, MessageRecord, UserRecord};

/// A member's role within one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    #[default]
    Member,
    Moderator,
    Admin,
    Owner,
}

impl MemberRole {
    /// Parse a stored role. Absent or unknown roles are plain members.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("moderator" | "channel_moderator") => Self::Moderator,
            Some("admin") => Self::Admin,
            Some("owner" | "channel_owner") => Self::Owner,
            _ => Self::Member,
        }
    }
}

/// Decode an extra-data blob. Corrupt blobs are logged and dropped so they
/// never block the core fields.
pub fn decode_extra_data(owner: &str, raw: &[u8]) -> Map<String, Value> {
    if raw.is_empty() {
        return Map::new();
    }
    match serde_json::from_slice::<Map<String, Value>>(raw) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(owner, error = %e, "failed to decode extra data, using empty map");
            Map::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub is_online: bool,
    pub is_banned: bool,
    pub user_role: Option<String>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub last_active_at: Option<Timestamp>,
    pub teams: BTreeSet<String>,
    pub extra_data: Map<String, Value>,
}

pub fn materialize_user(user: &UserRecord) -> ChatUser {
    ChatUser {
        id: user.id.clone(),
        name: user.name.clone(),
        image_url: user.image_url.clone(),
        is_online: user.online,
        is_banned: user.banned,
        user_role: user.role.clone(),
        created_at: user.created_at,
        updated_at: user.updated_at,
        last_active_at: user.last_active_at,
        teams: user.teams.iter().cloned().collect(),
        extra_data: decode_extra_data(&user.id, &user.extra_data),
    }
}

/// A channel member as shown to the application: the user's profile merged
/// with the membership's channel-scoped state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMember {
    #[serde(flatten)]
    pub user: ChatUser,
    pub cid: ChannelId,
    pub member_role: MemberRole,
    pub member_created_at: Timestamp,
    pub member_updated_at: Timestamp,
    pub is_invited: bool,
    pub invite_accepted_at: Option<Timestamp>,
    pub invite_rejected_at: Option<Timestamp>,
    pub is_banned_from_channel: bool,
    pub is_shadow_banned_from_channel: bool,
    pub ban_expires_at: Option<Timestamp>,
}

/// Build a member view. `user` is the referenced user record; when it has
/// not been stored yet the view carries only the user id.
pub fn materialize_member(member: &MemberRecord, user: Option<&UserRecord>) -> ChannelMember {
    let user = user.map_or_else(
        || ChatUser {
            id: member.user_id.clone(),
            name: None,
            image_url: None,
            is_online: false,
            is_banned: false,
            user_role: None,
            created_at: None,
            updated_at: None,
            last_active_at: None,
            teams: BTreeSet::new(),
            extra_data: Map::new(),
        },
        materialize_user,
    );

    ChannelMember {
        user,
        cid: member.cid.clone(),
        member_role: MemberRole::from_raw(member.role.as_deref()),
        member_created_at: member.created_at,
        member_updated_at: member.updated_at,
        is_invited: member.invite.is_invited,
        invite_accepted_at: member.invite.accepted_at,
        invite_rejected_at: member.invite.rejected_at,
        is_banned_from_channel: member.ban.is_banned,
        is_shadow_banned_from_channel: member.ban.is_shadow_banned,
        ban_expires_at: member.ban.expires_at,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChannel {
    pub cid: ChannelId,
    pub channel_type: Option<String>,
    pub name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub member_count: u32,
    pub watcher_count: u32,
    pub unread_count: u32,
    pub extra_data: Map<String, Value>,
}

pub fn materialize_channel(channel: &ChannelRecord) -> ChatChannel {
    ChatChannel {
        cid: channel.cid.clone(),
        channel_type: channel.cid.channel_type().map(str::to_string),
        name: channel.name.clone(),
        created_at: channel.created_at,
        updated_at: channel.updated_at,
        member_count: channel.member_count,
        watcher_count: channel.watcher_count,
        unread_count: channel.unread_count,
        extra_data: decode_extra_data(channel.cid.as_str(), &channel.extra_data),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub cid: Option<ChannelId>,
    pub author_id: String,
    pub text: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
    pub is_deleted: bool,
    pub parent_id: Option<String>,
    pub reply_count: u32,
    pub extra_data: Map<String, Value>,
}

pub fn materialize_message(message: &MessageRecord) -> ChatMessage {
    ChatMessage {
        id: message.id.clone(),
        cid: message.cid.clone(),
        author_id: message.user_id.clone(),
        text: message.text.clone(),
        created_at: message.created_at,
        updated_at: message.updated_at,
        deleted_at: message.deleted_at,
        is_deleted: message.deleted_at.is_some(),
        parent_id: message.parent_id.clone(),
        reply_count: message.reply_count,
        extra_data: decode_extra_data(&message.id, &message.extra_data),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::identity::member_identity;
    use crate::record::{BanState, InviteState};

    fn member(role: Option<&str>) -> MemberRecord {
        let cid = ChannelId::from("messaging:c1");
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        MemberRecord {
            identity: member_identity(&cid, "u1").unwrap(),
            cid,
            user_id: "u1".into(),
            role: role.map(str::to_string),
            created_at: at,
            updated_at: at,
            ban: BanState::default(),
            invite: InviteState::default(),
            queries: BTreeSet::new(),
        }
    }

    fn user(extra: &[u8]) -> UserRecord {
        UserRecord {
            identity: crate::identity::Identity::simple("u1").unwrap(),
            id: "u1".into(),
            name: Some("Ada".into()),
            image_url: None,
            role: Some("user".into()),
            online: true,
            banned: false,
            created_at: None,
            updated_at: None,
            last_active_at: None,
            teams: vec!["blue".into(), "red".into()],
            extra_data: extra.to_vec(),
        }
    }

    #[test]
    fn absent_role_defaults_to_member() {
        let view = materialize_member(&member(None), None);
        assert_eq!(view.member_role, MemberRole::Member);
        assert_eq!(view.user.id, "u1");
    }

    #[test]
    fn roles_map_with_channel_aliases() {
        assert_eq!(MemberRole::from_raw(Some("channel_moderator")), MemberRole::Moderator);
        assert_eq!(MemberRole::from_raw(Some("owner")), MemberRole::Owner);
        assert_eq!(MemberRole::from_raw(Some("channel_wizard")), MemberRole::Member);
    }

    #[test]
    fn corrupt_extra_data_does_not_block_core_fields() {
        let view = materialize_member(&member(Some("admin")), Some(&user(b"{not json")));

        assert!(view.user.extra_data.is_empty());
        assert_eq!(view.user.name.as_deref(), Some("Ada"));
        assert_eq!(view.member_role, MemberRole::Admin);
    }

    #[test]
    fn extra_data_is_decoded() {
        let view = materialize_user(&user(br#"{"colour":"green"}"#));
        assert_eq!(view.extra_data.get("colour"), Some(&Value::String("green".into())));
    }

    #[test]
    fn member_view_serializes_camel_case_flat() {
        let view = materialize_member(&member(Some("moderator")), Some(&user(b"")));
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["id"], "u1");
        assert_eq!(json["isOnline"], true);
        assert_eq!(json["memberRole"], "moderator");
        assert_eq!(json["isBannedFromChannel"], false);
    }
}
