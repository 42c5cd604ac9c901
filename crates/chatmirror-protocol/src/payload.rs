//! Entity payloads as the server sends them.
//!
//! Fields the client does not model are kept in `extra_data` so nothing the
//! server attaches is lost between decode and storage.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Timestamp;

/// Channel identifier in `type:id` form (e.g. `messaging:general`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Build a cid from a channel type and id.
    pub fn new(channel_type: &str, id: &str) -> Self {
        Self(format!("{channel_type}:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The channel type half of the cid, if the cid carries one.
    pub fn channel_type(&self) -> Option<&str> {
        self.0.split_once(':').map(|(kind, _)| kind)
    }
}

impl From<&str> for ChannelId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user as embedded in events, members and messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub banned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, rename = "last_active", skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<Timestamp>,
    #[serde(default)]
    pub teams: Vec<String>,
    /// Custom attributes attached by the integrator.
    #[serde(flatten)]
    pub extra_data: Map<String, Value>,
}

impl UserPayload {
    /// Minimal payload carrying only an id.
    pub fn with_id(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            image_url: None,
            role: None,
            online: false,
            banned: false,
            created_at: None,
            updated_at: None,
            last_active_at: None,
            teams: Vec::new(),
            extra_data: Map::new(),
        }
    }

    /// Whether this is a bare reference to a user (only the `id`, as embedded
    /// in many events) rather than a profile.
    pub fn is_reference(&self) -> bool {
        self.name.is_none()
            && self.image_url.is_none()
            && self.role.is_none()
            && !self.online
            && !self.banned
            && self.created_at.is_none()
            && self.updated_at.is_none()
            && self.last_active_at.is_none()
            && self.teams.is_empty()
            && self.extra_data.is_empty()
    }
}

/// A channel membership.
///
/// `role` stays a raw string: unknown roles from newer servers must survive
/// storage untouched and only fall back to a default when materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPayload {
    pub user: UserPayload,
    #[serde(default, alias = "channel_role", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, rename = "banned", skip_serializing_if = "Option::is_none")]
    pub is_banned: Option<bool>,
    #[serde(default, rename = "shadow_banned", skip_serializing_if = "Option::is_none")]
    pub is_shadow_banned: Option<bool>,
    #[serde(default, rename = "ban_expires", skip_serializing_if = "Option::is_none")]
    pub ban_expires_at: Option<Timestamp>,
    #[serde(default, rename = "invited", skip_serializing_if = "Option::is_none")]
    pub is_invited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_accepted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_rejected_at: Option<Timestamp>,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub user: UserPayload,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<ChannelId>,
    #[serde(flatten)]
    pub extra_data: Map<String, Value>,
}

/// A channel as embedded in events and query responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub cid: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberPayload>,
    #[serde(flatten)]
    pub extra_data: Map<String, Value>,
}

/// A reaction on a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_score")]
    pub score: u32,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra_data: Map<String, Value>,
}

fn default_score() -> u32 {
    1
}

impl ReactionPayload {
    /// Reactions are never edited in place by older servers, so the creation
    /// time stands in for a missing `updated_at`.
    pub fn effective_updated_at(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// A read receipt: `user` has read the channel up to `last_read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRead {
    pub user: UserPayload,
    pub last_read: Timestamp,
}
