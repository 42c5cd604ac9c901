//! Plain data records kept in the local store.
//!
//! Records hold exactly what the server sent (raw role strings, raw
//! extra-data bytes). Defaults are applied when a record is materialized,
//! never when it is stored.

use std::collections::BTreeSet;
use std::fmt;

use chatmirror_protocol::{ChannelId, QueryHash, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Which table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    User,
    Channel,
    Member,
    Message,
    Reaction,
    Read,
    UnreadCounts,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Channel => "channel",
            Self::Member => "member",
            Self::Message => "message",
            Self::Reaction => "reaction",
            Self::Read => "read",
            Self::UnreadCounts => "unread_counts",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the store can hold.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    const KIND: RecordKind;

    fn identity(&self) -> &Identity;

    /// Server timestamp of the last applied change, if the entity has one.
    fn updated_at(&self) -> Option<Timestamp>;
}

/// Opaque extra-data blobs are stored hex-encoded so the JSON body stays
/// compact and byte-exact.
mod hex_blob {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanState {
    pub is_banned: bool,
    pub is_shadow_banned: bool,
    pub expires_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteState {
    pub is_invited: bool,
    pub accepted_at: Option<Timestamp>,
    pub rejected_at: Option<Timestamp>,
}

/// A user's membership in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub identity: Identity,
    pub cid: ChannelId,
    /// The referenced user; the user record itself is owned elsewhere.
    pub user_id: String,
    pub role: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub ban: BanState,
    pub invite: InviteState,
    /// Saved member-list queries this record satisfies. Only ever grows
    /// during reconciliation.
    pub queries: BTreeSet<QueryHash>,
}

impl Record for MemberRecord {
    const KIND: RecordKind = RecordKind::Member;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn updated_at(&self) -> Option<Timestamp> {
        Some(self.updated_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub identity: Identity,
    pub id: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub role: Option<String>,
    pub online: bool,
    pub banned: bool,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub last_active_at: Option<Timestamp>,
    pub teams: Vec<String>,
    #[serde(with = "hex_blob")]
    pub extra_data: Vec<u8>,
}

impl Record for UserRecord {
    const KIND: RecordKind = RecordKind::User;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub identity: Identity,
    pub cid: ChannelId,
    pub name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub member_count: u32,
    pub watcher_count: u32,
    pub unread_count: u32,
    /// Membership identities known to belong to this channel.
    pub members: BTreeSet<Identity>,
    pub queries: BTreeSet<QueryHash>,
    #[serde(with = "hex_blob")]
    pub extra_data: Vec<u8>,
}

impl Record for ChannelRecord {
    const KIND: RecordKind = RecordKind::Channel;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn updated_at(&self) -> Option<Timestamp> {
        Some(self.updated_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub identity: Identity,
    pub id: String,
    pub cid: Option<ChannelId>,
    pub user_id: String,
    pub text: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
    pub parent_id: Option<String>,
    pub reply_count: u32,
    #[serde(with = "hex_blob")]
    pub extra_data: Vec<u8>,
}

impl Record for MessageRecord {
    const KIND: RecordKind = RecordKind::Message;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn updated_at(&self) -> Option<Timestamp> {
        Some(self.updated_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub identity: Identity,
    pub message_id: String,
    pub user_id: String,
    pub kind: String,
    pub score: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Record for ReactionRecord {
    const KIND: RecordKind = RecordKind::Reaction;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn updated_at(&self) -> Option<Timestamp> {
        Some(self.updated_at)
    }
}

/// How far a user has read in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRecord {
    pub identity: Identity,
    pub cid: ChannelId,
    pub user_id: String,
    pub last_read: Timestamp,
}

impl Record for ReadRecord {
    const KIND: RecordKind = RecordKind::Read;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn updated_at(&self) -> Option<Timestamp> {
        Some(self.last_read)
    }
}

/// Account-wide unread counters. There is exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCountsRecord {
    pub identity: Identity,
    pub total_unread_count: u32,
    pub unread_channels: Option<u32>,
    /// Envelope stamp of the event that last set the counters.
    pub updated_at: Option<Timestamp>,
}

impl UnreadCountsRecord {
    pub const KEY: &'static str = "me";
}

impl Record for UnreadCountsRecord {
    const KIND: RecordKind = RecordKind::UnreadCounts;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }
}
