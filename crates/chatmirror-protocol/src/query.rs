//! Query requests and bulk responses.
//!
//! The core never issues requests itself; these types describe what the
//! transport asked for so the store can remember which saved query a record
//! satisfies.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::payload::{ChannelId, ChannelPayload, MemberPayload, MessagePayload, MessageRead, UserPayload};

/// Messages fetched per channel when a query does not say otherwise.
pub const MESSAGES_PAGE_SIZE: u32 = 25;

/// Sort direction, encoded on the wire as `1` (ascending) or `-1` (descending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl Serialize for SortDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        })
    }
}

impl<'de> Deserialize<'de> for SortDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i8::deserialize(deserializer)? {
            1 => Ok(Self::Ascending),
            -1 => Ok(Self::Descending),
            other => Err(serde::de::Error::custom(format!(
                "sort direction must be 1 or -1, got {other}"
            ))),
        }
    }
}

/// One `(field, direction)` sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    pub field: String,
    pub direction: SortDirection,
}

impl Sorting {
    /// Sort on `field`; descending unless `ascending` is set.
    pub fn new(field: &str, ascending: bool) -> Self {
        Self {
            field: field.to_string(),
            direction: if ascending {
                SortDirection::Ascending
            } else {
                SortDirection::Descending
            },
        }
    }

    pub fn is_ascending(&self) -> bool {
        self.direction == SortDirection::Ascending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

/// Stable digest of a query, used to link records to the saved queries they
/// satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(String);

impl QueryHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `serde_json` maps are key-ordered, so the serialized form (and thus the
/// hash) does not depend on how the filter was built.
fn hash_query<T: Serialize>(query: &T) -> QueryHash {
    let bytes = serde_json::to_vec(query).unwrap_or_default();
    QueryHash(hex::encode(Sha256::digest(&bytes)))
}

/// A channel list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelsQuery {
    #[serde(rename = "filter_conditions")]
    pub filter: Value,
    #[serde(default)]
    pub sort: Vec<Sorting>,
    #[serde(rename = "user_details", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserPayload>,
    pub state: bool,
    pub watch: bool,
    pub presence: bool,
    pub message_limit: u32,
    #[serde(flatten)]
    pub pagination: Pagination,
}

impl ChannelsQuery {
    /// A watching, stateful query with the default message page.
    pub fn new(filter: Value) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            user: None,
            state: true,
            watch: true,
            presence: false,
            message_limit: MESSAGES_PAGE_SIZE,
            pagination: Pagination::default(),
        }
    }

    pub fn with_sort(mut self, sort: Vec<Sorting>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Hash of filter and sort only: pages of one query share a hash.
    pub fn query_hash(&self) -> QueryHash {
        hash_query(&(&self.filter, &self.sort))
    }
}

/// A member list query for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberListQuery {
    pub cid: ChannelId,
    #[serde(rename = "filter_conditions")]
    pub filter: Value,
    #[serde(default)]
    pub sort: Vec<Sorting>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

impl MemberListQuery {
    pub fn new(cid: ChannelId, filter: Value) -> Self {
        Self {
            cid,
            filter,
            sort: Vec::new(),
            pagination: Pagination::default(),
        }
    }

    pub fn with_sort(mut self, sort: Vec<Sorting>) -> Self {
        self.sort = sort;
        self
    }

    pub fn query_hash(&self) -> QueryHash {
        hash_query(&(&self.cid, &self.filter, &self.sort))
    }
}

/// Response to a [`ChannelsQuery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelsResponse {
    pub channels: Vec<ChannelState>,
}

/// One channel with the state the query asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel: ChannelPayload,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub messages: Vec<MessagePayload>,
    #[serde(default)]
    pub read: Vec<MessageRead>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watcher_count: Option<u32>,
}
