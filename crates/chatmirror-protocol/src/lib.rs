pub mod decode;
pub mod error;
pub mod event;
pub mod payload;
pub mod query;

pub use decode::{decode, decode_slice};
pub use error::DecodeError;
pub use event::{Event, EventBody, EventType};
pub use payload::{
    ChannelId, ChannelPayload, MemberPayload, MessagePayload, MessageRead, ReactionPayload,
    UserPayload,
};
pub use query::{
    ChannelState, ChannelsQuery, ChannelsResponse, MemberListQuery, Pagination, QueryHash,
    SortDirection, Sorting,
};

/// Timestamps on the wire are RFC 3339 strings; everything in memory is UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
