use chatmirror_protocol::{ChannelId, EventType};
use chatmirror_store::Identity;
use serde::Serialize;

/// Connectivity transitions reported by the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncSignal {
    /// The connection dropped; local state may fall behind.
    Offline,
    /// The connection is back. Events missed while offline are not replayed,
    /// so subscribers should re-run their queries.
    Reconnected,
}

/// Fan-out to subscribers, sent only after the unit of work that produced
/// it has committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum Notification {
    /// One event was applied. `identity` is the primary record it touched;
    /// notify-only events have none.
    Event {
        kind: EventType,
        identity: Option<Identity>,
    },
    ChannelsIngested {
        cids: Vec<ChannelId>,
    },
    MembersIngested {
        cid: ChannelId,
        count: usize,
    },
    Signal {
        signal: SyncSignal,
    },
}
