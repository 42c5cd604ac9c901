pub mod apply;
pub mod config;
pub mod engine;
pub mod error;
pub mod notification;
pub mod router;
pub mod service;

pub use apply::{apply_intent, ApplyError};
pub use config::SyncConfig;
pub use engine::{BatchReport, SkippedEvent, SyncEngine};
pub use error::{ConfigError, SyncError};
pub use notification::{Notification, SyncSignal};
pub use router::{route, MutationIntent, Route, UnreadTally};
pub use service::{run_sync_loop, SyncTotals};
