pub mod cache;
pub mod error;
pub mod identity;
pub mod materialize;
pub mod memory;
pub mod reconcile;
pub mod record;
pub mod session;
pub mod sqlite;
pub mod store;

pub use cache::SessionCache;
pub use error::{IdentityError, ReconcileError, StoreError};
pub use identity::{derive_identity, Identity};
pub use memory::MemoryStore;
pub use reconcile::{reconcile, reconcile_many, Reconcile, Reconciled};
pub use record::{
    BanState, ChannelRecord, InviteState, MemberRecord, MessageRecord, ReactionRecord, ReadRecord,
    Record, RecordKind, UnreadCountsRecord, UserRecord,
};
pub use session::{CreateOutcome, Session};
pub use sqlite::SqliteStore;
pub use store::{Store, UnitOfWork};
