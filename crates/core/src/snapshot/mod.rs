//! Balance snapshots per (journal, account, layer).
//!
//! - `store` - the durable storage seam and an in-memory implementation
//! - `cache` - per-key locked cache with a Moka read layer

pub mod cache;
pub mod store;

pub use cache::{AppliedDelta, BalanceSnapshotCache, Delta, LockedSnapshots};
pub use store::{InMemorySnapshotStore, SnapshotKey, SnapshotRow, SnapshotStore, SnapshotWrite};
