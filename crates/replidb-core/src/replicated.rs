//! Sync progress reports for embedded replicas.

use serde::{Deserialize, Serialize};

/// The result of pulling changes from the primary into a replica.
///
/// `frame_no` is monotonically non-decreasing across successive syncs of
/// the same database. `frames_synced` is zero when the replica was already
/// up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replicated {
    /// Replication position after this sync.
    pub frame_no: u64,
    /// Frames applied by this sync.
    pub frames_synced: u64,
}
