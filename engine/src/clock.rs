//! Timestamps and timestamp-prefixed record ids.
//!
//! Ids have the shape `<ms timestamp, 13 digits>-<sequence, 4 digits>-<8 hex>`.
//! The sequence restarts for every new millisecond and counts up within
//! one, so ids minted by one generator sort lexicographically in creation
//! order. When the four digits run out the id moves on to the next
//! millisecond rather than growing a fifth digit. The random suffix keeps ids from separate processes apart without
//! any coordination.

use crate::Timestamp;
use parking_lot::Mutex;
use uuid::Uuid;

/// Largest sequence number that fits the four-digit field.
const MAX_SEQUENCE: u32 = 9_999;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// A freshly minted id together with the timestamp it encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedId {
    pub id: String,
    pub timestamp: Timestamp,
}

/// Generates unique, creation-ordered record ids.
#[derive(Debug, Default)]
pub struct IdGenerator {
    /// Last timestamp handed out and the sequence used within it
    last: Mutex<(Timestamp, u32)>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an id stamped with the current time.
    pub fn next(&self) -> MintedId {
        self.next_at(now_millis())
    }

    /// Mint an id for `timestamp`.
    ///
    /// A timestamp that is not newer than the last one (several calls in the
    /// same millisecond, or a clock that stepped backwards) reuses the last
    /// timestamp with the next sequence number, keeping ids ordered. Past
    /// [`MAX_SEQUENCE`] the reused timestamp is bumped by one millisecond.
    pub fn next_at(&self, timestamp: Timestamp) -> MintedId {
        let (timestamp, sequence) = {
            let mut last = self.last.lock();
            if timestamp > last.0 {
                *last = (timestamp, 0);
            } else if last.1 < MAX_SEQUENCE {
                last.1 += 1;
            } else {
                *last = (last.0 + 1, 0);
            }
            *last
        };

        let suffix = Uuid::new_v4().simple().to_string();
        MintedId {
            id: format!("{:013}-{:04}-{}", timestamp, sequence, &suffix[..8]),
            timestamp,
        }
    }
}
