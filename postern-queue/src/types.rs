use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use postern_common::Envelope;
use serde::{Deserialize, Serialize};

/// Identifier of a queued message.
///
/// A ULID, so ids sort by the time they were allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(ulid::Ulid);

impl QueueId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Parse an id from a storage filename such as `01ARZ3NDEKTSV4RRFFQ69G5FAV.env`.
    ///
    /// Anything containing a path separator or traversal, or without the
    /// expected extension, is rejected.
    #[must_use]
    pub fn from_filename(filename: &str, extension: &str) -> Option<Self> {
        if filename.contains(['/', '\\']) || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(extension)?.strip_suffix('.')?;
        ulid::Ulid::from_string(stem).ok().map(Self)
    }

    /// Milliseconds since the Unix epoch at which this id was allocated.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl Display for QueueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored envelope and its delivery schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueId,
    pub envelope: Envelope,
    /// Delivery attempts made so far.
    pub attempts: u32,
    pub next_attempt: DateTime<Utc>,
}

impl QueueEntry {
    /// A fresh entry due for delivery now.
    #[must_use]
    pub fn new(envelope: Envelope) -> Self {
        Self {
            id: QueueId::generate(),
            envelope,
            attempts: 0,
            next_attempt: Utc::now(),
        }
    }
}
