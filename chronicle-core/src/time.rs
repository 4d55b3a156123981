//! Stream timestamps, time ranges and time-ordered processing ids.

use std::{
    cmp::Ordering,
    fmt,
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// An instant qualified with the id of the event stream that produced it.
///
/// Wall-clock instants from independent sources can collide; the stream id
/// breaks the tie so that stream timestamps are totally ordered. Ordering is
/// by instant first, then stream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTimestamp {
    timestamp: DateTime<Utc>,
    stream_id: String,
}

impl StreamTimestamp {
    pub fn of(stream_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            stream_id: stream_id.into(),
        }
    }

    /// A timestamp for the given stream at the current instant.
    pub fn now(stream_id: impl Into<String>) -> Self {
        Self::of(stream_id, Utc::now())
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The same instant on a sub-stream of this stream.
    #[must_use]
    pub fn substream(&self, sub_stream_id: &str) -> Self {
        Self {
            timestamp: self.timestamp,
            stream_id: format!("{}/{}", self.stream_id, sub_stream_id),
        }
    }

    /// This timestamp shifted later by the given duration.
    #[must_use]
    pub fn plus(&self, duration: Duration) -> Self {
        Self {
            timestamp: self.timestamp + duration,
            stream_id: self.stream_id.clone(),
        }
    }

    /// This timestamp shifted earlier by the given duration.
    #[must_use]
    pub fn minus(&self, duration: Duration) -> Self {
        Self {
            timestamp: self.timestamp - duration,
            stream_id: self.stream_id.clone(),
        }
    }
}

impl Ord for StreamTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.stream_id.cmp(&other.stream_id))
    }
}

impl PartialOrd for StreamTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StreamTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stream_id, self.timestamp.to_rfc3339())
    }
}

/// One end of a [`TimeRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRangeBound {
    Inclusive(DateTime<Utc>),
    Exclusive(DateTime<Utc>),
}

impl TimeRangeBound {
    fn admits_lower(&self, instant: DateTime<Utc>) -> bool {
        match self {
            Self::Inclusive(bound) => instant >= *bound,
            Self::Exclusive(bound) => instant > *bound,
        }
    }

    fn admits_upper(&self, instant: DateTime<Utc>) -> bool {
        match self {
            Self::Inclusive(bound) => instant <= *bound,
            Self::Exclusive(bound) => instant < *bound,
        }
    }
}

/// A possibly half-open interval of instants.
///
/// Each end is independently absent, inclusive or exclusive. The unbounded
/// range contains everything and membership tests on it short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    lower: Option<TimeRangeBound>,
    upper: Option<TimeRangeBound>,
}

impl TimeRange {
    /// The range containing every instant.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    #[must_use]
    pub const fn from_inclusive(self, instant: DateTime<Utc>) -> Self {
        Self {
            lower: Some(TimeRangeBound::Inclusive(instant)),
            upper: self.upper,
        }
    }

    #[must_use]
    pub const fn from_exclusive(self, instant: DateTime<Utc>) -> Self {
        Self {
            lower: Some(TimeRangeBound::Exclusive(instant)),
            upper: self.upper,
        }
    }

    #[must_use]
    pub const fn to_inclusive(self, instant: DateTime<Utc>) -> Self {
        Self {
            lower: self.lower,
            upper: Some(TimeRangeBound::Inclusive(instant)),
        }
    }

    #[must_use]
    pub const fn to_exclusive(self, instant: DateTime<Utc>) -> Self {
        Self {
            lower: self.lower,
            upper: Some(TimeRangeBound::Exclusive(instant)),
        }
    }

    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.lower.as_ref().is_none_or(|b| b.admits_lower(instant))
            && self.upper.as_ref().is_none_or(|b| b.admits_upper(instant))
    }
}

/// Error raised when adopting a foreign `Uuid` as a [`ProcessingId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("uuid {0} is not a time-based (version 1) uuid")]
pub struct NotTimeBased(pub Uuid);

// Gregorian-to-unix epoch offset in 100ns ticks, per RFC 4122.
const UUID_TICKS_BETWEEN_EPOCHS: u64 = 0x01B2_1DD2_1381_4000;

static LAST_TICKS: AtomicU64 = AtomicU64::new(0);
static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();

fn node_id() -> &'static [u8; 6] {
    NODE_ID.get_or_init(|| {
        let random = Uuid::new_v4();
        let bytes = random.as_bytes();
        // Multicast bit set, as for randomly generated node ids.
        [
            bytes[0] | 0x01,
            bytes[1],
            bytes[2],
            bytes[3],
            bytes[4],
            bytes[5],
        ]
    })
}

/// A time-ordered id assigned to events and commands when they are durably
/// written.
///
/// Processing ids are version 1 (time-based) UUIDs. Ids generated by a single
/// process are strictly increasing even when the clock reads the same 100ns
/// tick twice. Ordering is by embedded instant first, so ids double as a
/// record of processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingId(Uuid);

impl ProcessingId {
    /// Generate a fresh id for the current instant.
    #[must_use]
    pub fn generate() -> Self {
        let now = Utc::now();
        let nanos = u64::try_from(now.timestamp_nanos_opt().unwrap_or(0)).unwrap_or(0);
        let candidate = nanos / 100 + UUID_TICKS_BETWEEN_EPOCHS;
        // Bump past the last issued tick if the clock has not advanced.
        let mut last = LAST_TICKS.load(AtomicOrdering::Relaxed);
        let ticks = loop {
            let next = candidate.max(last + 1);
            match LAST_TICKS.compare_exchange_weak(
                last,
                next,
                AtomicOrdering::Relaxed,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(observed) => last = observed,
            }
        };
        let timestamp = uuid::Timestamp::from_gregorian_time(ticks, 0);
        Self(Uuid::new_v1(timestamp, node_id()))
    }

    /// Adopt an existing `Uuid` as a processing id.
    ///
    /// # Errors
    ///
    /// Returns [`NotTimeBased`] unless the uuid is version 1.
    pub fn from_uuid(uuid: Uuid) -> Result<Self, NotTimeBased> {
        if uuid.get_version_num() == 1 {
            Ok(Self(uuid))
        } else {
            Err(NotTimeBased(uuid))
        }
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    fn ticks(&self) -> u64 {
        self.0
            .get_timestamp()
            .map_or(0, |timestamp| timestamp.to_gregorian().0)
    }

    /// The instant embedded in this id.
    #[must_use]
    pub fn instant(&self) -> DateTime<Utc> {
        let ticks = self.ticks().saturating_sub(UUID_TICKS_BETWEEN_EPOCHS);
        let secs = ticks / 10_000_000;
        let nanos = (ticks % 10_000_000) * 100;
        DateTime::from_timestamp(secs as i64, nanos as u32).unwrap_or_default()
    }
}

impl Ord for ProcessingId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ticks()
            .cmp(&other.ticks())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ProcessingId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProcessingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
