//! Events, event identity and schema matching.

use std::{collections::HashMap, fmt, ops::BitOr};

use serde::{Deserialize, Serialize};

use crate::{
    identity::{AggregateId, VersionedName},
    time::{ProcessingId, StreamTimestamp, TimeRange},
    tuples::{Tuple, TupleSchema},
};

/// Lifecycle characteristics of an event definition.
///
/// Flags combine with `|`. An INITIAL event creates its aggregate; a TERMINAL
/// event ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Characteristics(u8);

impl Characteristics {
    pub const NONE: Self = Self(0);
    pub const INITIAL: Self = Self(1);
    pub const TERMINAL: Self = Self(2);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Characteristics {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for Characteristics {
    fn default() -> Self {
        Self::NONE
    }
}

/// The identity of an event definition: the aggregate type it belongs to and
/// its versioned name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType {
    aggregate_type: String,
    name: VersionedName,
}

impl EventType {
    pub fn new(aggregate_type: impl Into<String>, name: VersionedName) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            name,
        }
    }

    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    #[must_use]
    pub const fn name(&self) -> &VersionedName {
        &self.name
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.name)
    }
}

/// An immutable occurrence in the history of one aggregate.
///
/// An event carries two distinct times: the [`StreamTimestamp`] records when
/// it happened in its source stream, while the optional [`ProcessingId`]
/// records when it was durably written. Events are unprocessed until a
/// persister stamps them.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    aggregate_id: AggregateId,
    timestamp: StreamTimestamp,
    name: VersionedName,
    characteristics: Characteristics,
    parameters: Tuple,
    processing_id: Option<ProcessingId>,
}

impl Event {
    pub fn new(
        aggregate_id: AggregateId,
        timestamp: StreamTimestamp,
        name: VersionedName,
        characteristics: Characteristics,
        parameters: Tuple,
    ) -> Self {
        Self {
            aggregate_id,
            timestamp,
            name,
            characteristics,
            parameters,
            processing_id: None,
        }
    }

    #[must_use]
    pub const fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    #[must_use]
    pub const fn timestamp(&self) -> &StreamTimestamp {
        &self.timestamp
    }

    #[must_use]
    pub const fn name(&self) -> &VersionedName {
        &self.name
    }

    #[must_use]
    pub const fn characteristics(&self) -> Characteristics {
        self.characteristics
    }

    #[must_use]
    pub const fn parameters(&self) -> &Tuple {
        &self.parameters
    }

    #[must_use]
    pub const fn processing_id(&self) -> Option<ProcessingId> {
        self.processing_id
    }

    /// The event type this event is an instance of.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        EventType::new(self.aggregate_id.aggregate_type(), self.name.clone())
    }

    /// A copy of this event stamped with the given processing id.
    #[must_use]
    pub fn processed(&self, processing_id: ProcessingId) -> Self {
        Self {
            processing_id: Some(processing_id),
            ..self.clone()
        }
    }

    /// The instant this event was durably written, if it has been.
    #[must_use]
    pub fn processing_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.processing_id.map(|id| id.instant())
    }

    #[must_use]
    pub const fn is_initial(&self) -> bool {
        self.characteristics.contains(Characteristics::INITIAL)
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.characteristics.contains(Characteristics::TERMINAL)
    }

    /// Whether this event's stream timestamp falls within the given range.
    #[must_use]
    pub fn is_in_range(&self, range: &TimeRange) -> bool {
        range.is_unbounded() || range.contains(self.timestamp.timestamp())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} at {}",
            self.aggregate_id, self.name, self.parameters, self.timestamp
        )
    }
}

/// A mapping from known [`EventType`]s to their payload schemas.
///
/// Retrieval and replay consult the matcher to decide which stored events are
/// intelligible; an unknown type is simply not matched, never an error, so
/// readers with partial knowledge of a store's contents skip what they do not
/// understand.
#[derive(Debug, Clone, Default)]
pub struct EventTypeMatcher {
    schemas: HashMap<EventType, TupleSchema>,
}

impl EventTypeMatcher {
    /// A matcher that knows no event types.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A matcher over the given type/schema pairs.
    #[must_use]
    pub fn matching_against(schemas: HashMap<EventType, TupleSchema>) -> Self {
        Self { schemas }
    }

    /// The schema for the given type, if known.
    #[must_use]
    pub fn match_type(&self, event_type: &EventType) -> Option<&TupleSchema> {
        self.schemas.get(event_type)
    }

    /// Whether the given event's type is known to this matcher.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.schemas.contains_key(&event.event_type())
    }

    /// The event types this matcher knows.
    pub fn event_types(&self) -> impl Iterator<Item = &EventType> {
        self.schemas.keys()
    }
}
