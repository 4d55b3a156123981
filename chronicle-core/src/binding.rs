//! Declarative event bindings for one aggregate type.
//!
//! An [`EventBinding`] is a dispatch table built once, up front: for each
//! versioned event name it records the payload schema, the lifecycle
//! characteristics, and an explicit causal rank. Everything else derives from
//! the table: the [`EventTypeMatcher`] used for retrieval, the
//! [`CausalOrder`] used for replay, event construction with validation, and
//! the [`EventSession`] used to emit events into a batch.

use std::{cmp::Ordering, collections::HashMap};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    bus::{EventBatch, EventBatchProcessor},
    event::{Characteristics, Event, EventType, EventTypeMatcher},
    identity::{AggregateId, VersionedName},
    sourcing::{CachedEventSource, EventReplayer, EventSource},
    store::EventRetriever,
    time::{StreamTimestamp, TimeRange},
    tuples::{TupleError, TupleSchema, Value},
};

/// Error raised when constructing an event through a binding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    /// The event name is not in the binding's table.
    #[error("no event named `{name}` is bound for aggregate type `{aggregate_type}`")]
    UnboundEvent {
        aggregate_type: String,
        name: VersionedName,
    },
    /// The supplied values do not conform to the bound schema.
    #[error(transparent)]
    Tuple(#[from] TupleError),
}

#[derive(Debug, Clone)]
struct EventEntry {
    schema: TupleSchema,
    characteristics: Characteristics,
    causal_rank: i32,
}

/// The event dispatch table for one aggregate type.
#[derive(Debug, Clone)]
pub struct EventBinding {
    aggregate_type: String,
    entries: HashMap<VersionedName, EventEntry>,
}

impl EventBinding {
    /// Start building a binding for the given aggregate type.
    #[must_use]
    pub fn builder(aggregate_type: impl Into<String>) -> EventBindingBuilder {
        EventBindingBuilder {
            aggregate_type: aggregate_type.into(),
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// The matcher recognising every event type in this binding.
    #[must_use]
    pub fn matcher(&self) -> EventTypeMatcher {
        EventTypeMatcher::matching_against(
            self.entries
                .iter()
                .map(|(name, entry)| {
                    (
                        EventType::new(self.aggregate_type.clone(), name.clone()),
                        entry.schema.clone(),
                    )
                })
                .collect(),
        )
    }

    /// The causal order derived from this binding's characteristics and
    /// ranks.
    #[must_use]
    pub fn causal_order(&self) -> CausalOrder {
        CausalOrder {
            ranks: self
                .entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.causal_rank))
                .collect(),
        }
    }

    /// The schema bound to the given event name, if any.
    #[must_use]
    pub fn schema_for(&self, name: &VersionedName) -> Option<&TupleSchema> {
        self.entries.get(name).map(|entry| &entry.schema)
    }

    /// Construct an event for the given aggregate, validating the values
    /// against the bound schema and stamping the bound characteristics.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::UnboundEvent`] for a name not in the table,
    /// or a tuple validation error.
    pub fn event(
        &self,
        id: Uuid,
        timestamp: StreamTimestamp,
        name: impl Into<VersionedName>,
        values: Vec<Value>,
    ) -> Result<Event, BindingError> {
        let name = name.into();
        let entry = self
            .entries
            .get(&name)
            .ok_or_else(|| BindingError::UnboundEvent {
                aggregate_type: self.aggregate_type.clone(),
                name: name.clone(),
            })?;
        let parameters = entry.schema.make(values)?;
        Ok(Event::new(
            AggregateId::new(self.aggregate_type.clone(), id),
            timestamp,
            name,
            entry.characteristics,
            parameters,
        ))
    }

    /// Open an emitting session against the given batch.
    pub fn session<'a, P: EventBatchProcessor>(
        &'a self,
        batch: &'a mut EventBatch<P>,
    ) -> EventSession<'a, P> {
        EventSession {
            binding: self,
            batch,
        }
    }

    /// Replay one aggregate's bound events in ascending causal order.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn replaying<R: EventRetriever>(
        &self,
        source: &EventSource<R>,
        id: Uuid,
        range: TimeRange,
    ) -> Result<EventReplayer, R::Error> {
        let order = self.causal_order();
        let replayer = source
            .replaying(
                &self.matcher(),
                &AggregateId::new(self.aggregate_type.clone(), id),
                range,
            )
            .await?;
        Ok(replayer.in_ascending_order_by(|a, b| order.compare(a, b)))
    }

    /// Preload the bound histories of many aggregates in one round trip.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn preload<R: EventRetriever>(
        &self,
        source: &EventSource<R>,
        ids: &[Uuid],
        range: TimeRange,
    ) -> Result<CachedEventSource, R::Error> {
        source
            .preload(&self.matcher(), &self.aggregate_type, ids, range)
            .await
    }

    /// Replay one aggregate's cached events in ascending causal order.
    #[must_use]
    pub fn replaying_cached(
        &self,
        cache: &CachedEventSource,
        id: Uuid,
        range: TimeRange,
    ) -> EventReplayer {
        let order = self.causal_order();
        cache
            .replaying(&AggregateId::new(self.aggregate_type.clone(), id), range)
            .in_ascending_order_by(|a, b| order.compare(a, b))
    }
}

/// Builder for [`EventBinding`].
#[derive(Debug)]
pub struct EventBindingBuilder {
    aggregate_type: String,
    entries: HashMap<VersionedName, EventEntry>,
}

impl EventBindingBuilder {
    fn bind(
        mut self,
        name: impl Into<VersionedName>,
        schema: TupleSchema,
        characteristics: Characteristics,
        causal_rank: i32,
    ) -> Self {
        self.entries.insert(
            name.into(),
            EventEntry {
                schema,
                characteristics,
                causal_rank,
            },
        );
        self
    }

    /// Bind an aggregate-creating event.
    #[must_use]
    pub fn initial(self, name: impl Into<VersionedName>, schema: TupleSchema) -> Self {
        self.bind(name, schema, Characteristics::INITIAL, 0)
    }

    /// Bind an ordinary update event.
    #[must_use]
    pub fn update(self, name: impl Into<VersionedName>, schema: TupleSchema) -> Self {
        self.bind(name, schema, Characteristics::NONE, 0)
    }

    /// Bind an update event with an explicit causal rank. Within one
    /// instant, lower ranks replay first.
    #[must_use]
    pub fn update_ordered(
        self,
        name: impl Into<VersionedName>,
        schema: TupleSchema,
        causal_rank: i32,
    ) -> Self {
        self.bind(name, schema, Characteristics::NONE, causal_rank)
    }

    /// Bind an aggregate-ending event.
    #[must_use]
    pub fn terminal(self, name: impl Into<VersionedName>, schema: TupleSchema) -> Self {
        self.bind(name, schema, Characteristics::TERMINAL, 0)
    }

    #[must_use]
    pub fn build(self) -> EventBinding {
        EventBinding {
            aggregate_type: self.aggregate_type,
            entries: self.entries,
        }
    }
}

/// The causal replay order for one aggregate type's events.
///
/// Initial events sort before everything, terminal events after everything,
/// and other events by explicit rank (default zero); stream timestamps break
/// the remaining ties.
#[derive(Debug, Clone)]
pub struct CausalOrder {
    ranks: HashMap<VersionedName, i32>,
}

impl CausalOrder {
    fn rank(&self, event: &Event) -> i32 {
        if event.is_initial() {
            i32::MIN
        } else if event.is_terminal() {
            i32::MAX
        } else {
            self.ranks.get(event.name()).copied().unwrap_or(0)
        }
    }

    /// Compare two events of the bound aggregate type for replay order.
    #[must_use]
    pub fn compare(&self, a: &Event, b: &Event) -> Ordering {
        self.rank(a)
            .cmp(&self.rank(b))
            .then_with(|| a.timestamp().cmp(b.timestamp()))
    }
}

/// An event-emitting session bound to one [`EventBatch`].
///
/// Each `emit` call validates its values against the bound schema, stamps
/// the bound characteristics, and adds the event to the batch. Nothing is
/// processed until the batch completes.
pub struct EventSession<'a, P> {
    binding: &'a EventBinding,
    batch: &'a mut EventBatch<P>,
}

impl<P: EventBatchProcessor> EventSession<'_, P> {
    /// Emit one event into the batch.
    ///
    /// # Errors
    ///
    /// Returns a [`BindingError`] when the name is unbound or the values do
    /// not conform; the batch is left as it was.
    pub fn emit(
        &mut self,
        id: Uuid,
        timestamp: StreamTimestamp,
        name: impl Into<VersionedName>,
        values: Vec<Value>,
    ) -> Result<(), BindingError> {
        let event = self.binding.event(id, timestamp, name, values)?;
        self.batch.accept(event);
        Ok(())
    }
}
