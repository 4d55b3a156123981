//! Persistence layer abstractions.
//!
//! This module describes the storage contract: [`EventRetriever`] for reading
//! event histories, [`EventPersister`] for durably writing them, and the
//! [`EventStore`] marker for backends that do both. A reference in-memory
//! implementation lives in [`inmemory`].
//!
//! Retrieval is filtered three ways at the boundary: by an
//! [`EventTypeMatcher`] (only intelligible events come back), by aggregate
//! identity, and by a [`TimeRange`] over stream timestamps. Backends return
//! events in their native order, descending by stream timestamp with the most
//! recent first.

use std::{collections::HashMap, future::Future};

pub use nonempty::NonEmpty;
use uuid::Uuid;

use crate::{
    event::{Event, EventTypeMatcher},
    identity::AggregateId,
    time::TimeRange,
};

pub mod inmemory;

/// Read access to persisted event histories.
pub trait EventRetriever: Send + Sync {
    /// Backend-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the events of a single aggregate whose types the matcher knows
    /// and whose stream timestamps fall within the range.
    ///
    /// Events are returned descending by stream timestamp, most recent
    /// first.
    ///
    /// # Errors
    ///
    /// Returns a backend-specific error when retrieval fails.
    fn events_for<'a>(
        &'a self,
        matcher: &'a EventTypeMatcher,
        aggregate_id: &'a AggregateId,
        range: TimeRange,
    ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

    /// Load the events of several same-typed aggregates in one operation.
    ///
    /// The result maps each aggregate id to its (possibly empty) matched
    /// history, each in descending order. Ids with no matched events may be
    /// absent from the map.
    ///
    /// # Errors
    ///
    /// Returns a backend-specific error when retrieval fails.
    fn events_for_set<'a>(
        &'a self,
        matcher: &'a EventTypeMatcher,
        aggregate_type: &'a str,
        ids: &'a [Uuid],
        range: TimeRange,
    ) -> impl Future<Output = Result<HashMap<AggregateId, Vec<Event>>, Self::Error>> + Send + 'a;
}

/// Durable write access for event batches.
pub trait EventPersister: Send + Sync {
    /// Backend-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Durably write a batch of events, stamping each with a fresh,
    /// strictly-increasing [`ProcessingId`](crate::time::ProcessingId)
    /// before the write.
    ///
    /// The batch is written atomically with respect to readers of any single
    /// aggregate. Returns the stamped events in input order; only the
    /// returned copies carry processing ids.
    ///
    /// # Errors
    ///
    /// Returns a backend-specific error when the write fails; on failure
    /// nothing is persisted.
    fn persist<'a>(
        &'a self,
        events: NonEmpty<Event>,
    ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;
}

/// Marker for backends that both retrieve and persist events.
pub trait EventStore: EventRetriever + EventPersister {}

impl<T: EventRetriever + EventPersister> EventStore for T {}
