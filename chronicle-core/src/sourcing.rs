//! Event sources, preloaded caches and replay.
//!
//! An [`EventSource`] wraps an [`EventRetriever`] with the query surface the
//! rest of the library consumes: fetch, replay, and preload. Preloading pulls
//! the histories of many same-typed aggregates out of the backend in a single
//! round trip and hands back a [`CachedEventSource`] that serves every
//! subsequent per-aggregate replay from memory. This is the fan-out pattern:
//! one backend query, N in-memory folds.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use uuid::Uuid;

use crate::{
    event::{Event, EventTypeMatcher},
    identity::AggregateId,
    store::EventRetriever,
    time::TimeRange,
};

/// A selection predicate accepting events within the given range.
pub fn in_range(range: TimeRange) -> impl Fn(&Event) -> bool {
    move |event| event.is_in_range(&range)
}

/// A selection predicate accepting events whose type the matcher knows.
pub fn matched_by(matcher: &EventTypeMatcher) -> impl Fn(&Event) -> bool + '_ {
    move |event| matcher.matches(event)
}

/// The query surface over a retrieval backend.
#[derive(Clone, Debug)]
pub struct EventSource<R> {
    retriever: R,
}

impl<R: EventRetriever> EventSource<R> {
    pub const fn retrieving(retriever: R) -> Self {
        Self { retriever }
    }

    /// Fetch one aggregate's matched events, descending by stream timestamp.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn get_events(
        &self,
        matcher: &EventTypeMatcher,
        aggregate_id: &AggregateId,
        range: TimeRange,
    ) -> Result<Vec<Event>, R::Error> {
        self.retriever.events_for(matcher, aggregate_id, range).await
    }

    /// Fetch one aggregate's matched events and wrap them for replay.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn replaying(
        &self,
        matcher: &EventTypeMatcher,
        aggregate_id: &AggregateId,
        range: TimeRange,
    ) -> Result<EventReplayer, R::Error> {
        Ok(EventReplayer::of(
            self.get_events(matcher, aggregate_id, range).await?,
        ))
    }

    /// Fetch the histories of many same-typed aggregates in one backend
    /// round trip, returning an immutable in-memory source over them.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    #[tracing::instrument(skip(self, matcher, ids), fields(id_count = ids.len()))]
    pub async fn preload(
        &self,
        matcher: &EventTypeMatcher,
        aggregate_type: &str,
        ids: &[Uuid],
        range: TimeRange,
    ) -> Result<CachedEventSource, R::Error> {
        let events = self
            .retriever
            .events_for_set(matcher, aggregate_type, ids, range)
            .await?;
        tracing::debug!(aggregates_cached = events.len(), "histories preloaded");
        Ok(CachedEventSource {
            events: Arc::new(events),
        })
    }
}

/// An immutable snapshot of preloaded histories, shareable across threads.
///
/// Serves the same selection contract as the backing store, but entirely from
/// memory; the snapshot never refreshes.
#[derive(Clone, Debug)]
pub struct CachedEventSource {
    events: Arc<HashMap<AggregateId, Vec<Event>>>,
}

impl CachedEventSource {
    /// One aggregate's cached events within the range, descending.
    #[must_use]
    pub fn get_events(&self, aggregate_id: &AggregateId, range: TimeRange) -> Vec<Event> {
        self.events
            .get(aggregate_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|event| event.is_in_range(&range))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One aggregate's cached events wrapped for replay.
    #[must_use]
    pub fn replaying(&self, aggregate_id: &AggregateId, range: TimeRange) -> EventReplayer {
        EventReplayer::of(self.get_events(aggregate_id, range))
    }

    /// The ids this cache holds events for.
    pub fn aggregate_ids(&self) -> impl Iterator<Item = &AggregateId> {
        self.events.keys()
    }
}

/// A replayable collection of one aggregate's events.
///
/// Events arrive in the store's native order (descending by stream
/// timestamp); ordering methods rewrite that order eagerly, so a replayer can
/// be reordered, filtered and then folded without further allocation.
#[derive(Clone, Debug)]
pub struct EventReplayer {
    events: Vec<Event>,
}

impl EventReplayer {
    #[must_use]
    pub fn of(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Reorder ascending by stream timestamp.
    #[must_use]
    pub fn in_ascending_order(mut self) -> Self {
        self.events.sort_by(|a, b| a.timestamp().cmp(b.timestamp()));
        self
    }

    /// Reorder ascending by the given comparator.
    #[must_use]
    pub fn in_ascending_order_by(mut self, cmp: impl Fn(&Event, &Event) -> Ordering) -> Self {
        self.events.sort_by(|a, b| cmp(a, b));
        self
    }

    /// Reorder descending by stream timestamp.
    #[must_use]
    pub fn in_descending_order(mut self) -> Self {
        self.events.sort_by(|a, b| b.timestamp().cmp(a.timestamp()));
        self
    }

    /// Reorder descending by the given comparator.
    #[must_use]
    pub fn in_descending_order_by(mut self, cmp: impl Fn(&Event, &Event) -> Ordering) -> Self {
        self.events.sort_by(|a, b| cmp(b, a));
        self
    }

    /// Keep only events the predicate accepts.
    #[must_use]
    pub fn filter(mut self, predicate: impl Fn(&Event) -> bool) -> Self {
        self.events.retain(|event| predicate(event));
        self
    }

    /// The first event in the current order, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Event> {
        self.events.first()
    }

    /// Feed every event, in the current order, to the consumer.
    pub fn replay_all(self, mut consumer: impl FnMut(&Event)) {
        for event in &self.events {
            consumer(event);
        }
    }

    /// Unwrap into the events in the current order.
    #[must_use]
    pub fn to_vec(self) -> Vec<Event> {
        self.events
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}
