//! In-memory event store implementation for testing and embedding.
//!
//! [`InMemoryEventStore`] is a thread-safe implementation of both
//! [`EventRetriever`](super::EventRetriever) and
//! [`EventPersister`](super::EventPersister) that keeps each aggregate's
//! events in a hash map, ordered descending by stream timestamp.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;
use uuid::Uuid;

use crate::{
    event::{Event, EventTypeMatcher},
    identity::AggregateId,
    store::{EventPersister, EventRetriever},
    time::{ProcessingId, TimeRange},
};

/// In-memory event store keyed by aggregate id.
///
/// Each aggregate's events are held most-recent-first. A whole persisted
/// batch becomes visible atomically: insertion happens under a single write
/// guard, so no reader observes a partially applied batch.
///
/// Cloning the store shares the underlying map.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<AggregateId, Vec<Event>>>>,
}

impl InMemoryEventStore {
    /// A store containing no events.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A store preloaded with the given events.
    #[must_use]
    pub fn with(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::empty();
        {
            let mut map = store.events.write().expect("in-memory store lock poisoned");
            for event in events {
                insert_descending(map.entry(event.aggregate_id().clone()).or_default(), event);
            }
        }
        store
    }
}

fn insert_descending(history: &mut Vec<Event>, event: Event) {
    let position = history
        .iter()
        .position(|existing| existing.timestamp() < event.timestamp())
        .unwrap_or(history.len());
    history.insert(position, event);
}

fn matched_in_range(history: &[Event], matcher: &EventTypeMatcher, range: TimeRange) -> Vec<Event> {
    history
        .iter()
        .filter(|event| matcher.matches(event) && event.is_in_range(&range))
        .cloned()
        .collect()
}

impl EventRetriever for InMemoryEventStore {
    type Error = Infallible;

    #[tracing::instrument(skip(self, matcher))]
    fn events_for<'a>(
        &'a self,
        matcher: &'a EventTypeMatcher,
        aggregate_id: &'a AggregateId,
        range: TimeRange,
    ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a {
        let events = {
            let map = self.events.read().expect("in-memory store lock poisoned");
            map.get(aggregate_id)
                .map(|history| matched_in_range(history, matcher, range))
                .unwrap_or_default()
        };
        tracing::trace!(events_loaded = events.len(), "retrieved aggregate events");
        std::future::ready(Ok(events))
    }

    #[tracing::instrument(skip(self, matcher, ids), fields(id_count = ids.len()))]
    fn events_for_set<'a>(
        &'a self,
        matcher: &'a EventTypeMatcher,
        aggregate_type: &'a str,
        ids: &'a [Uuid],
        range: TimeRange,
    ) -> impl Future<Output = Result<HashMap<AggregateId, Vec<Event>>, Self::Error>> + Send + 'a
    {
        let result = {
            let map = self.events.read().expect("in-memory store lock poisoned");
            ids.iter()
                .filter_map(|id| {
                    let aggregate_id = AggregateId::new(aggregate_type, *id);
                    map.get(&aggregate_id)
                        .map(|history| (aggregate_id, matched_in_range(history, matcher, range)))
                })
                .collect::<HashMap<_, _>>()
        };
        tracing::trace!(aggregates_loaded = result.len(), "retrieved aggregate set");
        std::future::ready(Ok(result))
    }
}

impl EventPersister for InMemoryEventStore {
    type Error = Infallible;

    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    fn persist<'a>(
        &'a self,
        events: NonEmpty<Event>,
    ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a {
        let stamped: Vec<Event> = events
            .into_iter()
            .map(|event| event.processed(ProcessingId::generate()))
            .collect();
        {
            let mut map = self.events.write().expect("in-memory store lock poisoned");
            for event in &stamped {
                insert_descending(
                    map.entry(event.aggregate_id().clone()).or_default(),
                    event.clone(),
                );
            }
        }
        tracing::debug!(events_persisted = stamped.len(), "batch persisted");
        std::future::ready(Ok(stamped))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        event::{Characteristics, EventType},
        identity::VersionedName,
        time::StreamTimestamp,
        tuples::{TupleSchema, TupleSlot, Value, ValueType},
    };

    fn schema() -> TupleSchema {
        TupleSchema::new(
            "counter/changed",
            vec![TupleSlot::new("delta", ValueType::Int)],
        )
        .unwrap()
    }

    fn matcher() -> EventTypeMatcher {
        EventTypeMatcher::matching_against(
            [(
                EventType::new("counter", VersionedName::of("changed")),
                schema(),
            )]
            .into_iter()
            .collect(),
        )
    }

    fn instant(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn changed(id: &AggregateId, at: i64, delta: i64) -> Event {
        Event::new(
            id.clone(),
            StreamTimestamp::of("test", instant(at)),
            VersionedName::of("changed"),
            Characteristics::NONE,
            schema().make(vec![Value::from(delta)]).unwrap(),
        )
    }

    #[tokio::test]
    async fn events_come_back_most_recent_first() {
        let id = AggregateId::new("counter", Uuid::new_v4());
        let store = InMemoryEventStore::empty();
        store
            .persist(NonEmpty::from_vec(vec![
                changed(&id, 2, 1),
                changed(&id, 1, 2),
                changed(&id, 3, 3),
            ]).unwrap())
            .await
            .unwrap();

        let events = store
            .events_for(&matcher(), &id, TimeRange::unbounded())
            .await
            .unwrap();
        let instants: Vec<i64> = events
            .iter()
            .map(|e| e.timestamp().timestamp().timestamp())
            .collect();
        assert_eq!(instants, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn persisted_events_are_stamped_in_increasing_order() {
        let id = AggregateId::new("counter", Uuid::new_v4());
        let store = InMemoryEventStore::empty();
        let stamped = store
            .persist(NonEmpty::from_vec(vec![
                changed(&id, 1, 1),
                changed(&id, 2, 2),
            ]).unwrap())
            .await
            .unwrap();

        let ids: Vec<ProcessingId> = stamped
            .iter()
            .map(|e| e.processing_id().unwrap())
            .collect();
        assert!(ids[0] < ids[1]);
    }

    #[tokio::test]
    async fn retrieval_filters_by_range_and_matcher() {
        let id = AggregateId::new("counter", Uuid::new_v4());
        let store = InMemoryEventStore::with(vec![
            changed(&id, 1, 1),
            changed(&id, 2, 2),
            changed(&id, 3, 3),
        ]);

        let range = TimeRange::unbounded().to_exclusive(instant(3));
        let events = store.events_for(&matcher(), &id, range).await.unwrap();
        assert_eq!(events.len(), 2);

        let unknown = store
            .events_for(&EventTypeMatcher::empty(), &id, TimeRange::unbounded())
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn set_retrieval_groups_by_aggregate() {
        let a = AggregateId::new("counter", Uuid::new_v4());
        let b = AggregateId::new("counter", Uuid::new_v4());
        let absent = Uuid::new_v4();
        let store = InMemoryEventStore::with(vec![
            changed(&a, 1, 1),
            changed(&a, 2, 2),
            changed(&b, 1, 5),
        ]);

        let result = store
            .events_for_set(
                &matcher(),
                "counter",
                &[a.id(), b.id(), absent],
                TimeRange::unbounded(),
            )
            .await
            .unwrap();

        assert_eq!(result[&a].len(), 2);
        assert_eq!(result[&b].len(), 1);
        assert!(!result.contains_key(&AggregateId::new("counter", absent)));
    }
}
