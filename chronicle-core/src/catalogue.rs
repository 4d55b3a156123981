//! Catalogues of live aggregates.
//!
//! A catalogue answers "which aggregates of this type currently exist?"
//! without scanning event histories. It is fed from the event pipeline after
//! events are durably logged: INITIAL events add an id, TERMINAL events
//! remove it.

use uuid::Uuid;

use crate::event::Event;

/// A registry of live aggregate ids per aggregate type.
pub trait AggregateCatalogue: Send + Sync {
    /// Record an aggregate as live.
    fn add(&self, aggregate_type: &str, id: Uuid);

    /// Record an aggregate as no longer live.
    fn remove(&self, aggregate_type: &str, id: Uuid);

    /// The ids of every live aggregate of the given type.
    fn aggregate_ids(&self, aggregate_type: &str) -> Vec<Uuid>;

    /// Update the catalogue from a logged event, driven by its lifecycle
    /// characteristics. Events that are neither initial nor terminal leave
    /// the catalogue untouched.
    fn accept(&self, event: &Event) {
        let aggregate_id = event.aggregate_id();
        if event.is_initial() {
            self.add(aggregate_id.aggregate_type(), aggregate_id.id());
        }
        if event.is_terminal() {
            self.remove(aggregate_id.aggregate_type(), aggregate_id.id());
        }
    }
}

/// In-memory [`AggregateCatalogue`] holding per-type id sets.
#[derive(Debug, Default)]
pub struct InMemoryAggregateCatalogue {
    ids: std::sync::RwLock<std::collections::HashMap<String, std::collections::HashSet<Uuid>>>,
}

impl InMemoryAggregateCatalogue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateCatalogue for InMemoryAggregateCatalogue {
    fn add(&self, aggregate_type: &str, id: Uuid) {
        let mut ids = self.ids.write().expect("catalogue lock poisoned");
        ids.entry(aggregate_type.to_string()).or_default().insert(id);
    }

    fn remove(&self, aggregate_type: &str, id: Uuid) {
        let mut ids = self.ids.write().expect("catalogue lock poisoned");
        if let Some(set) = ids.get_mut(aggregate_type) {
            set.remove(&id);
            // Types with no live aggregates are dropped entirely.
            if set.is_empty() {
                ids.remove(aggregate_type);
            }
        }
    }

    fn aggregate_ids(&self, aggregate_type: &str) -> Vec<Uuid> {
        let ids = self.ids.read().expect("catalogue lock poisoned");
        ids.get(aggregate_type)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::Characteristics,
        identity::{AggregateId, VersionedName},
        time::StreamTimestamp,
        tuples::TupleSchema,
    };

    fn lifecycle_event(id: &AggregateId, characteristics: Characteristics) -> Event {
        let schema = TupleSchema::new("person/lifecycle", vec![]).unwrap();
        Event::new(
            id.clone(),
            StreamTimestamp::now("test"),
            VersionedName::of("lifecycle"),
            characteristics,
            schema.make(vec![]).unwrap(),
        )
    }

    #[test]
    fn add_and_remove_track_live_ids() {
        let catalogue = InMemoryAggregateCatalogue::new();
        let id = Uuid::new_v4();
        catalogue.add("person", id);
        assert_eq!(catalogue.aggregate_ids("person"), vec![id]);

        catalogue.remove("person", id);
        assert!(catalogue.aggregate_ids("person").is_empty());
        assert!(catalogue.aggregate_ids("order").is_empty());
    }

    #[test]
    fn accept_follows_event_characteristics() {
        let catalogue = InMemoryAggregateCatalogue::new();
        let aggregate = AggregateId::new("person", Uuid::new_v4());

        catalogue.accept(&lifecycle_event(&aggregate, Characteristics::NONE));
        assert!(catalogue.aggregate_ids("person").is_empty());

        catalogue.accept(&lifecycle_event(&aggregate, Characteristics::INITIAL));
        assert_eq!(catalogue.aggregate_ids("person"), vec![aggregate.id()]);

        catalogue.accept(&lifecycle_event(&aggregate, Characteristics::TERMINAL));
        assert!(catalogue.aggregate_ids("person").is_empty());
    }
}
