//! Rebuilding aggregate state from event histories.
//!
//! A [`StateBinding`] extends an [`EventBinding`] with state semantics: a
//! factory for each initial event and an update function for each other
//! event. A [`DispatchingStateBuilder`] folds one aggregate's events through
//! those functions; the [`EventSourcingStateRepository`] drives the whole
//! pipeline, replaying in causal order through a fresh builder per request.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    binding::EventBinding,
    event::Event,
    identity::VersionedName,
    sourcing::{EventReplayer, EventSource},
    store::EventRetriever,
    time::TimeRange,
    tuples::TupleSchema,
};

/// Folds a sequence of events into an optional state.
///
/// Events are fed in ascending causal order. `into_state` yields `None` when
/// no initial event was seen.
pub trait StateBuilder<T> {
    fn accept(&mut self, event: &Event);

    fn into_state(self) -> Option<T>;
}

type Factory<T> = Box<dyn Fn(&Event) -> T + Send + Sync>;
type Updater<T> = Box<dyn Fn(&mut T, &Event) + Send + Sync>;

/// An [`EventBinding`] extended with state factories and update functions.
pub struct StateBinding<T> {
    events: EventBinding,
    factories: HashMap<VersionedName, Factory<T>>,
    updaters: HashMap<VersionedName, Updater<T>>,
}

impl<T> StateBinding<T> {
    /// Start building a state binding for the given aggregate type.
    #[must_use]
    pub fn builder(aggregate_type: impl Into<String>) -> StateBindingBuilder<T> {
        StateBindingBuilder {
            events: EventBinding::builder(aggregate_type),
            factories: HashMap::new(),
            updaters: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn events(&self) -> &EventBinding {
        &self.events
    }
}

fn fold<T>(binding: &Arc<StateBinding<T>>, replayer: EventReplayer) -> Option<T> {
    let mut builder = DispatchingStateBuilder::new(Arc::clone(binding));
    replayer.replay_all(|event| builder.accept(event));
    builder.into_state()
}

/// Builder for [`StateBinding`].
pub struct StateBindingBuilder<T> {
    events: crate::binding::EventBindingBuilder,
    factories: HashMap<VersionedName, Factory<T>>,
    updaters: HashMap<VersionedName, Updater<T>>,
}

impl<T> StateBindingBuilder<T> {
    /// Bind an aggregate-creating event and the factory that seeds state
    /// from it.
    #[must_use]
    pub fn initial(
        mut self,
        name: impl Into<VersionedName>,
        schema: TupleSchema,
        factory: impl Fn(&Event) -> T + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.events = self.events.initial(name.clone(), schema);
        self.factories.insert(name, Box::new(factory));
        self
    }

    /// Bind an update event and the function that applies it to state.
    #[must_use]
    pub fn update(
        mut self,
        name: impl Into<VersionedName>,
        schema: TupleSchema,
        updater: impl Fn(&mut T, &Event) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.events = self.events.update(name.clone(), schema);
        self.updaters.insert(name, Box::new(updater));
        self
    }

    /// Bind an update event with an explicit causal rank.
    #[must_use]
    pub fn update_ordered(
        mut self,
        name: impl Into<VersionedName>,
        schema: TupleSchema,
        causal_rank: i32,
        updater: impl Fn(&mut T, &Event) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.events = self.events.update_ordered(name.clone(), schema, causal_rank);
        self.updaters.insert(name, Box::new(updater));
        self
    }

    /// Bind an aggregate-ending event and the function that applies it.
    #[must_use]
    pub fn terminal(
        mut self,
        name: impl Into<VersionedName>,
        schema: TupleSchema,
        updater: impl Fn(&mut T, &Event) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.events = self.events.terminal(name.clone(), schema);
        self.updaters.insert(name, Box::new(updater));
        self
    }

    #[must_use]
    pub fn build(self) -> StateBinding<T> {
        StateBinding {
            events: self.events.build(),
            factories: self.factories,
            updaters: self.updaters,
        }
    }
}

/// A [`StateBuilder`] dispatching each event through a [`StateBinding`].
///
/// The first initial event seeds the state; later events fold into it.
/// Events arriving before any initial event, and initial events arriving
/// after state exists, are dropped as no-ops.
pub struct DispatchingStateBuilder<T> {
    binding: Arc<StateBinding<T>>,
    state: Option<T>,
}

impl<T> DispatchingStateBuilder<T> {
    /// A fresh builder folding events through the given binding.
    #[must_use]
    pub fn new(binding: Arc<StateBinding<T>>) -> Self {
        Self {
            binding,
            state: None,
        }
    }
}

impl<T> StateBuilder<T> for DispatchingStateBuilder<T> {
    fn accept(&mut self, event: &Event) {
        if event.is_initial() {
            if self.state.is_some() {
                tracing::trace!(event = %event, "duplicate initial event dropped");
                return;
            }
            if let Some(factory) = self.binding.factories.get(event.name()) {
                self.state = Some(factory(event));
            }
            return;
        }
        let Some(state) = &mut self.state else {
            tracing::trace!(event = %event, "event before initial dropped");
            return;
        };
        if let Some(updater) = self.binding.updaters.get(event.name()) {
            updater(state, event);
        }
    }

    fn into_state(self) -> Option<T> {
        self.state
    }
}

/// Rebuilds aggregate states by replaying their histories in causal order.
pub struct EventSourcingStateRepository<T, R> {
    source: EventSource<R>,
    binding: Arc<StateBinding<T>>,
}

impl<T, R: EventRetriever> EventSourcingStateRepository<T, R> {
    pub fn new(source: EventSource<R>, binding: Arc<StateBinding<T>>) -> Self {
        Self { source, binding }
    }

    /// The state of one aggregate, rebuilt from events strictly before
    /// `up_to`.
    ///
    /// Returns `None` for aggregates with no initial event in range.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn get_state(
        &self,
        id: Uuid,
        up_to: DateTime<Utc>,
    ) -> Result<Option<T>, R::Error> {
        self.get_state_in(id, TimeRange::unbounded().to_exclusive(up_to))
            .await
    }

    /// The current state of one aggregate, from its whole history.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn get_current_state(&self, id: Uuid) -> Result<Option<T>, R::Error> {
        self.get_state_in(id, TimeRange::unbounded()).await
    }

    async fn get_state_in(&self, id: Uuid, range: TimeRange) -> Result<Option<T>, R::Error> {
        let replayer = self.binding.events().replaying(&self.source, id, range).await?;
        Ok(fold(&self.binding, replayer))
    }

    /// The states of many aggregates, rebuilt from events strictly before
    /// `up_to`, using a single backend round trip.
    ///
    /// Aggregates that yield no state are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when the preload fails.
    pub async fn get_states(
        &self,
        ids: &[Uuid],
        up_to: DateTime<Utc>,
    ) -> Result<HashMap<Uuid, T>, R::Error> {
        self.get_states_in(ids, TimeRange::unbounded().to_exclusive(up_to))
            .await
    }

    /// The current states of many aggregates via a single backend round
    /// trip.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when the preload fails.
    pub async fn get_current_states(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, T>, R::Error> {
        self.get_states_in(ids, TimeRange::unbounded()).await
    }

    async fn get_states_in(
        &self,
        ids: &[Uuid],
        range: TimeRange,
    ) -> Result<HashMap<Uuid, T>, R::Error> {
        let cache = self
            .binding
            .events()
            .preload(&self.source, ids, range)
            .await?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let replayer = self.binding.events().replaying_cached(&cache, *id, range);
                fold(&self.binding, replayer).map(|state| (*id, state))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use nonempty::NonEmpty;

    use super::*;
    use crate::{
        store::{EventPersister, inmemory::InMemoryEventStore},
        time::StreamTimestamp,
        tuples::{TupleSlot, Value, ValueType},
    };

    #[derive(Debug, Clone, PartialEq)]
    struct Person {
        name: String,
        age: i64,
        deleted: bool,
    }

    fn person_binding() -> Arc<StateBinding<Person>> {
        let created = TupleSchema::new(
            "person/created",
            vec![
                TupleSlot::new("name", ValueType::String),
                TupleSlot::new("age", ValueType::Int),
            ],
        )
        .unwrap();
        let updated_age = TupleSchema::new(
            "person/updatedAge",
            vec![TupleSlot::new("age", ValueType::Int)],
        )
        .unwrap();
        let updated_name = TupleSchema::new(
            "person/updatedName",
            vec![TupleSlot::new("name", ValueType::String)],
        )
        .unwrap();
        let deleted = TupleSchema::new("person/deleted", vec![]).unwrap();

        fn string_slot(event: &Event, name: &str) -> String {
            let key = event.parameters().schema().key::<String>(name).unwrap();
            event.parameters().get(&key).unwrap().clone()
        }
        fn int_slot(event: &Event, name: &str) -> i64 {
            let key = event.parameters().schema().key::<i64>(name).unwrap();
            *event.parameters().get(&key).unwrap()
        }

        Arc::new(
            StateBinding::builder("person")
                .initial("created", created, |event| Person {
                    name: string_slot(event, "name"),
                    age: int_slot(event, "age"),
                    deleted: false,
                })
                .update("updatedAge", updated_age, |person, event| {
                    person.age = int_slot(event, "age");
                })
                .update("updatedName", updated_name, |person, event| {
                    person.name = string_slot(event, "name");
                })
                .terminal("deleted", deleted, |person, _| {
                    person.deleted = true;
                })
                .build(),
        )
    }

    fn instant(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn at(secs: i64) -> StreamTimestamp {
        StreamTimestamp::of("test", instant(secs))
    }

    async fn arthur_history(
        store: &InMemoryEventStore,
        binding: &StateBinding<Person>,
        id: Uuid,
    ) {
        let events = binding.events();
        store
            .persist(
                NonEmpty::from_vec(vec![
                    events
                        .event(
                            id,
                            at(0),
                            "created",
                            vec![Value::from("Arthur"), Value::from(41i64)],
                        )
                        .unwrap(),
                    events
                        .event(id, at(1), "updatedAge", vec![Value::from(42i64)])
                        .unwrap(),
                    events
                        .event(id, at(2), "updatedName", vec![Value::from("Daley")])
                        .unwrap(),
                ])
                .unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn state_is_the_fold_of_the_history() {
        let binding = person_binding();
        let store = InMemoryEventStore::empty();
        let id = Uuid::new_v4();
        arthur_history(&store, &binding, id).await;

        let repository =
            EventSourcingStateRepository::new(EventSource::retrieving(store), binding);
        let person = repository.get_current_state(id).await.unwrap().unwrap();
        assert_eq!(
            person,
            Person {
                name: "Daley".to_string(),
                age: 42,
                deleted: false,
            }
        );
    }

    #[tokio::test]
    async fn upper_bounds_are_exclusive() {
        let binding = person_binding();
        let store = InMemoryEventStore::empty();
        let id = Uuid::new_v4();
        arthur_history(&store, &binding, id).await;

        let repository =
            EventSourcingStateRepository::new(EventSource::retrieving(store), binding);
        // Events strictly before t=2: the rename has not happened yet.
        let person = repository.get_state(id, instant(2)).await.unwrap().unwrap();
        assert_eq!(person.name, "Arthur");
        assert_eq!(person.age, 42);
    }

    #[tokio::test]
    async fn aggregates_without_an_initial_event_have_no_state() {
        let binding = person_binding();
        let store = InMemoryEventStore::empty();
        let id = Uuid::new_v4();
        store
            .persist(NonEmpty::singleton(
                binding
                    .events()
                    .event(id, at(1), "updatedAge", vec![Value::from(42i64)])
                    .unwrap(),
            ))
            .await
            .unwrap();

        let repository =
            EventSourcingStateRepository::new(EventSource::retrieving(store), binding);
        assert!(repository.get_current_state(id).await.unwrap().is_none());
    }

    #[test]
    fn duplicate_initial_events_are_dropped() {
        let binding = person_binding();
        let id = Uuid::new_v4();
        let first = binding
            .events()
            .event(
                id,
                at(0),
                "created",
                vec![Value::from("Arthur"), Value::from(41i64)],
            )
            .unwrap();
        let second = binding
            .events()
            .event(
                id,
                at(1),
                "created",
                vec![Value::from("Impostor"), Value::from(99i64)],
            )
            .unwrap();

        let mut builder = DispatchingStateBuilder::new(Arc::clone(&binding));
        builder.accept(&first);
        builder.accept(&second);
        let person = builder.into_state().unwrap();
        assert_eq!(person.name, "Arthur");
        assert_eq!(person.age, 41);
    }

    #[tokio::test]
    async fn many_states_come_from_one_preload() {
        let binding = person_binding();
        let store = InMemoryEventStore::empty();
        let known = Uuid::new_v4();
        let unknown = Uuid::new_v4();
        arthur_history(&store, &binding, known).await;

        let repository =
            EventSourcingStateRepository::new(EventSource::retrieving(store), binding);
        let states = repository
            .get_current_states(&[known, unknown])
            .await
            .unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[&known].name, "Daley");
    }
}
