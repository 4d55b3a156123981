//! Batched event dispatch.
//!
//! Events enter the system through an [`EventBus`], which collects them into
//! an [`EventBatch`] and hands the whole batch to an
//! [`EventBatchProcessor`] exactly once. The canonical processor,
//! [`PublishingEventBatchProcessor`], durably logs the batch, feeds the
//! aggregate catalogue, and only then publishes the stamped events to
//! subscribers: log-then-publish is the ordering guarantee the rest of the
//! system leans on.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    catalogue::AggregateCatalogue,
    event::{Event, EventType},
    store::EventPersister,
    time::ProcessingId,
};

/// Receives whole event batches for processing.
pub trait EventBatchProcessor: Send + Sync {
    /// Processor-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Process one completed batch.
    ///
    /// Called at most once per batch, and never with an empty collection.
    fn process(
        &self,
        events: Vec<Event>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Pushes single logged events out to interested parties.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Error from a batch dispatch.
#[derive(Debug, Error)]
pub enum DispatchError<E, P>
where
    E: std::error::Error,
    P: std::error::Error,
{
    /// The populating closure failed; nothing was processed.
    #[error("failed to populate event batch: {0}")]
    Populate(#[source] E),
    /// The batch processor failed.
    #[error("failed to process event batch: {0}")]
    Process(#[source] P),
}

/// Collects events for batched processing.
///
/// Every batch carries a fresh time-ordered id. Completing a batch hands its
/// events to the processor exactly once; completing an empty batch is a
/// no-op.
pub struct EventBatch<P> {
    id: ProcessingId,
    events: Vec<Event>,
    processor: Arc<P>,
}

impl<P: EventBatchProcessor> EventBatch<P> {
    fn new(processor: Arc<P>) -> Self {
        Self {
            id: ProcessingId::generate(),
            events: Vec::new(),
            processor,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ProcessingId {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Add an event to the batch.
    pub fn accept(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Hand the collected events to the processor.
    ///
    /// # Errors
    ///
    /// Returns the processor's error when processing fails.
    pub async fn complete(self) -> Result<(), P::Error> {
        if self.events.is_empty() {
            tracing::trace!(batch_id = %self.id, "empty batch completed; nothing to process");
            return Ok(());
        }
        tracing::debug!(batch_id = %self.id, event_count = self.events.len(), "completing batch");
        self.processor.process(self.events).await
    }
}

/// The entry point for event dispatch.
///
/// Batching is the only path: even a single event goes through a one-event
/// batch, so every event is processed under the batch contract.
#[derive(Debug)]
pub struct EventBus<P> {
    processor: Arc<P>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
        }
    }
}

impl<P: EventBatchProcessor> EventBus<P> {
    pub fn processing_with(processor: P) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }

    /// Open a batch for manual population and completion.
    #[must_use]
    pub fn start_batch(&self) -> EventBatch<P> {
        EventBatch::new(Arc::clone(&self.processor))
    }

    /// Open a batch, populate it with the given closure, and complete it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Populate`] when the closure fails (the batch
    /// is discarded unprocessed), or [`DispatchError::Process`] when the
    /// processor fails.
    pub async fn dispatch<E>(
        &self,
        populate: impl FnOnce(&mut EventBatch<P>) -> Result<(), E>,
    ) -> Result<(), DispatchError<E, P::Error>>
    where
        E: std::error::Error,
    {
        let mut batch = self.start_batch();
        populate(&mut batch).map_err(DispatchError::Populate)?;
        batch.complete().await.map_err(DispatchError::Process)
    }

    /// Dispatch a single event through a one-event batch.
    ///
    /// # Errors
    ///
    /// Returns the processor's error when processing fails.
    pub async fn accept(&self, event: Event) -> Result<(), P::Error> {
        let mut batch = self.start_batch();
        batch.accept(event);
        batch.complete().await
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// An [`EventPublisher`] that fans each event out to subscribers registered
/// by [`EventType`].
///
/// Subscribers are registered up front, before the pipeline starts feeding
/// the publisher. Events of types with no subscribers are dropped silently.
#[derive(Default)]
pub struct SubscribableEventPublisher {
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
}

impl SubscribableEventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        let mut subscribers = self.subscribers.write().expect("publisher lock poisoned");
        subscribers
            .entry(event_type)
            .or_default()
            .push(Box::new(handler));
    }
}

impl EventPublisher for SubscribableEventPublisher {
    fn publish(&self, event: &Event) {
        let subscribers = self.subscribers.read().expect("publisher lock poisoned");
        if let Some(handlers) = subscribers.get(&event.event_type()) {
            for handler in handlers {
                handler(event);
            }
        }
    }
}

impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    fn publish(&self, event: &Event) {
        (**self).publish(event);
    }
}

/// The canonical batch processor: log, then catalogue, then publish.
///
/// The batch is durably written (and stamped) first; the catalogue and the
/// subscribers only ever see logged events. A persistence failure means
/// nothing is published; subscribers are infallible, so a logged batch is
/// always fully announced.
pub struct PublishingEventBatchProcessor<L, P> {
    log: L,
    publisher: P,
    catalogue: Option<Arc<dyn AggregateCatalogue>>,
}

impl<L: EventPersister, P: EventPublisher> PublishingEventBatchProcessor<L, P> {
    pub const fn using(log: L, publisher: P) -> Self {
        Self {
            log,
            publisher,
            catalogue: None,
        }
    }

    /// Also feed the given catalogue with each logged event.
    #[must_use]
    pub fn with_catalogue(mut self, catalogue: Arc<dyn AggregateCatalogue>) -> Self {
        self.catalogue = Some(catalogue);
        self
    }
}

impl<L, P> EventBatchProcessor for PublishingEventBatchProcessor<L, P>
where
    L: EventPersister,
    P: EventPublisher,
{
    type Error = L::Error;

    async fn process(&self, events: Vec<Event>) -> Result<(), Self::Error> {
        let Some(events) = NonEmpty::from_vec(events) else {
            return Ok(());
        };
        let stamped = self.log.persist(events).await?;
        for event in &stamped {
            if let Some(catalogue) = &self.catalogue {
                catalogue.accept(event);
            }
            self.publisher.publish(event);
        }
        tracing::debug!(events_published = stamped.len(), "batch logged and published");
        Ok(())
    }
}

/// Error from a [`ChannelBatchProcessor`] whose receiver has gone away.
#[derive(Debug, Error)]
#[error("event batch channel closed")]
pub struct ChannelClosed;

/// A batch processor that forwards whole batches to an async channel.
#[derive(Clone, Debug)]
pub struct ChannelBatchProcessor {
    sender: mpsc::Sender<Vec<Event>>,
}

impl ChannelBatchProcessor {
    #[must_use]
    pub const fn forwarding_to(sender: mpsc::Sender<Vec<Event>>) -> Self {
        Self { sender }
    }
}

impl EventBatchProcessor for ChannelBatchProcessor {
    type Error = ChannelClosed;

    async fn process(&self, events: Vec<Event>) -> Result<(), Self::Error> {
        self.sender.send(events).await.map_err(|_| ChannelClosed)
    }
}
