//! Fetching event histories in replay order.
//!
//! Where the state repository folds histories into state, the history
//! fetcher hands them back raw, already sorted in ascending causal order,
//! for callers that want the events themselves.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    binding::EventBinding, event::Event, sourcing::EventSource, store::EventRetriever,
    time::TimeRange,
};

/// Fetches whole aggregate histories in ascending causal order.
pub struct EventHistoryFetcher<R> {
    source: EventSource<R>,
    binding: EventBinding,
}

impl<R: EventRetriever> EventHistoryFetcher<R> {
    pub fn new(source: EventSource<R>, binding: EventBinding) -> Self {
        Self { source, binding }
    }

    /// One aggregate's whole history.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn get_history(&self, id: Uuid) -> Result<Vec<Event>, R::Error> {
        self.get_history_in(id, TimeRange::unbounded()).await
    }

    /// One aggregate's history within the range.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when retrieval fails.
    pub async fn get_history_in(
        &self,
        id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<Event>, R::Error> {
        Ok(self
            .binding
            .replaying(&self.source, id, range)
            .await?
            .to_vec())
    }

    /// The histories of many aggregates via a single backend round trip.
    ///
    /// Aggregates with no events in range are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when the preload fails.
    pub async fn get_histories(
        &self,
        ids: &[Uuid],
        range: TimeRange,
    ) -> Result<HashMap<Uuid, Vec<Event>>, R::Error> {
        let cache = self.binding.preload(&self.source, ids, range).await?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let history = self.binding.replaying_cached(&cache, *id, range).to_vec();
                if history.is_empty() {
                    None
                } else {
                    Some((*id, history))
                }
            })
            .collect())
    }
}
