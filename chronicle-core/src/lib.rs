//! Core traits and types for the Chronicle event-sourcing library.
//!
//! This crate provides the foundational abstractions for event sourcing:
//!
//! - [`tuples`] - Schema-validated, serialization-agnostic payloads (`TupleSchema`, `Tuple`, `TupleKey`)
//! - [`identity`] - Names and identifiers (`VersionedName`, `AggregateId`)
//! - [`time`] - Stream timestamps, time ranges and processing ids
//! - [`event`] / [`command`] - Event and command identity, matching and results
//! - [`store`] - Event persistence abstraction (`EventRetriever`, `EventPersister`)
//! - [`sourcing`] - Event sources, preloaded caches and replay
//! - [`bus`] / [`command_bus`] - Batched event dispatch and logged command dispatch
//! - [`binding`] / [`state`] - Declarative dispatch tables and state rebuilding
//! - [`history`] - Whole histories in causal order
//! - [`catalogue`] - Live aggregate registries
//!
//! # Example
//!
//! ```
//! use chronicle_core::{sourcing::EventSource, store::inmemory::InMemoryEventStore};
//!
//! // Create an in-memory store and an event source over it
//! let store = InMemoryEventStore::empty();
//! let source = EventSource::retrieving(store);
//! ```
//!
//! Most users should depend on the [`chronicle`](https://docs.rs/chronicle) crate,
//! which re-exports these types with a cleaner API surface.

pub mod binding;
pub mod bus;
pub mod catalogue;
pub mod command;
pub mod command_bus;
pub mod event;
pub mod history;
pub mod identity;
pub mod sourcing;
pub mod state;
pub mod store;
pub mod time;
pub mod tuples;
