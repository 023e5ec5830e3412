//! Definiciones de eventos y trait EventStore.

mod store;
mod types;

pub use store::{EventStore, EventStoreError, InMemoryEventStore};
pub use types::{RunEvent, RunEventKind};
