use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use super::{RunEvent, RunEventKind};

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Otro escritor avanzó el journal: el `seq` esperado ya no es el
    /// siguiente.
    #[error("journal conflict for run {run_id}: expected seq {expected}, journal is at {found}")]
    Conflict { run_id: Uuid, expected: u64, found: u64 },
    #[error("event store backend: {0}")]
    Backend(String),
}

/// Almacenamiento de eventos append-only.
///
/// Las implementaciones deben asignar `seq` contiguos por run empezando en 0
/// y devolver `list` en orden ascendente de `seq`.
pub trait EventStore: Send + Sync {
    /// Agrega un evento a partir de su kind y devuelve el evento completo (con seq y ts).
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EventStoreError>;
    /// Como `append_kind`, pero falla con `Conflict` si el siguiente `seq`
    /// del run no es `expected_seq`.
    fn append_expecting(&self, run_id: Uuid, expected_seq: u64, kind: RunEventKind) -> Result<RunEvent, EventStoreError>;
    /// Lista eventos de un run (orden ascendente por seq).
    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EventStoreError>;
    /// Runs con al menos un evento.
    fn list_runs(&self) -> Result<Vec<Uuid>, EventStoreError>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    inner: DashMap<Uuid, Vec<RunEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, run_id: Uuid, expected: Option<u64>, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        let mut entry = self.inner.entry(run_id).or_default();
        let seq = entry.len() as u64;
        if let Some(expected) = expected {
            if expected != seq {
                return Err(EventStoreError::Conflict { run_id,
                                                       expected,
                                                       found: seq });
            }
        }
        let ev = RunEvent { seq,
                            run_id,
                            kind,
                            ts: Utc::now() };
        entry.push(ev.clone());
        Ok(ev)
    }
}

impl EventStore for InMemoryEventStore {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        self.push(run_id, None, kind)
    }

    fn append_expecting(&self, run_id: Uuid, expected_seq: u64, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        self.push(run_id, Some(expected_seq), kind)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EventStoreError> {
        Ok(self.inner.get(&run_id).map(|v| v.value().clone()).unwrap_or_default())
    }

    fn list_runs(&self) -> Result<Vec<Uuid>, EventStoreError> {
        let mut runs: Vec<(Uuid, chrono::DateTime<Utc>)> =
            self.inner
                .iter()
                .filter_map(|e| e.value().first().map(|first| (*e.key(), first.ts)))
                .collect();
        runs.sort_by_key(|(_, ts)| *ts);
        Ok(runs.into_iter().map(|(id, _)| id).collect())
    }
}
