//! Contexto de ejecución de una corrida.
//!
//! `RunContext` se construye en cada entrada del runner (start, resume,
//! resolve, retry) a partir del `RunState` reconstruido y viaja por todas las
//! llamadas de esa entrada: identidad del run, journal con su `seq` esperado,
//! reloj lógico y acceso al executor, al ledger y al Artifact Store.

use chrono::{DateTime, Utc};
use log::Level;
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::breakpoint::{BreakpointError, BreakpointManager, SuspendRequest};
use crate::constants::RUN_LOG_TARGET;
use crate::event::{EventStore, EventStoreError, RunEvent, RunEventKind};
use crate::executor::{TaskError, TaskExecutor, TaskInvocation, TaskResult};
use crate::ledger::EffectLedger;
use crate::model::{BreakpointRecord, EffectId, RunState};

/// Reloj lógico: el tiempo que ve un step es el de su primer `StepStarted`,
/// así que es estable entre replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalClock {
    step: DateTime<Utc>,
    latest: DateTime<Utc>,
}

impl LogicalClock {
    pub fn starting_at(ts: DateTime<Utc>) -> Self {
        Self { step: ts, latest: ts }
    }

    /// Reloj sembrado con los tiempos ya registrados en el journal.
    pub fn from_state(state: &RunState) -> Self {
        let mut clock = Self::starting_at(state.started_at);
        for c in &state.completed_steps {
            clock.observe(c.finished_at);
        }
        clock
    }

    pub fn enter(&mut self, ts: DateTime<Utc>) {
        self.step = ts;
        self.observe(ts);
    }

    pub fn observe(&mut self, ts: DateTime<Utc>) {
        if ts > self.latest {
            self.latest = ts;
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.step
    }

    pub fn latest(&self) -> DateTime<Utc> {
        self.latest
    }
}

/// Escritor del journal con control optimista de `seq`.
struct Journal<'r> {
    events: &'r dyn EventStore,
    run_id: Uuid,
    next_seq: u64,
}

impl Journal<'_> {
    fn append(&mut self, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        let ev = self.events.append_expecting(self.run_id, self.next_seq, kind)?;
        self.next_seq = ev.seq + 1;
        Ok(ev)
    }
}

pub struct RunContext<'r> {
    run_id: Uuid,
    journal: Journal<'r>,
    clock: LogicalClock,
    executor: &'r TaskExecutor,
    breakpoints: &'r BreakpointManager,
    ledger: &'r dyn EffectLedger,
    artifacts: &'r dyn ArtifactStore,
}

impl<'r> RunContext<'r> {
    pub(crate) fn new(state: &RunState,
                      events: &'r dyn EventStore,
                      executor: &'r TaskExecutor,
                      breakpoints: &'r BreakpointManager,
                      ledger: &'r dyn EffectLedger,
                      artifacts: &'r dyn ArtifactStore)
                      -> Self {
        Self { run_id: state.run_id,
               journal: Journal { events,
                                  run_id: state.run_id,
                                  next_seq: state.next_seq },
               clock: LogicalClock::from_state(state),
               executor,
               breakpoints,
               ledger,
               artifacts }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Tiempo lógico del step en curso.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn enter_step(&mut self, started_at: DateTime<Utc>) {
        self.clock.enter(started_at);
    }

    pub fn log(&self, level: Level, message: &str) {
        log::log!(target: RUN_LOG_TARGET, level, "[{}] {}", self.run_id, message);
    }

    /// Agrega un evento al journal del run.
    pub fn emit(&mut self, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        let ev = self.journal.append(kind)?;
        self.clock.observe(ev.ts);
        Ok(ev)
    }

    /// Dispatch idempotente de una tarea.
    pub async fn task(&self, invocation: TaskInvocation<'_>) -> Result<TaskResult, TaskError> {
        self.executor.run(invocation).await
    }

    /// Falla si otro dueño puede estar despachando el efecto.
    pub fn ensure_unowned(&self, effect_id: &EffectId) -> Result<(), TaskError> {
        self.executor.ensure_unowned(effect_id)
    }

    /// Suspende el run en un breakpoint.
    pub fn breakpoint(&mut self, request: SuspendRequest) -> Result<BreakpointRecord, BreakpointError> {
        let record = self.breakpoints.suspend(self.run_id, self.journal.next_seq, request)?;
        self.journal.next_seq += 1;
        self.clock.observe(record.requested_at);
        Ok(record)
    }

    pub fn ledger(&self) -> &dyn EffectLedger {
        self.ledger
    }

    pub fn artifacts(&self) -> &dyn ArtifactStore {
        self.artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn clock_keeps_step_time_and_tracks_latest() {
        let t0 = Utc::now();
        let mut clock = LogicalClock::starting_at(t0);
        clock.enter(t0 + Duration::seconds(5));
        clock.observe(t0 + Duration::seconds(9));
        clock.observe(t0 + Duration::seconds(1));
        assert_eq!(clock.now(), t0 + Duration::seconds(5));
        assert_eq!(clock.latest(), t0 + Duration::seconds(9));
    }
}
