//! Journal de corrida sobre filesystem.
//!
//! `runs/<run_id>/journal.jsonl` es la fuente de verdad (un `RunEvent` por
//! línea). `runs/<run_id>/state.json` es un resumen para listados rápidos
//! que se reescribe tras cada append; nunca se usa para el replay.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::debug;
use procflow_core::{EventStore, EventStoreError, RunEvent, RunEventKind, RunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jsonl;
use crate::error::PersistenceError;

/// Resumen de `state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    pub archived: bool,
    pub next_seq: u64,
    pub last_event: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunSnapshot {
    fn advance(previous: Option<RunSnapshot>, ev: &RunEvent) -> Option<RunSnapshot> {
        let mut snap = match (&ev.kind, previous) {
            (RunEventKind::RunStarted { workflow_id, .. }, _) => RunSnapshot { run_id: ev.run_id,
                                                                                workflow_id: workflow_id.clone(),
                                                                                status: RunStatus::Running,
                                                                                archived: false,
                                                                                next_seq: 0,
                                                                                last_event: String::new(),
                                                                                started_at: ev.ts,
                                                                                updated_at: ev.ts },
            (_, Some(prev)) => prev,
            (_, None) => return None,
        };
        match &ev.kind {
            RunEventKind::BreakpointRequested { .. } => snap.status = RunStatus::Suspended,
            RunEventKind::BreakpointResolved { .. } | RunEventKind::RetryScheduled { .. } => {
                snap.status = RunStatus::Running
            }
            RunEventKind::RunCompleted { .. } => snap.status = RunStatus::Completed,
            RunEventKind::RunFailed { .. } => snap.status = RunStatus::Failed,
            RunEventKind::RunAborted { .. } => snap.status = RunStatus::Aborted,
            RunEventKind::RunArchived => snap.archived = true,
            _ => {}
        }
        snap.next_seq = ev.seq + 1;
        snap.last_event = ev.kind.variant_name().to_string();
        snap.updated_at = ev.ts;
        Some(snap)
    }
}

pub struct FsEventStore {
    runs_dir: PathBuf,
    // serializa appends dentro del proceso
    write_lock: Mutex<()>,
}

impl FsEventStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir,
                  write_lock: Mutex::new(()) })
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(run_id.to_string())
    }

    fn journal_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join("journal.jsonl")
    }

    fn state_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join("state.json")
    }

    /// Lee el resumen de `state.json`, si existe.
    pub fn snapshot(&self, run_id: Uuid) -> Result<Option<RunSnapshot>, PersistenceError> {
        match fs::read(self.state_path(run_id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_journal(&self, run_id: Uuid) -> Result<jsonl::JsonlRead<RunEvent>, PersistenceError> {
        let path = self.journal_path(run_id);
        let read: jsonl::JsonlRead<RunEvent> = jsonl::read(&path)?;
        for (idx, ev) in read.records.iter().enumerate() {
            if ev.seq != idx as u64 || ev.run_id != run_id {
                return Err(PersistenceError::Corrupt { file: path.display().to_string(),
                                                       line: idx + 1,
                                                       reason: format!("expected seq {idx} of run {run_id}, found seq {} of run {}",
                                                                       ev.seq, ev.run_id) });
            }
        }
        Ok(read)
    }

    fn push(&self, run_id: Uuid, expected: Option<u64>, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        let _guard = self.write_lock
                         .lock()
                         .map_err(|_| EventStoreError::Backend("journal lock poisoned".into()))?;
        let current = self.read_journal(run_id)?;
        let seq = current.records.len() as u64;
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
        jsonl::append(&self.journal_path(run_id), &ev, current.torn_at)?;
        if let Some(snap) = RunSnapshot::advance(self.snapshot(run_id).ok().flatten(), &ev) {
            let bytes = serde_json::to_vec_pretty(&snap).map_err(PersistenceError::from)?;
            jsonl::write_atomic(&self.state_path(run_id), &bytes)?;
        }
        debug!("journal append run={run_id} seq={seq} kind={}", ev.kind.variant_name());
        Ok(ev)
    }
}

impl EventStore for FsEventStore {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        self.push(run_id, None, kind)
    }

    fn append_expecting(&self, run_id: Uuid, expected_seq: u64, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        self.push(run_id, Some(expected_seq), kind)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EventStoreError> {
        Ok(self.read_journal(run_id)?.records)
    }

    fn list_runs(&self) -> Result<Vec<Uuid>, EventStoreError> {
        let entries = fs::read_dir(&self.runs_dir).map_err(PersistenceError::from)?;
        let mut runs: Vec<(Uuid, DateTime<Utc>)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(PersistenceError::from)?;
            let Some(run_id) = entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()) else {
                continue;
            };
            if let Some(first) = self.read_journal(run_id)?.records.first() {
                runs.push((run_id, first.ts));
            }
        }
        runs.sort_by_key(|(_, ts)| *ts);
        Ok(runs.into_iter().map(|(id, _)| id).collect())
    }
}
