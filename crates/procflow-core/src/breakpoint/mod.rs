//! Breakpoint Manager.
//!
//! `running --suspend--> suspended --resolve--> running | aborted`
//!
//! La suspensión es sólo un evento en el journal (`BreakpointRequested`) más
//! los artifacts de revisión en el Artifact Store. No se guarda ninguna
//! continuación en memoria: el runner vuelve a entrar por replay.
use std::sync::Arc;

use log::info;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::artifacts::{review_path, ArtifactError, ArtifactStore};
use crate::event::{EventStore, EventStoreError, RunEventKind};
use crate::model::result::RESERVED_RESULT_KEYS;
use crate::model::{BreakpointId, BreakpointRecord, Decision, ResolutionStatus, Resolution, ReviewArtifact,
                   ReviewContext, RunState, RunStatus};
use crate::repo::{ReplayError, ReplayRepository, RunRepository};

#[derive(Debug, Error)]
pub enum BreakpointError {
    #[error("breakpoint {0} not found")]
    NotFound(BreakpointId),
    #[error("breakpoint {breakpoint_id} is already {resolution}")]
    AlreadyResolved { breakpoint_id: BreakpointId, resolution: &'static str },
    #[error("run {run_id} is {status}: cannot {action}")]
    InvalidRunState { run_id: Uuid, status: RunStatus, action: &'static str },
    #[error("run {0} is archived")]
    Archived(Uuid),
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),
    #[error(transparent)]
    Events(#[from] EventStoreError),
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Datos de una suspensión.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendRequest {
    pub step_index: usize,
    pub step: String,
    pub question: String,
    pub title: String,
    pub context: Value,
    pub artifacts: Vec<ReviewArtifact>,
}

pub struct BreakpointManager {
    events: Arc<dyn EventStore>,
    artifacts: Arc<dyn ArtifactStore>,
    repository: Arc<dyn RunRepository>,
}

impl BreakpointManager {
    pub fn new(events: Arc<dyn EventStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { events,
               artifacts,
               repository: Arc::new(ReplayRepository::new()) }
    }

    /// Reconstruye el estado con `repository` en lugar del replay por defecto.
    pub fn with_repository(mut self, repository: Arc<dyn RunRepository>) -> Self {
        self.repository = repository;
        self
    }

    /// Escribe los artifacts de revisión y agrega exactamente un evento
    /// (`BreakpointRequested`) en `expected_seq`.
    pub fn suspend(&self, run_id: Uuid, expected_seq: u64, req: SuspendRequest) -> Result<BreakpointRecord, BreakpointError> {
        let breakpoint_id = BreakpointId::new(run_id, req.step.clone());
        let mut artifact_refs = Vec::with_capacity(req.artifacts.len());
        for a in &req.artifacts {
            let path = review_path(&breakpoint_id, &a.path);
            artifact_refs.push(self.artifacts.put(run_id, &path, a.format, &a.content)?);
        }
        let review_context = ReviewContext { context: req.context,
                                             artifacts: req.artifacts,
                                             artifact_refs };
        let ev = self.events.append_expecting(run_id,
                                              expected_seq,
                                              RunEventKind::BreakpointRequested { step_index: req.step_index,
                                                                                  step: req.step.clone(),
                                                                                  breakpoint_id: breakpoint_id.clone(),
                                                                                  question: req.question.clone(),
                                                                                  title: req.title.clone(),
                                                                                  review_context:
                                                                                      review_context.clone() })?;
        info!("run {run_id} suspended at '{}' awaiting decision", req.step);
        Ok(BreakpointRecord { breakpoint_id,
                              run_id,
                              step: req.step,
                              step_index: req.step_index,
                              question: req.question,
                              title: req.title,
                              review_context,
                              resolution: ResolutionStatus::Pending,
                              modified_values: None,
                              resolved_by: None,
                              requested_at: ev.ts,
                              resolved_at: None })
    }

    /// Registra la decisión. Un rechazo aborta la corrida; aprobar o
    /// modificar la deja en `running` para que el runner continúe.
    pub fn resolve(&self, breakpoint_id: &BreakpointId, resolution: Resolution) -> Result<RunState, BreakpointError> {
        check_resolution(&resolution)?;
        let run_id = breakpoint_id.run_id;
        let state = self.load(run_id)?;
        if state.archived {
            return Err(BreakpointError::Archived(run_id));
        }
        let record = state.breakpoint(breakpoint_id)
                          .ok_or_else(|| BreakpointError::NotFound(breakpoint_id.clone()))?;
        if !record.is_pending() {
            return Err(BreakpointError::AlreadyResolved { breakpoint_id: breakpoint_id.clone(),
                                                          resolution: record.resolution.as_str() });
        }
        if state.status != RunStatus::Suspended {
            return Err(BreakpointError::InvalidRunState { run_id,
                                                          status: state.status,
                                                          action: "resolve a breakpoint" });
        }

        let decision = resolution.decision;
        let reviewer = resolution.resolved_by.clone();
        let mut seq = state.next_seq;
        self.events.append_expecting(run_id,
                                     seq,
                                     RunEventKind::BreakpointResolved { breakpoint_id: breakpoint_id.clone(),
                                                                        resolution })?;
        seq += 1;
        if decision == Decision::Rejected {
            let reason = match reviewer {
                Some(by) => format!("breakpoint '{}' rejected by {by}", breakpoint_id.step),
                None => format!("breakpoint '{}' rejected", breakpoint_id.step),
            };
            self.events.append_expecting(run_id,
                                         seq,
                                         RunEventKind::RunAborted { phase: breakpoint_id.step.clone(),
                                                                    reason })?;
        }
        info!("breakpoint {breakpoint_id} resolved: {}", decision.as_str());
        self.load(run_id)
    }

    pub fn list(&self, run_id: Uuid) -> Result<Vec<BreakpointRecord>, BreakpointError> {
        Ok(self.load(run_id)?.breakpoints)
    }

    pub fn pending(&self, run_id: Uuid) -> Result<Option<BreakpointRecord>, BreakpointError> {
        Ok(self.load(run_id)?.pending_breakpoint_record().cloned())
    }

    fn load(&self, run_id: Uuid) -> Result<RunState, BreakpointError> {
        let events = self.events.list(run_id)?;
        Ok(self.repository.load(run_id, &events)?)
    }
}

fn check_resolution(resolution: &Resolution) -> Result<(), BreakpointError> {
    if let Some(key) = resolution.modified_values
                                 .iter()
                                 .flat_map(|m| m.keys())
                                 .find(|k| RESERVED_RESULT_KEYS.contains(&k.as_str()))
    {
        return Err(BreakpointError::InvalidResolution(format!("'{key}' is reserved by the result envelope")));
    }
    let has_values = resolution.modified_values.as_ref().is_some_and(|m| !m.is_empty());
    match resolution.decision {
        Decision::Modified if !has_values => {
            Err(BreakpointError::InvalidResolution("'modified' requires non-empty modifiedValues".into()))
        }
        Decision::Rejected if has_values => {
            Err(BreakpointError::InvalidResolution("'rejected' cannot carry modifiedValues".into()))
        }
        _ => Ok(()),
    }
}
