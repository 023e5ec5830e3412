//! Replay del journal: `RunEvent`s -> `RunState`.
//!
//! El repositorio aplica un replay lineal: consume eventos en orden de `seq`
//! y actualiza el estado. No accede al ledger ni al Artifact Store, así que
//! puede usarse desde herramientas que no tienen la definición del workflow
//! (p.ej. la CLI).
use thiserror::Error;
use uuid::Uuid;

use crate::event::{RunEvent, RunEventKind};
use crate::model::{BreakpointRecord, CompletedStep, ResolutionStatus, RunFailure, RunState, RunStatus, StepSlot,
                   WorkflowResult};
use crate::step::StepStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("run {0} has no events")]
    Empty(Uuid),
    #[error("journal of run {0} does not start with RunStarted")]
    MissingStart(Uuid),
    #[error("run {run_id} has a second RunStarted at seq {seq}")]
    DuplicateStart { run_id: Uuid, seq: u64 },
    #[error("run {run_id} journal gap: expected seq {expected}, found {found}")]
    SeqGap { run_id: Uuid, expected: u64, found: u64 },
    #[error("run {run_id} references unknown step #{step_index} '{step}'")]
    UnknownStep { run_id: Uuid, step_index: usize, step: String },
    #[error("run {run_id} resolves unknown breakpoint {breakpoint_id}")]
    UnknownBreakpoint { run_id: Uuid, breakpoint_id: String },
}

/// Trait para reconstruir (`replay`) el estado de una corrida a partir de eventos.
pub trait RunRepository: Send + Sync {
    fn load(&self, run_id: Uuid, events: &[RunEvent]) -> Result<RunState, ReplayError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayRepository;

impl ReplayRepository {
    pub fn new() -> Self {
        Self
    }
}

impl RunRepository for ReplayRepository {
    fn load(&self, run_id: Uuid, events: &[RunEvent]) -> Result<RunState, ReplayError> {
        replay(run_id, events)
    }
}

pub fn replay(run_id: Uuid, events: &[RunEvent]) -> Result<RunState, ReplayError> {
    let (first, rest) = events.split_first().ok_or(ReplayError::Empty(run_id))?;
    let RunEventKind::RunStarted { workflow_id,
                                   workflow_version,
                                   definition_hash,
                                   steps,
                                   inputs, } = &first.kind
    else {
        return Err(ReplayError::MissingStart(run_id));
    };
    if first.seq != 0 {
        return Err(ReplayError::SeqGap { run_id,
                                         expected: 0,
                                         found: first.seq });
    }
    let mut state = RunState { run_id,
                               workflow_id: workflow_id.clone(),
                               workflow_version: workflow_version.clone(),
                               definition_hash: definition_hash.clone(),
                               status: RunStatus::Running,
                               inputs: inputs.clone(),
                               started_at: first.ts,
                               steps: steps.iter().map(StepSlot::pending).collect(),
                               completed_steps: Vec::new(),
                               breakpoints: Vec::new(),
                               pending_breakpoint: None,
                               failure: None,
                               result: None,
                               run_fingerprint: None,
                               archived: false,
                               next_seq: 1,
                               updated_at: first.ts };
    for ev in rest {
        if ev.seq != state.next_seq {
            return Err(ReplayError::SeqGap { run_id,
                                             expected: state.next_seq,
                                             found: ev.seq });
        }
        apply(&mut state, ev)?;
        state.next_seq = ev.seq + 1;
        state.updated_at = ev.ts;
    }
    Ok(state)
}

fn slot_mut<'a>(state: &'a mut RunState, step_index: usize, step: &str) -> Result<&'a mut StepSlot, ReplayError> {
    let run_id = state.run_id;
    match state.steps.get_mut(step_index) {
        Some(slot) if slot.step == step => Ok(slot),
        _ => Err(ReplayError::UnknownStep { run_id,
                                            step_index,
                                            step: step.to_string() }),
    }
}

fn apply(state: &mut RunState, ev: &RunEvent) -> Result<(), ReplayError> {
    match &ev.kind {
        RunEventKind::RunStarted { .. } => {
            return Err(ReplayError::DuplicateStart { run_id: state.run_id,
                                                     seq: ev.seq })
        }
        RunEventKind::StepStarted { step_index,
                                    step,
                                    effect_id, } => {
            let slot = slot_mut(state, *step_index, step)?;
            slot.status = StepStatus::Running;
            slot.attempts += 1;
            slot.started_at.get_or_insert(ev.ts);
            slot.finished_at = None;
            if effect_id.is_some() {
                slot.effect_id = effect_id.clone();
            }
        }
        RunEventKind::StepFinished { step_index,
                                     step,
                                     effect_id,
                                     output_hash,
                                     output,
                                     modified_values, } => {
            let slot = slot_mut(state, *step_index, step)?;
            slot.status = StepStatus::FinishedOk;
            slot.finished_at = Some(ev.ts);
            slot.force_retry = false;
            if effect_id.is_some() {
                slot.effect_id = effect_id.clone();
            }
            state.completed_steps.retain(|c| &c.step != step);
            state.completed_steps.push(CompletedStep { step: step.clone(),
                                                       index: *step_index,
                                                       effect_id: effect_id.clone(),
                                                       output_hash: output_hash.clone(),
                                                       output: output.clone(),
                                                       modified_values: modified_values.clone(),
                                                       finished_at: ev.ts });
        }
        RunEventKind::StepFailed { step_index, step, .. } => {
            let slot = slot_mut(state, *step_index, step)?;
            slot.status = StepStatus::Failed;
            slot.finished_at = Some(ev.ts);
            slot.force_retry = false;
        }
        RunEventKind::GateEvaluated { step_index, step, .. } => {
            slot_mut(state, *step_index, step)?;
        }
        RunEventKind::BreakpointRequested { step_index,
                                            step,
                                            breakpoint_id,
                                            question,
                                            title,
                                            review_context, } => {
            let slot = slot_mut(state, *step_index, step)?;
            slot.status = StepStatus::AwaitingDecision;
            state.breakpoints.push(BreakpointRecord { breakpoint_id: breakpoint_id.clone(),
                                                      run_id: state.run_id,
                                                      step: step.clone(),
                                                      step_index: *step_index,
                                                      question: question.clone(),
                                                      title: title.clone(),
                                                      review_context: review_context.clone(),
                                                      resolution: ResolutionStatus::Pending,
                                                      modified_values: None,
                                                      resolved_by: None,
                                                      requested_at: ev.ts,
                                                      resolved_at: None });
            state.pending_breakpoint = Some(breakpoint_id.clone());
            state.status = RunStatus::Suspended;
        }
        RunEventKind::BreakpointResolved { breakpoint_id, resolution } => {
            let run_id = state.run_id;
            let record = state.breakpoints
                              .iter_mut()
                              .rev()
                              .find(|b| &b.breakpoint_id == breakpoint_id && b.is_pending())
                              .ok_or_else(|| ReplayError::UnknownBreakpoint { run_id,
                                                                              breakpoint_id: breakpoint_id.to_string() })?;
            record.resolution = resolution.decision.into();
            record.modified_values = resolution.modified_values.clone();
            record.resolved_by = resolution.resolved_by.clone();
            record.resolved_at = Some(ev.ts);
            if state.pending_breakpoint.as_ref() == Some(breakpoint_id) {
                state.pending_breakpoint = None;
            }
            state.status = RunStatus::Running;
        }
        RunEventKind::RetryScheduled { step_index, step } => {
            let slot = slot_mut(state, *step_index, step)?;
            slot.status = StepStatus::Pending;
            slot.finished_at = None;
            slot.force_retry = true;
            state.status = RunStatus::Running;
            state.failure = None;
            state.result = None;
        }
        RunEventKind::RunCompleted { run_fingerprint, result } => {
            state.status = RunStatus::Completed;
            state.run_fingerprint = Some(run_fingerprint.clone());
            state.result = Some(result.clone());
        }
        RunEventKind::RunFailed { phase, error } => {
            let reason = error.to_string();
            state.status = RunStatus::Failed;
            state.result = Some(WorkflowResult::failure(phase.clone(), reason.clone()));
            state.failure = Some(RunFailure { phase: phase.clone(),
                                              reason,
                                              error: Some(error.clone()) });
        }
        RunEventKind::RunAborted { phase, reason } => {
            state.status = RunStatus::Aborted;
            state.pending_breakpoint = None;
            state.result = Some(WorkflowResult::failure(phase.clone(), reason.clone()));
            state.failure = Some(RunFailure { phase: phase.clone(),
                                              reason: reason.clone(),
                                              error: None });
        }
        RunEventKind::RunArchived => state.archived = true,
    }
    Ok(())
}
