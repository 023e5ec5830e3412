//! Errores del core.
//!
//! - `CoreEngineError`: error serializable que queda registrado en el journal
//!   (`StepFailed`, `RunFailed`). Es la forma estable y observable de "por qué
//!   se detuvo una corrida".
//! - `EngineError`: errores de la fachada `WorkflowRunner` (uso incorrecto de
//!   la API o fallos de infraestructura). Un fallo de negocio nunca llega aquí:
//!   se materializa como un `RunState` terminal con su `WorkflowResult`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::artifacts::ArtifactError;
use crate::breakpoint::BreakpointError;
use crate::event::EventStoreError;
use crate::executor::TaskError;
use crate::ledger::LedgerError;
use crate::model::RunStatus;
use crate::repo::{DefinitionError, ReplayError};

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CoreEngineError {
    #[error("missing required input '{0}'")]
    MissingInputs(String),
    #[error("contract violation: {0}")]
    ContractViolation(String),
    #[error("dispatch failed after {attempts} attempt(s): {reason}")]
    DispatchExhausted { attempts: u32, reason: String },
    #[error("effect {effect_id} failed previously: {reason}")]
    EffectFailed { effect_id: String, reason: String },
    #[error("ledger inconsistency for effect {effect_id}: {details}")]
    LedgerInconsistency { effect_id: String, details: String },
    #[error("quality gate failed: {0}")]
    GateFailed(String),
    #[error("agent rejected the task: {0}")]
    AgentRejected(String),
    #[error("unknown skill '{0}'")]
    UnknownSkill(String),
    #[error("skill '{skill}' failed: {reason}")]
    SkillFailed { skill: String, reason: String },
    #[error("storage: {0}")]
    Storage(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Clasificación gruesa usada para decidir reintentos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Salida o inputs que no cumplen el contrato declarado.
    Validation,
    /// Fallo de transporte con el agente (timeout, inalcanzable).
    Transient,
    /// Fallo de ejecución no transitorio (skill, storage).
    Runtime,
    /// Error de configuración: reintentar no cambia el resultado.
    Permanent,
}

pub fn classify_error(e: &CoreEngineError) -> ErrorClass {
    match e {
        CoreEngineError::MissingInputs(_) | CoreEngineError::ContractViolation(_) => ErrorClass::Validation,
        CoreEngineError::DispatchExhausted { .. } | CoreEngineError::EffectFailed { .. } => ErrorClass::Transient,
        CoreEngineError::AgentRejected(_)
        | CoreEngineError::SkillFailed { .. }
        | CoreEngineError::Storage(_)
        | CoreEngineError::Internal(_) => ErrorClass::Runtime,
        CoreEngineError::LedgerInconsistency { .. }
        | CoreEngineError::GateFailed(_)
        | CoreEngineError::UnknownSkill(_) => ErrorClass::Permanent,
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),
    #[error("run {0} not found")]
    RunNotFound(Uuid),
    #[error("run {0} already exists")]
    RunExists(Uuid),
    #[error("run {run_id} is {status}: cannot {action}")]
    InvalidState { run_id: Uuid, status: RunStatus, action: &'static str },
    #[error("run {run_id} is archived")]
    Archived { run_id: Uuid },
    #[error("run {run_id} cannot be retried: {reason}")]
    NotRetryable { run_id: Uuid, reason: String },
    #[error("runner is missing its {0}")]
    MissingComponent(&'static str),
    #[error("run {run_id} was started with definition {recorded}, registry has {current}")]
    DefinitionMismatch { run_id: Uuid, recorded: String, current: String },
    #[error(transparent)]
    Events(#[from] EventStoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    /// Fallo de infraestructura durante un dispatch; la corrida sigue en
    /// `running` y puede reanudarse.
    #[error(transparent)]
    Task(#[from] TaskError),
}
