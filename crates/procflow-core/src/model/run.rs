//! Estado reconstruido de una corrida (`RunState`).
//!
//! `RunState` nunca se persiste directamente: es el resultado de aplicar el
//! replay del journal (`repo::ReplayRepository`). Cualquier cambio de estado
//! pasa por un evento.
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{BreakpointId, BreakpointRecord, EffectId, WorkflowResult};
use crate::errors::CoreEngineError;
use crate::step::StepStatus;

/// Mapa de outputs con nombre, en orden de materialización.
pub type NamedOutputs = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estado de un step dentro de la corrida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSlot {
    pub step: String,
    pub status: StepStatus,
    /// Número de `StepStarted` observados.
    pub attempts: u32,
    /// Primer inicio del step; es el reloj lógico que ve el step.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub effect_id: Option<EffectId>,
    /// Activado por `RetryScheduled`: el siguiente dispatch fuerza el
    /// reintento del efecto fallido.
    pub force_retry: bool,
}

impl StepSlot {
    pub fn pending(step: impl Into<String>) -> Self {
        Self { step: step.into(),
               status: StepStatus::Pending,
               attempts: 0,
               started_at: None,
               finished_at: None,
               effect_id: None,
               force_retry: false }
    }
}

/// Resultado de un step terminado correctamente.
///
/// Para steps de tarea `output` es `None`: el valor se rehidrata desde el
/// ledger y el Artifact Store. `output_hash` permite verificar esa
/// rehidratación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStep {
    pub step: String,
    pub index: usize,
    pub effect_id: Option<EffectId>,
    pub output_hash: String,
    pub output: Option<Value>,
    /// Valores inyectados por un revisor; se fusionan en los outputs tras el
    /// output del propio step.
    pub modified_values: Option<Map<String, Value>>,
    pub finished_at: DateTime<Utc>,
}

/// Fallo estructurado: qué fase y por qué.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub phase: String,
    pub reason: String,
    pub error: Option<CoreEngineError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_version: String,
    pub definition_hash: String,
    pub status: RunStatus,
    pub inputs: Value,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepSlot>,
    pub completed_steps: Vec<CompletedStep>,
    pub breakpoints: Vec<BreakpointRecord>,
    pub pending_breakpoint: Option<BreakpointId>,
    pub failure: Option<RunFailure>,
    pub result: Option<WorkflowResult>,
    pub run_fingerprint: Option<String>,
    pub archived: bool,
    /// Siguiente `seq` esperado en el journal (control optimista).
    pub next_seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Índice del primer step que aún no terminó correctamente.
    pub fn cursor(&self) -> usize {
        self.steps
            .iter()
            .position(|s| s.status != StepStatus::FinishedOk)
            .unwrap_or(self.steps.len())
    }

    pub fn slot(&self, step: &str) -> Option<&StepSlot> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn completed(&self, step: &str) -> Option<&CompletedStep> {
        self.completed_steps.iter().find(|c| c.step == step)
    }

    pub fn breakpoint(&self, id: &BreakpointId) -> Option<&BreakpointRecord> {
        self.breakpoints.iter().rev().find(|b| &b.breakpoint_id == id)
    }

    pub fn pending_breakpoint_record(&self) -> Option<&BreakpointRecord> {
        self.pending_breakpoint.as_ref().and_then(|id| self.breakpoint(id))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
