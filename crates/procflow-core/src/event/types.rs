//! Tipos de evento del journal de una corrida y estructura `RunEvent`.
//!
//! Rol en el flujo:
//! - El `WorkflowRunner` y el `BreakpointManager` emiten eventos a un
//!   `EventStore` append-only.
//! - `RunState` se reconstruye por replay de estos eventos; no existe otra
//!   fuente de verdad sobre el progreso de una corrida.
//! - `RunEventKind` es el contrato observable y estable del motor: los
//!   backends lo persisten tal cual (JSON) junto a su `variant_name()`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::CoreEngineError;
use crate::model::{BreakpointId, EffectId, Resolution, ReviewContext, WorkflowResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEventKind {
    /// Primer evento de toda corrida. Fija la definición (hash + nombres de
    /// steps en orden) y los inputs iniciales.
    RunStarted {
        workflow_id: String,
        workflow_version: String,
        definition_hash: String,
        steps: Vec<String>,
        inputs: Value,
    },
    /// Un step comenzó. Para tareas incluye el `effect_id` derivado.
    StepStarted {
        step_index: usize,
        step: String,
        effect_id: Option<EffectId>,
    },
    /// Un step terminó correctamente. `output` sólo se guarda inline para
    /// steps que no pasan por el ledger (breakpoints, gates).
    StepFinished {
        step_index: usize,
        step: String,
        effect_id: Option<EffectId>,
        output_hash: String,
        output: Option<Value>,
        modified_values: Option<Map<String, Value>>,
    },
    StepFailed {
        step_index: usize,
        step: String,
        error: CoreEngineError,
    },
    /// Resultado de un quality gate (pasó o no y qué checks fallaron).
    GateEvaluated {
        step_index: usize,
        step: String,
        passed: bool,
        failures: Vec<String>,
    },
    /// La corrida queda suspendida esperando una decisión.
    BreakpointRequested {
        step_index: usize,
        step: String,
        breakpoint_id: BreakpointId,
        question: String,
        title: String,
        review_context: ReviewContext,
    },
    BreakpointResolved {
        breakpoint_id: BreakpointId,
        resolution: Resolution,
    },
    /// Reintento manual de una corrida fallida a partir de `step`.
    RetryScheduled { step_index: usize, step: String },
    RunCompleted {
        run_fingerprint: String,
        result: WorkflowResult,
    },
    RunFailed {
        phase: String,
        error: CoreEngineError,
    },
    /// Rechazo en un breakpoint: distinto de `RunFailed`.
    RunAborted { phase: String, reason: String },
    RunArchived,
}

impl RunEventKind {
    /// Nombre estable de la variante (columna `event_type` en los backends).
    pub fn variant_name(&self) -> &'static str {
        match self {
            RunEventKind::RunStarted { .. } => "RunStarted",
            RunEventKind::StepStarted { .. } => "StepStarted",
            RunEventKind::StepFinished { .. } => "StepFinished",
            RunEventKind::StepFailed { .. } => "StepFailed",
            RunEventKind::GateEvaluated { .. } => "GateEvaluated",
            RunEventKind::BreakpointRequested { .. } => "BreakpointRequested",
            RunEventKind::BreakpointResolved { .. } => "BreakpointResolved",
            RunEventKind::RetryScheduled { .. } => "RetryScheduled",
            RunEventKind::RunCompleted { .. } => "RunCompleted",
            RunEventKind::RunFailed { .. } => "RunFailed",
            RunEventKind::RunAborted { .. } => "RunAborted",
            RunEventKind::RunArchived => "RunArchived",
        }
    }

    /// Todas las variantes conocidas (usado por los checks de los backends).
    pub const VARIANTS: [&'static str; 12] = ["RunStarted",
                                              "StepStarted",
                                              "StepFinished",
                                              "StepFailed",
                                              "GateEvaluated",
                                              "BreakpointRequested",
                                              "BreakpointResolved",
                                              "RetryScheduled",
                                              "RunCompleted",
                                              "RunFailed",
                                              "RunAborted",
                                              "RunArchived"];

    /// Nombre del step al que se refiere el evento, si aplica.
    pub fn step(&self) -> Option<&str> {
        match self {
            RunEventKind::StepStarted { step, .. }
            | RunEventKind::StepFinished { step, .. }
            | RunEventKind::StepFailed { step, .. }
            | RunEventKind::GateEvaluated { step, .. }
            | RunEventKind::BreakpointRequested { step, .. }
            | RunEventKind::RetryScheduled { step, .. } => Some(step),
            RunEventKind::BreakpointResolved { breakpoint_id, .. } => Some(&breakpoint_id.step),
            RunEventKind::RunFailed { phase, .. } | RunEventKind::RunAborted { phase, .. } => Some(phase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64, // contiguo por run, desde 0
    pub run_id: Uuid,
    pub kind: RunEventKind,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names_cover_every_kind() {
        let kinds = [RunEventKind::RunArchived,
                     RunEventKind::RetryScheduled { step_index: 1,
                                                    step: "b".into() },
                     RunEventKind::RunAborted { phase: "review".into(),
                                                reason: "rejected".into() }];
        for k in &kinds {
            assert!(RunEventKind::VARIANTS.contains(&k.variant_name()));
        }
        assert_eq!(kinds[2].step(), Some("review"));
    }

    #[test]
    fn event_kind_json_is_externally_tagged() {
        let k = RunEventKind::StepFailed { step_index: 0,
                                           step: "a".into(),
                                           error: CoreEngineError::ContractViolation("missing 'x'".into()) };
        let v = serde_json::to_value(&k).unwrap();
        assert!(v.get("StepFailed").is_some());
        let back: RunEventKind = serde_json::from_value(v).unwrap();
        assert_eq!(back, k);
    }
}
