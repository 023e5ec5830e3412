use serde::{Deserialize, Serialize};

/// Estado de un Step en tiempo de ejecución.
///
/// Las transiciones válidas son:
/// - `Pending` -> `Running`
/// - `Running` -> `FinishedOk`
/// - `Running` -> `AwaitingDecision` (breakpoint o gate escalado)
/// - `AwaitingDecision` -> `FinishedOk` (decisión aprobada/modificada)
/// - `Running` -> `Failed`
/// - `Failed` -> `Pending` (sólo vía `RetryScheduled`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// El paso está pendiente de ejecución.
    Pending,
    /// El paso está en ejecución.
    Running,
    /// El paso espera la decisión de un revisor.
    AwaitingDecision,
    /// El paso finalizó correctamente.
    FinishedOk,
    /// El paso falló.
    Failed,
}
