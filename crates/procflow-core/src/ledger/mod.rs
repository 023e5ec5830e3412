//! Effect Ledger: registro durable de cada invocación de tarea.
//!
//! `get_or_create` es el único camino de escritura para iniciar un efecto y
//! debe ser atómico por `effect_id`: dos llamadas concurrentes con la misma
//! clave obtienen el mismo registro y sólo una ve `created = true`. Las
//! transiciones posteriores se aplican con los `mark_*` de `EffectRecord`.

mod memory;

pub use memory::InMemoryEffectLedger;

use thiserror::Error;
use uuid::Uuid;

use crate::model::{ArtifactRef, EffectId, EffectRecord, EffectStatus};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("effect {0} not found")]
    NotFound(EffectId),
    /// Mismo `effect_id` con inputs divergentes: error fatal.
    #[error("effect {effect_id} was recorded with input hash {stored}, now requested with {given}")]
    Inconsistent { effect_id: EffectId, stored: String, given: String },
    #[error("effect {effect_id} is {from}: cannot {action}")]
    InvalidTransition { effect_id: EffectId, from: EffectStatus, action: &'static str },
    #[error("ledger backend: {0}")]
    Backend(String),
}

/// Datos para iniciar un efecto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEffect {
    pub effect_id: EffectId,
    pub run_id: Uuid,
    pub step: String,
    pub input_hash: String,
}

/// Resultado de `get_or_create`.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectClaim {
    pub record: EffectRecord,
    /// `true` si esta llamada creó el registro.
    pub created: bool,
}

pub trait EffectLedger: Send + Sync {
    /// Devuelve el registro existente (verificando el `input_hash`) o crea uno
    /// nuevo en `pending`.
    fn get_or_create(&self, new: NewEffect) -> Result<EffectClaim, LedgerError>;
    /// `pending -> succeeded`.
    fn complete(&self, effect_id: &EffectId, result: ArtifactRef) -> Result<EffectRecord, LedgerError>;
    /// `pending -> failed`.
    fn fail(&self, effect_id: &EffectId, error: &str) -> Result<EffectRecord, LedgerError>;
    /// Reintento forzado: `failed -> pending`, `attempts + 1`, mismo id.
    fn retry(&self, effect_id: &EffectId) -> Result<EffectRecord, LedgerError>;
    /// Efecto `pending` abandonado por un proceso anterior: `attempts + 1`.
    fn reclaim(&self, effect_id: &EffectId) -> Result<EffectRecord, LedgerError>;
    fn get(&self, effect_id: &EffectId) -> Result<Option<EffectRecord>, LedgerError>;
    /// Efectos de un run en orden de creación.
    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<EffectRecord>, LedgerError>;
}
