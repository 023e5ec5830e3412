//! Efectos: una invocación durable e idempotente de una operación externa.
//!
//! Las transiciones de `EffectRecord` viven aquí para que todos los backends
//! del ledger (memoria, filesystem, Postgres) apliquen exactamente las mismas
//! reglas:
//!
//! - `Pending -> Succeeded` (`mark_succeeded`), una sola vez.
//! - `Pending -> Failed` (`mark_failed`).
//! - `Failed -> Pending` (`mark_retry`, reintento forzado; incrementa
//!   `attempts`).
//! - `Pending -> Pending` (`mark_reclaimed`, efecto abandonado por un proceso
//!   que murió a mitad de dispatch; incrementa `attempts`).
//!
//! `claimed_at` marca el inicio del intento en curso. Un efecto `pending`
//! sólo se considera abandonado cuando su lease (`claimed_at + lease`) venció.
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::ArtifactRef;
use crate::constants::ENGINE_VERSION;
use crate::hashing::hash_value;
use crate::ledger::LedgerError;

/// Identificador determinista de un efecto (blake3 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(String);

impl EffectId {
    /// Función pura de `(run_id, step, discriminator)`. El discriminador es
    /// el hash canónico de los inputs o una clave fija declarada por el step.
    pub fn derive(run_id: Uuid, step: &str, discriminator: &str) -> Self {
        let material = json!({
            "engine_version": ENGINE_VERSION,
            "run_id": run_id.to_string(),
            "step": step,
            "key": discriminator,
        });
        Self(hash_value(&material))
    }

    /// Reconstruye un id ya persistido (no valida el formato).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectStatus {
    Pending,
    Succeeded,
    Failed,
}

impl EffectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectStatus::Pending => "pending",
            EffectStatus::Succeeded => "succeeded",
            EffectStatus::Failed => "failed",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(EffectStatus::Pending),
            "succeeded" => Some(EffectStatus::Succeeded),
            "failed" => Some(EffectStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EffectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectRecord {
    pub effect_id: EffectId,
    pub run_id: Uuid,
    pub step: String,
    /// Hash canónico de los inputs con los que se creó el efecto.
    pub input_hash: String,
    pub status: EffectStatus,
    pub result_ref: Option<ArtifactRef>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Inicio del intento en curso.
    pub claimed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EffectRecord {
    /// Registro recién creado (primer intento).
    pub fn new_pending(effect_id: EffectId, run_id: Uuid, step: String, input_hash: String, now: DateTime<Utc>) -> Self {
        Self { effect_id,
               run_id,
               step,
               input_hash,
               status: EffectStatus::Pending,
               result_ref: None,
               error: None,
               attempts: 1,
               created_at: now,
               claimed_at: now,
               completed_at: None }
    }

    /// `true` si el intento en curso ya no puede seguir vivo.
    pub fn lease_expired(&self, lease: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(lease) {
            Ok(lease) => self.claimed_at
                             .checked_add_signed(lease)
                             .is_some_and(|deadline| deadline <= now),
            Err(_) => false,
        }
    }

    /// Un mismo `effect_id` con otro hash de inputs indica una definición de
    /// step no determinista.
    pub fn check_input(&self, input_hash: &str) -> Result<(), LedgerError> {
        if self.input_hash == input_hash {
            Ok(())
        } else {
            Err(LedgerError::Inconsistent { effect_id: self.effect_id.clone(),
                                            stored: self.input_hash.clone(),
                                            given: input_hash.to_string() })
        }
    }

    pub fn mark_succeeded(&mut self, result: ArtifactRef, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.expect_status(EffectStatus::Pending, "complete")?;
        self.status = EffectStatus::Succeeded;
        self.result_ref = Some(result);
        self.error = None;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.expect_status(EffectStatus::Pending, "fail")?;
        self.status = EffectStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn mark_retry(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.expect_status(EffectStatus::Failed, "retry")?;
        self.status = EffectStatus::Pending;
        self.attempts += 1;
        self.claimed_at = now;
        self.completed_at = None;
        Ok(())
    }

    pub fn mark_reclaimed(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.expect_status(EffectStatus::Pending, "reclaim")?;
        self.attempts += 1;
        self.claimed_at = now;
        Ok(())
    }

    fn expect_status(&self, expected: EffectStatus, action: &'static str) -> Result<(), LedgerError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition { effect_id: self.effect_id.clone(),
                                                 from: self.status,
                                                 action })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EffectRecord {
        EffectRecord::new_pending(EffectId::from_raw("e1"), Uuid::nil(), "a".into(), "h".into(), Utc::now())
    }

    #[test]
    fn succeeded_record_cannot_be_completed_twice() {
        let mut r = record();
        let art = ArtifactRef { run_id: Uuid::nil(),
                                path: "tasks/e1/result.json".into(),
                                version: 1,
                                format: crate::model::ArtifactFormat::Json,
                                content_hash: "x".into() };
        r.mark_succeeded(art.clone(), Utc::now()).expect("first completion");
        assert!(matches!(r.mark_succeeded(art, Utc::now()), Err(LedgerError::InvalidTransition { .. })));
        assert!(r.mark_retry(Utc::now()).is_err(), "a succeeded effect is never retried");
    }

    #[test]
    fn retry_increments_attempts_and_keeps_id() {
        let mut r = record();
        r.mark_failed("timeout", Utc::now()).unwrap();
        r.mark_retry(Utc::now()).unwrap();
        assert_eq!(r.attempts, 2);
        assert_eq!(r.status, EffectStatus::Pending);
        assert_eq!(r.effect_id.as_str(), "e1");
    }

    #[test]
    fn pending_effect_is_only_abandoned_after_its_lease() {
        let mut r = record();
        let lease = Duration::from_secs(60);
        assert!(!r.lease_expired(lease, r.claimed_at + chrono::Duration::seconds(59)));
        assert!(r.lease_expired(lease, r.claimed_at + chrono::Duration::seconds(60)));
        assert!(!r.lease_expired(Duration::MAX, Utc::now()));

        let later = r.claimed_at + chrono::Duration::seconds(90);
        r.mark_reclaimed(later).unwrap();
        assert_eq!(r.attempts, 2);
        assert!(!r.lease_expired(lease, later + chrono::Duration::seconds(30)));
    }
}
