use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;
use procflow_core::ledger::{EffectClaim, NewEffect};
use procflow_core::{ArtifactRef, EffectId, EffectLedger, EffectRecord, EffectStatus, LedgerError};
use serde_json::Value;
use uuid::Uuid;

use super::ConnectionProvider;
use crate::error::{with_retry, PersistenceError};
use crate::schema::effects;

#[derive(Queryable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = effects)]
#[diesel(primary_key(effect_id))]
#[diesel(treat_none_as_null = true)]
struct EffectRow {
    effect_id: String,
    run_id: Uuid,
    step: String,
    input_hash: String,
    status: String,
    result_ref: Option<Value>,
    error: Option<String>,
    attempts: i32,
    created_at: DateTime<Utc>,
    claimed_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl EffectRow {
    fn from_record(r: &EffectRecord) -> Result<Self, LedgerError> {
        let result_ref = r.result_ref
                          .as_ref()
                          .map(serde_json::to_value)
                          .transpose()
                          .map_err(|e| LedgerError::Backend(format!("result_ref: {e}")))?;
        Ok(Self { effect_id: r.effect_id.to_string(),
                  run_id: r.run_id,
                  step: r.step.clone(),
                  input_hash: r.input_hash.clone(),
                  status: r.status.as_str().to_string(),
                  result_ref,
                  error: r.error.clone(),
                  attempts: r.attempts as i32,
                  created_at: r.created_at,
                  claimed_at: r.claimed_at,
                  completed_at: r.completed_at })
    }

    fn into_record(self) -> Result<EffectRecord, LedgerError> {
        let status = EffectStatus::parse(&self.status).ok_or_else(|| {
                                                           LedgerError::Backend(format!("effect {} has unknown status '{}'",
                                                                                        self.effect_id, self.status))
                                                       })?;
        let result_ref = self.result_ref
                             .map(serde_json::from_value::<ArtifactRef>)
                             .transpose()
                             .map_err(|e| LedgerError::Backend(format!("effect {} result_ref: {e}", self.effect_id)))?;
        Ok(EffectRecord { effect_id: EffectId::from_raw(self.effect_id),
                          run_id: self.run_id,
                          step: self.step,
                          input_hash: self.input_hash,
                          status,
                          result_ref,
                          error: self.error,
                          attempts: self.attempts.max(1) as u32,
                          created_at: self.created_at,
                          claimed_at: self.claimed_at,
                          completed_at: self.completed_at })
    }
}

/// Effect Ledger Postgres. `get_or_create` usa `INSERT ... ON CONFLICT DO
/// NOTHING`: sólo un llamador concurrente ve `created = true`.
pub struct PgEffectLedger<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgEffectLedger<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Read-modify-write bajo `FOR UPDATE`. Un error de regla deja la fila
    /// intacta y se devuelve tal cual.
    fn transition<F>(&self, effect_id: &EffectId, f: F) -> Result<EffectRecord, LedgerError>
        where F: Fn(&mut EffectRecord) -> Result<(), LedgerError>
    {
        let outcome = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let row: Option<EffectRow> = effects::table.find(effect_id.as_str())
                                                               .for_update()
                                                               .first(tx)
                                                               .optional()?;
                    let Some(row) = row else {
                        return Ok(Err(LedgerError::NotFound(effect_id.clone())));
                    };
                    let mut record = match row.into_record() {
                        Ok(r) => r,
                        Err(e) => return Ok(Err(e)),
                    };
                    if let Err(e) = f(&mut record) {
                        return Ok(Err(e));
                    }
                    let updated = match EffectRow::from_record(&record) {
                        Ok(r) => r,
                        Err(e) => return Ok(Err(e)),
                    };
                    diesel::update(effects::table.find(effect_id.as_str())).set(&updated)
                                                                           .execute(tx)?;
                    Ok::<_, diesel::result::Error>(Ok(record))
                })
                .map_err(PersistenceError::from)
        })?;
        outcome
    }
}

impl<P: ConnectionProvider> EffectLedger for PgEffectLedger<P> {
    fn get_or_create(&self, new: NewEffect) -> Result<EffectClaim, LedgerError> {
        let fresh = EffectRecord::new_pending(new.effect_id.clone(),
                                              new.run_id,
                                              new.step.clone(),
                                              new.input_hash.clone(),
                                              Utc::now());
        let row = EffectRow::from_record(&fresh)?;
        let (stored, inserted) = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let inserted = diesel::insert_into(effects::table).values(&row)
                                                                      .on_conflict_do_nothing()
                                                                      .execute(tx)?;
                    let stored: EffectRow = effects::table.find(new.effect_id.as_str()).first(tx)?;
                    Ok::<_, diesel::result::Error>((stored, inserted == 1))
                })
                .map_err(PersistenceError::from)
        })?;
        let record = stored.into_record()?;
        if inserted {
            debug!("ledger: new effect {} for step '{}'", record.effect_id, record.step);
        } else {
            record.check_input(&new.input_hash)?;
        }
        Ok(EffectClaim { record,
                         created: inserted })
    }

    fn complete(&self, effect_id: &EffectId, result: ArtifactRef) -> Result<EffectRecord, LedgerError> {
        self.transition(effect_id, |r| r.mark_succeeded(result.clone(), Utc::now()))
    }

    fn fail(&self, effect_id: &EffectId, error: &str) -> Result<EffectRecord, LedgerError> {
        self.transition(effect_id, |r| r.mark_failed(error, Utc::now()))
    }

    fn retry(&self, effect_id: &EffectId) -> Result<EffectRecord, LedgerError> {
        self.transition(effect_id, |r| r.mark_retry(Utc::now()))
    }

    fn reclaim(&self, effect_id: &EffectId) -> Result<EffectRecord, LedgerError> {
        self.transition(effect_id, |r| r.mark_reclaimed(Utc::now()))
    }

    fn get(&self, effect_id: &EffectId) -> Result<Option<EffectRecord>, LedgerError> {
        let row: Option<EffectRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            effects::table.find(effect_id.as_str())
                          .first(&mut conn)
                          .optional()
                          .map_err(PersistenceError::from)
        })?;
        row.map(EffectRow::into_record).transpose()
    }

    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<EffectRecord>, LedgerError> {
        let rows: Vec<EffectRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            effects::table.filter(effects::run_id.eq(run_id))
                          .order((effects::created_at.asc(), effects::effect_id.asc()))
                          .load(&mut conn)
                          .map_err(PersistenceError::from)
        })?;
        rows.into_iter().map(EffectRow::into_record).collect()
    }
}
