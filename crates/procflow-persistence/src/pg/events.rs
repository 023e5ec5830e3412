use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, error};
use procflow_core::errors::{classify_error, ErrorClass};
use procflow_core::{EventStore, EventStoreError, RunEvent, RunEventKind};
use serde_json::Value;
use uuid::Uuid;

use super::ConnectionProvider;
use crate::error::{with_retry, PersistenceError};
use crate::schema::{run_events, step_execution_errors};

/// Fila de `run_events`. `payload` es el JSON completo de `RunEventKind`.
#[derive(Queryable, Debug)]
pub struct EventRow {
    pub run_id: Uuid,
    pub seq: i64,
    pub event_type: String,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = run_events)]
struct NewEventRow<'a> {
    run_id: &'a Uuid,
    seq: i64,
    event_type: &'a str,
    payload: &'a Value,
}

/// Fila de `step_execution_errors`.
#[derive(Queryable, Debug)]
pub struct ErrorRow {
    pub id: i64,
    pub run_id: Uuid,
    pub step: String,
    pub attempt_number: i32,
    pub error_class: String,
    pub details: Option<Value>,
    pub ts: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = step_execution_errors)]
struct NewErrorRow<'a> {
    run_id: &'a Uuid,
    step: &'a str,
    attempt_number: i32,
    error_class: &'a str,
    details: Option<&'a Value>,
}

fn class_label(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Validation => "validation",
        ErrorClass::Transient => "transient",
        ErrorClass::Runtime => "runtime",
        ErrorClass::Permanent => "permanent",
    }
}

fn to_event(row: EventRow) -> Result<RunEvent, PersistenceError> {
    let kind: RunEventKind =
        serde_json::from_value(row.payload).map_err(|e| PersistenceError::Corrupt { file: "run_events".into(),
                                                                                    line: row.seq as usize,
                                                                                    reason: format!("{} payload: {e}",
                                                                                                    row.event_type) })?;
    Ok(RunEvent { seq: row.seq as u64,
                  run_id: row.run_id,
                  kind,
                  ts: row.ts })
}

enum Appended {
    Inserted(i64, DateTime<Utc>),
    Conflict(u64),
}

/// `EventStore` Postgres (append-only).
pub struct PgEventStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgEventStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn next_seq(&self, run_id: Uuid) -> Result<u64, PersistenceError> {
        let mut conn = self.provider.connection()?;
        let last: Option<i64> = run_events::table.filter(run_events::run_id.eq(run_id))
                                                 .select(diesel::dsl::max(run_events::seq))
                                                 .get_result(&mut conn)?;
        Ok(last.map_or(0, |s| s as u64 + 1))
    }

    fn push(&self, run_id: Uuid, expected: Option<u64>, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        let event_type = kind.variant_name();
        let payload = serde_json::to_value(&kind).map_err(PersistenceError::from)?;
        let outcome = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let last: Option<i64> = run_events::table.filter(run_events::run_id.eq(run_id))
                                                             .select(diesel::dsl::max(run_events::seq))
                                                             .get_result(tx)?;
                    let next = last.map_or(0, |s| s + 1);
                    if let Some(exp) = expected {
                        if exp as i64 != next {
                            return Ok(Appended::Conflict(next as u64));
                        }
                    }
                    let (seq, ts): (i64, DateTime<Utc>) =
                        diesel::insert_into(run_events::table).values(NewEventRow { run_id: &run_id,
                                                                                    seq: next,
                                                                                    event_type,
                                                                                    payload: &payload })
                                                              .returning((run_events::seq, run_events::ts))
                                                              .get_result(tx)?;

                    if let RunEventKind::StepFailed { step, error, .. } = &kind {
                        let started: Vec<Value> = run_events::table.filter(run_events::run_id.eq(run_id))
                                                                   .filter(run_events::event_type.eq("StepStarted"))
                                                                   .select(run_events::payload)
                                                                   .load(tx)?;
                        let attempt = started.iter()
                                             .filter(|p| p["StepStarted"]["step"] == step.as_str())
                                             .count()
                                             .max(1) as i32;
                        let details = serde_json::to_value(error).ok();
                        diesel::insert_into(step_execution_errors::table).values(NewErrorRow { run_id: &run_id,
                                                                                               step,
                                                                                               attempt_number: attempt,
                                                                                               error_class:
                                                                                                   class_label(classify_error(error)),
                                                                                               details: details.as_ref() })
                                                                         .execute(tx)?;
                    }
                    Ok::<Appended, diesel::result::Error>(Appended::Inserted(seq, ts))
                })
                .map_err(PersistenceError::from)
        });
        match outcome {
            Ok(Appended::Inserted(seq, ts)) => {
                debug!("append run={run_id} seq={seq} kind={event_type}");
                Ok(RunEvent { seq: seq as u64,
                              run_id,
                              kind,
                              ts })
            }
            Ok(Appended::Conflict(found)) => Err(EventStoreError::Conflict { run_id,
                                                                             expected: expected.unwrap_or(found),
                                                                             found }),
            // otro escritor insertó el mismo seq entre el SELECT y el INSERT
            Err(PersistenceError::UniqueViolation(_)) => {
                let found = self.next_seq(run_id)?;
                Err(EventStoreError::Conflict { run_id,
                                                expected: expected.unwrap_or(found.saturating_sub(1)),
                                                found })
            }
            Err(e) => {
                error!("append failed run={run_id} kind={event_type}: {e}");
                Err(e.into())
            }
        }
    }

    /// Errores de ejecución registrados para una corrida, ordenados por ts.
    pub fn list_errors(&self, run_id: Uuid) -> Result<Vec<ErrorRow>, PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            step_execution_errors::table.filter(step_execution_errors::run_id.eq(run_id))
                                        .order((step_execution_errors::ts.asc(), step_execution_errors::id.asc()))
                                        .load(&mut conn)
                                        .map_err(PersistenceError::from)
        })
    }
}

impl<P: ConnectionProvider> EventStore for PgEventStore<P> {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        self.push(run_id, None, kind)
    }

    fn append_expecting(&self, run_id: Uuid, expected_seq: u64, kind: RunEventKind) -> Result<RunEvent, EventStoreError> {
        self.push(run_id, Some(expected_seq), kind)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EventStoreError> {
        let rows: Vec<EventRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            run_events::table.filter(run_events::run_id.eq(run_id))
                             .order(run_events::seq.asc())
                             .load(&mut conn)
                             .map_err(PersistenceError::from)
        })?;
        debug!("list run={run_id} count={}", rows.len());
        Ok(rows.into_iter().map(to_event).collect::<Result<Vec<_>, _>>()?)
    }

    fn list_runs(&self) -> Result<Vec<Uuid>, EventStoreError> {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            run_events::table.filter(run_events::seq.eq(0))
                             .order(run_events::ts.asc())
                             .select(run_events::run_id)
                             .load::<Uuid>(&mut conn)
                             .map_err(PersistenceError::from)
        })?)
    }
}
