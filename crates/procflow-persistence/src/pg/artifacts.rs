use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;
use procflow_core::artifacts::{plan_put, verify, PutPlan};
use procflow_core::model::Artifact;
use procflow_core::{ArtifactError, ArtifactFormat, ArtifactRef, ArtifactStore};
use serde_json::Value;
use uuid::Uuid;

use super::ConnectionProvider;
use crate::error::{with_retry, PersistenceError};
use crate::schema::artifacts;

#[derive(Queryable, Debug)]
struct ArtifactRow {
    run_id: Uuid,
    path: String,
    version: i32,
    format: String,
    content_hash: String,
    content: Value,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

impl ArtifactRow {
    fn reference(&self) -> Result<ArtifactRef, ArtifactError> {
        let format = ArtifactFormat::parse(&self.format).ok_or_else(|| {
                                                             ArtifactError::Backend(format!("artifact {} has unknown format '{}'",
                                                                                            self.path, self.format))
                                                         })?;
        Ok(ArtifactRef { run_id: self.run_id,
                         path: self.path.clone(),
                         version: self.version as u32,
                         format,
                         content_hash: self.content_hash.clone() })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = artifacts)]
struct NewArtifactRow<'a> {
    run_id: Uuid,
    path: &'a str,
    version: i32,
    format: &'a str,
    content_hash: &'a str,
    content: &'a Value,
}

/// Artifact Store Postgres: una fila inmutable por versión.
pub struct PgArtifactStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgArtifactStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn load<F>(&self, query: F) -> Result<Vec<ArtifactRow>, ArtifactError>
        where F: Fn(&mut PgConnection) -> QueryResult<Vec<ArtifactRow>>
    {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            query(&mut conn).map_err(PersistenceError::from)
        })?)
    }
}

impl<P: ConnectionProvider> ArtifactStore for PgArtifactStore<P> {
    fn put(&self, run_id: Uuid, path: &str, format: ArtifactFormat, content: &Value) -> Result<ArtifactRef, ArtifactError> {
        let outcome = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let latest: Option<ArtifactRow> =
                        artifacts::table.filter(artifacts::run_id.eq(run_id))
                                        .filter(artifacts::path.eq(path))
                                        .order(artifacts::version.desc())
                                        .first(tx)
                                        .optional()?;
                    let latest_ref = match latest.as_ref().map(ArtifactRow::reference).transpose() {
                        Ok(r) => r,
                        Err(e) => return Ok(Err(e)),
                    };
                    let reference = match plan_put(run_id, path, format, content, latest_ref.as_ref()) {
                        Ok(PutPlan::Existing(r)) => return Ok(Ok(r)),
                        Ok(PutPlan::Write(r)) => r,
                        Err(e) => return Ok(Err(e)),
                    };
                    diesel::insert_into(artifacts::table).values(NewArtifactRow { run_id,
                                                                                  path,
                                                                                  version: reference.version as i32,
                                                                                  format: reference.format.as_str(),
                                                                                  content_hash: &reference.content_hash,
                                                                                  content })
                                                         .execute(tx)?;
                    Ok::<_, diesel::result::Error>(Ok(reference))
                })
                .map_err(PersistenceError::from)
        })?;
        if let Ok(r) = &outcome {
            debug!("artifact put {} (run {run_id})", r.location());
        }
        outcome
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError> {
        let rows = self.load(|conn| {
                           artifacts::table.find((reference.run_id, reference.path.as_str(), reference.version as i32))
                                           .load(conn)
                       })?;
        let row = rows.into_iter().next().ok_or_else(|| ArtifactError::NotFound { run_id: reference.run_id,
                                                                                  path: reference.path.clone(),
                                                                                  version: reference.version })?;
        verify(reference, &row.content)?;
        Ok(Artifact { reference: reference.clone(),
                      content: row.content })
    }

    fn versions(&self, run_id: Uuid, path: &str) -> Result<Vec<ArtifactRef>, ArtifactError> {
        self.load(|conn| {
                artifacts::table.filter(artifacts::run_id.eq(run_id))
                                .filter(artifacts::path.eq(path))
                                .order(artifacts::version.asc())
                                .load(conn)
            })?
            .iter()
            .map(ArtifactRow::reference)
            .collect()
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<ArtifactRef>, ArtifactError> {
        self.load(|conn| {
                artifacts::table.filter(artifacts::run_id.eq(run_id))
                                .order((artifacts::path.asc(), artifacts::version.asc()))
                                .load(conn)
            })?
            .iter()
            .map(ArtifactRow::reference)
            .collect()
    }
}
