//! procflow-persistence
//!
//! Backends durables para las stores de `procflow-core`:
//! - `fs`: journal `.jsonl`, efectos y artifacts versionados en un directorio.
//! - `pg`: Postgres (Diesel + r2d2) con migraciones embebidas.
//! - `config`: carga de configuración desde `.env`.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod fs;
pub mod migrations;
pub mod pg;
pub mod schema;

use std::sync::Arc;

use procflow_core::{ArtifactStore, EffectLedger, EventStore, RunnerBuilder};

pub use config::{init_dotenv, store_dir_from_env, DbConfig};
pub use error::PersistenceError;
pub use fs::{FsArtifactStore, FsEffectLedger, FsEventStore};
pub use pg::{build_pool, build_pool_from_env, ConnectionProvider, PgArtifactStore, PgEffectLedger, PgEventStore, PgPool,
             PoolProvider};

/// Las tres stores durables de un backend.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub ledger: Arc<dyn EffectLedger>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl Stores {
    /// `RunnerBuilder` con estas stores ya conectadas.
    pub fn runner_builder(&self) -> RunnerBuilder {
        RunnerBuilder::new().events(self.events.clone())
                            .ledger(self.ledger.clone())
                            .artifacts(self.artifacts.clone())
    }
}

/// Backend elegido por entorno: Postgres si hay `DATABASE_URL`, si no
/// filesystem en `PROCFLOW_STORE_DIR`.
pub fn open_from_env() -> Result<Stores, PersistenceError> {
    init_dotenv();
    if std::env::var("DATABASE_URL").is_ok() {
        Ok(pg::open_stores(build_pool_from_env()?))
    } else {
        fs::open_stores(store_dir_from_env())
    }
}
