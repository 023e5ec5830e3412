//! Implementaciones Postgres (Diesel + r2d2) de las stores del core.
//!
//! - `PgEventStore`: journal append-only con clave `(run_id, seq)`. El `seq`
//!   se calcula dentro de la transacción y la PK garantiza que dos
//!   escritores concurrentes no intercalen eventos: el perdedor recibe
//!   `Conflict`.
//! - `PgEffectLedger`: una fila por efecto. Las transiciones se hacen con
//!   `SELECT ... FOR UPDATE` y las reglas de `EffectRecord`, igual que el
//!   backend en memoria.
//! - `PgArtifactStore`: una fila por versión, contenido en JSONB.
//!
//! Los `StepFailed` además dejan una fila en `step_execution_errors` con la
//! clase del error, para auditoría.

mod artifacts;
mod events;
mod ledger;

pub use artifacts::PgArtifactStore;
pub use events::{ErrorRow, PgEventStore};
pub use ledger::PgEffectLedger;

use std::sync::Arc;

use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use log::warn;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::Stores;

/// Pool r2d2 de conexiones Postgres. Se construye ya migrado.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Debe devolver una conexión válida o `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Construye un pool y corre las migraciones pendientes una vez.
///
/// Tamaños en cero se tratan como 1; si `min_size > max_size` se usa
/// `min = max`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let max = max_size.max(1);
    let min = min_size.max(1);
    if min > max {
        warn!("min_size > max_size ({min} > {max}), ajustando min=max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(min.min(max)))
                                    .max_size(max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

/// Las tres stores Postgres compartiendo un pool.
pub fn open_stores(pool: PgPool) -> Stores {
    Stores { events: Arc::new(PgEventStore::new(PoolProvider { pool: pool.clone() })),
             ledger: Arc::new(PgEffectLedger::new(PoolProvider { pool: pool.clone() })),
             artifacts: Arc::new(PgArtifactStore::new(PoolProvider { pool })) }
}
