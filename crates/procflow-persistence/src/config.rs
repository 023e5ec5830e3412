//! Configuración de los backends desde variables de entorno.
//! Postgres usa `DATABASE_URL` y parámetros opcionales de pool; el backend de
//! filesystem usa `PROCFLOW_STORE_DIR`.

use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::error::PersistenceError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Directorio por defecto del backend de filesystem.
pub const DEFAULT_STORE_DIR: &str = ".procflow";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, PersistenceError> {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").map_err(|_| PersistenceError::Config("DATABASE_URL no definido".into()))?;
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS").ok()
                                                                  .and_then(|v| v.parse().ok())
                                                                  .unwrap_or(2);
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS").ok()
                                                                  .and_then(|v| v.parse().ok())
                                                                  .unwrap_or(16);
        Ok(Self { url,
                  min_connections,
                  max_connections })
    }
}

/// `PROCFLOW_STORE_DIR` o `.procflow` en el directorio actual.
pub fn store_dir_from_env() -> PathBuf {
    Lazy::force(&DOTENV_LOADED);
    env::var("PROCFLOW_STORE_DIR").map(PathBuf::from)
                                  .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_DIR))
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
