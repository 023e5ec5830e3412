//! Backend de filesystem.
//!
//! Un único directorio raíz contiene todo:
//!
//! ```text
//! <root>/effects/<effect_id>.json
//! <root>/runs/<run_id>/journal.jsonl
//! <root>/runs/<run_id>/state.json
//! <root>/runs/<run_id>/artifacts.jsonl
//! <root>/runs/<run_id>/artifacts/<path>[.v<N>]
//! ```
//!
//! Los appends se serializan dentro del proceso. Dos procesos escribiendo el
//! mismo directorio a la vez no están coordinados.

mod artifacts;
mod journal;
pub(crate) mod jsonl;
mod ledger;

pub use artifacts::FsArtifactStore;
pub use journal::{FsEventStore, RunSnapshot};
pub use ledger::FsEffectLedger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::error::PersistenceError;
use crate::Stores;

/// Abre (creando si hace falta) las tres stores sobre `root`.
pub fn open_stores(root: impl AsRef<Path>) -> Result<Stores, PersistenceError> {
    let root: PathBuf = root.as_ref().to_path_buf();
    let events = Arc::new(FsEventStore::open(&root)?);
    let ledger = Arc::new(FsEffectLedger::open(&root)?);
    let artifacts = Arc::new(FsArtifactStore::open(&root)?);
    info!("filesystem store at {}", root.display());
    Ok(Stores { events,
                ledger,
                artifacts })
}
