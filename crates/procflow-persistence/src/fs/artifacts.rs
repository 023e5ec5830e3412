//! Artifact Store sobre filesystem.
//!
//! Layout por corrida:
//! - `runs/<run_id>/artifacts/<path>.v<N>`: contenido inmutable de la versión N.
//! - `runs/<run_id>/artifacts/<path>`: copia de la última versión, para leer a mano.
//! - `runs/<run_id>/artifacts.jsonl`: manifiesto con un `ArtifactRef` por versión.
//!
//! JSON se guarda con formato legible; los formatos textuales como texto
//! plano. Las lecturas verifican el hash contra el manifiesto.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use procflow_core::artifacts::{plan_put, verify, PutPlan};
use procflow_core::model::Artifact;
use procflow_core::{ArtifactError, ArtifactFormat, ArtifactRef, ArtifactStore};
use serde_json::Value;
use uuid::Uuid;

use super::jsonl;
use crate::error::PersistenceError;

pub struct FsArtifactStore {
    runs_dir: PathBuf,
    lock: Mutex<()>,
}

fn encode(format: ArtifactFormat, content: &Value) -> Result<Vec<u8>, PersistenceError> {
    match (format, content) {
        (ArtifactFormat::Json, v) => Ok(serde_json::to_vec_pretty(v)?),
        (_, Value::String(s)) => Ok(s.as_bytes().to_vec()),
        // content_hash ya rechazó contenido no textual
        (_, v) => Ok(serde_json::to_vec(v)?),
    }
}

fn decode(format: ArtifactFormat, bytes: Vec<u8>) -> Result<Value, PersistenceError> {
    match format {
        ArtifactFormat::Json => Ok(serde_json::from_slice(&bytes)?),
        _ => String::from_utf8(bytes).map(Value::String)
                                     .map_err(|e| PersistenceError::Unknown(format!("artifact is not utf-8: {e}"))),
    }
}

impl FsArtifactStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir,
                  lock: Mutex::new(()) })
    }

    fn manifest_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(run_id.to_string()).join("artifacts.jsonl")
    }

    fn content_path(&self, run_id: Uuid, path: &str) -> PathBuf {
        let mut p = self.runs_dir.join(run_id.to_string()).join("artifacts");
        p.extend(path.split('/'));
        p
    }

    fn version_path(&self, reference: &ArtifactRef) -> PathBuf {
        self.content_path(reference.run_id, &format!("{}.v{}", reference.path, reference.version))
    }

    fn manifest(&self, run_id: Uuid) -> Result<jsonl::JsonlRead<ArtifactRef>, PersistenceError> {
        jsonl::read(&self.manifest_path(run_id))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, run_id: Uuid, path: &str, format: ArtifactFormat, content: &Value) -> Result<ArtifactRef, ArtifactError> {
        let _guard = self.lock
                         .lock()
                         .map_err(|_| ArtifactError::Backend("artifact lock poisoned".into()))?;
        let manifest = self.manifest(run_id)?;
        let latest = manifest.records.iter().filter(|r| r.path == path).last();
        let reference = match plan_put(run_id, path, format, content, latest)? {
            PutPlan::Existing(r) => return Ok(r),
            PutPlan::Write(r) => r,
        };
        let bytes = encode(format, content)?;
        jsonl::write_atomic(&self.version_path(&reference), &bytes)?;
        jsonl::write_atomic(&self.content_path(run_id, path), &bytes)?;
        jsonl::append(&self.manifest_path(run_id), &reference, manifest.torn_at)?;
        debug!("artifact put {} (run {run_id})", reference.location());
        Ok(reference)
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError> {
        let bytes = match fs::read(self.version_path(reference)) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound { run_id: reference.run_id,
                                                     path: reference.path.clone(),
                                                     version: reference.version })
            }
            Err(e) => return Err(PersistenceError::from(e).into()),
        };
        let content = decode(reference.format, bytes)?;
        verify(reference, &content)?;
        Ok(Artifact { reference: reference.clone(),
                      content })
    }

    fn versions(&self, run_id: Uuid, path: &str) -> Result<Vec<ArtifactRef>, ArtifactError> {
        Ok(self.manifest(run_id)?
               .records
               .into_iter()
               .filter(|r| r.path == path)
               .collect())
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<ArtifactRef>, ArtifactError> {
        let mut refs = self.manifest(run_id)?.records;
        refs.sort_by(|a, b| a.path.cmp(&b.path).then(a.version.cmp(&b.version)));
        Ok(refs)
    }
}
