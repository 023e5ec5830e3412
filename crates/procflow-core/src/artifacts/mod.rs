//! Artifact Store: blobs direccionados por `(run_id, path, version)`.
//!
//! Reglas comunes a todos los backends (ver `plan_put`):
//! - escribir contenido idéntico al de la última versión devuelve esa versión;
//! - escribir contenido distinto crea la versión N+1, nunca muta la anterior;
//! - `get` verifica el hash del contenido leído.

mod memory;

pub use memory::InMemoryArtifactStore;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::constants::{REVIEWS_PREFIX, TASKS_PREFIX};
use crate::hashing::hash_value;
use crate::model::{Artifact, ArtifactFormat, ArtifactRef, BreakpointId, EffectId};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact {path}@v{version} of run {run_id} not found")]
    NotFound { run_id: Uuid, path: String, version: u32 },
    #[error("invalid artifact path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("artifact '{path}' declared as {format} requires string content")]
    InvalidContent { path: String, format: &'static str },
    #[error("artifact '{path}' content hash mismatch (expected {expected}, found {found})")]
    HashMismatch { path: String, expected: String, found: String },
    #[error("artifact store backend: {0}")]
    Backend(String),
}

pub trait ArtifactStore: Send + Sync {
    /// Escribe (o deduplica) `content` en `path`.
    fn put(&self, run_id: Uuid, path: &str, format: ArtifactFormat, content: &Value) -> Result<ArtifactRef, ArtifactError>;
    /// Lee una versión concreta verificando su hash.
    fn get(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError>;
    /// Versiones de un path en orden ascendente.
    fn versions(&self, run_id: Uuid, path: &str) -> Result<Vec<ArtifactRef>, ArtifactError>;
    /// Todas las versiones de todos los paths del run.
    fn list(&self, run_id: Uuid) -> Result<Vec<ArtifactRef>, ArtifactError>;

    fn latest(&self, run_id: Uuid, path: &str) -> Result<Option<ArtifactRef>, ArtifactError> {
        Ok(self.versions(run_id, path)?.pop())
    }
}

pub fn task_input_path(effect_id: &EffectId, format: ArtifactFormat) -> String {
    format!("{TASKS_PREFIX}/{effect_id}/input.{}", format.extension())
}

pub fn task_result_path(effect_id: &EffectId, format: ArtifactFormat) -> String {
    format!("{TASKS_PREFIX}/{effect_id}/result.{}", format.extension())
}

/// `reviews/<run_id>/<step>/<path>`.
pub fn review_path(breakpoint_id: &BreakpointId, path: &str) -> String {
    format!("{REVIEWS_PREFIX}/{breakpoint_id}/{path}")
}

fn looks_versioned(segment: &str) -> bool {
    segment.rsplit_once(".v")
           .is_some_and(|(_, n)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Paths relativos, con separador `/`, sin segmentos vacíos, `.` ni `..`.
pub fn validate_path(path: &str) -> Result<(), ArtifactError> {
    let invalid = |reason| {
        Err(ArtifactError::InvalidPath { path: path.to_string(),
                                         reason })
    };
    if path.is_empty() {
        return invalid("empty path");
    }
    if path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return invalid("must be a relative '/'-separated path");
    }
    for segment in path.split('/') {
        match segment {
            "" => return invalid("empty segment"),
            "." | ".." => return invalid("relative segments are not allowed"),
            s if looks_versioned(s) => return invalid("'.vN' suffix is reserved for versions"),
            _ => {}
        }
    }
    Ok(())
}

/// Valida el contenido para el formato y devuelve su hash canónico.
pub fn content_hash(path: &str, format: ArtifactFormat, content: &Value) -> Result<String, ArtifactError> {
    if format.is_textual() && !content.is_string() {
        return Err(ArtifactError::InvalidContent { path: path.to_string(),
                                                   format: format.as_str() });
    }
    Ok(hash_value(content))
}

/// Decisión de escritura dada la última versión existente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutPlan {
    Existing(ArtifactRef),
    Write(ArtifactRef),
}

pub fn plan_put(run_id: Uuid,
                path: &str,
                format: ArtifactFormat,
                content: &Value,
                latest: Option<&ArtifactRef>)
                -> Result<PutPlan, ArtifactError> {
    validate_path(path)?;
    let hash = content_hash(path, format, content)?;
    match latest {
        Some(l) if l.content_hash == hash && l.format == format => Ok(PutPlan::Existing(l.clone())),
        _ => Ok(PutPlan::Write(ArtifactRef { run_id,
                                             path: path.to_string(),
                                             version: latest.map_or(1, |l| l.version + 1),
                                             format,
                                             content_hash: hash })),
    }
}

/// Verifica que `content` corresponde a `reference`.
pub fn verify(reference: &ArtifactRef, content: &Value) -> Result<(), ArtifactError> {
    let found = hash_value(content);
    if found == reference.content_hash {
        Ok(())
    } else {
        Err(ArtifactError::HashMismatch { path: reference.location(),
                                          expected: reference.content_hash.clone(),
                                          found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_layout_is_derived_from_effect_id() {
        let id = EffectId::from_raw("abc");
        assert_eq!(task_input_path(&id, ArtifactFormat::Json), "tasks/abc/input.json");
        assert_eq!(task_result_path(&id, ArtifactFormat::Markdown), "tasks/abc/result.md");
        let bp = BreakpointId::new(Uuid::nil(), "review");
        assert_eq!(review_path(&bp, "plan.md"),
                   "reviews/00000000-0000-0000-0000-000000000000/review/plan.md");
    }

    #[test]
    fn rejects_escaping_and_reserved_paths() {
        for bad in ["", "/abs", "a//b", "a/../b", "./a", "c:\\x", "a/input.v2"] {
            assert!(validate_path(bad).is_err(), "{bad} should be rejected");
        }
        assert!(validate_path("tasks/e1/input.json").is_ok());
        assert!(validate_path("reviews/x/notes.v2beta.md").is_ok());
    }

    #[test]
    fn plan_dedups_identical_content_and_bumps_version_otherwise() {
        let run = Uuid::nil();
        let PutPlan::Write(v1) = plan_put(run, "a.json", ArtifactFormat::Json, &json!({"x": 1}), None).unwrap() else {
            panic!("first write")
        };
        assert_eq!(v1.version, 1);
        assert_eq!(plan_put(run, "a.json", ArtifactFormat::Json, &json!({"x": 1}), Some(&v1)).unwrap(),
                   PutPlan::Existing(v1.clone()));
        match plan_put(run, "a.json", ArtifactFormat::Json, &json!({"x": 2}), Some(&v1)).unwrap() {
            PutPlan::Write(v2) => assert_eq!(v2.version, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(plan_put(run, "a.md", ArtifactFormat::Markdown, &json!({"x": 1}), None).is_err());
    }
}
