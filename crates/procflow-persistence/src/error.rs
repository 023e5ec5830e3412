//! Errores de persistencia.
//! Mapea errores de Diesel, de IO y de (de)serialización a variantes
//! semánticas, y de ahí a los errores `Backend` de cada trait del core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use procflow_core::{ArtifactError, EventStoreError, LedgerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Una línea completa de un `.jsonl` que no se puede interpretar.
    #[error("corrupt record in {file} at line {line}: {reason}")]
    Corrupt { file: String, line: usize, reason: String },
    #[error("configuration: {0}")]
    Config(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Unknown(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::RollbackErrorOnCommit { rollback_error, commit_error } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<PersistenceError> for EventStoreError {
    fn from(e: PersistenceError) -> Self {
        EventStoreError::Backend(e.to_string())
    }
}

impl From<PersistenceError> for LedgerError {
    fn from(e: PersistenceError) -> Self {
        LedgerError::Backend(e.to_string())
    }
}

impl From<PersistenceError> for ArtifactError {
    fn from(e: PersistenceError) -> Self {
        ArtifactError::Backend(e.to_string())
    }
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
///
/// Cubre conflictos de serialización, errores de pool/conexión y mensajes
/// comunes de desconexión detectados por texto.
pub fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff lineal (hasta 3 reintentos: 15ms, 30ms, 45ms).
pub fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                log::warn!("retryable error (attempt {}): {:?} -> sleeping {}ms",
                           attempts + 1,
                           e,
                           delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn transient_errors_are_retried_a_bounded_number_of_times() {
        let calls = Cell::new(0);
        let out: Result<(), _> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(PersistenceError::TransientIo("pool timeout".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 4);

        calls.set(0);
        let out: Result<(), _> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(PersistenceError::CheckViolation("bad status".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn backend_errors_keep_their_message() {
        let e: LedgerError = PersistenceError::Config("missing".into()).into();
        assert!(matches!(e, LedgerError::Backend(ref m) if m.contains("missing")));
    }
}
