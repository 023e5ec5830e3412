//! Archivos `.jsonl` append-only con reparación de la última línea.
//!
//! Cada registro se escribe como una línea completa terminada en `\n` con un
//! único `write_all`. Si el proceso muere a mitad de escritura queda una
//! línea final sin `\n`: al leer se ignora y el siguiente `append` la trunca.
//! Una línea completa que no se puede interpretar es corrupción real y se
//! reporta.
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PersistenceError;

#[derive(Debug)]
pub(crate) struct JsonlRead<T> {
    pub records: Vec<T>,
    /// Bytes válidos; `Some` si hay una línea final incompleta a descartar.
    pub torn_at: Option<u64>,
}

pub(crate) fn read<T: DeserializeOwned>(path: &Path) -> Result<JsonlRead<T>, PersistenceError> {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(JsonlRead { records: Vec::new(),
                                  torn_at: None })
        }
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    let mut offset = 0u64;
    let mut torn_at = None;
    for (idx, chunk) in raw.split_inclusive('\n').enumerate() {
        if !chunk.ends_with('\n') {
            warn!("discarding torn trailing line in {}", path.display());
            torn_at = Some(offset);
            break;
        }
        offset += chunk.len() as u64;
        let line = chunk.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| PersistenceError::Corrupt { file: path.display().to_string(),
                                                                                        line: idx + 1,
                                                                                        reason: e.to_string() })?;
        records.push(record);
    }
    Ok(JsonlRead { records, torn_at })
}

/// Agrega `record` como una línea; trunca antes una cola rota si la hay.
pub(crate) fn append<T: Serialize>(path: &Path, record: &T, torn_at: Option<u64>) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(len) = torn_at {
        OpenOptions::new().write(true).open(path)?.set_len(len)?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Escritura atómica: archivo temporal en el mismo directorio + rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let file_name = path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.tmp"));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn torn_tail_is_ignored_then_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        append(&path, &json!({"n": 1}), None).unwrap();
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"n": 2, "trunc"#).unwrap();

        let read1: JsonlRead<Value> = read(&path).unwrap();
        assert_eq!(read1.records, vec![json!({"n": 1})]);
        assert!(read1.torn_at.is_some());

        append(&path, &json!({"n": 3}), read1.torn_at).unwrap();
        let read2: JsonlRead<Value> = read(&path).unwrap();
        assert_eq!(read2.records, vec![json!({"n": 1}), json!({"n": 3})]);
        assert_eq!(read2.torn_at, None);
    }

    #[test]
    fn complete_garbage_line_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        fs::write(&path, "{\"n\": 1}\nnot json\n").unwrap();
        match read::<Value>(&path) {
            Err(PersistenceError::Corrupt { line: 2, .. }) => {}
            other => panic!("expected corruption at line 2, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let r: JsonlRead<Value> = read(&dir.path().join("none.jsonl")).unwrap();
        assert!(r.records.is_empty());
    }
}
