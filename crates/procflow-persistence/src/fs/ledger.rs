//! Effect Ledger sobre filesystem: un archivo `effects/<effect_id>.json` por
//! efecto, reescrito de forma atómica en cada transición.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use log::debug;
use procflow_core::ledger::{EffectClaim, NewEffect};
use procflow_core::{ArtifactRef, EffectId, EffectLedger, EffectRecord, LedgerError};
use uuid::Uuid;

use super::jsonl::write_atomic;
use crate::error::PersistenceError;

pub struct FsEffectLedger {
    dir: PathBuf,
    // get_or_create y las transiciones son read-modify-write
    lock: Mutex<()>,
}

impl FsEffectLedger {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = root.as_ref().join("effects");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir,
                  lock: Mutex::new(()) })
    }

    fn path(&self, effect_id: &EffectId) -> PathBuf {
        self.dir.join(format!("{effect_id}.json"))
    }

    fn read(&self, effect_id: &EffectId) -> Result<Option<EffectRecord>, PersistenceError> {
        read_record(&self.path(effect_id))
    }

    fn write(&self, record: &EffectRecord) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path(&record.effect_id), &bytes)
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, LedgerError> {
        self.lock
            .lock()
            .map_err(|_| LedgerError::Backend("ledger lock poisoned".into()))
    }

    fn update<F>(&self, effect_id: &EffectId, f: F) -> Result<EffectRecord, LedgerError>
        where F: FnOnce(&mut EffectRecord) -> Result<(), LedgerError>
    {
        let _guard = self.guard()?;
        let mut record = self.read(effect_id)?
                             .ok_or_else(|| LedgerError::NotFound(effect_id.clone()))?;
        f(&mut record)?;
        self.write(&record)?;
        Ok(record)
    }
}

fn read_record(path: &Path) -> Result<Option<EffectRecord>, PersistenceError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl EffectLedger for FsEffectLedger {
    fn get_or_create(&self, new: NewEffect) -> Result<EffectClaim, LedgerError> {
        let _guard = self.guard()?;
        if let Some(record) = self.read(&new.effect_id)? {
            record.check_input(&new.input_hash)?;
            return Ok(EffectClaim { record, created: false });
        }
        debug!("ledger: new effect {} for step '{}'", new.effect_id, new.step);
        let record = EffectRecord::new_pending(new.effect_id, new.run_id, new.step, new.input_hash, Utc::now());
        self.write(&record)?;
        Ok(EffectClaim { record, created: true })
    }

    fn complete(&self, effect_id: &EffectId, result: ArtifactRef) -> Result<EffectRecord, LedgerError> {
        self.update(effect_id, |r| r.mark_succeeded(result, Utc::now()))
    }

    fn fail(&self, effect_id: &EffectId, error: &str) -> Result<EffectRecord, LedgerError> {
        self.update(effect_id, |r| r.mark_failed(error, Utc::now()))
    }

    fn retry(&self, effect_id: &EffectId) -> Result<EffectRecord, LedgerError> {
        self.update(effect_id, |r| r.mark_retry(Utc::now()))
    }

    fn reclaim(&self, effect_id: &EffectId) -> Result<EffectRecord, LedgerError> {
        self.update(effect_id, |r| r.mark_reclaimed(Utc::now()))
    }

    fn get(&self, effect_id: &EffectId) -> Result<Option<EffectRecord>, LedgerError> {
        Ok(self.read(effect_id)?)
    }

    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<EffectRecord>, LedgerError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(PersistenceError::from)? {
            let path = entry.map_err(PersistenceError::from)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_record(&path)?.filter(|r| r.run_id == run_id) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.effect_id.cmp(&b.effect_id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procflow_core::{ArtifactFormat, EffectStatus};

    fn new_effect(run_id: Uuid, hash: &str) -> NewEffect {
        NewEffect { effect_id: EffectId::derive(run_id, "a", hash),
                    run_id,
                    step: "a".into(),
                    input_hash: hash.into() }
    }

    #[test]
    fn records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let run = Uuid::new_v4();
        let id = new_effect(run, "h").effect_id;
        {
            let ledger = FsEffectLedger::open(dir.path()).unwrap();
            assert!(ledger.get_or_create(new_effect(run, "h")).unwrap().created);
            ledger.fail(&id, "agent unreachable").unwrap();
        }
        let ledger = FsEffectLedger::open(dir.path()).unwrap();
        let claim = ledger.get_or_create(new_effect(run, "h")).unwrap();
        assert!(!claim.created);
        assert_eq!(claim.record.status, EffectStatus::Failed);
        assert_eq!(ledger.retry(&id).unwrap().attempts, 2);

        let result = ArtifactRef { run_id: run,
                                   path: format!("tasks/{id}/result.json"),
                                   version: 1,
                                   format: ArtifactFormat::Json,
                                   content_hash: "x".into() };
        ledger.complete(&id, result.clone()).unwrap();
        let stored = ledger.get(&id).unwrap().unwrap();
        assert_eq!(stored.result_ref, Some(result));
        assert_eq!(ledger.list_for_run(run).unwrap().len(), 1);
        assert!(ledger.list_for_run(Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn divergent_input_hash_is_inconsistent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsEffectLedger::open(dir.path()).unwrap();
        let run = Uuid::new_v4();
        let first = new_effect(run, "h1");
        ledger.get_or_create(first.clone()).unwrap();
        let forged = NewEffect { input_hash: "h2".into(),
                                 ..first };
        assert!(matches!(ledger.get_or_create(forged), Err(LedgerError::Inconsistent { .. })));
    }
}
