use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use uuid::Uuid;

use super::{EffectClaim, EffectLedger, LedgerError, NewEffect};
use crate::model::{ArtifactRef, EffectId, EffectRecord};

#[derive(Default)]
pub struct InMemoryEffectLedger {
    inner: DashMap<EffectId, EffectRecord>,
}

impl InMemoryEffectLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, effect_id: &EffectId, f: F) -> Result<EffectRecord, LedgerError>
        where F: FnOnce(&mut EffectRecord) -> Result<(), LedgerError>
    {
        let mut rec = self.inner
                          .get_mut(effect_id)
                          .ok_or_else(|| LedgerError::NotFound(effect_id.clone()))?;
        f(rec.value_mut())?;
        Ok(rec.clone())
    }
}

impl EffectLedger for InMemoryEffectLedger {
    fn get_or_create(&self, new: NewEffect) -> Result<EffectClaim, LedgerError> {
        match self.inner.entry(new.effect_id.clone()) {
            Entry::Occupied(e) => {
                let record = e.get().clone();
                record.check_input(&new.input_hash)?;
                Ok(EffectClaim { record, created: false })
            }
            Entry::Vacant(v) => {
                debug!("ledger: new effect {} for step '{}'", new.effect_id, new.step);
                let record = EffectRecord::new_pending(new.effect_id, new.run_id, new.step, new.input_hash, Utc::now());
                v.insert(record.clone());
                Ok(EffectClaim { record, created: true })
            }
        }
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
        Ok(self.inner.get(effect_id).map(|r| r.value().clone()))
    }

    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<EffectRecord>, LedgerError> {
        let mut out: Vec<EffectRecord> = self.inner
                                             .iter()
                                             .filter(|e| e.value().run_id == run_id)
                                             .map(|e| e.value().clone())
                                             .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.effect_id.cmp(&b.effect_id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactFormat, EffectStatus};
    use std::sync::Arc;

    fn new_effect(hash: &str) -> NewEffect {
        NewEffect { effect_id: EffectId::from_raw("e1"),
                    run_id: Uuid::nil(),
                    step: "a".into(),
                    input_hash: hash.into() }
    }

    #[test]
    fn get_or_create_is_idempotent_and_guards_input_hash() {
        let ledger = InMemoryEffectLedger::new();
        assert!(ledger.get_or_create(new_effect("h1")).unwrap().created);
        let again = ledger.get_or_create(new_effect("h1")).unwrap();
        assert!(!again.created);
        assert_eq!(again.record.attempts, 1);
        assert!(matches!(ledger.get_or_create(new_effect("h2")), Err(LedgerError::Inconsistent { .. })));
    }

    #[test]
    fn concurrent_get_or_create_creates_exactly_once() {
        let ledger = Arc::new(InMemoryEffectLedger::new());
        let handles: Vec<_> = (0..8).map(|_| {
                                        let l = ledger.clone();
                                        std::thread::spawn(move || l.get_or_create(new_effect("h")).unwrap().created)
                                    })
                                    .collect();
        let created = handles.into_iter().map(|h| h.join().unwrap()).filter(|c| *c).count();
        assert_eq!(created, 1);
    }

    #[test]
    fn lifecycle_complete_fail_retry() {
        let ledger = InMemoryEffectLedger::new();
        let id = EffectId::from_raw("e1");
        ledger.get_or_create(new_effect("h")).unwrap();
        let failed = ledger.fail(&id, "agent unreachable").unwrap();
        assert_eq!(failed.status, EffectStatus::Failed);
        let retried = ledger.retry(&id).unwrap();
        assert_eq!((retried.status, retried.attempts), (EffectStatus::Pending, 2));
        let result = ArtifactRef { run_id: Uuid::nil(),
                                   path: "tasks/e1/result.json".into(),
                                   version: 1,
                                   format: ArtifactFormat::Json,
                                   content_hash: "x".into() };
        let done = ledger.complete(&id, result).unwrap();
        assert_eq!(done.status, EffectStatus::Succeeded);
        assert!(ledger.fail(&id, "late").is_err());
        assert!(matches!(ledger.retry(&EffectId::from_raw("nope")), Err(LedgerError::NotFound(_))));
        assert_eq!(ledger.list_for_run(Uuid::nil()).unwrap().len(), 1);
    }
}
