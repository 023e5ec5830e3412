use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use super::{plan_put, verify, ArtifactError, ArtifactStore, PutPlan};
use crate::model::{Artifact, ArtifactFormat, ArtifactRef};

#[derive(Default)]
pub struct InMemoryArtifactStore {
    inner: DashMap<(Uuid, String), Vec<Artifact>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, run_id: Uuid, path: &str, format: ArtifactFormat, content: &Value) -> Result<ArtifactRef, ArtifactError> {
        let mut versions = self.inner.entry((run_id, path.to_string())).or_default();
        match plan_put(run_id, path, format, content, versions.last().map(|a| &a.reference))? {
            PutPlan::Existing(r) => Ok(r),
            PutPlan::Write(r) => {
                debug!("artifact put {} (run {run_id})", r.location());
                versions.push(Artifact { reference: r.clone(),
                                         content: content.clone() });
                Ok(r)
            }
        }
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError> {
        let not_found = || ArtifactError::NotFound { run_id: reference.run_id,
                                                     path: reference.path.clone(),
                                                     version: reference.version };
        let versions = self.inner
                           .get(&(reference.run_id, reference.path.clone()))
                           .ok_or_else(not_found)?;
        let artifact = versions.iter()
                               .find(|a| a.reference.version == reference.version)
                               .cloned()
                               .ok_or_else(not_found)?;
        verify(reference, &artifact.content)?;
        Ok(artifact)
    }

    fn versions(&self, run_id: Uuid, path: &str) -> Result<Vec<ArtifactRef>, ArtifactError> {
        Ok(self.inner
               .get(&(run_id, path.to_string()))
               .map(|v| v.iter().map(|a| a.reference.clone()).collect())
               .unwrap_or_default())
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<ArtifactRef>, ArtifactError> {
        let mut refs: Vec<ArtifactRef> = self.inner
                                             .iter()
                                             .filter(|e| e.key().0 == run_id)
                                             .flat_map(|e| e.value().iter().map(|a| a.reference.clone()).collect::<Vec<_>>())
                                             .collect();
        refs.sort_by(|a, b| a.path.cmp(&b.path).then(a.version.cmp(&b.version)));
        Ok(refs)
    }
}
