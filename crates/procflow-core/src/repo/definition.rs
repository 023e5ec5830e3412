//! Definición inmutable de un workflow y registro por id.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::constants::ENGINE_VERSION;
use crate::hashing::hash_value;
use crate::step::Step;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("workflow id and version must not be empty")]
    MissingIdentity,
    #[error("workflow '{0}' has no steps")]
    EmptyWorkflow(String),
    #[error("invalid step name '{0}' (allowed: letters, digits, '-', '_', '.')")]
    InvalidStepName(String),
    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),
    #[error("'{0}' is reserved by the result envelope")]
    ReservedName(String),
    #[error("step '{step}' depends on unknown output '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
    #[error("step '{step}' depends on '{dependency}', which runs later")]
    ForwardDependency { step: String, dependency: String },
    #[error("gate '{step}' reports phase '{phase}', which is not an earlier step")]
    UnknownPhase { step: String, phase: String },
    #[error("breakpoint '{step}' attaches '{path}': {reason}")]
    InvalidAttachment { step: String, path: String, reason: String },
    #[error("returned output '{0}' is never produced")]
    UnknownOutput(String),
    #[error("workflow '{id}' version {version} is already registered with a different definition")]
    Conflicting { id: String, version: String },
}

/// Definición inmutable del workflow.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub version: String,
    pub steps: Vec<Step>,
    /// Outputs incluidos en el resultado final; vacío = todos.
    pub outputs: Vec<String>,
    pub definition_hash: String,
}

impl WorkflowDefinition {
    /// Calcula el hash a partir de los descriptores de los steps.
    pub fn new(id: String, version: String, steps: Vec<Step>, outputs: Vec<String>) -> Self {
        let descriptors: Vec<_> = steps.iter().map(|s| s.descriptor()).collect();
        let definition_hash = hash_value(&json!({
            "engine_version": ENGINE_VERSION,
            "id": id,
            "version": version,
            "steps": descriptors,
            "outputs": outputs,
        }));
        Self { id,
               version,
               steps,
               outputs,
               definition_hash }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == name)
    }
}

/// Registro de definiciones por id (la última versión registrada gana).
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    defs: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrar dos veces la misma (id, versión) sólo es válido si el hash
    /// coincide.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), DefinitionError> {
        if let Some(existing) = self.defs.get(&definition.id) {
            if existing.version == definition.version && existing.definition_hash != definition.definition_hash {
                return Err(DefinitionError::Conflicting { id: definition.id.clone(),
                                                          version: definition.version.clone() });
            }
        }
        self.defs.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.defs.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.defs.keys().cloned().collect();
        ids.sort();
        ids
    }
}
