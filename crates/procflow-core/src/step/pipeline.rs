use std::collections::HashSet;

use super::{BreakpointStep, Step, TaskStep};
use crate::artifacts::validate_path;
use crate::gate::GateStep;
use crate::model::result::RESERVED_RESULT_KEYS;
use crate::repo::{DefinitionError, WorkflowDefinition};

/// Builder declarativo de workflows.
///
/// Usage:
///   let def = WorkflowBuilder::new("trial", "1.0.0")
///       .task(TaskStep::new("plan", factory).bind("product", Source::input("/product")))
///       .gate(GateStep::new("qa").check("has phases", Condition::non_empty("plan", "/phases")))
///       .breakpoint(BreakpointStep::new("review", "Approve?", "Plan review"))
///       .build()?;
///
/// `build` valida nombres y dependencias: cada step sólo puede leer outputs
/// producidos antes que él.
#[derive(Debug)]
pub struct WorkflowBuilder {
    id: String,
    version: String,
    steps: Vec<Step>,
    outputs: Vec<String>,
}

fn valid_step_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self { id: id.into(),
               version: version.into(),
               steps: Vec::new(),
               outputs: Vec::new() }
    }

    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn task(self, step: TaskStep) -> Self {
        self.step(step)
    }

    pub fn breakpoint(self, step: BreakpointStep) -> Self {
        self.step(step)
    }

    pub fn gate(self, step: GateStep) -> Self {
        self.step(step)
    }

    /// Restringe el resultado final a estos outputs.
    pub fn returns<I, S>(mut self, names: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.outputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        if self.id.trim().is_empty() || self.version.trim().is_empty() {
            return Err(DefinitionError::MissingIdentity);
        }
        if self.steps.is_empty() {
            return Err(DefinitionError::EmptyWorkflow(self.id));
        }
        let all: HashSet<&str> = self.steps.iter().map(|s| s.name()).collect();
        let mut produced: HashSet<String> = HashSet::new();
        for step in &self.steps {
            let name = step.name();
            if !valid_step_name(name) {
                return Err(DefinitionError::InvalidStepName(name.to_string()));
            }
            if RESERVED_RESULT_KEYS.contains(&name) {
                return Err(DefinitionError::ReservedName(name.to_string()));
            }
            if produced.contains(name) {
                return Err(DefinitionError::DuplicateStep(name.to_string()));
            }
            for dep in step.dependencies() {
                if !produced.contains(&dep) {
                    let step = name.to_string();
                    return Err(if all.contains(dep.as_str()) {
                                   DefinitionError::ForwardDependency { step, dependency: dep }
                               } else {
                                   DefinitionError::UnknownDependency { step, dependency: dep }
                               });
                }
            }
            if let Step::Gate(GateStep { phase: Some(phase), .. }) = step {
                if !produced.contains(phase) {
                    return Err(DefinitionError::UnknownPhase { step: name.to_string(),
                                                               phase: phase.clone() });
                }
            }
            produced.insert(name.to_string());
            if let Step::Breakpoint(b) = step {
                for a in &b.attachments {
                    validate_path(&a.path).map_err(|e| {
                                              DefinitionError::InvalidAttachment { step: name.to_string(),
                                                                                   path: a.path.clone(),
                                                                                   reason: e.to_string() }
                                          })?;
                }
                for extra in &b.provides {
                    if RESERVED_RESULT_KEYS.contains(&extra.as_str()) {
                        return Err(DefinitionError::ReservedName(extra.clone()));
                    }
                    produced.insert(extra.clone());
                }
            }
        }
        if let Some(unknown) = self.outputs.iter().find(|o| !produced.contains(*o)) {
            return Err(DefinitionError::UnknownOutput(unknown.clone()));
        }
        Ok(WorkflowDefinition::new(self.id, self.version, self.steps, self.outputs))
    }
}
