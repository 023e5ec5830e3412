//! Builder para `WorkflowRunner`.
//!
//! Las stores por defecto son en memoria; el agente es obligatorio.
//!
//! ```ignore
//! let runner = RunnerBuilder::new().agent(Arc::new(ScriptedAgent::new()))
//!                                  .register(definition)
//!                                  .build()?;
//! ```
use std::sync::Arc;

use super::WorkflowRunner;
use crate::agent::{AgentClient, Skill, SkillRegistry};
use crate::artifacts::{ArtifactStore, InMemoryArtifactStore};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::event::{EventStore, InMemoryEventStore};
use crate::executor::TaskExecutor;
use crate::ledger::{EffectLedger, InMemoryEffectLedger};
use crate::repo::{ReplayRepository, RunRepository, WorkflowDefinition, WorkflowRegistry};

#[derive(Default)]
pub struct RunnerBuilder {
    events: Option<Arc<dyn EventStore>>,
    ledger: Option<Arc<dyn EffectLedger>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    repository: Option<Arc<dyn RunRepository>>,
    agent: Option<Arc<dyn AgentClient>>,
    skills: SkillRegistry,
    config: EngineConfig,
    definitions: Vec<WorkflowDefinition>,
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn EffectLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn RunRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn agent(mut self, agent: Arc<dyn AgentClient>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn skill(mut self, skill: impl Skill + 'static) -> Self {
        self.skills.register(skill);
        self
    }

    pub fn skills(mut self, skills: SkillRegistry) -> Self {
        self.skills = skills;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register(mut self, definition: WorkflowDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn build(self) -> Result<WorkflowRunner, EngineError> {
        let agent = self.agent.ok_or(EngineError::MissingComponent("agent client"))?;
        let mut registry = WorkflowRegistry::new();
        for def in self.definitions {
            registry.register(def)?;
        }
        let events = self.events.unwrap_or_else(|| Arc::new(InMemoryEventStore::new()));
        let ledger = self.ledger.unwrap_or_else(|| Arc::new(InMemoryEffectLedger::new()));
        let artifacts = self.artifacts.unwrap_or_else(|| Arc::new(InMemoryArtifactStore::new()));
        let repository = self.repository.unwrap_or_else(|| Arc::new(ReplayRepository::new()));
        let executor = TaskExecutor::new(ledger.clone(), artifacts.clone(), agent, self.skills, &self.config);
        Ok(WorkflowRunner::from_parts(registry, events, ledger, artifacts, repository, executor, self.config))
    }
}
