//! procflow-core: motor durable e idempotente de workflows con
//! suspensión/reanudación.
pub mod agent;
pub mod artifacts;
pub mod breakpoint;
pub mod config;
pub mod constants;
pub mod contract;
pub mod engine;
pub mod errors;
pub mod event;
pub mod executor;
pub mod gate;
pub mod hashing;
pub mod injection;
pub mod ledger;
pub mod model;
pub mod repo;
pub mod step;

pub use agent::{AgentClient, AgentError, AgentReply, AgentRequest, FnSkill, Skill, SkillRegistry};
pub use artifacts::{ArtifactError, ArtifactStore, InMemoryArtifactStore};
pub use breakpoint::{BreakpointError, BreakpointManager};
pub use config::EngineConfig;
pub use contract::{FieldType, TaskContract};
pub use engine::{RunContext, RunnerBuilder, WorkflowRunner};
pub use errors::{classify_error, CoreEngineError, EngineError, ErrorClass};
pub use event::{EventStore, EventStoreError, InMemoryEventStore, RunEvent, RunEventKind};
pub use executor::{TaskError, TaskExecutor, TaskResult};
pub use gate::{Condition, GateStep};
pub use ledger::{EffectLedger, InMemoryEffectLedger, LedgerError};
pub use model::{ArtifactFormat, ArtifactRef, BreakpointId, BreakpointRecord, Decision, EffectId, EffectRecord,
                EffectStatus, NamedOutputs, Resolution, RunState, RunStatus, WorkflowResult};
pub use repo::{replay, ReplayRepository, RunRepository, WorkflowDefinition, WorkflowRegistry};
pub use step::{BreakpointStep, Source, StepContext, StepSpec, TaskStep, WorkflowBuilder};
