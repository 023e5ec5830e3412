//! Modelos neutrales: artifacts, efectos, breakpoints, estado de corrida y
//! resultado final.

pub mod artifact;
pub mod breakpoint;
pub mod effect;
pub mod result;
pub mod run;

pub use artifact::{Artifact, ArtifactFormat, ArtifactRef, ReviewArtifact};
pub use breakpoint::{BreakpointId, BreakpointRecord, Decision, Resolution, ResolutionStatus, ReviewContext};
pub use effect::{EffectId, EffectRecord, EffectStatus};
pub use result::{ResultMetadata, WorkflowResult};
pub use run::{CompletedStep, NamedOutputs, RunFailure, RunState, RunStatus, StepSlot};
