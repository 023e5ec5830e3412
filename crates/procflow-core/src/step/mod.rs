//! Steps: definición declarativa, bindings, specs de tarea y builder.

pub mod binding;
pub mod definition;
pub mod pipeline;
pub mod spec;
pub mod status;

pub use binding::{resolve_bindings, Binding, Source};
pub use definition::{BreakpointStep, EffectKey, ReviewAttachment, Step, StepFactory, TaskStep};
pub use pipeline::WorkflowBuilder;
pub use spec::{StepContext, StepSpec, TaskIo, TaskKind};
pub use status::StepStatus;
