//! Variantes de step de una definición de workflow.
//!
//! Un workflow es una lista ordenada de `Step`:
//! - `Task`: dispatch al agente (o a un skill) a través del ledger.
//! - `Breakpoint`: suspensión hasta una decisión externa.
//! - `Gate`: quality gate sobre outputs ya materializados.
//!
//! Cada step produce un output con su propio nombre. Las dependencias se
//! derivan de los bindings y condiciones declarados.
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{Binding, Source, StepContext, StepSpec};
use crate::gate::{Condition, GateStep};
use crate::model::ArtifactFormat;

pub type StepFactory = Arc<dyn Fn(&Value, &StepContext) -> StepSpec + Send + Sync>;

/// Cómo se deriva la clave de idempotencia de una tarea.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectKey {
    /// Hash canónico de los inputs resueltos.
    Inputs,
    /// Clave fija declarada por el autor; el `input_hash` del ledger sigue
    /// detectando definiciones no deterministas.
    Fixed(String),
}

#[derive(Clone)]
pub struct TaskStep {
    pub name: String,
    pub bindings: Vec<Binding>,
    pub effect_key: EffectKey,
    pub factory: StepFactory,
}

impl TaskStep {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
        where F: Fn(&Value, &StepContext) -> StepSpec + Send + Sync + 'static
    {
        Self { name: name.into(),
               bindings: Vec::new(),
               effect_key: EffectKey::Inputs,
               factory: Arc::new(factory) }
    }

    pub fn bind(mut self, key: impl Into<String>, source: Source) -> Self {
        self.bindings.push(Binding::required(key, source));
        self
    }

    pub fn bind_optional(mut self, key: impl Into<String>, source: Source) -> Self {
        self.bindings.push(Binding::optional(key, source));
        self
    }

    pub fn effect_key(mut self, key: impl Into<String>) -> Self {
        self.effect_key = EffectKey::Fixed(key.into());
        self
    }

    pub fn spec(&self, inputs: &Value, ctx: &StepContext) -> StepSpec {
        (self.factory)(inputs, ctx)
    }
}

impl fmt::Debug for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStep")
         .field("name", &self.name)
         .field("bindings", &self.bindings)
         .field("effect_key", &self.effect_key)
         .finish_non_exhaustive()
    }
}

/// Artifact adjunto a un breakpoint; su contenido sale de `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewAttachment {
    pub path: String,
    pub format: ArtifactFormat,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub struct BreakpointStep {
    pub name: String,
    pub question: String,
    pub title: String,
    pub context: Vec<Binding>,
    pub attachments: Vec<ReviewAttachment>,
    /// Si existe, sólo suspende cuando la condición NO se cumple.
    pub when: Option<Condition>,
    /// Nombres nuevos que el revisor puede introducir vía `modifiedValues`.
    pub provides: Vec<String>,
}

impl BreakpointStep {
    pub fn new(name: impl Into<String>, question: impl Into<String>, title: impl Into<String>) -> Self {
        Self { name: name.into(),
               question: question.into(),
               title: title.into(),
               context: Vec::new(),
               attachments: Vec::new(),
               when: None,
               provides: Vec::new() }
    }

    pub fn context(mut self, key: impl Into<String>, source: Source) -> Self {
        self.context.push(Binding::optional(key, source));
        self
    }

    pub fn attach(mut self, path: impl Into<String>, source: Source) -> Self {
        let path = path.into();
        let format = ArtifactFormat::from_path(&path);
        self.attachments.push(ReviewAttachment { path, format, source });
        self
    }

    pub fn unless(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }

    pub fn provides(mut self, name: impl Into<String>) -> Self {
        self.provides.push(name.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Task(TaskStep),
    Breakpoint(BreakpointStep),
    Gate(GateStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Task(t) => &t.name,
            Step::Breakpoint(b) => &b.name,
            Step::Gate(g) => &g.name,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Step::Task(_) => "task",
            Step::Breakpoint(_) => "breakpoint",
            Step::Gate(_) => "gate",
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self, Step::Task(_))
    }

    /// Outputs de los que depende el step.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = match self {
            Step::Task(t) => t.bindings.iter().filter_map(|b| b.source.dependency()).map(str::to_string).collect(),
            Step::Breakpoint(b) => {
                let mut d: Vec<String> = b.context
                                          .iter()
                                          .map(|c| &c.source)
                                          .chain(b.attachments.iter().map(|a| &a.source))
                                          .filter_map(|s| s.dependency())
                                          .map(str::to_string)
                                          .collect();
                if let Some(c) = &b.when {
                    c.dependencies(&mut d);
                }
                d
            }
            Step::Gate(g) => g.dependencies(),
        };
        deps.sort();
        deps.dedup();
        deps
    }

    /// Descriptor estable (sin closures) que entra en el hash de la definición.
    pub fn descriptor(&self) -> Value {
        match self {
            Step::Task(t) => {
                let key = match &t.effect_key {
                    EffectKey::Inputs => Value::Null,
                    EffectKey::Fixed(k) => Value::String(k.clone()),
                };
                json!({
                    "kind": "task",
                    "name": t.name,
                    "bindings": t.bindings,
                    "effect_key": key,
                })
            }
            Step::Breakpoint(b) => json!({
                "kind": "breakpoint",
                "name": b.name,
                "question": b.question,
                "title": b.title,
                "context": b.context,
                "attachments": b.attachments.iter().map(|a| json!([a.path, a.format, a.source])).collect::<Vec<_>>(),
                "when": b.when.as_ref().map(|c| c.describe()),
                "provides": b.provides,
            }),
            Step::Gate(g) => json!({
                "kind": "gate",
                "name": g.name,
                "checks": g.checks.iter().map(|c| json!([c.label, c.condition.describe()])).collect::<Vec<_>>(),
                "on_fail": g.on_fail,
                "phase": g.phase,
            }),
        }
    }
}

impl From<TaskStep> for Step {
    fn from(t: TaskStep) -> Self {
        Step::Task(t)
    }
}

impl From<BreakpointStep> for Step {
    fn from(b: BreakpointStep) -> Self {
        Step::Breakpoint(b)
    }
}

impl From<GateStep> for Step {
    fn from(g: GateStep) -> Self {
        Step::Gate(g)
    }
}
