//! Quality gates: lógica inline que inspecciona outputs ya materializados y
//! decide continuar, detener la corrida o escalar a un breakpoint.
//!
//! Las condiciones son funciones puras de `NamedOutputs`; nunca hacen llamadas
//! externas.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::NamedOutputs;

/// Un valor dentro de un output con nombre (`output` + JSON pointer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    pub output: String,
    pub pointer: String,
}

impl Selector {
    pub fn new(output: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self { output: output.into(),
               pointer: pointer.into() }
    }

    pub fn select<'a>(&self, outputs: &'a NamedOutputs) -> Option<&'a Value> {
        outputs.get(&self.output).and_then(|v| v.pointer(&self.pointer))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.output, self.pointer)
    }
}

pub type PredicateFn = Arc<dyn Fn(&NamedOutputs) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Condition {
    /// Presente y no vacío (`null`, `""`, `[]` y `{}` cuentan como vacíos).
    NonEmpty(Selector),
    /// Número `>= umbral`; para arrays se compara la longitud.
    AtLeast(Selector, f64),
    /// Número `<= umbral`; para arrays se compara la longitud.
    AtMost(Selector, f64),
    Equals(Selector, Value),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    /// Predicado arbitrario. `reads` declara de qué outputs depende.
    Predicate {
        label: String,
        reads: Vec<String>,
        f: PredicateFn,
    },
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Array(a) => Some(a.len() as f64),
        _ => None,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

impl Condition {
    pub fn non_empty(output: impl Into<String>, pointer: impl Into<String>) -> Self {
        Condition::NonEmpty(Selector::new(output, pointer))
    }

    pub fn at_least(output: impl Into<String>, pointer: impl Into<String>, threshold: f64) -> Self {
        Condition::AtLeast(Selector::new(output, pointer), threshold)
    }

    pub fn at_most(output: impl Into<String>, pointer: impl Into<String>, threshold: f64) -> Self {
        Condition::AtMost(Selector::new(output, pointer), threshold)
    }

    pub fn equals(output: impl Into<String>, pointer: impl Into<String>, expected: Value) -> Self {
        Condition::Equals(Selector::new(output, pointer), expected)
    }

    pub fn negate(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    pub fn predicate<F>(label: impl Into<String>, reads: &[&str], f: F) -> Self
        where F: Fn(&NamedOutputs) -> bool + Send + Sync + 'static
    {
        Condition::Predicate { label: label.into(),
                               reads: reads.iter().map(|s| s.to_string()).collect(),
                               f: Arc::new(f) }
    }

    pub fn evaluate(&self, outputs: &NamedOutputs) -> bool {
        match self {
            Condition::NonEmpty(sel) => sel.select(outputs).is_some_and(|v| !is_empty_value(v)),
            Condition::AtLeast(sel, t) => sel.select(outputs).and_then(measure).is_some_and(|v| v >= *t),
            Condition::AtMost(sel, t) => sel.select(outputs).and_then(measure).is_some_and(|v| v <= *t),
            Condition::Equals(sel, expected) => sel.select(outputs) == Some(expected),
            Condition::All(cs) => cs.iter().all(|c| c.evaluate(outputs)),
            Condition::Any(cs) => cs.iter().any(|c| c.evaluate(outputs)),
            Condition::Not(c) => !c.evaluate(outputs),
            Condition::Predicate { f, .. } => f(outputs),
        }
    }

    /// Descripción estable; entra en el hash de la definición.
    pub fn describe(&self) -> String {
        match self {
            Condition::NonEmpty(sel) => format!("non_empty({sel})"),
            Condition::AtLeast(sel, t) => format!("{sel} >= {t}"),
            Condition::AtMost(sel, t) => format!("{sel} <= {t}"),
            Condition::Equals(sel, v) => format!("{sel} == {v}"),
            Condition::All(cs) => format!("all({})", cs.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")),
            Condition::Any(cs) => format!("any({})", cs.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")),
            Condition::Not(c) => format!("not({})", c.describe()),
            Condition::Predicate { label, .. } => format!("predicate({label})"),
        }
    }

    /// Outputs que la condición lee.
    pub fn dependencies(&self, out: &mut Vec<String>) {
        match self {
            Condition::NonEmpty(sel) | Condition::AtLeast(sel, _) | Condition::AtMost(sel, _) | Condition::Equals(sel, _) => {
                out.push(sel.output.clone())
            }
            Condition::All(cs) | Condition::Any(cs) => cs.iter().for_each(|c| c.dependencies(out)),
            Condition::Not(c) => c.dependencies(out),
            Condition::Predicate { reads, .. } => out.extend(reads.iter().cloned()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateCheck {
    pub label: String,
    pub condition: Condition,
}

/// Qué hacer cuando algún check falla.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateAction {
    /// `success:false` con `phase` = `GateStep::failure_phase`.
    Halt,
    /// Suspende en un breakpoint con los fallos como contexto.
    Escalate { question: String, title: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub passed: bool,
    pub failures: Vec<String>,
}

impl GateReport {
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "passed": self.passed, "failures": self.failures })
    }

    pub fn summary(&self) -> String {
        self.failures.join("; ")
    }
}

pub fn evaluate_checks(checks: &[GateCheck], outputs: &NamedOutputs) -> GateReport {
    let failures: Vec<String> = checks.iter()
                                      .filter(|c| !c.condition.evaluate(outputs))
                                      .map(|c| c.label.clone())
                                      .collect();
    GateReport { passed: failures.is_empty(),
                 failures }
}

/// Step de quality gate.
#[derive(Debug, Clone)]
pub struct GateStep {
    pub name: String,
    pub checks: Vec<GateCheck>,
    pub on_fail: GateAction,
    /// Step que se reporta como `phase` al detenerse; por defecto el gate.
    pub phase: Option<String>,
}

impl GateStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               checks: Vec::new(),
               on_fail: GateAction::Halt,
               phase: None }
    }

    /// Atribuye la detención a un step anterior (p.ej. la tarea cuyo output
    /// no pasó los checks).
    pub fn phase(mut self, step: impl Into<String>) -> Self {
        self.phase = Some(step.into());
        self
    }

    pub fn failure_phase(&self) -> &str {
        self.phase.as_deref().unwrap_or(&self.name)
    }

    pub fn check(mut self, label: impl Into<String>, condition: Condition) -> Self {
        self.checks.push(GateCheck { label: label.into(),
                                     condition });
        self
    }

    pub fn halt(mut self) -> Self {
        self.on_fail = GateAction::Halt;
        self
    }

    pub fn escalate(mut self, question: impl Into<String>, title: impl Into<String>) -> Self {
        self.on_fail = GateAction::Escalate { question: question.into(),
                                              title: title.into() };
        self
    }

    pub fn evaluate(&self, outputs: &NamedOutputs) -> GateReport {
        evaluate_checks(&self.checks, outputs)
    }

    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = Vec::new();
        for c in &self.checks {
            c.condition.dependencies(&mut deps);
        }
        deps
    }
}
