//! Bindings: de dónde toma cada step sus inputs.
//!
//! Un step declara sus inputs como pares `clave <- fuente`. Las fuentes son
//! los inputs iniciales de la corrida, un output con nombre de un step previo
//! (o un valor inyectado por un revisor) o un literal. Las dependencias entre
//! steps se derivan de estas declaraciones.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::CoreEngineError;
use crate::model::NamedOutputs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    /// JSON pointer sobre los inputs iniciales (`""` = todo).
    Input { pointer: String },
    /// JSON pointer sobre un output con nombre.
    Output { name: String, pointer: String },
    Literal(Value),
}

impl Source {
    pub fn input(pointer: impl Into<String>) -> Self {
        Source::Input { pointer: pointer.into() }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Source::Output { name: name.into(),
                         pointer: String::new() }
    }

    pub fn output_at(name: impl Into<String>, pointer: impl Into<String>) -> Self {
        Source::Output { name: name.into(),
                         pointer: pointer.into() }
    }

    pub fn literal(value: Value) -> Self {
        Source::Literal(value)
    }

    /// Output del que depende esta fuente, si alguno.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Source::Output { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn resolve(&self, run_inputs: &Value, outputs: &NamedOutputs) -> Option<Value> {
        match self {
            Source::Input { pointer } => run_inputs.pointer(pointer).cloned(),
            Source::Output { name, pointer } => outputs.get(name).and_then(|v| v.pointer(pointer)).cloned(),
            Source::Literal(v) => Some(v.clone()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Input { pointer } => write!(f, "inputs{pointer}"),
            Source::Output { name, pointer } => write!(f, "{name}{pointer}"),
            Source::Literal(_) => f.write_str("<literal>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub key: String,
    pub source: Source,
    pub required: bool,
}

impl Binding {
    pub fn required(key: impl Into<String>, source: Source) -> Self {
        Self { key: key.into(),
               source,
               required: true }
    }

    pub fn optional(key: impl Into<String>, source: Source) -> Self {
        Self { key: key.into(),
               source,
               required: false }
    }
}

/// Materializa los bindings como un objeto JSON.
///
/// Un binding requerido sin valor produce `MissingInputs`; uno opcional se
/// omite del objeto.
pub fn resolve_bindings(bindings: &[Binding], run_inputs: &Value, outputs: &NamedOutputs) -> Result<Value, CoreEngineError> {
    let mut out = Map::new();
    for b in bindings {
        match b.source.resolve(run_inputs, outputs) {
            Some(v) => {
                out.insert(b.key.clone(), v);
            }
            None if b.required => {
                return Err(CoreEngineError::MissingInputs(format!("{} <- {}", b.key, b.source)));
            }
            None => {}
        }
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_inputs_outputs_and_literals() {
        let mut outputs = NamedOutputs::new();
        outputs.insert("plan".into(), json!({"items": [1, 2]}));
        let bindings = vec![Binding::required("product", Source::input("/product")),
                            Binding::required("items", Source::output_at("plan", "/items")),
                            Binding::required("mode", Source::literal(json!("strict"))),
                            Binding::optional("notes", Source::output("review"))];
        let v = resolve_bindings(&bindings, &json!({"product": "stent"}), &outputs).unwrap();
        assert_eq!(v, json!({"product": "stent", "items": [1, 2], "mode": "strict"}));
    }

    #[test]
    fn missing_required_binding_names_the_key() {
        let err = resolve_bindings(&[Binding::required("plan", Source::output("plan"))], &json!({}), &NamedOutputs::new())
            .unwrap_err();
        assert_eq!(err, CoreEngineError::MissingInputs("plan <- plan".into()));
    }
}
