//! Contratos de salida de las tareas.
//!
//! Un `TaskContract` declara los campos (requeridos u opcionales) que debe
//! traer la salida de un agente y su tipo JSON. La salida se valida antes de
//! aceptarse en el ledger: una violación nunca se cachea ni se reintenta
//! automáticamente.

mod extract;

pub use extract::extract_first_json;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Cualquier valor no nulo.
    Any,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => !value.is_null(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("agent reply contains no JSON object or array")]
    NoJson,
    #[error("output must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("{}", .0.join("; "))]
    Fields(Vec<String>),
}

/// Forma declarada de la salida de un step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContract {
    pub fields: Vec<FieldSpec>,
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl TaskContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldSpec { name: name.into(),
                                     ty,
                                     required: true });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldSpec { name: name.into(),
                                     ty,
                                     required: false });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Valida `output`. Un contrato vacío acepta cualquier objeto.
    ///
    /// Reporta todas las violaciones de campos de una vez. Un opcional
    /// presente como `null` se considera ausente.
    pub fn validate(&self, output: &Value) -> Result<(), ContractViolation> {
        let obj = output.as_object()
                        .ok_or_else(|| ContractViolation::NotAnObject(kind_of(output)))?;
        let mut problems = Vec::new();
        for f in &self.fields {
            match obj.get(&f.name) {
                None | Some(Value::Null) if f.required => problems.push(format!("missing required field '{}'", f.name)),
                None | Some(Value::Null) => {}
                Some(v) if !f.ty.accepts(v) => {
                    problems.push(format!("field '{}' must be {}, got {}", f.name, f.ty, kind_of(v)))
                }
                Some(_) => {}
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ContractViolation::Fields(problems))
        }
    }

    /// Esquema JSON (subset) que se envía al agente junto con la tarea.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for f in &self.fields {
            let prop = match f.ty {
                FieldType::Any => json!({}),
                ty => json!({ "type": ty.as_str() }),
            };
            properties.insert(f.name.clone(), prop);
        }
        let required: Vec<&str> = self.fields
                                      .iter()
                                      .filter(|f| f.required)
                                      .map(|f| f.name.as_str())
                                      .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
