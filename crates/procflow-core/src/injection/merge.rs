//! Utilidades para fusionar valores JSON de forma determinista.
//!
//! Aquí implementamos un merge "shallow" donde las claves de `b` reemplazan
//! a las de `a`. Es la semántica con la que un revisor modifica outputs en un
//! breakpoint: `modifiedValues.plan = {"budget": 10}` reemplaza sólo la clave
//! `budget` del output `plan`.

use serde_json::{Map, Value};

use crate::model::NamedOutputs;

/// Merge shallow: keys from `b` override keys from `a` when both are objects.
/// Cuando alguno de los dos valores no es objeto, `b` tiene precedencia.
pub fn merge_json(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            let mut out = ma.clone();
            for (k, v) in mb.iter() {
                out.insert(k.clone(), v.clone());
            }
            Value::Object(out)
        }
        // Non-objects: override
        (_, other) => other.clone(),
    }
}

/// Aplica `modifiedValues` sobre el mapa de outputs: fusiona sobre un output
/// existente o lo inserta si el nombre es nuevo.
pub fn apply_modified_values(outputs: &mut NamedOutputs, modified: &Map<String, Value>) {
    for (name, value) in modified {
        let merged = match outputs.get(name) {
            Some(current) => merge_json(current, value),
            None => value.clone(),
        };
        outputs.insert(name.clone(), merged);
    }
}
