//! Canonical JSON: claves de objetos ordenadas lexicográficamente y sin
//! espacios, de modo que dos `Value` equivalentes producen el mismo texto
//! (y por tanto el mismo hash) sin importar el orden de inserción.

use serde_json::Value;
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        // `Display` de un `Value::String` produce el literal JSON escapado.
        Value::String(_) => out.push_str(&value.to_string()),
        Value::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(k.as_str()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted_recursively() {
        let v = json!({"b": {"y": 1, "x": [true, null]}, "a": "q\"uote"});
        assert_eq!(to_canonical_json(&v), r#"{"a":"q\"uote","b":{"x":[true,null],"y":1}}"#);
    }
}
