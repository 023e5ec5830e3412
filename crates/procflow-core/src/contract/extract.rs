//! Extracción del primer documento JSON embebido en texto libre.
//!
//! Los agentes a veces responden con prosa alrededor del JSON. Se toma el
//! primer `{` o `[` a partir del cual hay un valor JSON completo y válido; el
//! texto que le sigue se ignora.
use serde_json::{Deserializer, Value};

const BOM: char = '\u{feff}';

pub fn extract_first_json(text: &str) -> Option<Value> {
    let text = text.trim_start_matches(BOM);
    for (start, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }
    None
}
