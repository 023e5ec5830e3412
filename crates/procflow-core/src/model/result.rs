//! Resultado final de un workflow.
//!
//! Forma en el cable:
//! - éxito: `{ "success": true, <outputs...>, "metadata": { processId, timestamp, version, ... } }`
//! - fallo/abort: `{ "success": false, "error": "...", "phase": "<step>" }`
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::NamedOutputs;

/// Claves reservadas por el envoltorio; ningún output puede usarlas.
pub const RESERVED_RESULT_KEYS: [&str; 4] = ["success", "error", "phase", "metadata"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub process_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(flatten)]
    pub outputs: NamedOutputs,
}

impl WorkflowResult {
    pub fn success(outputs: NamedOutputs, metadata: ResultMetadata) -> Self {
        Self { success: true,
               error: None,
               phase: None,
               metadata: Some(metadata),
               outputs }
    }

    pub fn failure(phase: impl Into<String>, error: impl Into<String>) -> Self {
        Self { success: false,
               error: Some(error.into()),
               phase: Some(phase.into()),
               metadata: None,
               outputs: NamedOutputs::new() }
    }

    pub fn output(&self, name: &str) -> Option<&serde_json::Value> {
        self.outputs.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_result_flattens_outputs_next_to_metadata() {
        let mut outputs = NamedOutputs::new();
        outputs.insert("plan".into(), json!({"steps": 3}));
        let meta = ResultMetadata { process_id: "trial".into(),
                                    timestamp: Utc::now(),
                                    version: "1.0.0".into(),
                                    run_id: Uuid::nil(),
                                    run_fingerprint: None };
        let v = serde_json::to_value(WorkflowResult::success(outputs, meta)).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["plan"]["steps"], 3);
        assert_eq!(v["metadata"]["processId"], "trial");
        assert!(v.get("error").is_none());

        let back: WorkflowResult = serde_json::from_value(v).unwrap();
        assert_eq!(back.output("plan"), Some(&json!({"steps": 3})));
        assert!(back.outputs.get("success").is_none());
    }

    #[test]
    fn failure_result_names_the_phase() {
        let v = serde_json::to_value(WorkflowResult::failure("qa-gate", "coverage below 0.8")).unwrap();
        assert_eq!(v, json!({"success": false, "error": "coverage below 0.8", "phase": "qa-gate"}));
    }
}
