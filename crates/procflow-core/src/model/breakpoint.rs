//! Breakpoints: puntos de suspensión que requieren una decisión externa.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ArtifactRef, ReviewArtifact};

/// Identificador de breakpoint: `<run_id>/<step>`.
///
/// Se deriva del run y del nombre del step, así que un replay de la misma
/// corrida vuelve a encontrar el mismo breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BreakpointId {
    pub run_id: Uuid,
    pub step: String,
}

impl BreakpointId {
    pub fn new(run_id: Uuid, step: impl Into<String>) -> Self {
        Self { run_id,
               step: step.into() }
    }
}

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.step)
    }
}

impl FromStr for BreakpointId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (run, step) = s.split_once('/')
                           .ok_or_else(|| format!("breakpoint id '{s}' must look like <run_id>/<step>"))?;
        let run_id = Uuid::parse_str(run).map_err(|e| format!("invalid run id in '{s}': {e}"))?;
        if step.is_empty() {
            return Err(format!("breakpoint id '{s}' has an empty step"));
        }
        Ok(Self::new(run_id, step))
    }
}

impl From<BreakpointId> for String {
    fn from(id: BreakpointId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for BreakpointId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Decisión del revisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
    Modified,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
            Decision::Modified => "modified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Approved => "approved",
            ResolutionStatus::Rejected => "rejected",
            ResolutionStatus::Modified => "modified",
        }
    }
}

impl From<Decision> for ResolutionStatus {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Approved => ResolutionStatus::Approved,
            Decision::Rejected => ResolutionStatus::Rejected,
            Decision::Modified => ResolutionStatus::Modified,
        }
    }
}

/// Contrato del canal de resolución: `decision` + `modifiedValues`
/// opcionales. Las claves de `modified_values` nombran outputs del run (o
/// nuevos nombres) y se fusionan sobre ellos antes del siguiente step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_values: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl Resolution {
    pub fn approve(by: impl Into<String>) -> Self {
        Self { decision: Decision::Approved,
               modified_values: None,
               resolved_by: Some(by.into()) }
    }

    pub fn reject(by: impl Into<String>) -> Self {
        Self { decision: Decision::Rejected,
               modified_values: None,
               resolved_by: Some(by.into()) }
    }

    pub fn modify(by: impl Into<String>, values: Map<String, Value>) -> Self {
        Self { decision: Decision::Modified,
               modified_values: Some(values),
               resolved_by: Some(by.into()) }
    }
}

/// Contexto de revisión: payload estructurado + artifacts adjuntos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewContext {
    pub context: Value,
    #[serde(default)]
    pub artifacts: Vec<ReviewArtifact>,
    /// Dónde quedó escrita cada entrada de `artifacts` en el Artifact Store.
    #[serde(default)]
    pub artifact_refs: Vec<ArtifactRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRecord {
    pub breakpoint_id: BreakpointId,
    pub run_id: Uuid,
    pub step: String,
    pub step_index: usize,
    pub question: String,
    pub title: String,
    pub review_context: ReviewContext,
    pub resolution: ResolutionStatus,
    pub modified_values: Option<Map<String, Value>>,
    pub resolved_by: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl BreakpointRecord {
    pub fn is_pending(&self) -> bool {
        self.resolution == ResolutionStatus::Pending
    }

    /// Output con el que el step del breakpoint queda registrado en el run.
    pub fn decision_output(&self) -> Value {
        let mut out = Map::new();
        out.insert("decision".into(), Value::from(self.resolution.as_str()));
        if let Some(by) = &self.resolved_by {
            out.insert("resolvedBy".into(), Value::String(by.clone()));
        }
        if let Some(values) = &self.modified_values {
            out.insert("modifiedValues".into(), Value::Object(values.clone()));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_id_round_trips_through_string() {
        let id = BreakpointId::new(Uuid::new_v4(), "review/phase-2");
        let parsed: BreakpointId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
        assert!("not-a-uuid/step".parse::<BreakpointId>().is_err());
        assert!(format!("{}/", Uuid::nil()).parse::<BreakpointId>().is_err());
    }

    #[test]
    fn resolution_uses_camel_case_wire_names() {
        let mut values = Map::new();
        values.insert("plan".into(), serde_json::json!({"budget": 10}));
        let v = serde_json::to_value(Resolution::modify("qa", values)).unwrap();
        assert_eq!(v["decision"], "modified");
        assert_eq!(v["modifiedValues"]["plan"]["budget"], 10);
        assert_eq!(v["resolvedBy"], "qa");
    }
}
