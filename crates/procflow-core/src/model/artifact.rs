//! Artifacts de una corrida.
//!
//! Un artifact se direcciona por `(run_id, path, version)`. El `path` es un
//! identificador lógico (p.ej. `tasks/<effect_id>/input.json`); escribir de
//! nuevo el mismo path con contenido distinto crea una versión nueva, nunca
//! muta la anterior. `content_hash` es el hash canónico del contenido y sirve
//! para deduplicar y verificar integridad al leer.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Pista de content-type. Determina la extensión en el layout persistido.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Json,
    Markdown,
    Text,
    Yaml,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Json => "json",
            ArtifactFormat::Markdown => "md",
            ArtifactFormat::Text => "txt",
            ArtifactFormat::Yaml => "yaml",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactFormat::Json => "json",
            ArtifactFormat::Markdown => "markdown",
            ArtifactFormat::Text => "text",
            ArtifactFormat::Yaml => "yaml",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "json" => Some(ArtifactFormat::Json),
            "markdown" | "md" => Some(ArtifactFormat::Markdown),
            "text" | "txt" => Some(ArtifactFormat::Text),
            "yaml" | "yml" => Some(ArtifactFormat::Yaml),
            _ => None,
        }
    }

    /// Infere el formato a partir de la extensión del path (JSON por defecto).
    pub fn from_path(path: &str) -> Self {
        path.rsplit_once('.')
            .and_then(|(_, ext)| Self::parse(ext))
            .unwrap_or(ArtifactFormat::Json)
    }

    /// Los formatos textuales sólo aceptan contenido `Value::String`.
    pub fn is_textual(&self) -> bool {
        !matches!(self, ArtifactFormat::Json)
    }
}

/// Handle estable hacia una versión concreta de un artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub run_id: Uuid,
    pub path: String,
    pub version: u32,
    pub format: ArtifactFormat,
    pub content_hash: String,
}

impl ArtifactRef {
    /// Representación legible `path@vN`.
    pub fn location(&self) -> String {
        format!("{}@v{}", self.path, self.version)
    }
}

/// Artifact materializado (referencia + contenido).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub reference: ArtifactRef,
    pub content: Value,
}

/// Artifact tal como se expone en la frontera de revisión de un breakpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewArtifact {
    pub path: String,
    pub format: ArtifactFormat,
    pub content: Value,
}
