//! Job document records and lifecycle enums.

use crate::dataset::ExecutionMode;
use crate::engine::WriteMode;
use crate::options::Options;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// The three stage kinds, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Extract,
    Transform,
    Load,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Extract => f.write_str("extract"),
            StageKind::Transform => f.write_str("transform"),
            StageKind::Load => f.write_str("load"),
        }
    }
}

impl StageKind {
    /// Key of this kind's section in a job document.
    pub fn section(&self) -> &'static str {
        match self {
            StageKind::Extract => "extracts",
            StageKind::Transform => "transforms",
            StageKind::Load => "loads",
        }
    }
}

/// Lifecycle of a [`super::Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Configured,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl JobStatus {
    /// The status while stages of `kind` run.
    pub fn running(kind: StageKind) -> Self {
        match kind {
            StageKind::Extract => JobStatus::Extracting,
            StageKind::Transform => JobStatus::Transforming,
            StageKind::Load => JobStatus::Loading,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Configured => "configured",
            JobStatus::Extracting => "extracting",
            JobStatus::Transforming => "transforming",
            JobStatus::Loading => "loading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Serialization of a job document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick a format from a file extension (`json`, `yaml`, `yml`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(DocumentFormat::Json),
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Document records
// ---------------------------------------------------------------------------

/// A whole job document. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDocument {
    #[serde(default)]
    pub extracts: Vec<ExtractConfig>,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub loads: Vec<LoadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractConfig {
    pub name: String,
    #[serde(default)]
    pub method: ExecutionMode,
    pub data_format: String,
    pub location: PathBuf,
    /// Path to a schema file, a JSON string, or an inline schema object.
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    pub name: String,
    #[serde(default)]
    pub method: ExecutionMode,
    #[serde(deserialize_with = "single_upstream")]
    pub upstream_name: String,
    pub functions: Vec<FunctionConfig>,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionConfig {
    pub function: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    pub name: String,
    #[serde(default)]
    pub method: ExecutionMode,
    #[serde(deserialize_with = "single_upstream")]
    pub upstream_name: String,
    pub data_format: String,
    pub location: PathBuf,
    /// Defaults to `errorifexists` for batch and `append` for streaming.
    #[serde(default)]
    pub mode: Option<WriteMode>,
    #[serde(default)]
    pub schema_location: Option<PathBuf>,
    #[serde(default)]
    pub options: Options,
}

/// Accept `"name"` or `["name"]`.
fn single_upstream<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Upstream {
        One(String),
        Many(Vec<String>),
    }

    match Upstream::deserialize(deserializer)? {
        Upstream::One(name) => Ok(name),
        Upstream::Many(mut names) if names.len() == 1 => Ok(names.remove(0)),
        Upstream::Many(names) => Err(serde::de::Error::custom(format!(
            "expected exactly one upstream_name, got {}",
            names.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Transform.to_string(), "transform");
        assert_eq!(JobStatus::running(StageKind::Load), JobStatus::Loading);
    }

    #[test]
    fn test_document_defaults() {
        let doc: JobDocument = serde_json::from_value(json!({
            "extracts": [{"name": "e", "data_format": "csv", "location": "/in"}]
        }))
        .unwrap();
        assert_eq!(doc.extracts[0].method, ExecutionMode::Batch);
        assert!(doc.transforms.is_empty());
        assert!(doc.loads.is_empty());
    }

    #[test]
    fn test_upstream_name_list_of_one() {
        let t: TransformConfig = serde_json::from_value(json!({
            "name": "t",
            "upstream_name": ["e"],
            "functions": [{"function": "select", "arguments": {"columns": ["a"]}}]
        }))
        .unwrap();
        assert_eq!(t.upstream_name, "e");

        let two = serde_json::from_value::<TransformConfig>(json!({
            "name": "t",
            "upstream_name": ["e", "f"],
            "functions": []
        }));
        assert!(two.is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_json::from_value::<LoadConfig>(json!({
            "name": "l",
            "upstream_name": "t",
            "data_format": "csv",
            "location": "/out",
            "compression": "gzip"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_document_format_extension() {
        assert_eq!(DocumentFormat::from_extension("YML"), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::from_extension("toml"), None);
    }
}
