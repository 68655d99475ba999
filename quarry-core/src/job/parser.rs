//! Reading job documents from text and files.

use super::types::{DocumentFormat, JobDocument, StageKind};
use crate::error::ConfigError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::LazyLock;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid variable regex")
});

/// Replace every `${NAME}` with `lookup(NAME)`. Fails listing every name the
/// lookup could not resolve.
pub fn substitute_vars(
    text: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();
    let replaced = VAR_PATTERN.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });
    if missing.is_empty() {
        Ok(replaced.into_owned())
    } else {
        Err(ConfigError::EnvVarMissing { vars: missing })
    }
}

/// [`substitute_vars`] against the process environment.
pub fn substitute_env_vars(text: &str) -> Result<String, ConfigError> {
    substitute_vars(text, |name| std::env::var(name).ok())
}

/// Parse document text into a JSON value.
pub fn parse_value(text: &str, format: DocumentFormat) -> Result<Value, ConfigError> {
    if format == DocumentFormat::Yaml && text.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let parsed = match format {
        DocumentFormat::Json => serde_json::from_str::<Value>(text).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_str::<Value>(text).map_err(|e| e.to_string()),
    };
    let value = parsed.map_err(|message| ConfigError::ParseError { message })?;
    // An empty YAML file is a document with no stages.
    Ok(if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value
    })
}

/// Deserialize the records of a job document.
///
/// Records are decoded one at a time so a malformed record is reported with
/// its section and position.
pub fn parse_document(value: &Value) -> Result<JobDocument, ConfigError> {
    let Value::Object(sections) = value else {
        return Err(ConfigError::ParseError {
            message: "a job document must be a mapping of extracts, transforms and loads".into(),
        });
    };
    if let Some(unknown) = sections
        .keys()
        .find(|k| !matches!(k.as_str(), "extracts" | "transforms" | "loads"))
    {
        return Err(ConfigError::ParseError {
            message: format!(
                "unknown section '{unknown}' (expected extracts, transforms or loads)"
            ),
        });
    }
    Ok(JobDocument {
        extracts: parse_section(sections, StageKind::Extract)?,
        transforms: parse_section(sections, StageKind::Transform)?,
        loads: parse_section(sections, StageKind::Load)?,
    })
}

fn parse_section<T: DeserializeOwned>(
    sections: &Map<String, Value>,
    kind: StageKind,
) -> Result<Vec<T>, ConfigError> {
    let key = kind.section();
    let records = match sections.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(records)) => records,
        Some(_) => {
            return Err(ConfigError::ParseError {
                message: format!("'{key}' must be a list of stage records"),
            });
        }
    };
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            serde_json::from_value(record.clone()).map_err(|e| ConfigError::InvalidStage {
                kind,
                index: i + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Read a job file, picking the format from its extension.
pub fn read_document(path: &Path, substitute: bool) -> Result<Value, ConfigError> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentFormat::from_extension)
        .ok_or_else(|| ConfigError::UnsupportedFileType {
            path: path.to_path_buf(),
        })?;
    if !path.is_file() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    let text = if substitute {
        substitute_env_vars(&text)?
    } else {
        text
    };
    parse_value(&text, format)
}
