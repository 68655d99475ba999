use super::{Codec, Layout, ReadMode, RawTable};
use crate::error::EngineError;
use crate::frame::Frame;
use crate::options::Options;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// JSON lines (one object per line). A file whose content starts with `[` is
/// read as a single JSON array of objects. Null fields are omitted on write.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, text: &str, options: &Options, path: &Path) -> Result<RawTable, EngineError> {
        let mode = ReadMode::from_options(options)?;
        let malformed = |message: String| -> Result<(), EngineError> {
            if mode == ReadMode::FailFast {
                return Err(EngineError::Decode {
                    path: path.to_path_buf(),
                    message,
                });
            }
            warn!(path = %path.display(), %message, "Skipping malformed JSON record");
            Ok(())
        };

        let mut records = Vec::new();
        if text.trim_start().starts_with('[') {
            let values: Vec<Value> = serde_json::from_str(text).map_err(|e| EngineError::Decode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            records.extend(values);
        } else {
            for (number, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => records.push(value),
                    Err(e) => malformed(format!("line {}: {e}", number + 1))?,
                }
            }
        }

        let mut objects = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match record {
                Value::Object(map) => objects.push(map),
                other => malformed(format!("record {} is not an object: {other}", index + 1))?,
            }
        }

        let columns: Vec<String> = objects
            .iter()
            .flat_map(|o| o.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let rows = objects
            .into_iter()
            .map(|mut o| {
                columns
                    .iter()
                    .map(|c| o.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(RawTable {
            columns,
            rows,
            layout: Layout::Named,
            textual: false,
        })
    }

    fn encode(&self, frame: &Frame, _options: &Options) -> Result<String, EngineError> {
        let names = frame.column_names();
        let mut out = String::new();
        for row in frame.rows() {
            let mut line = String::from("{");
            let mut first = true;
            for (name, value) in names.iter().zip(row) {
                if value.is_null() {
                    continue;
                }
                if !first {
                    line.push(',');
                }
                first = false;
                let key = serde_json::to_string(name).map_err(|e| EngineError::Encode {
                    message: e.to_string(),
                })?;
                let value = serde_json::to_string(value).map_err(|e| EngineError::Encode {
                    message: e.to_string(),
                })?;
                line.push_str(&key);
                line.push(':');
                line.push_str(&value);
            }
            line.push('}');
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}
