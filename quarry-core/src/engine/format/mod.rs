//! Data format tags and their codecs.
//!
//! A codec turns file text into a [`RawTable`] (syntax only) and a [`Frame`]
//! back into file text. Typing a raw table, whether against a declared schema or
//! by inference, happens once in [`materialize`] for every format.

mod delimited;
mod json_lines;

pub use delimited::CsvCodec;
pub use json_lines::JsonCodec;

use crate::error::EngineError;
use crate::frame::{Frame, Row};
use crate::options::Options;
use crate::schema::{DataType, Field, Schema, TypeInference};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Supported file formats, keyed by the `data_format` tag of a job document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Csv,
    Json,
}

impl DataFormat {
    pub fn tag(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.tag()
    }

    /// The codec implementing this format.
    pub fn codec(&self) -> &'static dyn Codec {
        match self {
            DataFormat::Csv => &CsvCodec,
            DataFormat::Json => &JsonCodec,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "json" | "jsonl" | "ndjson" => Ok(DataFormat::Json),
            _ => Err(format!("unsupported data format '{s}'")),
        }
    }
}

/// How values map onto columns in a raw table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Values are matched to schema fields by position (CSV).
    Positional,
    /// Values are matched to schema fields by column name (JSON).
    Named,
}

/// Untyped records decoded from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub layout: Layout,
    /// Whether values are raw text that may be parsed into other types.
    pub textual: bool,
}

/// Encoder/decoder for one file format.
pub trait Codec: Send + Sync {
    /// Decode file text into untyped records.
    fn decode(&self, text: &str, options: &Options, path: &Path) -> Result<RawTable, EngineError>;

    /// Encode a frame as file text.
    fn encode(&self, frame: &Frame, options: &Options) -> Result<String, EngineError>;
}

/// Handling of records that violate the declared schema (the `mode` reader option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    FailFast,
    Permissive,
    DropMalformed,
}

impl ReadMode {
    pub fn from_options(options: &Options) -> Result<Self, EngineError> {
        match options.get("mode") {
            None => Ok(ReadMode::FailFast),
            Some(v) => match v.to_ascii_uppercase().as_str() {
                "FAILFAST" => Ok(ReadMode::FailFast),
                "PERMISSIVE" => Ok(ReadMode::Permissive),
                "DROPMALFORMED" => Ok(ReadMode::DropMalformed),
                _ => Err(EngineError::InvalidOption {
                    key: "mode".into(),
                    value: v.to_string(),
                    expected: "FAILFAST, PERMISSIVE or DROPMALFORMED",
                }),
            },
        }
    }
}

/// Type raw tables into a single frame.
///
/// With a schema, every value must conform to its field (handled per
/// [`ReadMode`]). Without one, columns are the union of all tables' columns and
/// types are inferred: always for typed input, and for text only with
/// `inferSchema=true` (otherwise every column is a string).
pub fn materialize(
    tables: Vec<(PathBuf, RawTable)>,
    schema: Option<&Schema>,
    options: &Options,
) -> Result<Frame, EngineError> {
    match schema {
        Some(schema) => conform_tables(tables, schema, ReadMode::from_options(options)?),
        None => {
            let infer = options.get_bool("inferSchema")?.unwrap_or(false);
            infer_tables(tables, infer)
        }
    }
}

fn conform_tables(
    tables: Vec<(PathBuf, RawTable)>,
    schema: &Schema,
    mode: ReadMode,
) -> Result<Frame, EngineError> {
    let mut rows = Vec::new();
    for (path, table) in tables {
        let lookup: Vec<Option<usize>> = match table.layout {
            Layout::Positional => (0..schema.len()).map(Some).collect(),
            Layout::Named => schema
                .fields()
                .iter()
                .map(|f| table.columns.iter().position(|c| *c == f.name))
                .collect(),
        };
        for (line, raw) in table.rows.into_iter().enumerate() {
            let mut problem = None;
            if table.layout == Layout::Positional && raw.len() != schema.len() {
                problem = Some(format!(
                    "record {} has {} values, schema has {} fields",
                    line + 1,
                    raw.len(),
                    schema.len()
                ));
            }
            let mut row = Vec::with_capacity(schema.len());
            for (field, index) in schema.fields().iter().zip(&lookup) {
                let value = index.and_then(|i| raw.get(i)).unwrap_or(&Value::Null);
                match conform_value(field, value) {
                    Ok(v) => row.push(v),
                    Err(message) => {
                        problem.get_or_insert(format!("record {}: {message}", line + 1));
                        row.push(Value::Null);
                    }
                }
            }
            match (problem, mode) {
                (None, _) | (Some(_), ReadMode::Permissive) => rows.push(row),
                (Some(message), ReadMode::FailFast) => {
                    return Err(EngineError::SchemaViolation { path, message });
                }
                (Some(message), ReadMode::DropMalformed) => {
                    warn!(path = %path.display(), %message, "Dropping malformed record");
                }
            }
        }
    }
    Ok(Frame::new(schema.clone(), rows)?)
}

fn conform_value(field: &Field, value: &Value) -> Result<Value, String> {
    if value.is_null() {
        return if field.nullable {
            Ok(Value::Null)
        } else {
            Err(format!("null value in non-nullable field '{}'", field.name))
        };
    }
    field.data_type.conform(value).ok_or_else(|| {
        format!(
            "value {value} in field '{}' is not a valid {}",
            field.name, field.data_type
        )
    })
}

fn infer_tables(tables: Vec<(PathBuf, RawTable)>, infer: bool) -> Result<Frame, EngineError> {
    let mut columns: Vec<String> = Vec::new();
    let mut all_named = !tables.is_empty();
    for (_, table) in &tables {
        all_named &= table.layout == Layout::Named;
        for c in &table.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }
    if all_named {
        columns.sort();
    }

    let mut rows: Vec<Row> = Vec::new();
    let mut textual = false;
    for (_, table) in tables {
        textual |= table.textual;
        let lookup: Vec<Option<usize>> = columns
            .iter()
            .map(|c| table.columns.iter().position(|t| t == c))
            .collect();
        for raw in table.rows {
            rows.push(
                lookup
                    .iter()
                    .map(|i| i.and_then(|i| raw.get(i)).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }
    }

    let mut fields = Vec::with_capacity(columns.len());
    for (index, name) in columns.into_iter().enumerate() {
        let data_type = if textual && !infer {
            DataType::String
        } else {
            let mut inference = TypeInference::default();
            for row in &rows {
                match &row[index] {
                    Value::Null => {}
                    Value::String(s) if textual => inference.observe_str(s),
                    other => inference.observe_value(other),
                }
            }
            inference.finish()
        };
        for row in &mut rows {
            let value = std::mem::take(&mut row[index]);
            row[index] = data_type.conform(&value).unwrap_or(Value::Null);
        }
        fields.push(Field::new(name, data_type));
    }
    Ok(Frame::new(Schema::new(fields), rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn csv_table(rows: Vec<Vec<&str>>) -> (PathBuf, RawTable) {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        (
            PathBuf::from("in.csv"),
            RawTable {
                columns: (0..width).map(|i| format!("_c{i}")).collect(),
                rows: rows
                    .into_iter()
                    .map(|r| r.into_iter().map(|v| json!(v)).collect())
                    .collect(),
                layout: Layout::Positional,
                textual: true,
            },
        )
    }

    #[test]
    fn test_format_tags() {
        assert_eq!("CSV".parse::<DataFormat>().unwrap(), DataFormat::Csv);
        assert_eq!("json".parse::<DataFormat>().unwrap(), DataFormat::Json);
        assert!("parquet".parse::<DataFormat>().is_err());
    }

    #[test]
    fn test_text_without_inference_is_string() {
        let frame = materialize(vec![csv_table(vec![vec!["1", "x"]])], None, &Options::new()).unwrap();
        assert_eq!(frame.column_names(), vec!["_c0", "_c1"]);
        assert_eq!(frame.schema().fields()[0].data_type, DataType::String);
    }

    #[test]
    fn test_text_with_inference() {
        let options = Options::new().with("inferSchema", "true");
        let frame = materialize(
            vec![csv_table(vec![vec!["1", "2.5", "true"], vec!["2", "3", "false"]])],
            None,
            &options,
        )
        .unwrap();
        let types: Vec<DataType> = frame.schema().fields().iter().map(|f| f.data_type).collect();
        assert_eq!(types, vec![DataType::Integer, DataType::Double, DataType::Boolean]);
        assert_eq!(frame.rows()[1], vec![json!(2), json!(3.0), json!(false)]);
    }

    #[test]
    fn test_read_modes_with_schema() {
        let schema = Schema::of(&[("id", DataType::Integer), ("name", DataType::String)]);
        let tables = || vec![csv_table(vec![vec!["1", "a"], vec!["oops", "b"], vec!["3"]])];

        let err = materialize(tables(), Some(&schema), &Options::new()).unwrap_err();
        assert!(matches!(err, EngineError::SchemaViolation { .. }));

        let permissive = materialize(
            tables(),
            Some(&schema),
            &Options::new().with("mode", "permissive"),
        )
        .unwrap();
        assert_eq!(permissive.num_rows(), 3);
        assert_eq!(permissive.rows()[1], vec![Value::Null, json!("b")]);
        assert_eq!(permissive.rows()[2], vec![json!(3), Value::Null]);

        let dropped = materialize(
            tables(),
            Some(&schema),
            &Options::new().with("mode", "DROPMALFORMED"),
        )
        .unwrap();
        assert_eq!(dropped.num_rows(), 1);

        assert!(materialize(tables(), Some(&schema), &Options::new().with("mode", "lenient")).is_err());
    }

    #[test]
    fn test_named_tables_union_sorted() {
        let a = (
            PathBuf::from("a.json"),
            RawTable {
                columns: vec!["name".into(), "id".into()],
                rows: vec![vec![json!("x"), json!(1)]],
                layout: Layout::Named,
                textual: false,
            },
        );
        let b = (
            PathBuf::from("b.json"),
            RawTable {
                columns: vec!["age".into()],
                rows: vec![vec![json!(2.5)]],
                layout: Layout::Named,
                textual: false,
            },
        );
        let frame = materialize(vec![a, b], None, &Options::new()).unwrap();
        assert_eq!(frame.column_names(), vec!["age", "id", "name"]);
        assert_eq!(frame.schema().fields()[1].data_type, DataType::Long);
        assert_eq!(frame.rows()[1], vec![json!(2.5), Value::Null, Value::Null]);
    }
}
