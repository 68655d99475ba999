//! Typed schema model for tabular data.
//!
//! Schemas use the Spark-compatible JSON shape
//! `{"type":"struct","fields":[{"name":..,"type":..,"nullable":..,"metadata":{}}]}` so a schema
//! written by a load stage can be fed straight back into an extract stage.

use crate::error::SchemaError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Column data types understood by schemas, casts and expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Integer,
    Long,
    Short,
    Byte,
    Double,
    Float,
    Boolean,
    Date,
    Timestamp,
}

impl DataType {
    /// The canonical (Spark) type name.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Long => "long",
            DataType::Short => "short",
            DataType::Byte => "byte",
            DataType::Double => "double",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Long | DataType::Short | DataType::Byte
        )
    }

    pub fn is_fractional(&self) -> bool {
        matches!(self, DataType::Double | DataType::Float)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integral() || self.is_fractional()
    }

    fn integral_range(&self) -> (i64, i64) {
        match self {
            DataType::Byte => (i8::MIN as i64, i8::MAX as i64),
            DataType::Short => (i16::MIN as i64, i16::MAX as i64),
            DataType::Integer => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        }
    }

    /// Strictly parse raw text (as read from a file) into a value of this type.
    ///
    /// Returns `None` when the text is not a valid literal of the type.
    pub fn parse_str(&self, raw: &str) -> Option<Value> {
        let text = raw.trim();
        match self {
            DataType::String => Some(Value::String(raw.to_string())),
            DataType::Integer | DataType::Long | DataType::Short | DataType::Byte => {
                let parsed = text.parse::<i64>().ok()?;
                self.in_range(parsed).then(|| Value::from(parsed))
            }
            DataType::Double | DataType::Float => {
                let parsed = text.parse::<f64>().ok()?;
                Number::from_f64(parsed).map(Value::Number)
            }
            DataType::Boolean => {
                if text.eq_ignore_ascii_case("true") {
                    Some(Value::Bool(true))
                } else if text.eq_ignore_ascii_case("false") {
                    Some(Value::Bool(false))
                } else {
                    None
                }
            }
            DataType::Date => parse_date(text).map(|d| Value::String(d.format(DATE_FORMAT).to_string())),
            DataType::Timestamp => {
                parse_timestamp(text).map(|t| Value::String(t.format(TIMESTAMP_FORMAT).to_string()))
            }
        }
    }

    /// Strictly conform an already-typed value (e.g. from JSON input) to this type.
    ///
    /// `Null` always conforms. Returns `None` on a type violation.
    pub fn conform(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (_, Value::String(s)) => self.parse_str(s),
            (DataType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (DataType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (t, Value::Number(n)) if t.is_integral() => {
                let i = n.as_i64()?;
                t.in_range(i).then(|| Value::from(i))
            }
            (t, Value::Number(n)) if t.is_fractional() => {
                n.as_f64().and_then(Number::from_f64).map(Value::Number)
            }
            (DataType::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
            (DataType::String, other) => Some(Value::String(other.to_string())),
            _ => None,
        }
    }

    /// Cast a value to this type with non-ANSI semantics: a value that cannot be
    /// represented becomes `Null` instead of failing.
    pub fn cast(&self, value: &Value) -> Value {
        if let Some(v) = self.conform(value) {
            return v;
        }
        match (self, value) {
            (t, Value::String(s)) if t.is_integral() => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|f| t.truncate(f))
                .unwrap_or(Value::Null),
            (t, Value::Number(n)) if t.is_integral() => {
                n.as_f64().and_then(|f| t.truncate(f)).unwrap_or(Value::Null)
            }
            (t, Value::Bool(b)) if t.is_numeric() => {
                if t.is_integral() {
                    Value::from(*b as i64)
                } else {
                    Number::from_f64(if *b { 1.0 } else { 0.0 })
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            (DataType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "y" | "yes" | "1" => Value::Bool(true),
                "f" | "n" | "no" | "0" => Value::Bool(false),
                _ => Value::Null,
            },
            (DataType::Boolean, Value::Number(n)) => n
                .as_f64()
                .map(|f| Value::Bool(f != 0.0))
                .unwrap_or(Value::Null),
            (DataType::Date, Value::String(s)) => parse_timestamp(s.trim())
                .map(|t| Value::String(t.date().format(DATE_FORMAT).to_string()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn in_range(&self, value: i64) -> bool {
        let (min, max) = self.integral_range();
        value >= min && value <= max
    }

    fn truncate(&self, value: f64) -> Option<Value> {
        if !value.is_finite() {
            return None;
        }
        let truncated = value.trunc();
        let (min, max) = self.integral_range();
        (truncated >= min as f64 && truncated <= max as f64).then(|| Value::from(truncated as i64))
    }

    /// The data type of a literal JSON value, as used for inference and expression typing.
    pub fn of_value(value: &Value) -> Option<DataType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(DataType::Long),
            Value::Number(_) => Some(DataType::Double),
            _ => Some(DataType::String),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = SchemaError;

    /// Parses canonical names as well as the common SQL aliases accepted by casts.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "varchar" => DataType::String,
            "integer" | "int" => DataType::Integer,
            "long" | "bigint" => DataType::Long,
            "short" | "smallint" => DataType::Short,
            "byte" | "tinyint" => DataType::Byte,
            "double" => DataType::Double,
            "float" | "real" => DataType::Float,
            "boolean" | "bool" => DataType::Boolean,
            "date" => DataType::Date,
            "timestamp" => DataType::Timestamp,
            _ => {
                return Err(SchemaError::UnsupportedType {
                    name: s.to_string(),
                });
            }
        };
        Ok(ty)
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).ok()
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|t| t.naive_utc()))
        .or_else(|| parse_date(text).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

// ---------------------------------------------------------------------------
// Field / Schema
// ---------------------------------------------------------------------------

/// A single named, typed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// An ordered list of fields. Column names may repeat (e.g. after a join);
/// lookups by a repeated name are ambiguous.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StructRepr", into = "StructRepr")]
pub struct Schema {
    fields: Vec<Field>,
}

#[derive(Serialize, Deserialize)]
struct StructRepr {
    #[serde(rename = "type")]
    kind: String,
    fields: Vec<Field>,
}

impl TryFrom<StructRepr> for Schema {
    type Error = SchemaError;

    fn try_from(repr: StructRepr) -> Result<Self, Self::Error> {
        if repr.kind != "struct" {
            return Err(SchemaError::Invalid {
                message: format!("expected type 'struct', found '{}'", repr.kind),
            });
        }
        Ok(Schema::new(repr.fields))
    }
}

impl From<Schema> for StructRepr {
    fn from(schema: Schema) -> Self {
        StructRepr {
            kind: "struct".to_string(),
            fields: schema.fields,
        }
    }
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Convenience constructor from `(name, type)` pairs.
    pub fn of(columns: &[(&str, DataType)]) -> Self {
        Self::new(
            columns
                .iter()
                .map(|(name, ty)| Field::new(*name, *ty))
                .collect(),
        )
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Positions of every field with the given name.
    pub fn positions(&self, name: &str) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name == name)
            .map(|(i, _)| i)
            .collect()
    }

    /// Position of the first field with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Parse a schema from an inline JSON object.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        if !value.is_object() {
            return Err(SchemaError::Invalid {
                message: format!("expected an object, found {value}"),
            });
        }
        serde_json::from_value(value.clone()).map_err(|e| SchemaError::Invalid {
            message: e.to_string(),
        })
    }

    /// Parse a schema from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(text).map_err(|e| SchemaError::Invalid {
            message: e.to_string(),
        })
    }

    /// Load a schema from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Resolve a schema reference from a job document: an inline object, a JSON
    /// string, or a path to a JSON file.
    pub fn from_reference(reference: &Value) -> Result<Self, SchemaError> {
        match reference {
            Value::Object(_) => Self::from_value(reference),
            Value::String(s) if s.trim_start().starts_with('{') => Self::from_json_str(s),
            Value::String(s) => Self::from_file(Path::new(s)),
            other => Err(SchemaError::Invalid {
                message: format!("expected an object, JSON string or file path, found {other}"),
            }),
        }
    }

    pub fn to_pretty_json(&self) -> String {
        // Serializing plain strings, bools and maps cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Accumulates the narrowest type that fits every observed value of a column.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeInference {
    current: Option<DataType>,
}

impl TypeInference {
    /// Observe raw text. Nulls must be filtered out by the caller.
    pub fn observe_str(&mut self, raw: &str) {
        let text = raw.trim();
        let observed = if let Ok(i) = text.parse::<i64>() {
            if DataType::Integer.in_range(i) {
                DataType::Integer
            } else {
                DataType::Long
            }
        } else if text.parse::<f64>().is_ok_and(f64::is_finite) {
            DataType::Double
        } else if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
            DataType::Boolean
        } else {
            DataType::String
        };
        self.merge(observed);
    }

    pub fn observe_value(&mut self, value: &Value) {
        if let Some(observed) = DataType::of_value(value) {
            self.merge(observed);
        }
    }

    fn merge(&mut self, observed: DataType) {
        use DataType::*;
        self.current = Some(match (self.current, observed) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(Integer), Long) | (Some(Long), Integer) => Long,
            (Some(a), b) if a.is_numeric() && b.is_numeric() => Double,
            _ => String,
        });
    }

    pub fn finish(self) -> DataType {
        self.current.unwrap_or(DataType::String)
    }
}
