//! Reader and writer options passed opaquely from a job document to the engine.

use crate::error::EngineError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// String-keyed options. Primitive values (strings, numbers, booleans) are
/// normalised to strings; keys are looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Options(BTreeMap<String, String>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// First present key among aliases.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, EngineError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(v) => Err(invalid(key, v, "true or false")),
        }
    }

    /// A single-byte option such as a delimiter or quote character.
    pub fn get_byte(&self, keys: &[&str]) -> Result<Option<u8>, EngineError> {
        let Some(value) = self.get_any(keys) else {
            return Ok(None);
        };
        let unescaped = match value {
            "\\t" => "\t",
            other => other,
        };
        match unescaped.as_bytes() {
            [b] => Ok(Some(*b)),
            _ => Err(invalid(keys[0], value, "a single ASCII character")),
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>, EngineError> {
        self.get(key)
            .map(|v| v.trim().parse().map_err(|_| invalid(key, v, "a non-negative integer")))
            .transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn invalid(key: &str, value: &str, expected: &'static str) -> EngineError {
    EngineError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    }
}

impl<'de> Deserialize<'de> for Options {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut options = BTreeMap::new();
        for (key, value) in raw {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "option '{key}' must be a string, number or boolean, found {other}"
                    )));
                }
            };
            options.insert(key, text);
        }
        Ok(Options(options))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Options(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitives_normalised_to_strings() {
        let options: Options = serde_json::from_value(json!({
            "header": true,
            "maxFilesPerTrigger": 5,
            "sep": ";",
            "unused": null
        }))
        .unwrap();
        assert_eq!(options.get("header"), Some("true"));
        assert_eq!(options.get("maxfilespertrigger"), Some("5"));
        assert_eq!(options.len(), 3);
    }

    #[test]
    fn test_nested_values_rejected() {
        let result: Result<Options, _> = serde_json::from_value(json!({"nested": {"a": 1}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_typed_getters() {
        let options = Options::new()
            .with("inferSchema", "TRUE")
            .with("delimiter", "\\t")
            .with("quote", "ab")
            .with("limit", "x");
        assert_eq!(options.get_bool("inferschema").unwrap(), Some(true));
        assert_eq!(options.get_bool("header").unwrap(), None);
        assert_eq!(options.get_byte(&["sep", "delimiter"]).unwrap(), Some(b'\t'));
        assert!(options.get_byte(&["quote"]).is_err());
        assert!(options.get_usize("limit").is_err());
    }
}
