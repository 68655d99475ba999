//! Transform functions and the tag → factory table used to resolve them.
//!
//! Every function is resolved and has its arguments validated when a job is
//! parsed; applying it later only touches data.

mod birth_year;
mod cast;
mod dedup;
mod drop;
mod filter;
mod join;
mod select;
mod with_column;

pub use birth_year::CalculateBirthYear;
pub use cast::CastFunction;
pub use dedup::DropDuplicatesFunction;
pub use drop::DropFunction;
pub use filter::FilterFunction;
pub use join::JoinFunction;
pub use select::SelectFunction;
pub use with_column::WithColumnFunction;

use crate::dataset::Dataset;
use crate::error::{ConfigError, FunctionError};
use crate::registry::DatasetRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A dataset → dataset operation configured by a job document.
pub trait Function: Send + Sync + fmt::Debug {
    /// The tag this function was resolved from.
    fn tag(&self) -> &str;

    /// Registry names this function reads in addition to its input.
    fn secondary_upstreams(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Produce a new dataset. The registry is read-only.
    fn apply(&self, input: Dataset, registry: &DatasetRegistry) -> Result<Dataset, FunctionError>;
}

/// Builds a function from its `arguments` value, validating them.
pub type FunctionFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn Function>, ConfigError> + Send + Sync>;

/// Maps function tags to factories.
pub struct FunctionRegistry {
    factories: HashMap<String, FunctionFactory>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in function.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, fn(&Value) -> Result<Arc<dyn Function>, ConfigError>); 8] = [
            ("cast", cast::build),
            ("drop", drop::build),
            ("dropDuplicates", dedup::build),
            ("filter", filter::build),
            ("join", join::build),
            ("select", select::build),
            ("withColumn", with_column::build),
            ("calculate_birth_year", birth_year::build),
        ];
        for (tag, build) in builtins {
            registry.factories.insert(tag.to_string(), Arc::new(build));
        }
        registry
    }

    /// Add a custom function. Fails if the tag is taken.
    pub fn register(
        &mut self,
        tag: &str,
        factory: impl Fn(&Value) -> Result<Arc<dyn Function>, ConfigError> + Send + Sync + 'static,
    ) -> Result<(), ConfigError> {
        if self.factories.contains_key(tag) {
            return Err(ConfigError::DuplicateFunction {
                tag: tag.to_string(),
            });
        }
        debug!(function = %tag, "Registering function");
        self.factories.insert(tag.to_string(), Arc::new(factory));
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Resolve a tag and build the function. `None` if the tag is unknown.
    pub fn build(&self, tag: &str, arguments: &Value) -> Option<Result<Arc<dyn Function>, ConfigError>> {
        self.factories.get(tag).map(|factory| factory(arguments))
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

/// Deserialize a function's arguments; a missing `arguments` value is an empty object.
pub(crate) fn parse_args<T: DeserializeOwned>(function: &str, arguments: &Value) -> Result<T, ConfigError> {
    let value = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments.clone()
    };
    serde_json::from_value(value).map_err(|e| ConfigError::InvalidArguments {
        function: function.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn invalid_args(function: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidArguments {
        function: function.to_string(),
        reason: reason.into(),
    }
}

/// A column list given either as a single name or as a list.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub(crate) fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::dataset::Dataset;
    use crate::frame::Frame;
    use crate::schema::{DataType, Schema};
    use serde_json::{Value, json};

    pub fn people() -> Dataset {
        Dataset::batch(
            "people",
            Frame::new(
                Schema::of(&[
                    ("id", DataType::String),
                    ("name", DataType::String),
                    ("age", DataType::String),
                ]),
                vec![
                    vec![json!("1"), json!("Alice"), json!("30")],
                    vec![json!("2"), json!("Bob"), json!("n/a")],
                    vec![json!("1"), json!("Alice"), json!("30")],
                    vec![json!("3"), json!("Carol"), Value::Null],
                ],
            )
            .unwrap(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_tags() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.tags(),
            vec![
                "calculate_birth_year",
                "cast",
                "drop",
                "dropDuplicates",
                "filter",
                "join",
                "select",
                "withColumn"
            ]
        );
        assert!(registry.build("explode", &json!({})).is_none());
    }

    #[test]
    fn test_register_custom_and_duplicate() {
        let mut registry = FunctionRegistry::with_builtins();
        registry
            .register("identity_select", |args| select::build(args))
            .unwrap();
        assert!(registry.contains("identity_select"));
        let err = registry.register("cast", cast::build).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateFunction { .. }));
    }

    #[test]
    fn test_arguments_validated_at_build() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.build("select", &json!({"cols": ["a"]})).unwrap();
        assert!(matches!(result, Err(ConfigError::InvalidArguments { .. })));
    }
}
