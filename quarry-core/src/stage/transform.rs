use super::Stage;
use crate::dataset::ExecutionMode;
use crate::engine::Engine;
use crate::error::{ConfigError, StageError, TransformError};
use crate::functions::{Function, FunctionRegistry};
use crate::job::types::{StageKind, TransformConfig};
use crate::registry::DatasetRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Folds a sequence of functions over one upstream dataset.
#[derive(Debug, Clone)]
pub struct Transform {
    name: String,
    method: ExecutionMode,
    upstream: String,
    functions: Vec<Arc<dyn Function>>,
}

impl Transform {
    /// Resolve every function tag and validate its arguments.
    pub fn from_config(
        config: &TransformConfig,
        functions: &FunctionRegistry,
    ) -> Result<Self, ConfigError> {
        if config.functions.is_empty() {
            return Err(ConfigError::NoFunctions {
                stage: config.name.clone(),
            });
        }
        let resolved = config
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let position = i + 1;
                match functions.build(&f.function, &f.arguments) {
                    None => Err(ConfigError::UnsupportedFunction {
                        stage: config.name.clone(),
                        function: f.function.clone(),
                        position,
                    }),
                    Some(Err(e)) => Err(ConfigError::InvalidFunction {
                        stage: config.name.clone(),
                        position,
                        source: Box::new(e),
                    }),
                    Some(Ok(function)) => Ok(function),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            stage = %config.name,
            functions = resolved.len(),
            "Resolved transform functions"
        );
        if !config.options.is_empty() {
            warn!(
                stage = %config.name,
                options = ?config.options,
                "Transform options are not used by any function and will be ignored"
            );
        }
        Ok(Self {
            name: config.name.clone(),
            method: config.method,
            upstream: config.upstream_name.clone(),
            functions: resolved,
        })
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn functions(&self) -> &[Arc<dyn Function>] {
        &self.functions
    }
}

#[async_trait]
impl Stage for Transform {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn method(&self) -> ExecutionMode {
        self.method
    }

    fn upstreams(&self) -> Vec<&str> {
        let mut names = vec![self.upstream.as_str()];
        for function in &self.functions {
            for name in function.secondary_upstreams() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    async fn execute(
        &self,
        _engine: &dyn Engine,
        registry: &mut DatasetRegistry,
    ) -> Result<(), StageError> {
        let input = registry
            .get(&self.upstream)
            .map_err(TransformError::from)?
            .clone();
        if input.mode() != self.method {
            return Err(TransformError::ModeMismatch {
                upstream: self.upstream.clone(),
                expected: self.method,
                actual: input.mode(),
            }
            .into());
        }
        info!(
            stage = %self.name,
            upstream = %self.upstream,
            mode = %input.mode(),
            "Transforming"
        );

        let mut dataset = input;
        for (i, function) in self.functions.iter().enumerate() {
            dataset = function
                .apply(dataset, registry)
                .map_err(|source| TransformError::Function {
                    function: function.tag().to_string(),
                    position: i + 1,
                    source,
                })?;
        }

        let dataset = dataset.renamed(&self.name);
        registry
            .register(&self.name, dataset)
            .map_err(TransformError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::engine::LocalEngine;
    use crate::error::{FunctionError, RegistryError};
    use crate::frame::Frame;
    use crate::schema::{DataType, Schema};
    use serde_json::json;

    fn config(value: serde_json::Value) -> TransformConfig {
        serde_json::from_value(value).unwrap()
    }

    fn seeded() -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        let frame = Frame::new(
            Schema::of(&[("id", DataType::String), ("age", DataType::String)]),
            vec![vec![json!("1"), json!("41")], vec![json!("2"), json!("x")]],
        )
        .unwrap();
        registry.register("extract", Dataset::batch("extract", frame)).unwrap();
        registry
    }

    #[test]
    fn test_empty_functions_rejected() {
        let err = Transform::from_config(
            &config(json!({"name": "t", "upstream_name": "e", "functions": []})),
            &FunctionRegistry::with_builtins(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoFunctions { .. }));
    }

    #[test]
    fn test_unknown_function_position() {
        let err = Transform::from_config(
            &config(json!({
                "name": "t",
                "upstream_name": "e",
                "functions": [
                    {"function": "select", "arguments": {"columns": ["id"]}},
                    {"function": "pivot", "arguments": {}}
                ]
            })),
            &FunctionRegistry::with_builtins(),
        )
        .unwrap_err();
        match err {
            ConfigError::UnsupportedFunction {
                stage,
                function,
                position,
            } => {
                assert_eq!(stage, "t");
                assert_eq!(function, "pivot");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_upstreams_include_join_target() {
        let transform = Transform::from_config(
            &config(json!({
                "name": "t",
                "upstream_name": "left",
                "functions": [
                    {"function": "join", "arguments": {"other_upstream_name": "right", "on": "id"}}
                ]
            })),
            &FunctionRegistry::with_builtins(),
        )
        .unwrap();
        assert_eq!(transform.upstreams(), vec!["left", "right"]);
    }

    #[tokio::test]
    async fn test_execute_folds_and_registers() {
        let transform = Transform::from_config(
            &config(json!({
                "name": "transform",
                "upstream_name": "extract",
                "functions": [
                    {"function": "cast", "arguments": {"columns": [
                        {"column_name": "age", "cast_type": "integer"}
                    ]}},
                    {"function": "filter", "arguments": {"condition": "age IS NOT NULL"}}
                ]
            })),
            &FunctionRegistry::with_builtins(),
        )
        .unwrap();
        let mut registry = seeded();
        transform
            .execute(&LocalEngine::default(), &mut registry)
            .await
            .unwrap();
        assert_eq!(registry.names(), &["extract".to_string(), "transform".to_string()]);
        let out = registry.get("transform").unwrap();
        assert_eq!(out.name(), "transform");
        assert_eq!(out.frame().unwrap().num_rows(), 1);
        // Upstream is untouched.
        assert_eq!(registry.get("extract").unwrap().frame().unwrap().num_rows(), 2);
    }

    #[tokio::test]
    async fn test_failing_function_reports_position() {
        let transform = Transform::from_config(
            &config(json!({
                "name": "transform",
                "upstream_name": "extract",
                "functions": [
                    {"function": "drop", "arguments": {"columns": ["age"]}},
                    {"function": "select", "arguments": {"columns": ["age"]}}
                ]
            })),
            &FunctionRegistry::with_builtins(),
        )
        .unwrap();
        let mut registry = seeded();
        let err = transform
            .execute(&LocalEngine::default(), &mut registry)
            .await
            .unwrap_err();
        match err {
            StageError::Transform(TransformError::Function {
                function,
                position,
                source: FunctionError::Frame(_),
            }) => {
                assert_eq!(function, "select");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.contains("transform"));
    }

    #[tokio::test]
    async fn test_method_must_match_upstream_mode() {
        let transform = Transform::from_config(
            &config(json!({
                "name": "t",
                "method": "streaming",
                "upstream_name": "extract",
                "functions": [{"function": "dropDuplicates"}]
            })),
            &FunctionRegistry::with_builtins(),
        )
        .unwrap();
        let mut registry = seeded();
        let err = transform
            .execute(&LocalEngine::default(), &mut registry)
            .await
            .unwrap_err();
        match &err {
            StageError::Transform(TransformError::ModeMismatch {
                upstream,
                expected,
                actual,
            }) => {
                assert_eq!(upstream, "extract");
                assert_eq!(*expected, ExecutionMode::Streaming);
                assert_eq!(*actual, ExecutionMode::Batch);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.to_string(),
            "upstream 'extract' is a batch dataset but the stage method is streaming"
        );
        assert!(!registry.contains("t"));
    }

    #[tokio::test]
    async fn test_missing_upstream() {
        let transform = Transform::from_config(
            &config(json!({
                "name": "t",
                "upstream_name": "nowhere",
                "functions": [{"function": "dropDuplicates"}]
            })),
            &FunctionRegistry::with_builtins(),
        )
        .unwrap();
        let mut registry = seeded();
        let err = transform
            .execute(&LocalEngine::default(), &mut registry)
            .await
            .unwrap_err();
        assert!(err.is_unresolved_reference());
        assert_eq!(
            err.registry_error(),
            Some(&RegistryError::UnresolvedReference {
                name: "nowhere".into()
            })
        );
        assert_eq!(registry.len(), 1);
    }
}
