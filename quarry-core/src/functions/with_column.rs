use super::{Function, invalid_args, parse_args};
use crate::dataset::Dataset;
use crate::error::{ConfigError, FunctionError};
use crate::expr::Expr;
use crate::frame::Frame;
use crate::registry::DatasetRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WithColumnArgs {
    col_name: String,
    col_expr: String,
}

/// Adds a column computed from an expression, or replaces one with the same name.
#[derive(Debug, Clone)]
pub struct WithColumnFunction {
    column: String,
    expr: Arc<Expr>,
}

impl WithColumnFunction {
    pub fn new(column: impl Into<String>, expr: Expr) -> Self {
        Self {
            column: column.into(),
            expr: Arc::new(expr),
        }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: WithColumnArgs = parse_args("withColumn", arguments)?;
    if args.col_name.trim().is_empty() {
        return Err(invalid_args("withColumn", "'col_name' must not be empty"));
    }
    let expr = Expr::parse(&args.col_expr).map_err(|e| invalid_args("withColumn", e.to_string()))?;
    Ok(Arc::new(WithColumnFunction::new(args.col_name, expr)))
}

impl Function for WithColumnFunction {
    fn tag(&self) -> &str {
        "withColumn"
    }

    fn apply(&self, input: Dataset, _registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let column = self.column.clone();
        let expr = Arc::clone(&self.expr);
        Ok(input.map_frames(Arc::new(move |frame: Frame| expr.project_into(&frame, &column)))?)
    }
}
