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
struct FilterArgs {
    condition: String,
}

/// Keeps the rows for which a boolean expression is true.
#[derive(Debug, Clone)]
pub struct FilterFunction {
    condition: Arc<Expr>,
}

impl FilterFunction {
    pub fn new(condition: Expr) -> Self {
        Self {
            condition: Arc::new(condition),
        }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: FilterArgs = parse_args("filter", arguments)?;
    let condition = Expr::parse(&args.condition).map_err(|e| invalid_args("filter", e.to_string()))?;
    Ok(Arc::new(FilterFunction::new(condition)))
}

impl Function for FilterFunction {
    fn tag(&self) -> &str {
        "filter"
    }

    fn apply(&self, input: Dataset, _registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let condition = Arc::clone(&self.condition);
        Ok(input.map_frames(Arc::new(move |frame: Frame| condition.filter(&frame)))?)
    }
}
