use super::{Function, OneOrMany, invalid_args, parse_args};
use crate::dataset::Dataset;
use crate::error::{ConfigError, FunctionError};
use crate::frame::Frame;
use crate::registry::DatasetRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectArgs {
    columns: OneOrMany,
}

/// Projects columns in the listed order.
#[derive(Debug, Clone)]
pub struct SelectFunction {
    columns: Vec<String>,
}

impl SelectFunction {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: SelectArgs = parse_args("select", arguments)?;
    let columns = args.columns.into_vec();
    if columns.is_empty() {
        return Err(invalid_args("select", "'columns' must not be empty"));
    }
    Ok(Arc::new(SelectFunction::new(columns)))
}

impl Function for SelectFunction {
    fn tag(&self) -> &str {
        "select"
    }

    fn apply(&self, input: Dataset, _registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let columns = self.columns.clone();
        Ok(input.map_frames(Arc::new(move |frame: Frame| frame.select(&columns)))?)
    }
}
