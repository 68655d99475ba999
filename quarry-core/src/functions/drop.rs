use super::{Function, OneOrMany, parse_args};
use crate::dataset::Dataset;
use crate::error::{ConfigError, FrameError, FunctionError};
use crate::frame::Frame;
use crate::registry::DatasetRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DropArgs {
    columns: OneOrMany,
}

/// Removes columns. Names that are not present are ignored.
#[derive(Debug, Clone)]
pub struct DropFunction {
    columns: Vec<String>,
}

impl DropFunction {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: DropArgs = parse_args("drop", arguments)?;
    Ok(Arc::new(DropFunction::new(args.columns.into_vec())))
}

impl Function for DropFunction {
    fn tag(&self) -> &str {
        "drop"
    }

    fn apply(&self, input: Dataset, _registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let columns = self.columns.clone();
        Ok(input.map_frames(Arc::new(move |frame: Frame| {
            Ok::<_, FrameError>(frame.drop_columns(&columns))
        }))?)
    }
}
