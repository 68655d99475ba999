use super::{Function, invalid_args, parse_args};
use crate::dataset::Dataset;
use crate::error::{ConfigError, FunctionError};
use crate::frame::Frame;
use crate::registry::DatasetRegistry;
use crate::schema::DataType;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CastArgs {
    columns: Vec<CastColumnArgs>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CastColumnArgs {
    column_name: String,
    cast_type: String,
}

/// Casts columns to new types. Values that do not convert become null.
#[derive(Debug, Clone)]
pub struct CastFunction {
    columns: Vec<(String, DataType)>,
}

impl CastFunction {
    pub fn new(columns: Vec<(String, DataType)>) -> Self {
        Self { columns }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: CastArgs = parse_args("cast", arguments)?;
    if args.columns.is_empty() {
        return Err(invalid_args("cast", "'columns' must not be empty"));
    }
    let columns = args
        .columns
        .into_iter()
        .map(|c| {
            c.cast_type
                .parse::<DataType>()
                .map(|t| (c.column_name, t))
                .map_err(|e| invalid_args("cast", e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Arc::new(CastFunction::new(columns)))
}

impl Function for CastFunction {
    fn tag(&self) -> &str {
        "cast"
    }

    fn apply(&self, input: Dataset, _registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let columns = self.columns.clone();
        let op = Arc::new(move |frame: Frame| {
            columns
                .iter()
                .try_fold(frame, |acc, (name, to)| acc.cast_column(name, *to))
        });
        Ok(input.map_frames(op)?)
    }
}
