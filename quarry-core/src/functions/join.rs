use super::{Function, OneOrMany, invalid_args, parse_args};
use crate::dataset::Dataset;
use crate::error::{ConfigError, FunctionError};
use crate::frame::{Frame, JoinType};
use crate::registry::DatasetRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JoinArgs {
    other_upstream_name: String,
    #[serde(default)]
    on: Option<OneOrMany>,
    #[serde(default)]
    how: Option<String>,
}

/// Joins the input (left) with another registered dataset (right).
#[derive(Debug, Clone)]
pub struct JoinFunction {
    other: String,
    on: Vec<String>,
    how: JoinType,
}

impl JoinFunction {
    pub fn new(other: impl Into<String>, on: Vec<String>, how: JoinType) -> Self {
        Self {
            other: other.into(),
            on,
            how,
        }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: JoinArgs = parse_args("join", arguments)?;
    let how = match args.how.as_deref() {
        Some(how) => how.parse::<JoinType>().map_err(|e| invalid_args("join", e))?,
        None => JoinType::Inner,
    };
    let on = args.on.map(OneOrMany::into_vec).unwrap_or_default();
    if on.is_empty() && !matches!(how, JoinType::Inner | JoinType::Cross) {
        return Err(invalid_args(
            "join",
            format!("'on' is required for a {how} join"),
        ));
    }
    Ok(Arc::new(JoinFunction::new(args.other_upstream_name, on, how)))
}

impl Function for JoinFunction {
    fn tag(&self) -> &str {
        "join"
    }

    fn secondary_upstreams(&self) -> Vec<&str> {
        vec![self.other.as_str()]
    }

    fn apply(&self, input: Dataset, registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let right = registry.get(&self.other)?;
        let Some(right_frame) = right.frame() else {
            return Err(FunctionError::StreamingUnsupported {
                message: format!(
                    "join with '{}': the joined dataset must be a batch dataset",
                    self.other
                ),
            });
        };
        if input.is_streaming() && matches!(self.how, JoinType::Right | JoinType::Full) {
            return Err(FunctionError::StreamingUnsupported {
                message: format!("{} join with a streaming left side", self.how),
            });
        }
        debug!(
            left = input.name(),
            right = %self.other,
            how = %self.how,
            on = ?self.on,
            "Joining datasets"
        );
        let right_frame = Arc::clone(right_frame);
        let on = self.on.clone();
        let how = self.how;
        Ok(input.map_frames(Arc::new(move |frame: Frame| {
            frame.join(&right_frame, &on, how)
        }))?)
    }
}
