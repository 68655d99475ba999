use super::{Function, invalid_args, parse_args};
use crate::dataset::Dataset;
use crate::error::{ConfigError, FunctionError};
use crate::expr::{BinaryOp, Expr};
use crate::frame::Frame;
use crate::registry::DatasetRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BirthYearArgs {
    current_year: i64,
    age_column: String,
    birth_year_column: String,
}

/// Derives `birth_year_column = current_year - age_column`.
#[derive(Debug, Clone)]
pub struct CalculateBirthYear {
    output: String,
    expr: Arc<Expr>,
}

impl CalculateBirthYear {
    pub fn new(current_year: i64, age_column: &str, birth_year_column: impl Into<String>) -> Self {
        let expr = Expr::binary(
            BinaryOp::Sub,
            Expr::literal(current_year),
            Expr::column(age_column),
        );
        Self {
            output: birth_year_column.into(),
            expr: Arc::new(expr),
        }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: BirthYearArgs = parse_args("calculate_birth_year", arguments)?;
    if args.birth_year_column.trim().is_empty() {
        return Err(invalid_args(
            "calculate_birth_year",
            "'birth_year_column' must not be empty",
        ));
    }
    Ok(Arc::new(CalculateBirthYear::new(
        args.current_year,
        &args.age_column,
        args.birth_year_column,
    )))
}

impl Function for CalculateBirthYear {
    fn tag(&self) -> &str {
        "calculate_birth_year"
    }

    fn apply(&self, input: Dataset, _registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let output = self.output.clone();
        let expr = Arc::clone(&self.expr);
        Ok(input.map_frames(Arc::new(move |frame: Frame| expr.project_into(&frame, &output)))?)
    }
}
