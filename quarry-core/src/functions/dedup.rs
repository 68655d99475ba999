use super::{Function, OneOrMany, parse_args};
use crate::dataset::Dataset;
use crate::error::{ConfigError, FunctionError};
use crate::frame::Frame;
use crate::registry::DatasetRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DropDuplicatesArgs {
    #[serde(default)]
    columns: Option<OneOrMany>,
}

/// Removes duplicate rows, keeping the first occurrence.
///
/// On a streaming dataset duplicates are removed within each micro-batch.
#[derive(Debug, Clone)]
pub struct DropDuplicatesFunction {
    subset: Option<Vec<String>>,
}

impl DropDuplicatesFunction {
    pub fn new(subset: Option<Vec<String>>) -> Self {
        Self { subset }
    }
}

pub(crate) fn build(arguments: &Value) -> Result<Arc<dyn Function>, ConfigError> {
    let args: DropDuplicatesArgs = parse_args("dropDuplicates", arguments)?;
    Ok(Arc::new(DropDuplicatesFunction::new(
        args.columns.map(OneOrMany::into_vec),
    )))
}

impl Function for DropDuplicatesFunction {
    fn tag(&self) -> &str {
        "dropDuplicates"
    }

    fn apply(&self, input: Dataset, _registry: &DatasetRegistry) -> Result<Dataset, FunctionError> {
        let subset = self.subset.clone();
        Ok(input.map_frames(Arc::new(move |frame: Frame| {
            frame.distinct(subset.as_deref())
        }))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::test_support::people;
    use serde_json::json;

    #[test]
    fn test_dedup_whole_rows() {
        let function = build(&Value::Null).unwrap();
        let out = function.apply(people(), &DatasetRegistry::new()).unwrap();
        assert_eq!(out.frame().unwrap().num_rows(), 3);
    }

    #[test]
    fn test_dedup_subset_keeps_first() {
        let function = build(&json!({"columns": ["name"]})).unwrap();
        let out = function.apply(people(), &DatasetRegistry::new()).unwrap();
        let names: Vec<Value> = out
            .frame()
            .unwrap()
            .column("name")
            .unwrap()
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(names, vec![json!("Alice"), json!("Bob"), json!("Carol")]);
    }
}
