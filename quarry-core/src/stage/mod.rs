//! Pipeline stages: the common contract shared by extract, transform and load.

mod extract;
mod load;
mod transform;

pub use extract::Extract;
pub use load::Load;
pub use transform::Transform;

use crate::dataset::ExecutionMode;
use crate::engine::{DataFormat, Engine};
use crate::error::{ConfigError, StageError};
use crate::job::types::StageKind;
use crate::registry::DatasetRegistry;
use async_trait::async_trait;
use std::fmt;

/// Trait implemented by every stage of a job.
#[async_trait]
pub trait Stage: Send + Sync + fmt::Debug {
    /// Unique name; the stage's output is registered under it.
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    fn method(&self) -> ExecutionMode;

    /// Every registry name this stage reads, primary upstream first.
    fn upstreams(&self) -> Vec<&str>;

    /// Run the stage. A successful stage writes exactly one dataset to the registry.
    async fn execute(
        &self,
        engine: &dyn Engine,
        registry: &mut DatasetRegistry,
    ) -> Result<(), StageError>;
}

/// Resolve a `data_format` tag for a stage.
pub(crate) fn resolve_format(stage: &str, tag: &str) -> Result<DataFormat, ConfigError> {
    tag.parse::<DataFormat>()
        .map_err(|_| ConfigError::UnsupportedFormat {
            stage: stage.to_string(),
            format: tag.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_format() {
        assert_eq!(resolve_format("e", "CSV").unwrap(), DataFormat::Csv);
        let err = resolve_format("e", "parquet").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stage 'e' uses unsupported data format 'parquet'"
        );
    }
}
