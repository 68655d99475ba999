use super::{Stage, resolve_format};
use crate::dataset::ExecutionMode;
use crate::engine::{DataFormat, Engine, ReadRequest};
use crate::error::{ConfigError, ExtractError, StageError};
use crate::job::types::{ExtractConfig, StageKind};
use crate::options::Options;
use crate::registry::DatasetRegistry;
use crate::schema::Schema;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Reads a source into the registry under the stage's name.
#[derive(Debug, Clone)]
pub struct Extract {
    name: String,
    method: ExecutionMode,
    format: DataFormat,
    location: PathBuf,
    options: Options,
    schema: Option<Schema>,
}

impl Extract {
    /// Resolve an extract record. Fails on an unknown format, a bad schema or
    /// conflicting options.
    pub fn from_config(config: &ExtractConfig) -> Result<Self, ConfigError> {
        let format = resolve_format(&config.name, &config.data_format)?;
        let schema = config
            .schema
            .as_ref()
            .map(Schema::from_reference)
            .transpose()
            .map_err(|source| ConfigError::Schema {
                stage: config.name.clone(),
                source,
            })?;

        let infer = config
            .options
            .get_bool("inferSchema")
            .map_err(|e| ConfigError::InvalidOption {
                stage: config.name.clone(),
                message: e.to_string(),
            })?
            .unwrap_or(false);
        if schema.is_some() && infer {
            return Err(ConfigError::InvalidOption {
                stage: config.name.clone(),
                message: "an explicit schema cannot be combined with inferSchema=true".into(),
            });
        }
        if config.method == ExecutionMode::Streaming && schema.is_none() {
            return Err(ConfigError::InvalidOption {
                stage: config.name.clone(),
                message: "streaming extracts require an explicit schema".into(),
            });
        }

        Ok(Self {
            name: config.name.clone(),
            method: config.method,
            format,
            location: config.location.clone(),
            options: config.options.clone(),
            schema,
        })
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    fn request(&self) -> ReadRequest {
        ReadRequest {
            name: self.name.clone(),
            format: self.format,
            location: self.location.clone(),
            options: self.options.clone(),
            schema: self.schema.clone(),
            mode: self.method,
        }
    }
}

#[async_trait]
impl Stage for Extract {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Extract
    }

    fn method(&self) -> ExecutionMode {
        self.method
    }

    fn upstreams(&self) -> Vec<&str> {
        Vec::new()
    }

    async fn execute(
        &self,
        engine: &dyn Engine,
        registry: &mut DatasetRegistry,
    ) -> Result<(), StageError> {
        info!(
            stage = %self.name,
            format = %self.format,
            method = %self.method,
            location = %self.location.display(),
            "Extracting"
        );
        let dataset = engine
            .read(&self.request())
            .await
            .map_err(ExtractError::Read)?;
        registry
            .register(&self.name, dataset)
            .map_err(ExtractError::from)?;
        Ok(())
    }
}
