use super::{Stage, resolve_format};
use crate::dataset::{Dataset, ExecutionMode};
use crate::engine::{DataFormat, Engine, WriteMode, WriteRequest};
use crate::error::{ConfigError, LoadError, StageError};
use crate::job::types::{LoadConfig, StageKind};
use crate::options::Options;
use crate::registry::DatasetRegistry;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes its upstream dataset, or starts a streaming query for it.
#[derive(Debug, Clone)]
pub struct Load {
    name: String,
    method: ExecutionMode,
    upstream: String,
    format: DataFormat,
    location: PathBuf,
    mode: WriteMode,
    schema_location: Option<PathBuf>,
    options: Options,
}

impl Load {
    pub fn from_config(config: &LoadConfig) -> Result<Self, ConfigError> {
        let format = resolve_format(&config.name, &config.data_format)?;
        let mode = match (config.method, config.mode) {
            (ExecutionMode::Batch, mode) => mode.unwrap_or_default(),
            (ExecutionMode::Streaming, None | Some(WriteMode::Append)) => WriteMode::Append,
            (ExecutionMode::Streaming, Some(other)) => {
                return Err(ConfigError::InvalidOption {
                    stage: config.name.clone(),
                    message: format!("streaming loads only support mode 'append', got '{other}'"),
                });
            }
        };
        Ok(Self {
            name: config.name.clone(),
            method: config.method,
            upstream: config.upstream_name.clone(),
            format,
            location: config.location.clone(),
            mode,
            schema_location: config.schema_location.clone(),
            options: config.options.clone(),
        })
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    fn request(&self) -> WriteRequest {
        WriteRequest {
            name: self.name.clone(),
            format: self.format,
            location: self.location.clone(),
            options: self.options.clone(),
            mode: self.mode,
        }
    }

    async fn write_schema(&self, dataset: &Dataset, path: &Path) -> Result<(), LoadError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LoadError::SchemaWrite {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, dataset.schema().to_pretty_json())
            .await
            .map_err(|source| LoadError::SchemaWrite {
                path: path.to_path_buf(),
                source,
            })?;
        info!(stage = %self.name, path = %path.display(), "Wrote schema");
        Ok(())
    }
}

#[async_trait]
impl Stage for Load {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Load
    }

    fn method(&self) -> ExecutionMode {
        self.method
    }

    fn upstreams(&self) -> Vec<&str> {
        vec![self.upstream.as_str()]
    }

    async fn execute(
        &self,
        engine: &dyn Engine,
        registry: &mut DatasetRegistry,
    ) -> Result<(), StageError> {
        let dataset = registry
            .get(&self.upstream)
            .map_err(LoadError::from)?
            .clone();
        info!(
            stage = %self.name,
            upstream = %self.upstream,
            format = %self.format,
            method = %self.method,
            location = %self.location.display(),
            "Loading"
        );

        let request = self.request();
        match self.method {
            ExecutionMode::Batch => {
                engine
                    .write(&dataset, &request)
                    .await
                    .map_err(LoadError::Write)?;
            }
            ExecutionMode::Streaming => {
                let query = engine
                    .write_stream(&dataset, &request)
                    .await
                    .map_err(LoadError::Write)?;
                info!(stage = %self.name, query_id = %query.id(), "Started streaming query");
                registry
                    .register_query(&self.name, query)
                    .map_err(LoadError::from)?;
            }
        }

        if let Some(path) = &self.schema_location {
            self.write_schema(&dataset, path).await?;
        }
        registry
            .register(&self.name, dataset.renamed(&self.name))
            .map_err(LoadError::from)?;
        Ok(())
    }
}
