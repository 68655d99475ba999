//! Jobs: a validated pipeline of extract, transform and load stages.
//!
//! Construction resolves every stage from its document record and rejects
//! anything that could only fail later (unknown tags, bad arguments, duplicate
//! names, references to stages not declared earlier). Execution then runs the
//! stages in declaration order, extracts first, against one shared engine
//! session and a fresh [`DatasetRegistry`].

pub mod parser;
pub mod types;
mod validate;

pub use parser::{substitute_env_vars, substitute_vars};
pub use types::{
    DocumentFormat, ExtractConfig, FunctionConfig, JobDocument, JobStatus, LoadConfig, StageKind,
    TransformConfig,
};
pub use validate::validate_stages;

use crate::engine::SessionProvider;
use crate::error::{ConfigError, JobError};
use crate::functions::FunctionRegistry;
use crate::registry::DatasetRegistry;
use crate::stage::{Extract, Load, Stage, Transform};
use serde_json::Value;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A configured ETL job.
#[derive(Debug)]
pub struct Job {
    extracts: Vec<Extract>,
    transforms: Vec<Transform>,
    loads: Vec<Load>,
    status: JobStatus,
}

impl Job {
    /// Load a job file (`.json`, `.yaml`, `.yml`) with the built-in functions,
    /// substituting `${VAR}` from the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(path, true, &FunctionRegistry::with_builtins())
    }

    /// Load a job file with explicit substitution behaviour and functions.
    pub fn load(
        path: &Path,
        substitute_env: bool,
        functions: &FunctionRegistry,
    ) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading job document");
        let value = parser::read_document(path, substitute_env)?;
        Self::parse(&value, functions)
    }

    /// Parse document text, substituting `${VAR}` from the environment.
    pub fn from_str(text: &str, format: DocumentFormat) -> Result<Self, ConfigError> {
        let text = parser::substitute_env_vars(text)?;
        let value = parser::parse_value(&text, format)?;
        Self::from_value(&value)
    }

    /// Build a job from an already parsed document, with the built-in functions.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        Self::parse(value, &FunctionRegistry::with_builtins())
    }

    /// Build a job from a parsed document, resolving functions from `functions`.
    pub fn parse(value: &Value, functions: &FunctionRegistry) -> Result<Self, ConfigError> {
        let document = parser::parse_document(value)?;
        Self::from_document(&document, functions)
    }

    /// Build a job from typed document records.
    pub fn from_document(
        document: &JobDocument,
        functions: &FunctionRegistry,
    ) -> Result<Self, ConfigError> {
        let extracts = document
            .extracts
            .iter()
            .map(Extract::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let transforms = document
            .transforms
            .iter()
            .map(|t| Transform::from_config(t, functions))
            .collect::<Result<Vec<_>, _>>()?;
        let loads = document
            .loads
            .iter()
            .map(Load::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let job = Self {
            extracts,
            transforms,
            loads,
            status: JobStatus::Configured,
        };
        validate_stages(&job.stages())?;
        info!(
            extracts = job.extracts.len(),
            transforms = job.transforms.len(),
            loads = job.loads.len(),
            "Job configured"
        );
        Ok(job)
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn extracts(&self) -> &[Extract] {
        &self.extracts
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    /// Every stage in execution order.
    pub fn stages(&self) -> Vec<&dyn Stage> {
        let mut stages: Vec<&dyn Stage> = Vec::new();
        stages.extend(self.extracts.iter().map(|s| s as &dyn Stage));
        stages.extend(self.transforms.iter().map(|s| s as &dyn Stage));
        stages.extend(self.loads.iter().map(|s| s as &dyn Stage));
        stages
    }

    /// Execute with the process-wide engine session.
    pub async fn run(&mut self) -> Result<DatasetRegistry, JobError> {
        self.execute(SessionProvider::global()).await
    }

    /// Execute every stage in order, failing fast on the first error.
    ///
    /// On success the registry is handed back, including the handles of any
    /// streaming queries that were started. A job executes at most once.
    pub async fn execute(
        &mut self,
        provider: &SessionProvider,
    ) -> Result<DatasetRegistry, JobError> {
        if self.status != JobStatus::Configured {
            return Err(JobError::AlreadyExecuted {
                status: self.status,
            });
        }
        let engine = provider.session();
        let mut registry = DatasetRegistry::new();
        let started = Instant::now();

        let phases: [(StageKind, Vec<&dyn Stage>); 3] = [
            (
                StageKind::Extract,
                self.extracts.iter().map(|s| s as &dyn Stage).collect(),
            ),
            (
                StageKind::Transform,
                self.transforms.iter().map(|s| s as &dyn Stage).collect(),
            ),
            (
                StageKind::Load,
                self.loads.iter().map(|s| s as &dyn Stage).collect(),
            ),
        ];

        for (phase, stages) in phases {
            self.status = JobStatus::running(phase);
            debug!(status = %self.status, stages = stages.len(), "Entering phase");
            for stage in stages {
                let stage_start = Instant::now();
                if let Err(source) = stage.execute(engine.as_ref(), &mut registry).await {
                    self.status = JobStatus::Failed;
                    error!(
                        phase = %phase,
                        stage = stage.name(),
                        error = %source,
                        "Stage failed"
                    );
                    stop_queries(registry).await;
                    return Err(JobError::Stage {
                        phase,
                        stage: stage.name().to_string(),
                        source,
                    });
                }
                info!(
                    phase = %phase,
                    stage = stage.name(),
                    duration_ms = stage_start.elapsed().as_millis() as u64,
                    "Stage completed"
                );
            }
        }

        self.status = JobStatus::Completed;
        info!(
            datasets = registry.len(),
            queries = registry.queries().len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Job completed"
        );
        Ok(registry)
    }
}

/// Stop streaming queries started by a job that then failed; nobody else
/// holds their handles.
async fn stop_queries(registry: DatasetRegistry) {
    for (name, query) in registry.into_queries() {
        let status = query.stop().await;
        warn!(query = %name, status = ?status, "Stopped streaming query of failed job");
    }
}
