//! Error types for the Quarry core library.
//!
//! Uses `thiserror` for public API error types. Errors are split by the moment
//! they can occur: [`ConfigError`] before anything runs, [`RegistryError`],
//! [`EngineError`] and [`FunctionError`] inside a stage, and [`JobError`] as the
//! outcome reported to whoever executed the job.

use crate::dataset::ExecutionMode;
use crate::job::types::{JobStatus, StageKind};
use std::path::PathBuf;

/// Top-level error type for the Quarry core library.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors detected while turning a job document into stage objects.
///
/// All of these are raised before any stage executes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Job file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported job file type: {path} (expected .json, .yaml or .yml)")]
    UnsupportedFileType { path: PathBuf },

    #[error("Job document parse error: {message}")]
    ParseError { message: String },

    #[error("Missing environment variable(s): {}", vars.join(", "))]
    EnvVarMissing { vars: Vec<String> },

    #[error("Invalid {kind} stage #{index}: {message}")]
    InvalidStage {
        kind: StageKind,
        index: usize,
        message: String,
    },

    #[error("Duplicate stage name: '{name}'")]
    DuplicateStageName { name: String },

    #[error(
        "Stage '{stage}' references unknown upstream '{upstream}' (upstreams must be declared earlier)"
    )]
    UnknownUpstream { stage: String, upstream: String },

    #[error("Stage '{stage}' uses unsupported data format '{format}'")]
    UnsupportedFormat { stage: String, format: String },

    #[error("Stage '{stage}' uses unsupported function '{function}' at position {position}")]
    UnsupportedFunction {
        stage: String,
        function: String,
        position: usize,
    },

    #[error("Stage '{stage}' must declare at least one function")]
    NoFunctions { stage: String },

    #[error("Invalid arguments for function '{function}': {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("Stage '{stage}', function #{position}: {source}")]
    InvalidFunction {
        stage: String,
        position: usize,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("Stage '{stage}' has invalid options: {message}")]
    InvalidOption { stage: String, message: String },

    #[error("Stage '{stage}' has an invalid schema: {source}")]
    Schema {
        stage: String,
        #[source]
        source: SchemaError,
    },

    #[error("Function '{tag}' is already registered")]
    DuplicateFunction { tag: String },
}

/// Errors from parsing or loading schema descriptions.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema: {message}")]
    Invalid { message: String },

    #[error("unsupported data type '{name}'")]
    UnsupportedType { name: String },

    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the per-execution dataset registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{namespace} '{name}' is already registered")]
    DuplicateName {
        name: String,
        namespace: &'static str,
    },

    #[error("unresolved reference: no dataset registered under '{name}'")]
    UnresolvedReference { name: String },
}

/// Errors from relational operations on in-memory frames and expressions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("column '{column}' not found (available: {})", available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("column reference '{column}' is ambiguous")]
    AmbiguousColumn { column: String },

    #[error("row {row} has {actual} values, schema has {expected} fields")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("frames have incompatible schemas: {message}")]
    SchemaMismatch { message: String },

    #[error("expression error: {message}")]
    Expression { message: String },

    #[error("invalid operation: {message}")]
    Invalid { message: String },
}

impl FrameError {
    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression {
            message: msg.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid {
            message: msg.into(),
        }
    }
}

/// Errors raised by a dataframe engine while reading or writing data.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("path does not exist: {path}")]
    NotFound { path: PathBuf },

    #[error("path already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("failed to encode output: {message}")]
    Encode { message: String },

    #[error("malformed record in {path}: {message}")]
    SchemaViolation { path: PathBuf, message: String },

    #[error("invalid option '{key}' = '{value}': expected {expected}")]
    InvalidOption {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("{message}")]
    ModeMismatch { message: String },

    #[error("streaming query '{name}' failed: {message}")]
    Stream { name: String, message: String },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a single transform function application.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("not supported on streaming datasets: {message}")]
    StreamingUnsupported { message: String },
}

/// Errors from the extract phase.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("read failed: {0}")]
    Read(#[source] EngineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors from the transform phase.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("upstream '{upstream}' is a {actual} dataset but the stage method is {expected}")]
    ModeMismatch {
        upstream: String,
        expected: ExecutionMode,
        actual: ExecutionMode,
    },

    #[error("function '{function}' (position {position}) failed: {source}")]
    Function {
        function: String,
        position: usize,
        #[source]
        source: FunctionError,
    },
}

/// Errors from the load phase.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("write failed: {0}")]
    Write(#[source] EngineError),

    #[error("failed to write schema to {path}: {source}")]
    SchemaWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from executing one stage, by stage kind.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl StageError {
    /// The registry error behind this failure, if the stage failed on a lookup or registration.
    pub fn registry_error(&self) -> Option<&RegistryError> {
        match self {
            StageError::Extract(ExtractError::Registry(e))
            | StageError::Transform(TransformError::Registry(e))
            | StageError::Load(LoadError::Registry(e)) => Some(e),
            StageError::Transform(TransformError::Function {
                source: FunctionError::Registry(e),
                ..
            }) => Some(e),
            _ => None,
        }
    }

    /// Whether this failure was caused by an upstream name missing from the registry.
    pub fn is_unresolved_reference(&self) -> bool {
        matches!(
            self.registry_error(),
            Some(RegistryError::UnresolvedReference { .. })
        )
    }
}

/// Errors reported by [`crate::job::Job::execute`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{phase} stage '{stage}' failed: {source}")]
    Stage {
        phase: StageKind,
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Job cannot be executed in status '{status}'")]
    AlreadyExecuted { status: JobStatus },
}

/// A type alias for results using the top-level `QuarryError`.
pub type Result<T> = std::result::Result<T, QuarryError>;
