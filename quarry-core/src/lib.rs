//! # Quarry Core
//!
//! Core library for Quarry, a configuration-driven ETL runner.
//! Provides job parsing and validation, the extract/transform/load stages,
//! the per-execution dataset registry, transform functions, and a local
//! file-backed dataframe engine with batch and streaming execution.

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod expr;
pub mod frame;
pub mod functions;
pub mod job;
pub mod options;
pub mod registry;
pub mod schema;
pub mod stage;

// Re-export commonly used types at the crate root.
pub use config::{EngineSettings, JobSettings, LoggingConfig, QuarryConfig, load_config};
pub use dataset::{Dataset, ExecutionMode};
pub use engine::{
    DataFormat, Engine, LocalEngine, QueryStatus, ReadRequest, RunningQuery, SessionProvider,
    WriteMode, WriteRequest,
};
pub use error::{
    ConfigError, EngineError, FunctionError, JobError, QuarryError, RegistryError, Result,
    StageError,
};
pub use frame::{Frame, JoinType};
pub use functions::{Function, FunctionRegistry};
pub use job::{DocumentFormat, Job, JobStatus, StageKind};
pub use options::Options;
pub use registry::DatasetRegistry;
pub use schema::{DataType, Field, Schema};
pub use stage::Stage;
