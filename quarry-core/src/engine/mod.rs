//! The dataframe engine boundary.
//!
//! Stages only talk to an [`Engine`]: `read` produces a dataset, `write`
//! materialises a batch dataset and `write_stream` starts a streaming query.
//! [`LocalEngine`] is the in-process, file-backed implementation; the shared
//! session is handed out by [`SessionProvider`].

pub mod format;
mod local;
mod session;
mod stream;

pub use format::{Codec, DataFormat, ReadMode};
pub use local::LocalEngine;
pub use session::SessionProvider;
pub use stream::{QueryProgress, QueryStatus, RunningQuery, Trigger};

use crate::dataset::{Dataset, ExecutionMode};
use crate::error::EngineError;
use crate::options::Options;
use crate::schema::Schema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Parameters of a read.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Provenance name given to the resulting dataset.
    pub name: String,
    pub format: DataFormat,
    pub location: PathBuf,
    pub options: Options,
    pub schema: Option<Schema>,
    pub mode: ExecutionMode,
}

/// Parameters of a batch or streaming write.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// Name of the load stage; used as the streaming query name.
    pub name: String,
    pub format: DataFormat,
    pub location: PathBuf,
    pub options: Options,
    pub mode: WriteMode,
}

/// Behaviour when the write destination already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Overwrite,
    Append,
    #[default]
    #[serde(alias = "error", alias = "error_if_exists")]
    ErrorIfExists,
    Ignore,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
            WriteMode::ErrorIfExists => "errorifexists",
            WriteMode::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

/// A dataframe engine session.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Read data into a batch dataset, or describe a streaming source.
    async fn read(&self, request: &ReadRequest) -> Result<Dataset, EngineError>;

    /// Materialise a batch dataset, blocking until the write completes.
    async fn write(&self, dataset: &Dataset, request: &WriteRequest) -> Result<(), EngineError>;

    /// Start a streaming query that continuously writes a streaming dataset.
    /// Returns as soon as the query is running.
    async fn write_stream(
        &self,
        dataset: &Dataset,
        request: &WriteRequest,
    ) -> Result<RunningQuery, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode_spellings() {
        let parse = |s: &str| serde_json::from_value::<WriteMode>(serde_json::json!(s));
        assert_eq!(parse("overwrite").unwrap(), WriteMode::Overwrite);
        assert_eq!(parse("error").unwrap(), WriteMode::ErrorIfExists);
        assert_eq!(parse("errorifexists").unwrap(), WriteMode::ErrorIfExists);
        assert!(parse("upsert").is_err());
        assert_eq!(WriteMode::default().to_string(), "errorifexists");
    }
}
