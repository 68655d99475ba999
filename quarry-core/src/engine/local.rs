//! In-process, file-backed engine.
//!
//! Batch writes produce a directory holding `part-NNNNN.<ext>` files and an
//! empty `_SUCCESS` marker, so any output directory can be read back as input.

use super::format::materialize;
use super::stream;
use super::{DataFormat, Engine, ReadRequest, RunningQuery, WriteMode, WriteRequest};
use crate::config::EngineSettings;
use crate::dataset::{Dataset, ExecutionMode, StreamSource};
use crate::error::EngineError;
use crate::frame::Frame;
use crate::options::Options;
use crate::schema::Schema;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SUCCESS_MARKER: &str = "_SUCCESS";

/// Engine reading and writing local CSV and JSON files.
#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    settings: EngineSettings,
}

impl LocalEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

#[async_trait]
impl Engine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn read(&self, request: &ReadRequest) -> Result<Dataset, EngineError> {
        match request.mode {
            ExecutionMode::Batch => {
                let files = list_data_files(&request.location).await?;
                let frame = read_files(
                    &files,
                    request.format,
                    &request.options,
                    request.schema.as_ref(),
                )
                .await?;
                info!(
                    dataset = %request.name,
                    files = files.len(),
                    rows = frame.num_rows(),
                    "Read batch dataset"
                );
                Ok(Dataset::batch(&request.name, frame))
            }
            ExecutionMode::Streaming => {
                let schema = request.schema.clone().ok_or_else(|| EngineError::ModeMismatch {
                    message: format!(
                        "streaming read of '{}' requires an explicit schema",
                        request.name
                    ),
                })?;
                let metadata = metadata(&request.location).await?;
                if !metadata.is_dir() {
                    return Err(EngineError::ModeMismatch {
                        message: format!(
                            "streaming source {} must be a directory",
                            request.location.display()
                        ),
                    });
                }
                debug!(dataset = %request.name, location = %request.location.display(), "Registered streaming source");
                Ok(Dataset::stream(
                    &request.name,
                    StreamSource {
                        format: request.format,
                        location: request.location.clone(),
                        options: request.options.clone(),
                        schema,
                    },
                ))
            }
        }
    }

    async fn write(&self, dataset: &Dataset, request: &WriteRequest) -> Result<(), EngineError> {
        let frame = dataset.frame().ok_or_else(|| EngineError::ModeMismatch {
            message: format!(
                "dataset '{}' is streaming and cannot be written in batch mode",
                dataset.name()
            ),
        })?;
        let location = &request.location;
        let exists = tokio::fs::try_exists(location)
            .await
            .map_err(|e| EngineError::io(location, e))?;

        if exists {
            match request.mode {
                WriteMode::ErrorIfExists => {
                    return Err(EngineError::AlreadyExists {
                        path: location.clone(),
                    });
                }
                WriteMode::Ignore => {
                    info!(location = %location.display(), "Destination exists, skipping write (mode=ignore)");
                    return Ok(());
                }
                WriteMode::Overwrite => remove_path(location).await?,
                WriteMode::Append => {}
            }
        }

        tokio::fs::create_dir_all(location)
            .await
            .map_err(|e| EngineError::io(location, e))?;
        let index = next_part_index(location).await?;
        let part = write_part(location, index, request.format, frame, &request.options).await?;
        tokio::fs::write(location.join(SUCCESS_MARKER), b"")
            .await
            .map_err(|e| EngineError::io(location, e))?;

        info!(
            dataset = %dataset.name(),
            path = %part.display(),
            rows = frame.num_rows(),
            mode = %request.mode,
            "Wrote batch dataset"
        );
        Ok(())
    }

    async fn write_stream(
        &self,
        dataset: &Dataset,
        request: &WriteRequest,
    ) -> Result<RunningQuery, EngineError> {
        let plan = dataset
            .stream_plan()
            .cloned()
            .ok_or_else(|| EngineError::ModeMismatch {
                message: format!(
                    "dataset '{}' is not streaming and cannot be written as a stream",
                    dataset.name()
                ),
            })?;
        if request.mode != WriteMode::Append {
            return Err(EngineError::ModeMismatch {
                message: format!(
                    "streaming output only supports mode 'append', got '{}'",
                    request.mode
                ),
            });
        }
        stream::start(plan, request.clone(), &self.settings).await
    }
}

async fn metadata(path: &Path) -> Result<std::fs::Metadata, EngineError> {
    tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            EngineError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            EngineError::io(path, e)
        }
    })
}

/// Data files at a location: the file itself, or the visible files of a
/// directory in name order (names starting with `_` or `.` are skipped).
pub(crate) async fn list_data_files(location: &Path) -> Result<Vec<PathBuf>, EngineError> {
    if metadata(location).await?.is_file() {
        return Ok(vec![location.to_path_buf()]);
    }
    let mut entries = tokio::fs::read_dir(location)
        .await
        .map_err(|e| EngineError::io(location, e))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::io(location, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('_') || name.starts_with('.') {
            continue;
        }
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| EngineError::io(entry.path(), e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Decode and type a set of files as one frame.
pub(crate) async fn read_files(
    files: &[PathBuf],
    format: DataFormat,
    options: &Options,
    schema: Option<&Schema>,
) -> Result<Frame, EngineError> {
    let codec = format.codec();
    let mut tables = Vec::with_capacity(files.len());
    for file in files {
        let text = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| EngineError::io(file, e))?;
        tables.push((file.clone(), codec.decode(&text, options, file)?));
    }
    materialize(tables, schema, options)
}

pub(crate) fn part_file_name(index: u64, format: DataFormat) -> String {
    format!("part-{index:05}.{}", format.extension())
}

/// One past the highest `part-N` index in a directory (0 when there is none).
pub(crate) async fn next_part_index(dir: &Path) -> Result<u64, EngineError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(EngineError::io(dir, e)),
    };
    let mut next = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::io(dir, e))?
    {
        let name = entry.file_name();
        let index = name
            .to_string_lossy()
            .strip_prefix("part-")
            .and_then(|rest| rest.split('.').next().map(str::to_string))
            .and_then(|digits| digits.parse::<u64>().ok());
        if let Some(index) = index {
            next = next.max(index + 1);
        }
    }
    Ok(next)
}

pub(crate) async fn write_part(
    dir: &Path,
    index: u64,
    format: DataFormat,
    frame: &Frame,
    options: &Options,
) -> Result<PathBuf, EngineError> {
    let body = format.codec().encode(frame, options)?;
    let path = dir.join(part_file_name(index, format));
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| EngineError::io(&path, e))?;
    Ok(path)
}

async fn remove_path(path: &Path) -> Result<(), EngineError> {
    let result = if metadata(path).await?.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.map_err(|e| EngineError::io(path, e))
}
