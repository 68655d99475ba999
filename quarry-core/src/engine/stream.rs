//! Streaming queries for the local engine.
//!
//! A query runs as a `tokio::spawn` task that polls its source directory on a
//! trigger, decodes newly arrived files under the source schema, runs the
//! stream plan's operations and appends one `part-NNNNN` file per micro-batch
//! to the destination. Shutdown goes through a `CancellationToken`; status and
//! progress are published on `watch` channels.

use super::local::{list_data_files, next_part_index, read_files, write_part};
use super::WriteRequest;
use crate::config::EngineSettings;
use crate::dataset::StreamPlan;
use crate::error::EngineError;
use crate::options::Options;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const CHECKPOINT_FILE: &str = "offsets.json";

/// Lifecycle state of a streaming query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryStatus {
    Active,
    /// All available input was processed (`trigger: once`).
    Finished,
    /// Stopped by [`RunningQuery::stop`].
    Stopped,
    Failed(String),
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Active => f.write_str("active"),
            QueryStatus::Finished => f.write_str("finished"),
            QueryStatus::Stopped => f.write_str("stopped"),
            QueryStatus::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Counters published after every micro-batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryProgress {
    pub batches: u64,
    pub rows: u64,
    pub files: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// When a streaming query looks for new input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Process everything currently available, then finish.
    Once,
    /// Poll at a fixed interval until stopped.
    ProcessingTime(Duration),
}

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*([A-Za-z]*)\s*$").expect("valid duration regex")
});

/// Parse a duration such as `500 milliseconds`, `2 seconds`, `1 minute` or `250ms`.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let caps = DURATION_RE.captures(text)?;
    let amount: u64 = caps[1].parse().ok()?;
    let millis = match caps[2].to_ascii_lowercase().as_str() {
        "" | "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => amount,
        "s" | "sec" | "secs" | "second" | "seconds" => amount.checked_mul(1_000)?,
        "m" | "min" | "mins" | "minute" | "minutes" => amount.checked_mul(60_000)?,
        _ => return None,
    };
    Some(Duration::from_millis(millis))
}

impl Trigger {
    /// Read the `trigger` / `processingTime` writer options. Intervals must be non-zero.
    pub fn from_options(options: &Options, default_interval: Duration) -> Result<Self, EngineError> {
        let Some(value) = options.get_any(&["trigger", "processingTime"]) else {
            if default_interval.is_zero() {
                return Err(EngineError::InvalidOption {
                    key: "engine.trigger_interval_ms".into(),
                    value: "0".into(),
                    expected: "a positive number of milliseconds",
                });
            }
            return Ok(Trigger::ProcessingTime(default_interval));
        };
        let normalized = value.trim().to_ascii_lowercase().replace('_', "");
        if normalized == "once" || normalized == "availablenow" {
            return Ok(Trigger::Once);
        }
        parse_duration(value)
            .filter(|interval| !interval.is_zero())
            .map(Trigger::ProcessingTime)
            .ok_or_else(|| EngineError::InvalidOption {
                key: "trigger".into(),
                value: value.to_string(),
                expected: "'once', 'availableNow' or a non-zero interval such as '2 seconds'",
            })
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Offsets persisted under `checkpointLocation` so a restarted query resumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Checkpoint {
    next_batch: u64,
    processed: BTreeSet<String>,
}

impl Checkpoint {
    async fn load(dir: &std::path::Path) -> Result<Option<Self>, EngineError> {
        let path = dir.join(CHECKPOINT_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| EngineError::Decode {
                    path,
                    message: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(path, e)),
        }
    }

    async fn save(&self, dir: &std::path::Path) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| EngineError::io(dir, e))?;
        let path = dir.join(CHECKPOINT_FILE);
        let body = serde_json::to_string_pretty(self).map_err(|e| EngineError::Encode {
            message: e.to_string(),
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| EngineError::io(path, e))
    }
}

// ---------------------------------------------------------------------------
// RunningQuery
// ---------------------------------------------------------------------------

struct QueryInner {
    id: Uuid,
    name: String,
    cancel: CancellationToken,
    status: watch::Receiver<QueryStatus>,
    progress: watch::Receiver<QueryProgress>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running streaming query. Clones share the same query.
#[derive(Clone)]
pub struct RunningQuery {
    inner: Arc<QueryInner>,
}

impl RunningQuery {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.status.borrow().clone()
    }

    pub fn progress(&self) -> QueryProgress {
        self.inner.progress.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.status() == QueryStatus::Active
    }

    /// Request cancellation and wait for the query task to exit.
    pub async fn stop(&self) -> QueryStatus {
        self.inner.cancel.cancel();
        self.wait_inactive().await;
        self.join().await;
        self.status()
    }

    /// Wait until the query finishes, is stopped or fails. A failure is returned as an error.
    pub async fn await_termination(&self) -> Result<QueryStatus, EngineError> {
        self.wait_inactive().await;
        let panic = self.join().await;
        let status = match (self.status(), panic) {
            (QueryStatus::Active, Some(message)) => QueryStatus::Failed(message),
            (QueryStatus::Active, None) => {
                QueryStatus::Failed("query task exited without reporting a status".into())
            }
            (status, _) => status,
        };
        match status {
            QueryStatus::Failed(message) => Err(EngineError::Stream {
                name: self.inner.name.clone(),
                message,
            }),
            other => Ok(other),
        }
    }

    /// Like [`RunningQuery::await_termination`], giving up after `timeout`.
    pub async fn await_termination_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<QueryStatus, EngineError>> {
        tokio::time::timeout(timeout, self.await_termination())
            .await
            .ok()
    }

    /// Resolves once the status leaves `Active` or the task is gone.
    async fn wait_inactive(&self) {
        let mut rx = self.inner.status.clone();
        loop {
            if *rx.borrow_and_update() != QueryStatus::Active {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Await the task once; returns the panic message if it panicked.
    async fn join(&self) -> Option<String> {
        let handle = self.inner.handle.lock().await.take();
        match handle {
            Some(handle) => handle.await.err().map(|e| e.to_string()),
            None => None,
        }
    }
}

impl fmt::Debug for RunningQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningQuery")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Start a query and return its handle without waiting for any input.
pub(crate) async fn start(
    plan: Arc<StreamPlan>,
    request: WriteRequest,
    settings: &EngineSettings,
) -> Result<RunningQuery, EngineError> {
    let trigger = Trigger::from_options(
        &request.options,
        Duration::from_millis(settings.trigger_interval_ms),
    )?;
    let max_files = match plan.source().options.get_usize("maxFilesPerTrigger")? {
        Some(n) => Some(n),
        None => settings.max_files_per_trigger,
    }
    .filter(|n| *n > 0);
    let checkpoint_dir = request.options.get("checkpointLocation").map(PathBuf::from);

    tokio::fs::create_dir_all(&request.location)
        .await
        .map_err(|e| EngineError::io(&request.location, e))?;
    let state = match &checkpoint_dir {
        Some(dir) => Checkpoint::load(dir).await?,
        None => None,
    };
    let state = match state {
        Some(state) => state,
        None => Checkpoint {
            next_batch: next_part_index(&request.location).await?,
            processed: BTreeSet::new(),
        },
    };

    let id = Uuid::new_v4();
    let name = request.name.clone();
    let cancel = CancellationToken::new();
    let (status_tx, status_rx) = watch::channel(QueryStatus::Active);
    let (progress_tx, progress_rx) = watch::channel(QueryProgress::default());

    info!(
        query = %name,
        id = %id,
        source = %plan.source().location.display(),
        sink = %request.location.display(),
        ?trigger,
        "Starting streaming query"
    );

    let worker = StreamWorker {
        plan,
        request,
        trigger,
        max_files,
        checkpoint_dir,
        state,
        progress_tx,
        cancel: cancel.clone(),
    };
    let task_name = name.clone();
    let handle = tokio::spawn(async move {
        let status = match worker.run().await {
            Ok(status) => status,
            Err(e) => {
                error!(query = %task_name, error = %e, "Streaming query failed");
                QueryStatus::Failed(e.to_string())
            }
        };
        info!(query = %task_name, %status, "Streaming query terminated");
        status_tx.send_replace(status);
    });

    Ok(RunningQuery {
        inner: Arc::new(QueryInner {
            id,
            name,
            cancel,
            status: status_rx,
            progress: progress_rx,
            handle: Mutex::new(Some(handle)),
        }),
    })
}

struct StreamWorker {
    plan: Arc<StreamPlan>,
    request: WriteRequest,
    trigger: Trigger,
    max_files: Option<usize>,
    checkpoint_dir: Option<PathBuf>,
    state: Checkpoint,
    progress_tx: watch::Sender<QueryProgress>,
    cancel: CancellationToken,
}

impl StreamWorker {
    async fn run(mut self) -> Result<QueryStatus, EngineError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(QueryStatus::Stopped);
            }
            match self.trigger {
                Trigger::Once => {
                    while self.run_batch().await? {
                        if self.cancel.is_cancelled() {
                            return Ok(QueryStatus::Stopped);
                        }
                    }
                    return Ok(QueryStatus::Finished);
                }
                Trigger::ProcessingTime(interval) => {
                    self.run_batch().await?;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(QueryStatus::Stopped),
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }
    }

    /// Process one micro-batch. Returns false when there was no new input.
    async fn run_batch(&mut self) -> Result<bool, EngineError> {
        let source = self.plan.source();
        let mut files: Vec<PathBuf> = list_data_files(&source.location)
            .await?
            .into_iter()
            .filter(|f| !self.state.processed.contains(&file_key(f)))
            .collect();
        if files.is_empty() {
            return Ok(false);
        }
        if let Some(max) = self.max_files {
            files.truncate(max);
        }

        let input = read_files(&files, source.format, &source.options, Some(&source.schema)).await?;
        let rows_in = input.num_rows();
        let output = self.plan.apply(input)?;
        let batch = self.state.next_batch;
        if output.num_rows() > 0 {
            write_part(
                &self.request.location,
                batch,
                self.request.format,
                &output,
                &self.request.options,
            )
            .await?;
        } else {
            warn!(query = %self.request.name, batch, "Micro-batch produced no rows");
        }

        self.state.next_batch += 1;
        self.state.processed.extend(files.iter().map(|f| file_key(f)));
        if let Some(dir) = &self.checkpoint_dir {
            self.state.save(dir).await?;
        }

        let rows_out = output.num_rows() as u64;
        let file_count = files.len() as u64;
        self.progress_tx.send_modify(|p| {
            p.batches += 1;
            p.rows += rows_out;
            p.files += file_count;
            p.last_batch_at = Some(Utc::now());
        });
        info!(
            query = %self.request.name,
            batch,
            files = files.len(),
            rows_in,
            rows_out,
            "Processed micro-batch"
        );
        Ok(true)
    }
}

fn file_key(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500 milliseconds"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2 seconds"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("1 minute"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("3 fortnights"), None);
    }

    #[test]
    fn test_trigger_from_options() {
        let default = Duration::from_millis(1000);
        assert_eq!(
            Trigger::from_options(&Options::new(), default).unwrap(),
            Trigger::ProcessingTime(default)
        );
        assert_eq!(
            Trigger::from_options(&Options::new().with("trigger", "availableNow"), default).unwrap(),
            Trigger::Once
        );
        assert_eq!(
            Trigger::from_options(&Options::new().with("processingTime", "2 seconds"), default)
                .unwrap(),
            Trigger::ProcessingTime(Duration::from_secs(2))
        );
        assert!(Trigger::from_options(&Options::new().with("trigger", "whenever"), default).is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let default = Duration::from_millis(1000);
        for value in ["0 ms", "0 seconds", "0"] {
            let err = Trigger::from_options(&Options::new().with("processingTime", value), default)
                .unwrap_err();
            assert!(
                matches!(err, EngineError::InvalidOption { ref key, .. } if key == "trigger"),
                "{value} should be rejected"
            );
        }
        let err = Trigger::from_options(&Options::new(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOption { .. }));
        assert_eq!(
            Trigger::from_options(&Options::new().with("trigger", "once"), Duration::ZERO).unwrap(),
            Trigger::Once
        );
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Checkpoint::load(dir.path()).await.unwrap(), None);
        let checkpoint = Checkpoint {
            next_batch: 3,
            processed: ["a.json".to_string()].into_iter().collect(),
        };
        checkpoint.save(&dir.path().join("cp")).await.unwrap();
        assert_eq!(
            Checkpoint::load(&dir.path().join("cp")).await.unwrap(),
            Some(checkpoint)
        );
    }
}
