//! Dataset handles passed between stages.
//!
//! A [`Dataset`] is either batch (a materialised [`Frame`]) or streaming (a
//! [`StreamPlan`]: a source description plus the operations to run on every
//! micro-batch). Functions are written once against [`Dataset::map_frames`]
//! and work in both modes.

use crate::engine::DataFormat;
use crate::error::FrameError;
use crate::frame::Frame;
use crate::options::Options;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Batch vs. streaming execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Batch,
    Streaming,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Batch => f.write_str("batch"),
            ExecutionMode::Streaming => f.write_str("streaming"),
        }
    }
}

/// An operation applied to a frame (eagerly for batch, per micro-batch for streams).
pub type FrameOp = Arc<dyn Fn(Frame) -> Result<Frame, FrameError> + Send + Sync>;

/// Where a streaming dataset's micro-batches come from.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSource {
    pub format: DataFormat,
    pub location: PathBuf,
    pub options: Options,
    pub schema: Schema,
}

/// A streaming source plus the ordered operations to apply to each micro-batch.
#[derive(Clone)]
pub struct StreamPlan {
    source: StreamSource,
    ops: Vec<FrameOp>,
    output_schema: Schema,
}

impl StreamPlan {
    pub fn new(source: StreamSource) -> Self {
        let output_schema = source.schema.clone();
        Self {
            source,
            ops: Vec::new(),
            output_schema,
        }
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// Run every operation over one decoded micro-batch.
    pub fn apply(&self, frame: Frame) -> Result<Frame, FrameError> {
        self.ops.iter().try_fold(frame, |acc, op| op(acc))
    }

    /// Append an operation. The operation is run once on an empty frame to
    /// validate it and derive the output schema.
    fn push(&self, op: FrameOp) -> Result<StreamPlan, FrameError> {
        let output_schema = op(Frame::empty(self.output_schema.clone()))?
            .schema()
            .clone();
        let mut ops = self.ops.clone();
        ops.push(op);
        Ok(StreamPlan {
            source: self.source.clone(),
            ops,
            output_schema,
        })
    }
}

impl fmt::Debug for StreamPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPlan")
            .field("source", &self.source)
            .field("ops", &self.ops.len())
            .field("output_schema", &self.output_schema)
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Batch(Arc<Frame>),
    Stream(Arc<StreamPlan>),
}

/// Handle to tabular data, tagged with a provenance name.
///
/// Cloning is cheap; the underlying data is shared and never mutated.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    payload: Payload,
}

impl Dataset {
    pub fn batch(name: impl Into<String>, frame: Frame) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Batch(Arc::new(frame)),
        }
    }

    pub fn stream(name: impl Into<String>, source: StreamSource) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Stream(Arc::new(StreamPlan::new(source))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ExecutionMode {
        match self.payload {
            Payload::Batch(_) => ExecutionMode::Batch,
            Payload::Stream(_) => ExecutionMode::Streaming,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.mode() == ExecutionMode::Streaming
    }

    pub fn schema(&self) -> &Schema {
        match &self.payload {
            Payload::Batch(frame) => frame.schema(),
            Payload::Stream(plan) => plan.output_schema(),
        }
    }

    /// The materialised frame of a batch dataset.
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        match &self.payload {
            Payload::Batch(frame) => Some(frame),
            Payload::Stream(_) => None,
        }
    }

    /// The plan of a streaming dataset.
    pub fn stream_plan(&self) -> Option<&Arc<StreamPlan>> {
        match &self.payload {
            Payload::Batch(_) => None,
            Payload::Stream(plan) => Some(plan),
        }
    }

    /// Same data under a different provenance name.
    pub fn renamed(&self, name: impl Into<String>) -> Dataset {
        Dataset {
            name: name.into(),
            payload: self.payload.clone(),
        }
    }

    /// Apply an operation: eagerly for batch data, appended to the plan for streams.
    pub fn map_frames(&self, op: FrameOp) -> Result<Dataset, FrameError> {
        let payload = match &self.payload {
            Payload::Batch(frame) => Payload::Batch(Arc::new(op(frame.as_ref().clone())?)),
            Payload::Stream(plan) => Payload::Stream(Arc::new(plan.push(op)?)),
        };
        Ok(Dataset {
            name: self.name.clone(),
            payload,
        })
    }
}
