//! The logical record model shared by the write and read paths.
//!
//! Every tablet holds a sequence of [`Record`]s. A record carries the
//! producer's step, the wall-clock time it was appended, and a [`Payload`]
//! whose variant matches the tablet's [`ComponentKind`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::numeric::{NumericKind, NumericValue};

/// The component kind a tag is bound to.
///
/// A tag keeps the kind it was first used with for the lifetime of the log.
/// Scalar and histogram kinds include the numeric width so that, for example,
/// an `f32` scalar tag cannot later be read as `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// One numeric value per record.
    Scalar(NumericKind),
    /// Binned value distributions.
    Histogram(NumericKind),
    /// Free text.
    Text,
    /// Reservoir-sampled image batches.
    Image,
    /// Reservoir-sampled audio batches.
    Audio,
    /// A single embedding table.
    Embedding,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => write!(f, "scalar<{kind}>"),
            Self::Histogram(kind) => write!(f, "histogram<{kind}>"),
            Self::Text => f.write_str("text"),
            Self::Image => f.write_str("image"),
            Self::Audio => f.write_str("audio"),
            Self::Embedding => f.write_str("embedding"),
        }
    }
}

/// One entry of a tablet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Producer step (or sampling period id for image/audio).
    pub step: i64,
    /// Milliseconds since the Unix epoch at append time.
    pub timestamp: i64,
    /// The typed payload.
    pub payload: Payload,
}

impl Record {
    /// Creates a record stamped with the current wall-clock time.
    pub fn now(step: i64, payload: Payload) -> Self {
        Self {
            step,
            timestamp: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }
}

/// The payload variants a record can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A single numeric value.
    Scalar(NumericValue),
    /// Histogram buckets in ascending order.
    Histogram(Vec<HistogramBucket>),
    /// A UTF-8 string.
    Text(String),
    /// The image samples retained by one sampling period.
    Image(Vec<BlobSample>),
    /// The audio samples retained by one sampling period.
    Audio(Vec<BlobSample>),
    /// An embedding table.
    Embedding(EmbeddingTable),
}

impl Payload {
    /// Whether this payload can be stored in a tablet of `kind`.
    ///
    /// Histogram payloads match if every bucket edge has the tablet's
    /// numeric kind.
    pub fn matches(&self, kind: ComponentKind) -> bool {
        match (self, kind) {
            (Self::Scalar(value), ComponentKind::Scalar(expected)) => value.kind() == expected,
            (Self::Histogram(buckets), ComponentKind::Histogram(expected)) => buckets
                .iter()
                .all(|b| b.left.kind() == expected && b.right.kind() == expected),
            (Self::Text(_), ComponentKind::Text)
            | (Self::Image(_), ComponentKind::Image)
            | (Self::Audio(_), ComponentKind::Audio)
            | (Self::Embedding(_), ComponentKind::Embedding) => true,
            _ => false,
        }
    }
}

/// One persisted histogram bucket, with edges tagged by numeric kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Left edge.
    pub left: NumericValue,
    /// Right edge.
    pub right: NumericValue,
    /// Number of values that fell into this bucket.
    pub frequency: i64,
}

/// One retained blob sample: shape (or audio params) plus flat data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobSample {
    /// Image shape `[width, height, channels]` or audio params
    /// `[sample_rate, sample_width, num_channels]`.
    pub shape: Vec<i64>,
    /// The flattened sample data.
    pub data: BlobData,
}

/// Flattened blob payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlobData {
    /// Float data (images).
    Floats(Vec<f32>),
    /// Raw bytes (audio frames).
    Bytes(Vec<u8>),
}

impl BlobData {
    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        match self {
            Self::Floats(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A matrix of embedding vectors with one label per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingTable {
    /// Row-major vectors; every row has the same dimension.
    pub embeddings: Vec<Vec<f32>>,
    /// `labels[i]` is the word embedded by `embeddings[i]`.
    pub labels: Vec<String>,
}
