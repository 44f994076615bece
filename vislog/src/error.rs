//! Error types for the vislog experiment-logging engine.

use thiserror::Error;

use crate::record::ComponentKind;

/// The main error type for all vislog operations.
///
/// Each variant wraps the error enum of one area of the engine. Callers that
/// need to branch on the failure (a binding layer translating errors into
/// host exceptions, for instance) should use [`VislogError::kind`] rather
/// than matching the nested enums.
#[derive(Error, Debug)]
pub enum VislogError {
    /// Error reading or writing persisted log state.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Error resolving or binding a tablet.
    #[error("tablet error: {0}")]
    Tablet(#[from] TabletError),

    /// Error in the reservoir sampling state machine.
    #[error("sampling error: {0}")]
    Sampling(#[from] SamplingError),

    /// Error binning histogram values.
    #[error("histogram error: {0}")]
    Histogram(#[from] HistogramError),

    /// Error appending or reading an individual record.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Invalid writer or component configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Discriminable error kind, independent of which area raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A reader requested a tag never written in the selected mode.
    UnknownTag,
    /// A tag was reused with a different component kind.
    TagKindMismatch,
    /// `start_sampling` was called while a period was already open.
    SamplingAlreadyActive,
    /// A sampling operation was called without an open period.
    NoActiveSamplingPeriod,
    /// A histogram was requested with zero buckets.
    InvalidBucketCount,
    /// The storage medium failed a read or write.
    IoFailure,
    /// Persisted data failed structural validation.
    CorruptRecord,
    /// An argument was rejected by validation.
    InvalidArgument,
}

impl VislogError {
    /// Returns the discriminable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(e) => e.kind(),
            Self::Tablet(e) => match e {
                TabletError::UnknownTag { .. } => ErrorKind::UnknownTag,
                TabletError::KindMismatch { .. } => ErrorKind::TagKindMismatch,
                TabletError::InvalidName { .. } => ErrorKind::InvalidArgument,
            },
            Self::Sampling(e) => match e {
                SamplingError::AlreadyActive => ErrorKind::SamplingAlreadyActive,
                SamplingError::NoActivePeriod => ErrorKind::NoActiveSamplingPeriod,
                SamplingError::UnexpectedSlot { .. } | SamplingError::InvalidCapacity => {
                    ErrorKind::InvalidArgument
                }
            },
            Self::Histogram(e) => match e {
                HistogramError::InvalidBucketCount { .. } => ErrorKind::InvalidBucketCount,
                HistogramError::NonFiniteValue { .. } => ErrorKind::InvalidArgument,
            },
            Self::Record(e) => match e {
                RecordError::Corrupt { .. } => ErrorKind::CorruptRecord,
                RecordError::IndexOutOfRange { .. }
                | RecordError::StepRegression { .. }
                | RecordError::SampleShape { .. }
                | RecordError::EmbeddingShape { .. } => ErrorKind::InvalidArgument,
            },
            Self::Config(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Errors raised while reading or writing the log directory.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The log directory could not be created or accessed.
    #[error("failed to access log directory '{path}': {source}")]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a persisted file.
    #[error("failed to read '{path}': {source}")]
    ReadFailed {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a persisted file.
    #[error("failed to write '{path}': {source}")]
    WriteFailed {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to sync a file to disk.
    #[error("failed to sync '{path}' to disk: {source}")]
    SyncFailed {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the index file.
    #[error("failed to serialize log index: {0}")]
    IndexSerialize(#[from] serde_json::Error),

    /// Failed to encode a record payload.
    #[error("failed to encode record for tag '{tag}': {source}")]
    RecordEncode {
        /// The tag whose record could not be encoded.
        tag: String,
        /// The underlying encoding error.
        #[source]
        source: postcard::Error,
    },

    /// The index file is corrupted or has an unsupported format.
    #[error("log index '{path}' is corrupted: {reason}")]
    CorruptedIndex {
        /// The index file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },
}

impl StorageError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::CorruptedIndex { .. } => ErrorKind::CorruptRecord,
            _ => ErrorKind::IoFailure,
        }
    }
}

/// Errors raised when resolving or binding tablets.
#[derive(Error, Debug)]
pub enum TabletError {
    /// The tag was never written in the selected mode.
    #[error("unknown tag '{tag}' in mode '{mode}'")]
    UnknownTag {
        /// The selected mode.
        mode: String,
        /// The requested tag.
        tag: String,
    },

    /// The tag is already bound to a different component kind.
    #[error("tag '{tag}' is registered as {registered}, not {requested}")]
    KindMismatch {
        /// The tag being bound.
        tag: String,
        /// The kind the tag was first used with.
        registered: ComponentKind,
        /// The kind that was requested.
        requested: ComponentKind,
    },

    /// A tag or mode name is not acceptable.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors raised by the reservoir sampler.
#[derive(Error, Debug)]
pub enum SamplingError {
    /// A sampling period is already open.
    #[error("a sampling period is already active")]
    AlreadyActive,

    /// No sampling period is open.
    #[error("no active sampling period")]
    NoActivePeriod,

    /// `set_sample` was called with a slot the sampler did not hand out.
    #[error("slot {slot} was not returned by the preceding index_of_sample_taken call (expected {expected:?})")]
    UnexpectedSlot {
        /// The slot passed by the caller.
        slot: usize,
        /// The slot the sampler is waiting for, if any.
        expected: Option<usize>,
    },

    /// The reservoir capacity must be at least one.
    #[error("reservoir capacity must be > 0")]
    InvalidCapacity,
}

/// Errors raised by histogram binning.
#[derive(Error, Debug)]
pub enum HistogramError {
    /// The bucket count must be positive.
    #[error("invalid bucket count: {count} (must be > 0)")]
    InvalidBucketCount {
        /// The rejected count.
        count: usize,
    },

    /// NaN or infinite values cannot be binned.
    #[error("value at position {position} is not finite")]
    NonFiniteValue {
        /// Position of the offending value in the input.
        position: usize,
    },
}

/// Errors raised when appending or reading records.
#[derive(Error, Debug)]
pub enum RecordError {
    /// A persisted record failed validation.
    #[error("record {index} of tag '{tag}' is corrupted: {reason}")]
    Corrupt {
        /// The tag the record belongs to.
        tag: String,
        /// The record's position in the tablet.
        index: usize,
        /// Description of the corruption.
        reason: String,
    },

    /// A record index past the end of the tablet.
    #[error("record index {index} out of range ({len} records)")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of records available.
        len: usize,
    },

    /// Records must be appended in non-decreasing step order.
    #[error("step {step} for tag '{tag}' precedes last appended step {last_step}")]
    StepRegression {
        /// The tag being appended to.
        tag: String,
        /// The rejected step.
        step: i64,
        /// The last step already in the tablet.
        last_step: i64,
    },

    /// A blob sample's shape does not describe its data.
    #[error("invalid sample shape {shape:?} for {len} elements")]
    SampleShape {
        /// The shape supplied with the sample.
        shape: Vec<i64>,
        /// Number of data elements supplied.
        len: usize,
    },

    /// Embedding input is inconsistent.
    #[error("invalid embedding: {reason}")]
    EmbeddingShape {
        /// Description of the inconsistency.
        reason: String,
    },
}

/// Errors raised when validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration field has an unacceptable value.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
}

/// Type alias for `Result<T, VislogError>`.
pub type Result<T> = std::result::Result<T, VislogError>;
