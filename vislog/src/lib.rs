//! # vislog
//!
//! Embedded multi-modal experiment-logging storage engine.
//!
//! vislog records what a training run produces (scalar curves, value
//! distributions, text notes, sampled images and audio clips, embedding
//! tables) into a log directory that visualization tools read back while
//! the run is still going.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Records are grouped by mode (`train`, `test`, ...) and tag (`loss`, ...)
//! - Every tag is bound to one typed component for the lifetime of the log
//! - Image and audio streams are reservoir-sampled to a fixed budget per period
//! - Flushes are all-or-nothing: readers never observe a half-written flush
//! - Corrupted records are reported individually instead of failing the load
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vislog::{ComponentReader, LogReader, LogWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Write a loss curve in the "train" mode
//! let mut writer = LogWriter::open("./run_logs", 100)?;
//! writer.set_mode("train")?;
//! let loss = writer.new_scalar::<f32>("loss")?;
//! loss.add_record(0, 0.9)?;
//! loss.add_record(1, 0.5)?;
//! writer.save()?;
//!
//! // Read it back
//! let mut reader = LogReader::open("./run_logs")?;
//! reader.set_mode("train")?;
//! let loss = reader.scalar::<f32>("loss")?;
//! assert_eq!(loss.records()?, vec![0.9, 0.5]);
//! assert_eq!(loss.ids()?, vec![0, 1]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`LogWriter`]: Opens a directory for writing, hands out tablets and components
//! - [`LogReader`]: Read-only snapshot of a directory
//! - [`TabletLookup`]: Mode and tag enumeration shared by both
//! - [`ModeGuard`]: Scoped mode selection from `with_mode`
//! - [`component`]: Typed writers and readers for each record kind
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`writer`]: Writer lifecycle, tablet handles, flush cadence
//! - [`reader`]: Reader lifecycle and typed getters
//! - [`index`]: Mode/tag index and mode selection
//! - [`tablet`]: Writer-side tablets and reader-side snapshots
//! - [`storage`]: Directory layout, flush protocol, segment loading
//! - [`codec`]: Checksummed record frames
//! - [`histogram`]: Histogram binning
//! - [`reservoir`]: Reservoir sampling
//! - [`record`]: Record and payload model
//! - [`numeric`]: Supported numeric types
//! - [`config`]: Writer configuration
//! - [`error`]: Error types

pub mod codec;
pub mod component;
pub mod config;
pub mod error;
pub mod histogram;
pub mod index;
pub mod numeric;
pub mod reader;
pub mod record;
pub mod reservoir;
pub mod storage;
pub mod tablet;
pub mod writer;

// Re-export primary API types at crate root for convenience.
pub use component::{
    Audio, AudioReader, ComponentReader, Embedding, EmbeddingReader, Histogram, HistogramReader,
    Image, ImageReader, Scalar, ScalarReader, Text, TextReader,
};
pub use config::{EmptyPeriodPolicy, WriterConfig};
pub use error::{ErrorKind, Result, VislogError};
pub use index::{DEFAULT_MODE, ModeGuard, TabletLookup};
pub use numeric::Numeric;
pub use reader::LogReader;
pub use record::ComponentKind;
pub use writer::{LogWriter, TabletHandle};
