//! Typed component writers and readers.
//!
//! Each component binds a tablet to one [`ComponentKind`] and converts
//! between typed values and [`Record`](crate::record::Record) payloads:
//!
//! | Writer            | Reader               | Payload                 |
//! |-------------------|----------------------|-------------------------|
//! | [`Scalar<T>`]     | [`ScalarReader<T>`]  | one numeric value       |
//! | [`Histogram<T>`]  | [`HistogramReader<T>`] | binned distribution   |
//! | [`Text`]          | [`TextReader`]       | a string                |
//! | [`Image`]         | [`ImageReader`]      | sampled float tensors   |
//! | [`Audio`]         | [`AudioReader`]      | sampled byte clips      |
//! | [`Embedding`]     | [`EmbeddingReader`]  | one labelled matrix     |
//!
//! [`ComponentKind`]: crate::record::ComponentKind

mod blob;
mod embedding;
mod histogram;
mod scalar;
mod text;

pub use blob::{
    Audio, AudioMedium, AudioReader, BlobReader, BlobRecord, BlobWriter, Image, ImageMedium,
    ImageReader, Medium,
};
pub use embedding::{Embedding, EmbeddingReader};
pub use histogram::{Histogram, HistogramReader, HistogramRecord};
pub use scalar::{Scalar, ScalarReader};
pub use text::{Text, TextReader};

use crate::error::Result;
use crate::tablet::TabletSnapshot;

/// Accessors shared by every typed reader.
pub trait ComponentReader {
    /// The snapshot being read.
    fn view(&self) -> &TabletSnapshot;

    /// The tag name.
    fn tag(&self) -> &str {
        self.view().tag()
    }

    /// The display caption.
    fn caption(&self) -> &str {
        self.view().caption()
    }

    /// Number of records.
    fn num_records(&self) -> usize {
        self.view().num_records()
    }

    /// Step of every record, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`](crate::error::RecordError::Corrupt)
    /// if any record is unreadable.
    fn ids(&self) -> Result<Vec<i64>> {
        self.view().records().map(|r| r.map(|r| r.step)).collect()
    }

    /// Append time of every record in milliseconds since the Unix epoch.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`](crate::error::RecordError::Corrupt)
    /// if any record is unreadable.
    fn timestamps(&self) -> Result<Vec<i64>> {
        self.view().records().map(|r| r.map(|r| r.timestamp)).collect()
    }
}
