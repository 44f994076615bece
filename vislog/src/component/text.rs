//! Text components: one string per step.

use crate::component::ComponentReader;
use crate::error::Result;
use crate::record::{ComponentKind, Payload, Record};
use crate::tablet::{TabletSnapshot, TabletView};
use crate::writer::TabletHandle;

/// Writes one string per step.
#[derive(Debug)]
pub struct Text {
    tablet: TabletHandle,
}

impl Text {
    /// Binds `tablet` as text.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet is bound to another kind.
    pub fn new(tablet: TabletHandle) -> Result<Self> {
        tablet.bind(ComponentKind::Text)?;
        Ok(Self { tablet })
    }

    /// Appends `text` at `step`.
    ///
    /// # Errors
    ///
    /// Same as [`Scalar::add_record`](crate::component::Scalar::add_record).
    pub fn add_record(&self, step: i64, text: &str) -> Result<()> {
        self.tablet
            .append(Record::now(step, Payload::Text(text.to_string())))
    }

    /// Sets the caption shown for this tag.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::UnknownTag`](crate::error::TabletError::UnknownTag)
    /// if the tablet no longer exists.
    pub fn set_caption(&self, caption: &str) -> Result<()> {
        self.tablet.set_caption(caption)
    }

    /// Number of records, flushed or buffered.
    pub fn num_records(&self) -> usize {
        self.tablet.num_records()
    }
}

/// Reads a text series.
#[derive(Debug, Clone)]
pub struct TextReader {
    view: TabletView,
}

impl TextReader {
    /// Wraps `view` as text.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet holds another kind.
    pub fn new(view: TabletView) -> Result<Self> {
        view.expect_kind(ComponentKind::Text)?;
        Ok(Self { view })
    }

    /// Text of record `index`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::IndexOutOfRange`](crate::error::RecordError::IndexOutOfRange)
    /// - [`RecordError::Corrupt`](crate::error::RecordError::Corrupt)
    pub fn record(&self, index: usize) -> Result<String> {
        match &self.view.record(index)?.payload {
            Payload::Text(text) => Ok(text.clone()),
            _ => Err(self
                .view
                .corrupt(index, "record is not text".to_string())
                .into()),
        }
    }

    /// Every string, in step order.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`](crate::error::RecordError::Corrupt)
    /// if any record is unreadable.
    pub fn records(&self) -> Result<Vec<String>> {
        (0..self.view.num_records())
            .map(|index| self.record(index))
            .collect()
    }

    /// Number of records.
    pub fn total_records(&self) -> usize {
        self.view.num_records()
    }

    /// Same as [`total_records`](Self::total_records).
    pub fn size(&self) -> usize {
        self.total_records()
    }
}

impl ComponentReader for TextReader {
    fn view(&self) -> &TabletSnapshot {
        &self.view
    }
}
