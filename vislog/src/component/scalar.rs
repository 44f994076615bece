//! Scalar components: one numeric value per step.

use std::marker::PhantomData;

use crate::component::ComponentReader;
use crate::error::Result;
use crate::numeric::Numeric;
use crate::record::{ComponentKind, Payload, Record};
use crate::tablet::{TabletSnapshot, TabletView};
use crate::writer::TabletHandle;

/// Writes one numeric value per step.
#[derive(Debug)]
pub struct Scalar<T> {
    tablet: TabletHandle,
    _value: PhantomData<fn(T)>,
}

impl<T: Numeric> Scalar<T> {
    /// Binds `tablet` as a scalar of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet is bound to another kind, including a scalar of a
    /// different width.
    pub fn new(tablet: TabletHandle) -> Result<Self> {
        tablet.bind(ComponentKind::Scalar(T::KIND))?;
        Ok(Self {
            tablet,
            _value: PhantomData,
        })
    }

    /// Appends `value` at `step`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::StepRegression`](crate::error::RecordError::StepRegression)
    ///   if `step` precedes the last appended step
    /// - [`StorageError`](crate::error::StorageError) if a triggered flush
    ///   fails
    pub fn add_record(&self, step: i64, value: T) -> Result<()> {
        self.tablet
            .append(Record::now(step, Payload::Scalar(value.into_value())))
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

    /// The underlying tablet.
    pub fn tablet(&self) -> &TabletHandle {
        &self.tablet
    }
}

/// Reads a scalar series.
#[derive(Debug, Clone)]
pub struct ScalarReader<T> {
    view: TabletView,
    _value: PhantomData<fn() -> T>,
}

impl<T: Numeric> ScalarReader<T> {
    /// Wraps `view` as a scalar of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet holds another kind.
    pub fn new(view: TabletView) -> Result<Self> {
        view.expect_kind(ComponentKind::Scalar(T::KIND))?;
        Ok(Self {
            view,
            _value: PhantomData,
        })
    }

    /// Value of record `index`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::IndexOutOfRange`](crate::error::RecordError::IndexOutOfRange)
    /// - [`RecordError::Corrupt`](crate::error::RecordError::Corrupt) if the
    ///   record is unreadable
    pub fn record(&self, index: usize) -> Result<T> {
        let record = self.view.record(index)?;
        match record.payload {
            Payload::Scalar(value) => T::from_value(value).ok_or_else(|| {
                self.view
                    .corrupt(index, format!("expected {} value, found {}", T::KIND, value.kind()))
                    .into()
            }),
            _ => Err(self
                .view
                .corrupt(index, "record is not a scalar".to_string())
                .into()),
        }
    }

    /// Every value, in step order.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`](crate::error::RecordError::Corrupt)
    /// if any record is unreadable.
    pub fn records(&self) -> Result<Vec<T>> {
        (0..self.view.num_records())
            .map(|index| self.record(index))
            .collect()
    }
}

impl<T> ComponentReader for ScalarReader<T> {
    fn view(&self) -> &TabletSnapshot {
        &self.view
    }
}
