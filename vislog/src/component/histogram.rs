//! Histogram components.
//!
//! Each appended batch is binned into equal-width buckets before it is stored.

use std::marker::PhantomData;

use crate::component::ComponentReader;
use crate::error::{HistogramError, RecordError, Result};
use crate::histogram::{Instance, bin};
use crate::numeric::Numeric;
use crate::record::{ComponentKind, Payload, Record};
use crate::tablet::{TabletSnapshot, TabletView};
use crate::writer::TabletHandle;

/// Bins a batch of values per step and appends the buckets.
#[derive(Debug)]
pub struct Histogram<T> {
    tablet: TabletHandle,
    num_buckets: usize,
    _value: PhantomData<fn(T)>,
}

impl<T: Numeric> Histogram<T> {
    /// Binds `tablet` as a histogram of `T` with `num_buckets` buckets.
    ///
    /// # Errors
    ///
    /// - [`HistogramError::InvalidBucketCount`] if `num_buckets` is zero
    /// - [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    ///   if the tablet is bound to another kind
    pub fn new(tablet: TabletHandle, num_buckets: usize) -> Result<Self> {
        if num_buckets == 0 {
            return Err(HistogramError::InvalidBucketCount { count: num_buckets }.into());
        }
        tablet.bind(ComponentKind::Histogram(T::KIND))?;
        Ok(Self {
            tablet,
            num_buckets,
            _value: PhantomData,
        })
    }

    /// Bins `values` and appends the buckets at `step`.
    ///
    /// An empty batch appends a histogram with no buckets.
    ///
    /// # Errors
    ///
    /// - [`HistogramError::NonFiniteValue`] if a value is NaN or infinite
    /// - [`RecordError::StepRegression`] if `step` precedes the last
    ///   appended step
    /// - [`StorageError`](crate::error::StorageError) if a triggered flush
    ///   fails
    pub fn add_record(&self, step: i64, values: &[T]) -> Result<()> {
        let buckets = bin(values, self.num_buckets)?
            .iter()
            .map(Instance::to_bucket)
            .collect();
        self.tablet
            .append(Record::now(step, Payload::Histogram(buckets)))
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

    /// The configured bucket count.
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Number of records, flushed or buffered.
    pub fn num_records(&self) -> usize {
        self.tablet.num_records()
    }
}

/// One persisted histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramRecord<T> {
    /// Producer step.
    pub step: i64,
    /// Append time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Buckets in ascending order.
    pub instances: Vec<Instance<T>>,
}

impl<T: Copy> HistogramRecord<T> {
    /// Number of buckets.
    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Bucket `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::IndexOutOfRange`] if there is no such bucket.
    pub fn instance(&self, index: usize) -> Result<Instance<T>> {
        self.instances.get(index).copied().ok_or_else(|| {
            RecordError::IndexOutOfRange {
                index,
                len: self.instances.len(),
            }
            .into()
        })
    }
}

/// Reads a histogram series.
#[derive(Debug, Clone)]
pub struct HistogramReader<T> {
    view: TabletView,
    _value: PhantomData<fn() -> T>,
}

impl<T: Numeric> HistogramReader<T> {
    /// Wraps `view` as a histogram of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet holds another kind.
    pub fn new(view: TabletView) -> Result<Self> {
        view.expect_kind(ComponentKind::Histogram(T::KIND))?;
        Ok(Self {
            view,
            _value: PhantomData,
        })
    }

    /// Histogram `index`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::IndexOutOfRange`]
    /// - [`RecordError::Corrupt`] if the record is unreadable
    pub fn record(&self, index: usize) -> Result<HistogramRecord<T>> {
        let record = self.view.record(index)?;
        let Payload::Histogram(buckets) = &record.payload else {
            return Err(self
                .view
                .corrupt(index, "record is not a histogram".to_string())
                .into());
        };

        let instances = buckets
            .iter()
            .map(Instance::from_bucket)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                self.view
                    .corrupt(index, format!("bucket edges are not {}", T::KIND))
            })?;

        Ok(HistogramRecord {
            step: record.step,
            timestamp: record.timestamp,
            instances,
        })
    }

    /// Every histogram, in step order.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`] if any record is unreadable.
    pub fn records(&self) -> Result<Vec<HistogramRecord<T>>> {
        (0..self.view.num_records())
            .map(|index| self.record(index))
            .collect()
    }
}

impl<T> ComponentReader for HistogramReader<T> {
    fn view(&self) -> &TabletSnapshot {
        &self.view
    }
}
