//! Reservoir-sampled image and audio components.
//!
//! Producers offer far more images or clips than are worth keeping. A
//! [`BlobWriter`] keeps at most `num_samples` of them per sampling period
//! and appends the survivors as one record when the period ends. A period
//! is either driven explicitly with
//! [`start_sampling`](BlobWriter::start_sampling) /
//! [`finish_sampling`](BlobWriter::finish_sampling), or implicitly by
//! [`advance_to_step`](BlobWriter::advance_to_step), which closes the open
//! period once `step_cycle` producer steps have passed.

use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::component::ComponentReader;
use crate::config::{EmptyPeriodPolicy, validate_sampling};
use crate::error::{RecordError, Result};
use crate::record::{BlobData, BlobSample, ComponentKind, Payload, Record};
use crate::reservoir::ReservoirSampler;
use crate::tablet::{TabletSnapshot, TabletView};
use crate::writer::TabletHandle;

mod sealed {
    pub trait Sealed {}
}

/// The medium a blob component stores.
///
/// This trait is sealed; it is implemented by [`ImageMedium`] and
/// [`AudioMedium`].
pub trait Medium: sealed::Sealed {
    /// Component kind of the tablet.
    const KIND: ComponentKind;

    /// Element type of the flattened sample data.
    type Elem: Clone;

    /// Checks that `shape` describes `len` elements.
    fn shape_fits(shape: &[i64], len: usize) -> bool;

    /// Wraps flattened data for storage.
    fn wrap(data: Vec<Self::Elem>) -> BlobData;

    /// Unwraps stored data, or `None` if it holds the other element type.
    fn unwrap(data: &BlobData) -> Option<&[Self::Elem]>;

    /// Builds the payload for one period's samples.
    fn payload(samples: Vec<BlobSample>) -> Payload;

    /// The samples of a payload of this medium.
    fn samples(payload: &Payload) -> Option<&[BlobSample]>;
}

/// Float image tensors with shape `[width, height, channels]`.
#[derive(Debug, Clone, Copy)]
pub struct ImageMedium;

/// Raw audio frames with params `[sample_rate, sample_width, num_channels]`.
#[derive(Debug, Clone, Copy)]
pub struct AudioMedium;

impl sealed::Sealed for ImageMedium {}
impl sealed::Sealed for AudioMedium {}

impl Medium for ImageMedium {
    const KIND: ComponentKind = ComponentKind::Image;
    type Elem = f32;

    fn shape_fits(shape: &[i64], len: usize) -> bool {
        let mut elements: i64 = 1;
        for &dim in shape {
            if dim < 0 {
                return false;
            }
            match elements.checked_mul(dim) {
                Some(product) => elements = product,
                None => return false,
            }
        }
        usize::try_from(elements).is_ok_and(|elements| elements == len)
    }

    fn wrap(data: Vec<f32>) -> BlobData {
        BlobData::Floats(data)
    }

    fn unwrap(data: &BlobData) -> Option<&[f32]> {
        match data {
            BlobData::Floats(values) => Some(values),
            BlobData::Bytes(_) => None,
        }
    }

    fn payload(samples: Vec<BlobSample>) -> Payload {
        Payload::Image(samples)
    }

    fn samples(payload: &Payload) -> Option<&[BlobSample]> {
        match payload {
            Payload::Image(samples) => Some(samples),
            _ => None,
        }
    }
}

impl Medium for AudioMedium {
    const KIND: ComponentKind = ComponentKind::Audio;
    type Elem = u8;

    fn shape_fits(shape: &[i64], _len: usize) -> bool {
        shape.len() == 3 && shape.iter().all(|&param| param > 0)
    }

    fn wrap(data: Vec<u8>) -> BlobData {
        BlobData::Bytes(data)
    }

    fn unwrap(data: &BlobData) -> Option<&[u8]> {
        match data {
            BlobData::Bytes(bytes) => Some(bytes),
            BlobData::Floats(_) => None,
        }
    }

    fn payload(samples: Vec<BlobSample>) -> Payload {
        Payload::Audio(samples)
    }

    fn samples(payload: &Payload) -> Option<&[BlobSample]> {
        match payload {
            Payload::Audio(samples) => Some(samples),
            _ => None,
        }
    }
}

/// Image writer.
pub type Image = BlobWriter<ImageMedium>;

/// Audio writer.
pub type Audio = BlobWriter<AudioMedium>;

/// Image reader.
pub type ImageReader = BlobReader<ImageMedium>;

/// Audio reader.
pub type AudioReader = BlobReader<AudioMedium>;

/// Reservoir-sampling writer for one blob tag.
///
/// An open period is finished when the writer is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use vislog::LogWriter;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let writer = LogWriter::open("./logs", 0)?;
/// let mut images = writer.new_image("inputs", 4, 100)?;
///
/// for step in 0..1000 {
///     let pixels = vec![0.5f32; 28 * 28];
///     images.sample_at(step, &[28, 28, 1], &pixels)?;
/// }
/// images.finish_sampling()?;
/// writer.save()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BlobWriter<M: Medium> {
    tablet: TabletHandle,
    sampler: ReservoirSampler<BlobSample>,
    num_samples: usize,
    step_cycle: u64,
    empty_periods: EmptyPeriodPolicy,
    /// Step id of the open period.
    period_step: i64,
    /// Step id given to the next explicitly started period.
    next_step: i64,
    _medium: PhantomData<M>,
}

impl<M: Medium> BlobWriter<M> {
    /// Binds `tablet` as `M`, keeping `num_samples` samples per period of
    /// `step_cycle` steps.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`](crate::error::ConfigError::InvalidValue)
    ///   if `num_samples` or `step_cycle` is zero
    /// - [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    ///   if the tablet is bound to another kind
    pub fn new(tablet: TabletHandle, num_samples: usize, step_cycle: u64) -> Result<Self> {
        validate_sampling(num_samples, step_cycle)?;
        tablet.bind(M::KIND)?;

        let sampler = match tablet.sampling_seed() {
            Some(seed) => ReservoirSampler::with_seed(seed),
            None => ReservoirSampler::new(),
        };
        let next_step = tablet.last_step().map_or(0, |step| step.saturating_add(1));
        let empty_periods = tablet.empty_periods();

        Ok(Self {
            tablet,
            sampler,
            num_samples,
            step_cycle,
            empty_periods,
            period_step: next_step,
            next_step,
            _medium: PhantomData,
        })
    }

    /// Opens a sampling period with the next step id.
    ///
    /// Step ids of explicitly started periods count up by one from the last
    /// persisted period.
    ///
    /// # Errors
    ///
    /// Returns [`SamplingError::AlreadyActive`](crate::error::SamplingError::AlreadyActive)
    /// if a period is open.
    pub fn start_sampling(&mut self) -> Result<()> {
        self.start_period(self.next_step)
    }

    fn start_period(&mut self, step: i64) -> Result<()> {
        self.sampler.start_sampling(self.num_samples)?;
        self.period_step = step;
        Ok(())
    }

    /// Offers one candidate and returns the slot to store it in with
    /// [`set_sample`](Self::set_sample), or `None` to discard it.
    ///
    /// # Errors
    ///
    /// Returns [`SamplingError::NoActivePeriod`](crate::error::SamplingError::NoActivePeriod)
    /// if no period is open.
    pub fn index_of_sample_taken(&mut self) -> Result<Option<usize>> {
        self.sampler.index_of_sample_taken()
    }

    /// Stores a sample in the slot just returned by
    /// [`index_of_sample_taken`](Self::index_of_sample_taken).
    ///
    /// # Errors
    ///
    /// - [`RecordError::SampleShape`] if `shape` does not describe `data`
    /// - [`SamplingError::UnexpectedSlot`](crate::error::SamplingError::UnexpectedSlot)
    ///   if `slot` was not just handed out
    /// - [`SamplingError::NoActivePeriod`](crate::error::SamplingError::NoActivePeriod)
    pub fn set_sample(&mut self, slot: usize, shape: &[i64], data: &[M::Elem]) -> Result<()> {
        let sample = Self::build_sample(shape, data)?;
        self.sampler.set_sample(slot, sample)
    }

    /// Offers a candidate and stores it if sampled. Returns its slot.
    ///
    /// # Errors
    ///
    /// - [`RecordError::SampleShape`] if `shape` does not describe `data`
    /// - [`SamplingError::NoActivePeriod`](crate::error::SamplingError::NoActivePeriod)
    pub fn add_sample(&mut self, shape: &[i64], data: &[M::Elem]) -> Result<Option<usize>> {
        if !M::shape_fits(shape, data.len()) {
            return Err(shape_error(shape, data.len()));
        }
        let slot = self.sampler.index_of_sample_taken()?;
        if let Some(slot) = slot {
            self.sampler.set_sample(slot, Self::build_sample(shape, data)?)?;
        }
        Ok(slot)
    }

    fn build_sample(shape: &[i64], data: &[M::Elem]) -> Result<BlobSample> {
        if !M::shape_fits(shape, data.len()) {
            return Err(shape_error(shape, data.len()));
        }
        Ok(BlobSample {
            shape: shape.to_vec(),
            data: M::wrap(data.to_vec()),
        })
    }

    /// Closes the open period and appends its samples, in slot order, as
    /// one record.
    ///
    /// A period that retained nothing is skipped unless the writer was
    /// configured with [`EmptyPeriodPolicy::Persist`].
    ///
    /// # Errors
    ///
    /// - [`SamplingError::NoActivePeriod`](crate::error::SamplingError::NoActivePeriod)
    ///   if no period is open
    /// - [`RecordError::StepRegression`] if the period's step id precedes
    ///   the last appended period
    /// - [`StorageError`](crate::error::StorageError) if a triggered flush
    ///   fails
    pub fn finish_sampling(&mut self) -> Result<()> {
        let samples = self.sampler.finish_sampling()?;
        self.next_step = self.period_step.saturating_add(1);

        if samples.is_empty() && self.empty_periods == EmptyPeriodPolicy::Skip {
            debug!(
                tag = self.tablet.tag(),
                step = self.period_step,
                "skipping empty sampling period"
            );
            return Ok(());
        }

        self.tablet
            .append(Record::now(self.period_step, M::payload(samples)))
    }

    /// Moves the automatic period boundary to producer step `step`.
    ///
    /// If no period is open, one is started with step id `step`. If the open
    /// period started `step_cycle` or more steps before `step`, it is
    /// finished and a new one started at `step`.
    ///
    /// # Errors
    ///
    /// Errors from [`finish_sampling`](Self::finish_sampling).
    pub fn advance_to_step(&mut self, step: i64) -> Result<()> {
        if self.sampler.is_active() {
            let cycle = i64::try_from(self.step_cycle).unwrap_or(i64::MAX);
            if step < self.period_step.saturating_add(cycle) {
                return Ok(());
            }
            self.finish_sampling()?;
        }
        self.start_period(step)
    }

    /// Offers a candidate produced at `step`, rolling the period over as
    /// needed.
    ///
    /// # Errors
    ///
    /// Errors from [`advance_to_step`](Self::advance_to_step) and
    /// [`add_sample`](Self::add_sample).
    pub fn sample_at(&mut self, step: i64, shape: &[i64], data: &[M::Elem]) -> Result<Option<usize>> {
        self.advance_to_step(step)?;
        self.add_sample(shape, data)
    }

    /// Whether a sampling period is open.
    pub fn is_sampling(&self) -> bool {
        self.sampler.is_active()
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

    /// Reservoir capacity per period.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Producer steps per automatic period.
    pub fn step_cycle(&self) -> u64 {
        self.step_cycle
    }

    /// Number of persisted or buffered periods.
    pub fn num_records(&self) -> usize {
        self.tablet.num_records()
    }
}

impl<M: Medium> Drop for BlobWriter<M> {
    fn drop(&mut self) {
        if !self.sampler.is_active() {
            return;
        }
        if let Err(e) = self.finish_sampling() {
            warn!(
                tag = self.tablet.tag(),
                error = %e,
                "failed to finish open sampling period"
            );
        }
    }
}

fn shape_error(shape: &[i64], len: usize) -> crate::error::VislogError {
    RecordError::SampleShape {
        shape: shape.to_vec(),
        len,
    }
    .into()
}

/// One sample read back from a blob tablet.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRecord<E> {
    /// Flattened sample data.
    pub data: Vec<E>,
    /// Image shape or audio params.
    pub shape: Vec<i64>,
    /// Step id of the period the sample was retained in.
    pub step_id: i64,
}

/// Reads sampled periods of a blob tag.
#[derive(Debug, Clone)]
pub struct BlobReader<M: Medium> {
    view: TabletView,
    _medium: PhantomData<M>,
}

impl<M: Medium> BlobReader<M> {
    /// Wraps `view` as `M`.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet holds another kind.
    pub fn new(view: TabletView) -> Result<Self> {
        view.expect_kind(M::KIND)?;
        Ok(Self {
            view,
            _medium: PhantomData,
        })
    }

    fn samples(&self, offset: usize) -> Result<&[BlobSample]> {
        let record = self.view.record(offset)?;
        M::samples(&record.payload).ok_or_else(|| {
            self.view
                .corrupt(offset, format!("record is not {}", M::KIND))
                .into()
        })
    }

    /// Number of samples retained in period `offset`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::IndexOutOfRange`] if there is no such period
    /// - [`RecordError::Corrupt`] if the record is unreadable
    pub fn num_samples(&self, offset: usize) -> Result<usize> {
        Ok(self.samples(offset)?.len())
    }

    /// Sample `index` of period `offset`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::IndexOutOfRange`] if there is no such period or
    ///   sample
    /// - [`RecordError::Corrupt`] if the record is unreadable
    pub fn record(&self, offset: usize, index: usize) -> Result<BlobRecord<M::Elem>> {
        let samples = self.samples(offset)?;
        let sample = samples.get(index).ok_or(RecordError::IndexOutOfRange {
            index,
            len: samples.len(),
        })?;
        let data = M::unwrap(&sample.data).ok_or_else(|| {
            self.view
                .corrupt(offset, format!("sample {index} holds the wrong element type"))
        })?;

        Ok(BlobRecord {
            data: data.to_vec(),
            shape: sample.shape.clone(),
            step_id: self.view.record(offset)?.step,
        })
    }

    /// Append time of period `offset`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::IndexOutOfRange`] if there is no such period
    /// - [`RecordError::Corrupt`] if the record is unreadable
    pub fn timestamp(&self, offset: usize) -> Result<i64> {
        Ok(self.view.record(offset)?.timestamp)
    }
}

impl<M: Medium> ComponentReader for BlobReader<M> {
    fn view(&self) -> &TabletSnapshot {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use crate::error::ErrorKind;
    use crate::reader::LogReader;
    use crate::writer::LogWriter;
    use tempfile::tempdir;

    fn seeded_writer(path: &std::path::Path, empty_periods: EmptyPeriodPolicy) -> LogWriter {
        let config = WriterConfig {
            sampling_seed: Some(17),
            empty_periods,
            fsync: false,
            ..WriterConfig::default()
        };
        LogWriter::open_with_config(path, config).unwrap()
    }

    #[test]
    fn test_explicit_period_round_trip() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        let mut images = writer.new_image("inputs", 2, 10).unwrap();

        images.start_sampling().unwrap();
        for i in 0..2u8 {
            let slot = images.index_of_sample_taken().unwrap().unwrap();
            images
                .set_sample(slot, &[2, 1, 1], &[f32::from(i), 1.0])
                .unwrap();
        }
        images.finish_sampling().unwrap();
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        let images = reader.image("inputs").unwrap();
        assert_eq!(images.num_records(), 1);
        assert_eq!(images.num_samples(0).unwrap(), 2);

        let first = images.record(0, 0).unwrap();
        assert_eq!(first.data, vec![0.0, 1.0]);
        assert_eq!(first.shape, vec![2, 1, 1]);
        assert_eq!(first.step_id, 0);
        assert!(images.timestamp(0).is_ok());
        assert!(images.record(0, 2).is_err());
    }

    #[test]
    fn test_reservoir_keeps_capacity() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        let mut clips = writer.new_audio("speech", 3, 100).unwrap();

        clips.start_sampling().unwrap();
        for i in 0..50u8 {
            clips.add_sample(&[16_000, 2, 1], &[i; 4]).unwrap();
        }
        clips.finish_sampling().unwrap();
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        let clips = reader.audio("speech").unwrap();
        assert_eq!(clips.num_samples(0).unwrap(), 3);
        assert_eq!(clips.record(0, 1).unwrap().shape, vec![16_000, 2, 1]);
    }

    #[test]
    fn test_explicit_periods_count_up() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        let mut images = writer.new_image("inputs", 1, 1).unwrap();

        for _ in 0..3 {
            images.start_sampling().unwrap();
            images.add_sample(&[1], &[0.0]).unwrap();
            images.finish_sampling().unwrap();
        }
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        assert_eq!(reader.image("inputs").unwrap().ids().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_step_cycle_drives_periods() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        let mut images = writer.new_image("inputs", 2, 5).unwrap();

        for step in 0..12 {
            images.sample_at(step, &[1, 1, 1], &[0.25]).unwrap();
        }
        // Periods [0, 5) and [5, 10) are closed; [10, 12) is still open.
        assert_eq!(images.num_records(), 2);
        assert!(images.is_sampling());
        drop(images);
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        let images = reader.image("inputs").unwrap();
        assert_eq!(images.ids().unwrap(), vec![0, 5, 10]);
        assert_eq!(images.num_samples(0).unwrap(), 2);
        assert_eq!(images.num_samples(2).unwrap(), 2);
    }

    #[test]
    fn test_empty_period_policy() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        let mut images = writer.new_image("skipped", 2, 1).unwrap();
        images.start_sampling().unwrap();
        images.finish_sampling().unwrap();
        assert_eq!(images.num_records(), 0);

        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Persist);
        let mut images = writer.new_image("kept", 2, 1).unwrap();
        images.start_sampling().unwrap();
        images.finish_sampling().unwrap();
        assert_eq!(images.num_records(), 1);
    }

    #[test]
    fn test_sampling_state_errors() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        let mut images = writer.new_image("inputs", 2, 1).unwrap();

        let err = images.finish_sampling().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveSamplingPeriod);

        images.start_sampling().unwrap();
        let err = images.start_sampling().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SamplingAlreadyActive);
    }

    #[test]
    fn test_shape_must_describe_data() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        let mut images = writer.new_image("inputs", 2, 1).unwrap();
        images.start_sampling().unwrap();

        let err = images.add_sample(&[2, 2, 3], &[0.0; 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(images.add_sample(&[2, 2, 3], &[0.0; 12]).is_ok());

        let mut clips = writer.new_audio("speech", 2, 1).unwrap();
        clips.start_sampling().unwrap();
        assert!(clips.add_sample(&[16_000, 2], &[0; 8]).is_err());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let temp_dir = tempdir().unwrap();
        let writer = seeded_writer(temp_dir.path(), EmptyPeriodPolicy::Skip);
        assert!(writer.new_image("a", 0, 1).is_err());
        assert!(writer.new_audio("b", 1, 0).is_err());
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        fn run(path: &std::path::Path) -> Vec<f32> {
            let writer = seeded_writer(path, EmptyPeriodPolicy::Skip);
            let mut images = writer.new_image("inputs", 3, 1000).unwrap();
            images.start_sampling().unwrap();
            #[allow(clippy::cast_precision_loss)]
            for i in 0..200 {
                images.add_sample(&[1], &[i as f32]).unwrap();
            }
            images.finish_sampling().unwrap();
            writer.save().unwrap();

            let reader = LogReader::open(path).unwrap();
            let images = reader.image("inputs").unwrap();
            (0..3)
                .map(|i| images.record(0, i).unwrap().data[0])
                .collect()
        }

        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        assert_eq!(run(first.path()), run(second.path()));
    }
}
