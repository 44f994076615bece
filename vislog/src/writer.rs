//! The write side of a log directory.
//!
//! A [`LogWriter`] owns the buffered state of every tablet in a directory.
//! Tablets are acquired as [`TabletHandle`]s, which component writers wrap
//! to append typed records. Handles share the writer's state, so a
//! component keeps working after the writer value that created it is gone;
//! the state is flushed one last time when the final handle is dropped.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::component::{Audio, Embedding, Histogram, Image, Scalar, Text};
use crate::config::{EmptyPeriodPolicy, WriterConfig};
use crate::error::{Result, TabletError};
use crate::index::{DEFAULT_MODE, ModeGuard, ModeIndex, ModeSelect, TabletLookup, validate_name};
use crate::numeric::Numeric;
use crate::record::{ComponentKind, Record};
use crate::storage::{FlushStats, LogDirectory};
use crate::tablet::Tablet;

/// State shared by a writer and every handle it has given out.
#[derive(Debug)]
struct WriterCore {
    dir: LogDirectory,
    tablets: ModeIndex<Tablet>,
    config: WriterConfig,
    /// Records appended since the last successful flush.
    unflushed: usize,
    /// Whether tablet metadata changed since the last successful flush.
    dirty: bool,
}

impl WriterCore {
    fn tablet_mut(&mut self, mode: &str, tag: &str) -> Result<&mut Tablet> {
        self.tablets
            .get_mut(mode, tag)
            .ok_or_else(|| unknown_tag(mode, tag))
    }

    fn flush(&mut self) -> Result<FlushStats> {
        let stats = self.dir.flush(&mut self.tablets)?;
        self.unflushed = 0;
        self.dirty = false;
        Ok(stats)
    }

    /// Counts an appended record, flushing once `sync_cycle` are buffered.
    fn record_appended(&mut self) -> Result<()> {
        self.unflushed += 1;
        if self.config.sync_cycle > 0 && self.unflushed >= self.config.sync_cycle {
            self.flush()?;
        }
        Ok(())
    }
}

impl Drop for WriterCore {
    fn drop(&mut self) {
        if self.unflushed == 0 && !self.dirty {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(
                path = %self.dir.path().display(),
                error = %e,
                "final flush of log writer failed"
            );
        }
    }
}

fn unknown_tag(mode: &str, tag: &str) -> crate::error::VislogError {
    TabletError::UnknownTag {
        mode: mode.to_string(),
        tag: tag.to_string(),
    }
    .into()
}

/// Writer for one log directory.
///
/// Cloning a writer yields a second writer over the same buffered state
/// with its own selected mode.
///
/// # Example
///
/// ```rust,no_run
/// use vislog::LogWriter;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut writer = LogWriter::open("./logs", 100)?;
/// writer.set_mode("train")?;
///
/// let loss = writer.new_scalar::<f32>("loss")?;
/// loss.add_record(0, 0.9)?;
/// loss.add_record(1, 0.5)?;
///
/// writer.save()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LogWriter {
    core: Arc<Mutex<WriterCore>>,
    mode: String,
}

impl LogWriter {
    /// Opens `dir` for writing with default configuration and the given
    /// sync cycle.
    ///
    /// # Arguments
    ///
    /// * `dir` - Log directory; created if it does not exist
    /// * `sync_cycle` - Appended records between automatic flushes, `0` to
    ///   flush only on [`save`](Self::save)
    ///
    /// # Errors
    ///
    /// See [`open_with_config`](Self::open_with_config).
    pub fn open<P: AsRef<Path>>(dir: P, sync_cycle: usize) -> Result<Self> {
        Self::open_with_config(dir, WriterConfig::with_sync_cycle(sync_cycle))
    }

    /// Opens `dir` for writing.
    ///
    /// If the directory already holds a log, its tablets are resumed:
    /// later records are appended after the persisted ones, and each tag
    /// keeps the component kind it was bound to.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`](crate::error::ConfigError::InvalidValue)
    ///   if the configuration is invalid
    /// - [`StorageError`](crate::error::StorageError) if the directory
    ///   cannot be created or its index cannot be read
    pub fn open_with_config<P: AsRef<Path>>(dir: P, config: WriterConfig) -> Result<Self> {
        config.validate()?;
        let dir = LogDirectory::create(dir, config.fsync)?;
        let tablets = dir.load_tablets()?;

        info!(
            path = %dir.path().display(),
            tablets = tablets.len(),
            sync_cycle = config.sync_cycle,
            "opened log writer"
        );

        Ok(Self {
            core: Arc::new(Mutex::new(WriterCore {
                dir,
                tablets,
                config,
                unflushed: 0,
                dirty: false,
            })),
            mode: DEFAULT_MODE.to_string(),
        })
    }

    /// Selects the mode subsequent tablets are added to, creating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::InvalidName`] if `mode` is empty.
    pub fn set_mode(&mut self, mode: &str) -> Result<()> {
        validate_name(mode)?;
        self.swap_mode(mode.to_string());
        Ok(())
    }

    /// Selects `mode` until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::InvalidName`] if `mode` is empty.
    pub fn with_mode(&mut self, mode: &str) -> Result<ModeGuard<'_, Self>> {
        ModeGuard::new(self, mode)
    }

    /// Creates a tablet for `tag` in the selected mode, or returns the
    /// existing one.
    ///
    /// The tablet is bound to a component kind when a component writer is
    /// built on it.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::InvalidName`] if `tag` is empty.
    pub fn add_tablet(&self, tag: &str) -> Result<TabletHandle> {
        validate_name(tag)?;
        let mut core = self.core.lock();
        let (_, created) = core
            .tablets
            .get_or_insert_with(&self.mode, tag, |_, _| Tablet::new(tag));
        if created {
            core.dirty = true;
        }
        Ok(self.handle(tag))
    }

    /// Returns the existing tablet for `tag` in the selected mode.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::UnknownTag`] if the tag has not been added.
    pub fn tablet(&self, tag: &str) -> Result<TabletHandle> {
        if self.core.lock().tablets.get(&self.mode, tag).is_none() {
            return Err(unknown_tag(&self.mode, tag));
        }
        Ok(self.handle(tag))
    }

    fn handle(&self, tag: &str) -> TabletHandle {
        TabletHandle {
            core: Arc::clone(&self.core),
            mode: self.mode.clone(),
            tag: tag.to_string(),
        }
    }

    /// Flushes every buffered record and tablet change to disk.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`](crate::error::StorageError) if the flush
    /// fails. Nothing from this flush becomes visible to readers in that
    /// case, and the buffered records are kept for the next attempt.
    pub fn save(&self) -> Result<FlushStats> {
        self.core.lock().flush()
    }

    /// The log directory.
    pub fn path(&self) -> PathBuf {
        self.core.lock().dir.path().to_path_buf()
    }

    /// The configuration the writer was opened with.
    pub fn config(&self) -> WriterConfig {
        self.core.lock().config.clone()
    }

    /// Creates a scalar writer for `tag`.
    ///
    /// # Errors
    ///
    /// - [`TabletError::InvalidName`] if `tag` is empty
    /// - [`TabletError::KindMismatch`] if `tag` is bound to another kind
    pub fn new_scalar<T: Numeric>(&self, tag: &str) -> Result<Scalar<T>> {
        Scalar::new(self.add_tablet(tag)?)
    }

    /// Creates a histogram writer for `tag` binning into `num_buckets`.
    ///
    /// # Errors
    ///
    /// - [`HistogramError::InvalidBucketCount`](crate::error::HistogramError::InvalidBucketCount)
    ///   if `num_buckets` is zero
    /// - [`TabletError::KindMismatch`] if `tag` is bound to another kind
    pub fn new_histogram<T: Numeric>(&self, tag: &str, num_buckets: usize) -> Result<Histogram<T>> {
        Histogram::new(self.add_tablet(tag)?, num_buckets)
    }

    /// Creates a text writer for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`] if `tag` is bound to another
    /// kind.
    pub fn new_text(&self, tag: &str) -> Result<Text> {
        Text::new(self.add_tablet(tag)?)
    }

    /// Creates an image writer for `tag` keeping `num_samples` images per
    /// period of `step_cycle` steps.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`](crate::error::ConfigError::InvalidValue)
    ///   if `num_samples` or `step_cycle` is zero
    /// - [`TabletError::KindMismatch`] if `tag` is bound to another kind
    pub fn new_image(&self, tag: &str, num_samples: usize, step_cycle: u64) -> Result<Image> {
        Image::new(self.add_tablet(tag)?, num_samples, step_cycle)
    }

    /// Creates an audio writer for `tag` keeping `num_samples` clips per
    /// period of `step_cycle` steps.
    ///
    /// # Errors
    ///
    /// Same as [`new_image`](Self::new_image).
    pub fn new_audio(&self, tag: &str, num_samples: usize, step_cycle: u64) -> Result<Audio> {
        Audio::new(self.add_tablet(tag)?, num_samples, step_cycle)
    }

    /// Creates an embedding writer for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`] if `tag` is bound to another
    /// kind.
    pub fn new_embedding(&self, tag: &str) -> Result<Embedding> {
        Embedding::new(self.add_tablet(tag)?)
    }
}

impl ModeSelect for LogWriter {
    fn swap_mode(&mut self, mode: String) -> String {
        let mut core = self.core.lock();
        let known = core.tablets.mode_position(&mode).is_some();
        if !known {
            core.tablets.ensure_mode(&mode);
            core.dirty = true;
        }
        drop(core);
        std::mem::replace(&mut self.mode, mode)
    }
}

impl TabletLookup for LogWriter {
    fn mode(&self) -> String {
        self.mode.clone()
    }

    fn modes(&self) -> Vec<String> {
        let core = self.core.lock();
        let mut modes: Vec<String> = core.tablets.modes().map(str::to_string).collect();
        if !modes.contains(&self.mode) {
            modes.push(self.mode.clone());
        }
        modes
    }

    fn tags(&self) -> Vec<String> {
        self.core
            .lock()
            .tablets
            .tags(&self.mode)
            .map(str::to_string)
            .collect()
    }

    fn kind_of(&self, tag: &str) -> Result<Option<ComponentKind>> {
        self.core
            .lock()
            .tablets
            .get(&self.mode, tag)
            .map(Tablet::kind)
            .ok_or_else(|| unknown_tag(&self.mode, tag))
    }
}

/// Writer-side handle to one tablet.
///
/// Handles to the same mode and tag compare equal. Every operation locks the
/// writer state for its duration.
#[derive(Clone)]
pub struct TabletHandle {
    core: Arc<Mutex<WriterCore>>,
    mode: String,
    tag: String,
}

impl TabletHandle {
    fn with_tablet<R>(&self, f: impl FnOnce(&mut Tablet) -> R) -> Result<R> {
        let mut core = self.core.lock();
        Ok(f(core.tablet_mut(&self.mode, &self.tag)?))
    }

    /// The tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The mode the tablet belongs to.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// The bound component kind, or `None` if no component claimed the tag.
    pub fn kind(&self) -> Option<ComponentKind> {
        self.with_tablet(|t| t.kind()).ok().flatten()
    }

    /// The display caption.
    pub fn caption(&self) -> String {
        self.with_tablet(|t| t.caption().to_string())
            .unwrap_or_default()
    }

    /// Number of records, flushed or buffered.
    pub fn num_records(&self) -> usize {
        self.with_tablet(|t| t.num_records()).unwrap_or_default()
    }

    /// Step of the most recent record, flushed or buffered.
    pub fn last_step(&self) -> Option<i64> {
        self.with_tablet(|t| t.last_step()).ok().flatten()
    }

    /// Replaces the display caption.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::UnknownTag`] if the tablet no longer exists.
    pub fn set_caption(&self, caption: &str) -> Result<()> {
        let mut core = self.core.lock();
        core.tablet_mut(&self.mode, &self.tag)?.set_caption(caption);
        core.dirty = true;
        Ok(())
    }

    /// Binds the tablet to `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`] if the tablet is bound to a
    /// different kind.
    pub fn bind(&self, kind: ComponentKind) -> Result<()> {
        let mut core = self.core.lock();
        let tablet = core.tablet_mut(&self.mode, &self.tag)?;
        if tablet.kind().is_none() {
            tablet.bind(kind)?;
            core.dirty = true;
            return Ok(());
        }
        tablet.bind(kind)
    }

    /// Appends a record, flushing if the sync cycle is reached.
    ///
    /// If the triggered flush fails the error is returned, but the record
    /// stays buffered and is written by the next successful flush.
    ///
    /// # Errors
    ///
    /// - [`RecordError::StepRegression`](crate::error::RecordError::StepRegression)
    ///   if `record.step` precedes the last appended step
    /// - [`StorageError`](crate::error::StorageError) if a triggered flush
    ///   fails
    pub fn append(&self, record: Record) -> Result<()> {
        let mut core = self.core.lock();
        core.tablet_mut(&self.mode, &self.tag)?.append(record)?;
        core.record_appended()
    }

    /// Replaces every record of the tablet with `record`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`](crate::error::StorageError) if a
    /// triggered flush fails.
    pub fn replace(&self, record: Record) -> Result<()> {
        let mut core = self.core.lock();
        core.tablet_mut(&self.mode, &self.tag)?.replace_with(record);
        core.record_appended()
    }

    /// Seed for this tablet's sampler, derived from the configured seed.
    pub(crate) fn sampling_seed(&self) -> Option<u64> {
        let seed = self.core.lock().config.sampling_seed?;
        let mut hasher = DefaultHasher::new();
        self.mode.hash(&mut hasher);
        self.tag.hash(&mut hasher);
        Some(seed ^ hasher.finish())
    }

    /// What to do with sampling periods that retained nothing.
    pub(crate) fn empty_periods(&self) -> EmptyPeriodPolicy {
        self.core.lock().config.empty_periods
    }
}

impl PartialEq for TabletHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core) && self.mode == other.mode && self.tag == other.tag
    }
}

impl Eq for TabletHandle {}

impl fmt::Debug for TabletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabletHandle")
            .field("mode", &self.mode)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::numeric::{NumericKind, NumericValue};
    use crate::record::Payload;
    use crate::storage::INDEX_FILE;
    use tempfile::tempdir;

    fn scalar(step: i64) -> Record {
        Record::now(step, Payload::Scalar(NumericValue::F32(1.0)))
    }

    const F32: ComponentKind = ComponentKind::Scalar(NumericKind::F32);

    #[test]
    fn test_add_tablet_returns_same_tablet() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();

        let first = writer.add_tablet("loss").unwrap();
        let second = writer.add_tablet("loss").unwrap();
        assert_eq!(first, second);
        assert_eq!(writer.tags(), vec!["loss".to_string()]);

        first.bind(F32).unwrap();
        first.append(scalar(0)).unwrap();
        assert_eq!(second.num_records(), 1);
    }

    #[test]
    fn test_kind_mismatch_on_rebind() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();

        writer.add_tablet("loss").unwrap().bind(F32).unwrap();
        let err = writer
            .add_tablet("loss")
            .unwrap()
            .bind(ComponentKind::Text)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TagKindMismatch);
        assert_eq!(writer.kind_of("loss").unwrap(), Some(F32));
    }

    #[test]
    fn test_modes_isolate_tags() {
        let temp_dir = tempdir().unwrap();
        let mut writer = LogWriter::open(temp_dir.path(), 0).unwrap();

        writer.set_mode("train").unwrap();
        writer.add_tablet("loss").unwrap();
        writer.set_mode("test").unwrap();

        let err = writer.tablet("loss").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTag);
        assert!(writer.tags().is_empty());
        assert_eq!(
            writer.modes(),
            vec!["train".to_string(), "test".to_string()]
        );
    }

    #[test]
    fn test_with_mode_restores_previous() {
        let temp_dir = tempdir().unwrap();
        let mut writer = LogWriter::open(temp_dir.path(), 0).unwrap();

        {
            let scoped = writer.with_mode("test").unwrap();
            assert_eq!(scoped.mode(), "test");
            scoped.add_tablet("accuracy").unwrap();
        }

        assert_eq!(writer.mode(), DEFAULT_MODE);
        assert!(!writer.contains_tag("accuracy"));
        writer.set_mode("test").unwrap();
        assert!(writer.contains_tag("accuracy"));
    }

    #[test]
    fn test_empty_names_rejected() {
        let temp_dir = tempdir().unwrap();
        let mut writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        assert!(writer.add_tablet("").is_err());
        assert!(writer.set_mode("").is_err());
        assert_eq!(writer.mode(), DEFAULT_MODE);
    }

    #[test]
    fn test_sync_cycle_flushes_automatically() {
        let temp_dir = tempdir().unwrap();
        let config = WriterConfig {
            fsync: false,
            ..WriterConfig::with_sync_cycle(2)
        };
        let writer = LogWriter::open_with_config(temp_dir.path(), config).unwrap();
        let loss = writer.add_tablet("loss").unwrap();
        loss.bind(F32).unwrap();

        loss.append(scalar(0)).unwrap();
        assert!(!temp_dir.path().join(INDEX_FILE).exists());

        loss.append(scalar(1)).unwrap();
        let index = LogDirectory::open(temp_dir.path())
            .unwrap()
            .read_index()
            .unwrap()
            .unwrap();
        assert_eq!(index.modes[0].tablets[0].num_records, 2);
    }

    #[test]
    fn test_zero_sync_cycle_waits_for_save() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        let loss = writer.add_tablet("loss").unwrap();
        loss.bind(F32).unwrap();

        for step in 0..50 {
            loss.append(scalar(step)).unwrap();
        }
        assert!(!temp_dir.path().join(INDEX_FILE).exists());

        let stats = writer.save().unwrap();
        assert_eq!(stats.records, 50);
    }

    #[test]
    fn test_drop_flushes_buffered_records() {
        let temp_dir = tempdir().unwrap();
        {
            let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
            let loss = writer.add_tablet("loss").unwrap();
            loss.bind(F32).unwrap();
            loss.append(scalar(0)).unwrap();
            drop(writer);
            // The handle keeps the state alive.
            loss.append(scalar(1)).unwrap();
        }

        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        assert_eq!(writer.tablet("loss").unwrap().num_records(), 2);
    }

    #[test]
    fn test_resume_keeps_kind_and_step_order() {
        let temp_dir = tempdir().unwrap();
        {
            let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
            let loss = writer.add_tablet("loss").unwrap();
            loss.bind(F32).unwrap();
            loss.set_caption("training loss").unwrap();
            loss.append(scalar(5)).unwrap();
            writer.save().unwrap();
        }

        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        let loss = writer.tablet("loss").unwrap();
        assert_eq!(loss.kind(), Some(F32));
        assert_eq!(loss.caption(), "training loss");

        let err = loss.append(scalar(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        loss.append(scalar(6)).unwrap();
        assert_eq!(loss.num_records(), 2);
    }

    #[test]
    fn test_sampling_seed_differs_per_tag() {
        let temp_dir = tempdir().unwrap();
        let config = WriterConfig {
            sampling_seed: Some(7),
            ..WriterConfig::default()
        };
        let writer = LogWriter::open_with_config(temp_dir.path(), config).unwrap();

        let a = writer.add_tablet("a").unwrap().sampling_seed();
        let b = writer.add_tablet("b").unwrap().sampling_seed();
        assert!(a.is_some());
        assert_ne!(a, b);
        assert_eq!(a, writer.add_tablet("a").unwrap().sampling_seed());

        let unseeded = LogWriter::open(temp_dir.path().join("other"), 0).unwrap();
        assert_eq!(unseeded.add_tablet("a").unwrap().sampling_seed(), None);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = tempdir().unwrap();
        let config = WriterConfig::with_sync_cycle(usize::MAX);
        let err = LogWriter::open_with_config(temp_dir.path(), config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
