//! The read side of a log directory.
//!
//! A [`LogReader`] holds a snapshot of everything flushed when it was
//! opened or last [reloaded](LogReader::reload). It never observes records
//! still buffered in a writer.

use std::path::Path;

use tracing::info;

use crate::component::{
    AudioReader, EmbeddingReader, HistogramReader, ImageReader, ScalarReader, TextReader,
};
use crate::error::{Result, TabletError};
use crate::index::{DEFAULT_MODE, ModeGuard, ModeIndex, ModeSelect, TabletLookup, validate_name};
use crate::numeric::Numeric;
use crate::record::ComponentKind;
use crate::storage::LogDirectory;
use crate::tablet::TabletView;

/// Read-only view of a log directory.
///
/// # Example
///
/// ```rust,no_run
/// use vislog::{ComponentReader, LogReader};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut reader = LogReader::open("./logs")?;
/// reader.set_mode("train")?;
///
/// let loss = reader.scalar::<f32>("loss")?;
/// for (step, value) in loss.ids()?.iter().zip(loss.records()?) {
///     println!("{step}: {value}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LogReader {
    dir: LogDirectory,
    tablets: ModeIndex<TabletView>,
    mode: String,
}

impl LogReader {
    /// Opens the log in `dir`.
    ///
    /// A directory no writer has flushed to yet opens as an empty log.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DirectoryAccess`](crate::error::StorageError::DirectoryAccess)
    ///   if `dir` is not an accessible directory
    /// - [`StorageError::CorruptedIndex`](crate::error::StorageError::CorruptedIndex)
    ///   if the index cannot be parsed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = LogDirectory::open(dir)?;
        let tablets = dir.load_snapshots()?;
        info!(
            path = %dir.path().display(),
            tablets = tablets.len(),
            "opened log reader"
        );
        Ok(Self {
            dir,
            tablets,
            mode: DEFAULT_MODE.to_string(),
        })
    }

    /// Re-reads the directory, picking up everything flushed since the
    /// reader was opened. The selected mode is kept.
    ///
    /// Views obtained before the reload keep their old contents.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open). On error the previous snapshot is kept.
    pub fn reload(&mut self) -> Result<()> {
        self.tablets = self.dir.load_snapshots()?;
        Ok(())
    }

    /// The log directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Selects the mode tags are resolved in.
    ///
    /// Selecting a mode with no persisted tablets is allowed; it simply has
    /// no tags.
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

    /// Returns the tablet for `tag` in the selected mode.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::UnknownTag`] if the tag does not exist.
    pub fn tablet(&self, tag: &str) -> Result<TabletView> {
        self.tablets
            .get(&self.mode, tag)
            .cloned()
            .ok_or_else(|| {
                TabletError::UnknownTag {
                    mode: self.mode.clone(),
                    tag: tag.to_string(),
                }
                .into()
            })
    }

    /// Reads `tag` as a scalar series.
    ///
    /// # Errors
    ///
    /// - [`TabletError::UnknownTag`] if the tag does not exist
    /// - [`TabletError::KindMismatch`] if it holds another kind
    pub fn scalar<T: Numeric>(&self, tag: &str) -> Result<ScalarReader<T>> {
        ScalarReader::new(self.tablet(tag)?)
    }

    /// Reads `tag` as histograms.
    ///
    /// # Errors
    ///
    /// Same as [`scalar`](Self::scalar).
    pub fn histogram<T: Numeric>(&self, tag: &str) -> Result<HistogramReader<T>> {
        HistogramReader::new(self.tablet(tag)?)
    }

    /// Reads `tag` as text.
    ///
    /// # Errors
    ///
    /// Same as [`scalar`](Self::scalar).
    pub fn text(&self, tag: &str) -> Result<TextReader> {
        TextReader::new(self.tablet(tag)?)
    }

    /// Reads `tag` as image sampling periods.
    ///
    /// # Errors
    ///
    /// Same as [`scalar`](Self::scalar).
    pub fn image(&self, tag: &str) -> Result<ImageReader> {
        ImageReader::new(self.tablet(tag)?)
    }

    /// Reads `tag` as audio sampling periods.
    ///
    /// # Errors
    ///
    /// Same as [`scalar`](Self::scalar).
    pub fn audio(&self, tag: &str) -> Result<AudioReader> {
        AudioReader::new(self.tablet(tag)?)
    }

    /// Reads `tag` as an embedding table.
    ///
    /// # Errors
    ///
    /// Same as [`scalar`](Self::scalar).
    pub fn embedding(&self, tag: &str) -> Result<EmbeddingReader> {
        EmbeddingReader::new(self.tablet(tag)?)
    }
}

impl ModeSelect for LogReader {
    fn swap_mode(&mut self, mode: String) -> String {
        std::mem::replace(&mut self.mode, mode)
    }
}

impl TabletLookup for LogReader {
    fn mode(&self) -> String {
        self.mode.clone()
    }

    fn modes(&self) -> Vec<String> {
        self.tablets.modes().map(str::to_string).collect()
    }

    fn tags(&self) -> Vec<String> {
        self.tablets.tags(&self.mode).map(str::to_string).collect()
    }

    fn kind_of(&self, tag: &str) -> Result<Option<ComponentKind>> {
        Ok(self.tablet(tag)?.kind())
    }
}
