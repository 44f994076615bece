//! On-disk layout of a log directory.
//!
//! # Directory Layout
//!
//! ```text
//! <log_dir>/
//! ├── index.json              # LogIndex: modes, tablets, committed lengths
//! ├── mode_0/
//! │   ├── tablet_0_g0.log     # framed records of tag 0 in mode 0
//! │   └── tablet_1_g0.log
//! └── mode_1/
//!     └── tablet_0_g2.log     # generation 2: rewritten twice
//! ```
//!
//! # Commit Protocol
//!
//! `index.json` is the commit point. A flush first writes every tablet's new
//! frames after its committed prefix (truncating anything a failed flush
//! left behind), then atomically replaces the index. Readers only decode the
//! committed prefix the index names, so a crash or I/O failure at any point
//! leaves the previous flush fully visible and the current one invisible.
//! Tablets whose records are replaced rather than extended get a new segment
//! generation; the superseded file is removed after the index commits.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{FRAME_HEADER_SIZE, decode_frame, encode_frame};
use crate::error::{Result, StorageError};
use crate::index::ModeIndex;
use crate::record::ComponentKind;
use crate::tablet::{RecordSlot, Tablet, TabletMeta, TabletSnapshot, TabletView};

/// Name of the index file in a log directory.
pub const INDEX_FILE: &str = "index.json";

/// Scratch file the index is written to before being renamed into place.
const INDEX_TEMP_FILE: &str = "index.json.tmp";

/// Current index format version.
const INDEX_VERSION: u32 = 1;

/// Persisted index of a log directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogIndex {
    /// Format version.
    pub version: u32,
    /// Modes in first-seen order.
    pub modes: Vec<ModeMeta>,
}

/// Persisted description of one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeMeta {
    /// The mode name.
    pub name: String,
    /// Tablets in first-seen order.
    pub tablets: Vec<TabletMeta>,
}

impl LogIndex {
    fn validate(&self, path: &str) -> Result<()> {
        let corrupted = |reason: String| StorageError::CorruptedIndex {
            path: path.to_string(),
            reason,
        };

        if self.version != INDEX_VERSION {
            return Err(corrupted(format!(
                "unsupported index version: expected {INDEX_VERSION}, found {}",
                self.version
            ))
            .into());
        }

        let mut modes = HashSet::new();
        for mode in &self.modes {
            if mode.name.is_empty() || !modes.insert(mode.name.as_str()) {
                return Err(corrupted(format!("invalid or duplicate mode '{}'", mode.name)).into());
            }

            let mut tags = HashSet::new();
            for tablet in &mode.tablets {
                if tablet.tag.is_empty() || !tags.insert(tablet.tag.as_str()) {
                    return Err(corrupted(format!(
                        "invalid or duplicate tag '{}' in mode '{}'",
                        tablet.tag, mode.name
                    ))
                    .into());
                }
                if tablet.num_records.saturating_mul(FRAME_HEADER_SIZE as u64)
                    > tablet.committed_bytes
                {
                    return Err(corrupted(format!(
                        "tag '{}' claims {} records in {} committed bytes",
                        tablet.tag, tablet.num_records, tablet.committed_bytes
                    ))
                    .into());
                }
                if let Some(segment) = &tablet.segment
                    && !is_contained(segment)
                {
                    return Err(corrupted(format!(
                        "segment '{segment}' of tag '{}' escapes the log directory",
                        tablet.tag
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Whether a relative segment path stays inside the log directory.
fn is_contained(segment: &str) -> bool {
    let path = Path::new(segment);
    path.is_relative()
        && path
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)))
}

/// Relative path of a tablet segment.
fn segment_path(mode_position: usize, tag_position: usize, generation: u64) -> String {
    format!("mode_{mode_position}/tablet_{tag_position}_g{generation}.log")
}

/// Totals reported by a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Tablets whose segments were written.
    pub tablets: usize,
    /// Records committed.
    pub records: usize,
    /// Bytes written to segment files.
    pub bytes: u64,
}

/// A log directory on disk.
#[derive(Debug, Clone)]
pub struct LogDirectory {
    path: PathBuf,
    fsync: bool,
}

impl LogDirectory {
    /// Opens `path` for writing, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DirectoryAccess`] if the directory cannot be
    /// created.
    pub fn create<P: AsRef<Path>>(path: P, fsync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(|e| StorageError::DirectoryAccess {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self { path, fsync })
    }

    /// Opens an existing log directory for reading.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DirectoryAccess`] if `path` is not an
    /// accessible directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = fs::metadata(&path).map_err(|e| StorageError::DirectoryAccess {
            path: path.display().to_string(),
            source: e,
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::DirectoryAccess {
                path: path.display().to_string(),
                source: std::io::Error::new(IoErrorKind::NotADirectory, "not a directory"),
            }
            .into());
        }
        Ok(Self { path, fsync: false })
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the index, or returns `None` if nothing has been
    /// flushed yet.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ReadFailed`] if the index exists but cannot be read
    /// - [`StorageError::CorruptedIndex`] if it cannot be parsed or fails
    ///   validation
    pub fn read_index(&self) -> Result<Option<LogIndex>> {
        let path = self.path.join(INDEX_FILE);
        let path_str = path.display().to_string();

        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    path: path_str,
                    source: e,
                }
                .into());
            }
        };

        let index: LogIndex =
            serde_json::from_str(&json).map_err(|e| StorageError::CorruptedIndex {
                path: path_str.clone(),
                reason: e.to_string(),
            })?;
        index.validate(&path_str)?;
        Ok(Some(index))
    }

    /// Loads writer-side tablets from the persisted index.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`read_index`](Self::read_index).
    pub fn load_tablets(&self) -> Result<ModeIndex<Tablet>> {
        let mut tablets = ModeIndex::new();
        if let Some(index) = self.read_index()? {
            for mode in index.modes {
                tablets.ensure_mode(&mode.name);
                for meta in mode.tablets {
                    let tag = meta.tag.clone();
                    tablets.insert(&mode.name, &tag, Tablet::from_meta(meta));
                }
            }
        }
        Ok(tablets)
    }

    /// Loads read-only snapshots of every committed tablet.
    ///
    /// Unreadable records become [`RecordSlot::Corrupt`] entries rather than
    /// failing the load.
    ///
    /// # Errors
    ///
    /// - Errors from [`read_index`](Self::read_index)
    /// - [`StorageError::ReadFailed`] if a segment exists but cannot be
    ///   opened or mapped
    pub fn load_snapshots(&self) -> Result<ModeIndex<TabletView>> {
        let mut snapshots = ModeIndex::new();
        let Some(index) = self.read_index()? else {
            return Ok(snapshots);
        };

        for mode in index.modes {
            snapshots.ensure_mode(&mode.name);
            for meta in &mode.tablets {
                let slots = self.read_segment(meta)?;
                let snapshot = TabletSnapshot::new(meta, slots);
                if snapshot.num_corrupt() > 0 {
                    warn!(
                        mode = %mode.name,
                        tag = %meta.tag,
                        corrupt = snapshot.num_corrupt(),
                        "tablet has unreadable records"
                    );
                }
                snapshots.insert(&mode.name, &meta.tag, Arc::new(snapshot));
            }
        }
        Ok(snapshots)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_segment(&self, meta: &TabletMeta) -> Result<Vec<RecordSlot>> {
        // Every frame carries at least a header.
        let max_frames = meta.committed_bytes / FRAME_HEADER_SIZE as u64;
        let count = meta.num_records.min(max_frames) as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let lost = |reason: &str| vec![RecordSlot::Corrupt(reason.to_string()); count];

        let Some(segment) = &meta.segment else {
            return Ok(lost("index lists records but no segment"));
        };
        let path = self.path.join(segment);
        let path_str = path.display().to_string();

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Ok(lost("segment file missing"));
            }
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    path: path_str,
                    source: e,
                }
                .into());
            }
        };

        let len = file
            .metadata()
            .map_err(|e| StorageError::ReadFailed {
                path: path_str.clone(),
                source: e,
            })?
            .len();
        if len == 0 {
            return Ok(lost("segment file is empty"));
        }

        // SAFETY: The map is read-only and only the committed prefix is
        // accessed. Writers append past that prefix or truncate back to a
        // length at least as long, so the bytes read never change or vanish
        // while mapped.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| StorageError::ReadFailed {
                path: path_str,
                source: e,
            })?
        };

        let committed = (meta.committed_bytes as usize).min(mmap.len());
        Ok(decode_records(&mmap[..committed], count, meta.kind))
    }

    /// Writes every tablet's pending records and commits a new index.
    ///
    /// On success, flushed tablets are committed and their pending records
    /// dropped. On failure nothing is committed: pending records stay
    /// buffered and a later flush rewrites them from the same offsets.
    ///
    /// # Errors
    ///
    /// - [`StorageError::RecordEncode`] if a record cannot be encoded
    /// - [`StorageError::DirectoryAccess`], [`StorageError::WriteFailed`] or
    ///   [`StorageError::SyncFailed`] on I/O failure
    pub fn flush(&self, tablets: &mut ModeIndex<Tablet>) -> Result<FlushStats> {
        let mut staged: HashMap<(usize, usize), TabletMeta> = HashMap::new();
        let mut superseded = Vec::new();
        let mut stats = FlushStats::default();
        let mut buf = Vec::new();

        for (mode_position, tag_position, tablet) in tablets.iter_positions_mut() {
            if !tablet.has_pending() {
                continue;
            }

            buf.clear();
            for record in tablet.pending() {
                encode_frame(tablet.tag(), record, &mut buf)?;
            }
            let written = buf.len() as u64;

            let mut meta = tablet.meta().clone();
            if tablet.replaces() {
                meta.generation += 1;
                let segment = segment_path(mode_position, tag_position, meta.generation);
                self.write_segment(&segment, 0, &buf)?;
                if let Some(old) = meta.segment.replace(segment) {
                    superseded.push(old);
                }
                meta.num_records = tablet.pending().len() as u64;
                meta.committed_bytes = written;
            } else {
                let segment = match &meta.segment {
                    Some(segment) => segment.clone(),
                    None => segment_path(mode_position, tag_position, meta.generation),
                };
                self.write_segment(&segment, meta.committed_bytes, &buf)?;
                meta.segment = Some(segment);
                meta.num_records += tablet.pending().len() as u64;
                meta.committed_bytes += written;
            }
            meta.last_step = tablet.last_step();

            stats.tablets += 1;
            stats.records += tablet.pending().len();
            stats.bytes += written;
            staged.insert((mode_position, tag_position), meta);
        }

        let index = LogIndex {
            version: INDEX_VERSION,
            modes: tablets
                .iter_modes()
                .enumerate()
                .map(|(mode_position, (name, mode_tablets))| ModeMeta {
                    name: name.to_string(),
                    tablets: mode_tablets
                        .enumerate()
                        .map(|(tag_position, tablet)| {
                            staged
                                .get(&(mode_position, tag_position))
                                .cloned()
                                .unwrap_or_else(|| tablet.meta().clone())
                        })
                        .collect(),
                })
                .collect(),
        };
        self.write_index(&index)?;

        for (mode_position, tag_position, tablet) in tablets.iter_positions_mut() {
            if let Some(meta) = staged.remove(&(mode_position, tag_position)) {
                tablet.commit(meta);
            }
        }

        for segment in superseded {
            let path = self.path.join(&segment);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != IoErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "failed to remove superseded segment");
            }
        }

        debug!(
            tablets = stats.tablets,
            records = stats.records,
            bytes = stats.bytes,
            "flushed log"
        );
        Ok(stats)
    }

    /// Writes `buf` to `segment` starting at byte `offset`, discarding
    /// anything past `offset`.
    fn write_segment(&self, segment: &str, offset: u64, buf: &[u8]) -> Result<()> {
        let path = self.path.join(segment);
        let path_str = path.display().to_string();
        let write_failed = |e| StorageError::WriteFailed {
            path: path_str.clone(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::DirectoryAccess {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(write_failed)?;
        file.set_len(offset).map_err(write_failed)?;
        file.seek(SeekFrom::Start(offset)).map_err(write_failed)?;
        file.write_all(buf).map_err(write_failed)?;

        if self.fsync {
            file.sync_all().map_err(|e| StorageError::SyncFailed {
                path: path_str.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Atomically replaces the index file.
    fn write_index(&self, index: &LogIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(index).map_err(StorageError::IndexSerialize)?;
        let temp_path = self.path.join(INDEX_TEMP_FILE);
        let temp_str = temp_path.display().to_string();

        let mut file = File::create(&temp_path).map_err(|e| StorageError::WriteFailed {
            path: temp_str.clone(),
            source: e,
        })?;
        file.write_all(json.as_bytes())
            .map_err(|e| StorageError::WriteFailed {
                path: temp_str.clone(),
                source: e,
            })?;
        if self.fsync {
            file.sync_all().map_err(|e| StorageError::SyncFailed {
                path: temp_str.clone(),
                source: e,
            })?;
        }
        drop(file);

        let index_path = self.path.join(INDEX_FILE);
        fs::rename(&temp_path, &index_path).map_err(|e| StorageError::WriteFailed {
            path: index_path.display().to_string(),
            source: e,
        })?;

        // The rename is only durable once the directory entry is.
        if self.fsync {
            let dir_str = self.path.display().to_string();
            File::open(&self.path)
                .and_then(|dir| dir.sync_all())
                .map_err(|e| StorageError::SyncFailed {
                    path: dir_str,
                    source: e,
                })?;
        }
        Ok(())
    }
}

/// Decodes `count` framed records from the committed prefix of a segment.
///
/// A frame with a bad checksum or payload is reported as corrupt and
/// skipped. Once the framing itself is lost (bad magic or a truncated
/// frame), every remaining record is reported as corrupt.
pub(crate) fn decode_records(
    buf: &[u8],
    count: usize,
    kind: Option<ComponentKind>,
) -> Vec<RecordSlot> {
    let mut slots = Vec::with_capacity(count);
    let mut offset = 0;

    while slots.len() < count {
        let decoded = decode_frame(&buf[offset..]);
        let slot = match decoded.record {
            Ok(record) => match kind {
                Some(kind) if !record.payload.matches(kind) => {
                    RecordSlot::Corrupt(format!("payload does not match tablet kind {kind}"))
                }
                _ => RecordSlot::Intact(record),
            },
            Err(e) => RecordSlot::Corrupt(e.to_string()),
        };
        slots.push(slot);

        match decoded.frame_len {
            Some(len) => offset += len,
            None => {
                let reason = format!("framing lost before record {}", slots.len());
                slots.resize(count, RecordSlot::Corrupt(reason));
            }
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::numeric::{NumericKind, NumericValue};
    use crate::record::{Payload, Record};
    use tempfile::tempdir;

    const KIND: ComponentKind = ComponentKind::Scalar(NumericKind::F32);

    fn scalar(step: i64, value: f32) -> Record {
        Record {
            step,
            timestamp: 1_700_000_000_000,
            payload: Payload::Scalar(NumericValue::F32(value)),
        }
    }

    fn add_scalar_tablet(tablets: &mut ModeIndex<Tablet>, mode: &str, tag: &str) -> usize {
        let (tablet, _) = tablets.get_or_insert_with(mode, tag, |_, _| Tablet::new(tag));
        tablet.bind(KIND).unwrap();
        tablet.num_records()
    }

    fn append(tablets: &mut ModeIndex<Tablet>, mode: &str, tag: &str, record: Record) {
        tablets.get_mut(mode, tag).unwrap().append(record).unwrap();
    }

    fn values(snapshot: &TabletSnapshot) -> Vec<f32> {
        snapshot
            .records()
            .map(|r| match r.unwrap().payload {
                Payload::Scalar(NumericValue::F32(v)) => v,
                ref other => panic!("unexpected payload {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_flush_and_load_snapshots() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        append(&mut tablets, "train", "loss", scalar(0, 0.9));
        append(&mut tablets, "train", "loss", scalar(1, 0.5));

        let stats = dir.flush(&mut tablets).unwrap();
        assert_eq!(stats.tablets, 1);
        assert_eq!(stats.records, 2);
        assert!(!tablets.get("train", "loss").unwrap().has_pending());

        assert!(temp_dir.path().join(INDEX_FILE).exists());
        assert!(temp_dir.path().join("mode_0/tablet_0_g0.log").exists());

        let snapshots = LogDirectory::open(temp_dir.path())
            .unwrap()
            .load_snapshots()
            .unwrap();
        let loss = snapshots.get("train", "loss").unwrap();
        assert_eq!(loss.kind(), Some(KIND));
        assert_eq!(values(loss), vec![0.9, 0.5]);
    }

    #[test]
    fn test_appends_extend_segment() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), true).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        append(&mut tablets, "train", "loss", scalar(0, 1.0));
        dir.flush(&mut tablets).unwrap();
        append(&mut tablets, "train", "loss", scalar(1, 2.0));
        dir.flush(&mut tablets).unwrap();

        let snapshots = dir.load_snapshots().unwrap();
        assert_eq!(values(snapshots.get("train", "loss").unwrap()), vec![1.0, 2.0]);
    }

    #[test]
    fn test_durable_flush_commits_index() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), true).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        append(&mut tablets, "train", "loss", scalar(0, 1.0));
        dir.flush(&mut tablets).unwrap();

        assert!(!temp_dir.path().join(INDEX_TEMP_FILE).exists());
        let index = dir.read_index().unwrap().unwrap();
        assert_eq!(index.modes[0].tablets[0].num_records, 1);
    }

    #[test]
    fn test_resume_tablets() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        tablets.ensure_mode("test");
        append(&mut tablets, "train", "loss", scalar(4, 1.0));
        tablets.get_mut("train", "loss").unwrap().set_caption("training loss");
        dir.flush(&mut tablets).unwrap();

        let resumed = dir.load_tablets().unwrap();
        let loss = resumed.get("train", "loss").unwrap();
        assert_eq!(loss.num_records(), 1);
        assert_eq!(loss.last_step(), Some(4));
        assert_eq!(loss.caption(), "training loss");
        assert_eq!(loss.kind(), Some(KIND));
        assert_eq!(resumed.modes().collect::<Vec<_>>(), vec!["train", "test"]);
    }

    #[test]
    fn test_failed_flush_keeps_records_pending() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        append(&mut tablets, "train", "loss", scalar(0, 1.0));

        // A regular file where the mode directory should go.
        let blocker = temp_dir.path().join("mode_0");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = dir.flush(&mut tablets).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(tablets.get("train", "loss").unwrap().pending().len(), 1);
        assert!(dir.read_index().unwrap().is_none());

        fs::remove_file(&blocker).unwrap();
        dir.flush(&mut tablets).unwrap();

        let snapshots = dir.load_snapshots().unwrap();
        assert_eq!(values(snapshots.get("train", "loss").unwrap()), vec![1.0]);
    }

    #[test]
    fn test_retry_overwrites_uncommitted_tail() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        append(&mut tablets, "train", "loss", scalar(0, 1.0));
        dir.flush(&mut tablets).unwrap();

        // Garbage left behind by a flush that never committed its index.
        let segment = temp_dir.path().join("mode_0/tablet_0_g0.log");
        let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
        file.write_all(b"partial frame").unwrap();
        drop(file);

        append(&mut tablets, "train", "loss", scalar(1, 2.0));
        dir.flush(&mut tablets).unwrap();

        let snapshots = dir.load_snapshots().unwrap();
        let loss = snapshots.get("train", "loss").unwrap();
        assert_eq!(loss.num_corrupt(), 0);
        assert_eq!(values(loss), vec![1.0, 2.0]);
    }

    #[test]
    fn test_replace_writes_new_generation() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        append(&mut tablets, "train", "loss", scalar(0, 1.0));
        append(&mut tablets, "train", "loss", scalar(1, 2.0));
        dir.flush(&mut tablets).unwrap();

        tablets
            .get_mut("train", "loss")
            .unwrap()
            .replace_with(scalar(0, 7.0));
        dir.flush(&mut tablets).unwrap();

        assert!(!temp_dir.path().join("mode_0/tablet_0_g0.log").exists());
        assert!(temp_dir.path().join("mode_0/tablet_0_g1.log").exists());

        let snapshots = dir.load_snapshots().unwrap();
        assert_eq!(values(snapshots.get("train", "loss").unwrap()), vec![7.0]);
        assert_eq!(tablets.get("train", "loss").unwrap().meta().generation, 1);
    }

    #[test]
    fn test_flipped_byte_marks_one_record_corrupt() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        for step in 0..3 {
            append(&mut tablets, "train", "loss", scalar(step, 0.5));
        }
        dir.flush(&mut tablets).unwrap();

        let segment = temp_dir.path().join("mode_0/tablet_0_g0.log");
        let mut bytes = fs::read(&segment).unwrap();
        let frame_len = bytes.len() / 3;
        bytes[frame_len + frame_len - 1] ^= 0xff;
        fs::write(&segment, bytes).unwrap();

        let snapshots = dir.load_snapshots().unwrap();
        let loss = snapshots.get("train", "loss").unwrap();
        assert_eq!(loss.num_records(), 3);
        assert_eq!(loss.num_corrupt(), 1);
        assert!(loss.record(0).is_ok());
        assert_eq!(loss.record(1).unwrap_err().kind(), ErrorKind::CorruptRecord);
        assert!(loss.record(2).is_ok());
    }

    #[test]
    fn test_truncated_segment_marks_tail_corrupt() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        for step in 0..4 {
            append(&mut tablets, "train", "loss", scalar(step, 0.5));
        }
        dir.flush(&mut tablets).unwrap();

        let segment = temp_dir.path().join("mode_0/tablet_0_g0.log");
        let len = fs::metadata(&segment).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&segment)
            .unwrap()
            .set_len(len / 2 + 1)
            .unwrap();

        let snapshots = dir.load_snapshots().unwrap();
        let loss = snapshots.get("train", "loss").unwrap();
        assert_eq!(loss.num_records(), 4);
        assert!(loss.record(0).is_ok());
        assert!(loss.record(1).is_ok());
        assert!(loss.record(2).is_err());
        assert!(loss.record(3).is_err());
    }

    #[test]
    fn test_missing_segment_reports_corrupt() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::create(temp_dir.path(), false).unwrap();

        let mut tablets = ModeIndex::new();
        add_scalar_tablet(&mut tablets, "train", "loss");
        append(&mut tablets, "train", "loss", scalar(0, 0.5));
        dir.flush(&mut tablets).unwrap();
        fs::remove_file(temp_dir.path().join("mode_0/tablet_0_g0.log")).unwrap();

        let snapshots = dir.load_snapshots().unwrap();
        let loss = snapshots.get("train", "loss").unwrap();
        assert_eq!(loss.num_corrupt(), 1);
    }

    #[test]
    fn test_corrupted_index_detection() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(INDEX_FILE), "{ not json").unwrap();

        let dir = LogDirectory::open(temp_dir.path()).unwrap();
        let err = dir.read_index().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);
    }

    #[test]
    fn test_inflated_record_count_rejected() {
        let temp_dir = tempdir().unwrap();
        let mut meta = TabletMeta::empty("loss");
        meta.kind = Some(KIND);
        meta.segment = Some(segment_path(0, 0, 0));
        meta.num_records = 100_000_000_000_000;
        meta.committed_bytes = 24;
        let index = LogIndex {
            version: INDEX_VERSION,
            modes: vec![ModeMeta {
                name: "train".to_string(),
                tablets: vec![meta],
            }],
        };
        fs::write(
            temp_dir.path().join(INDEX_FILE),
            serde_json::to_string(&index).unwrap(),
        )
        .unwrap();

        let dir = LogDirectory::open(temp_dir.path()).unwrap();
        let err = dir.read_index().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let index = LogIndex {
            version: INDEX_VERSION + 1,
            modes: Vec::new(),
        };
        fs::write(
            temp_dir.path().join(INDEX_FILE),
            serde_json::to_string(&index).unwrap(),
        )
        .unwrap();

        let dir = LogDirectory::open(temp_dir.path()).unwrap();
        assert!(dir.read_index().is_err());
    }

    #[test]
    fn test_escaping_segment_rejected() {
        let mut meta = TabletMeta::empty("loss");
        meta.segment = Some("../outside.log".to_string());
        let index = LogIndex {
            version: INDEX_VERSION,
            modes: vec![ModeMeta {
                name: "train".to_string(),
                tablets: vec![meta],
            }],
        };
        assert!(index.validate("index.json").is_err());
        assert!(is_contained("mode_0/tablet_0_g0.log"));
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let temp_dir = tempdir().unwrap();
        let err = LogDirectory::open(temp_dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_empty_directory_has_no_tablets() {
        let temp_dir = tempdir().unwrap();
        let dir = LogDirectory::open(temp_dir.path()).unwrap();
        assert!(dir.read_index().unwrap().is_none());
        assert!(dir.load_snapshots().unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_mismatched_payload() {
        let mut buf = Vec::new();
        encode_frame("loss", &scalar(0, 1.0), &mut buf).unwrap();
        let slots = decode_records(&buf, 1, Some(ComponentKind::Text));
        assert!(matches!(slots[0], RecordSlot::Corrupt(_)));
    }
}
