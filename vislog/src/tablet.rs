//! Tablets: the per-tag record sequences.
//!
//! A tablet exists in two forms:
//!
//! - [`Tablet`] - writer side. Holds the committed state recorded in the
//!   index plus the records appended since the last flush.
//! - [`TabletSnapshot`] - reader side. An immutable, fully decoded view of
//!   the committed records, shared as a [`TabletView`].
//!
//! [`TabletMeta`] is the per-tablet entry persisted in the log index and is
//! the only state both sides agree on.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, Result, TabletError};
use crate::record::{ComponentKind, Record};

/// Persisted description of one tablet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletMeta {
    /// The tag name.
    pub tag: String,
    /// The bound component kind, once a component has claimed the tag.
    pub kind: Option<ComponentKind>,
    /// Free-form display caption.
    pub caption: String,
    /// Segment file path relative to the log directory.
    pub segment: Option<String>,
    /// Number of committed records in the segment.
    pub num_records: u64,
    /// Length of the committed prefix of the segment, in bytes.
    pub committed_bytes: u64,
    /// Step of the last committed record.
    pub last_step: Option<i64>,
    /// Segment generation; bumped each time the segment is rewritten.
    pub generation: u64,
}

impl TabletMeta {
    /// Creates the entry for a tablet with no records.
    pub fn empty(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            kind: None,
            caption: String::new(),
            segment: None,
            num_records: 0,
            committed_bytes: 0,
            last_step: None,
            generation: 0,
        }
    }
}

/// Writer-side tablet.
#[derive(Debug)]
pub struct Tablet {
    meta: TabletMeta,
    /// Records appended since the last successful flush.
    pending: Vec<Record>,
    /// Whether `pending` replaces the committed records instead of extending
    /// them.
    replace: bool,
}

impl Tablet {
    /// Creates an empty tablet.
    pub fn new(tag: &str) -> Self {
        Self::from_meta(TabletMeta::empty(tag))
    }

    /// Resumes a tablet from its persisted entry.
    pub fn from_meta(meta: TabletMeta) -> Self {
        Self {
            meta,
            pending: Vec::new(),
            replace: false,
        }
    }

    /// The committed state, with the current caption and kind.
    pub fn meta(&self) -> &TabletMeta {
        &self.meta
    }

    /// The tag name.
    pub fn tag(&self) -> &str {
        &self.meta.tag
    }

    /// The bound component kind.
    pub fn kind(&self) -> Option<ComponentKind> {
        self.meta.kind
    }

    /// The display caption.
    pub fn caption(&self) -> &str {
        &self.meta.caption
    }

    /// Replaces the display caption.
    pub fn set_caption(&mut self, caption: &str) {
        self.meta.caption = caption.to_string();
    }

    /// Binds the tablet to `kind`.
    ///
    /// Binding to the kind the tablet already has is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`] if the tablet is bound to a
    /// different kind.
    pub fn bind(&mut self, kind: ComponentKind) -> Result<()> {
        match self.meta.kind {
            None => {
                self.meta.kind = Some(kind);
                Ok(())
            }
            Some(registered) if registered == kind => Ok(()),
            Some(registered) => Err(TabletError::KindMismatch {
                tag: self.meta.tag.clone(),
                registered,
                requested: kind,
            }
            .into()),
        }
    }

    /// Number of records, committed and pending.
    #[allow(clippy::cast_possible_truncation)]
    pub fn num_records(&self) -> usize {
        if self.replace {
            self.pending.len()
        } else {
            self.meta.num_records as usize + self.pending.len()
        }
    }

    /// Step of the most recent record, committed or pending.
    pub fn last_step(&self) -> Option<i64> {
        match self.pending.last() {
            Some(record) => Some(record.step),
            None if self.replace => None,
            None => self.meta.last_step,
        }
    }

    /// Buffers a record for the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::StepRegression`] if `record.step` is lower than
    /// the step of the most recent record.
    pub fn append(&mut self, record: Record) -> Result<()> {
        if let Some(last_step) = self.last_step()
            && record.step < last_step
        {
            return Err(RecordError::StepRegression {
                tag: self.meta.tag.clone(),
                step: record.step,
                last_step,
            }
            .into());
        }
        self.pending.push(record);
        Ok(())
    }

    /// Replaces every record of the tablet with `record` at the next flush.
    pub fn replace_with(&mut self, record: Record) {
        self.pending.clear();
        self.pending.push(record);
        self.replace = true;
    }

    /// Records appended since the last flush.
    pub fn pending(&self) -> &[Record] {
        &self.pending
    }

    /// Whether the next flush rewrites the segment from scratch.
    pub fn replaces(&self) -> bool {
        self.replace
    }

    /// Whether the tablet has records to flush.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.replace
    }

    /// Installs the state written by a successful flush and drops the
    /// flushed records.
    pub(crate) fn commit(&mut self, meta: TabletMeta) {
        self.meta = meta;
        self.pending.clear();
        self.replace = false;
    }
}

/// One decoded record position in a [`TabletSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordSlot {
    /// The record decoded and validated.
    Intact(Record),
    /// The record could not be read; holds the reason.
    Corrupt(String),
}

/// Read-only view of a tablet's committed records.
#[derive(Debug, Clone, PartialEq)]
pub struct TabletSnapshot {
    tag: String,
    kind: Option<ComponentKind>,
    caption: String,
    slots: Vec<RecordSlot>,
}

/// Shared handle to a [`TabletSnapshot`].
pub type TabletView = Arc<TabletSnapshot>;

impl TabletSnapshot {
    /// Creates a snapshot from a persisted entry and its decoded records.
    pub(crate) fn new(meta: &TabletMeta, slots: Vec<RecordSlot>) -> Self {
        Self {
            tag: meta.tag.clone(),
            kind: meta.kind,
            caption: meta.caption.clone(),
            slots,
        }
    }

    /// The tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The bound component kind, or `None` if no component claimed the tag.
    pub fn kind(&self) -> Option<ComponentKind> {
        self.kind
    }

    /// The display caption.
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Number of committed records, including corrupt ones.
    pub fn num_records(&self) -> usize {
        self.slots.len()
    }

    /// Number of records that could not be read.
    pub fn num_corrupt(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, RecordSlot::Corrupt(_)))
            .count()
    }

    /// Returns record `index`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::IndexOutOfRange`] if `index >= num_records()`
    /// - [`RecordError::Corrupt`] if the record failed validation on load
    pub fn record(&self, index: usize) -> Result<&Record> {
        match self.slots.get(index) {
            Some(RecordSlot::Intact(record)) => Ok(record),
            Some(RecordSlot::Corrupt(reason)) => Err(self.corrupt(index, reason.clone()).into()),
            None => Err(RecordError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            }
            .into()),
        }
    }

    /// Iterates every record in order.
    pub fn records(&self) -> impl Iterator<Item = Result<&Record>> {
        (0..self.slots.len()).map(|index| self.record(index))
    }

    /// Builds the error reported for an unreadable record.
    pub(crate) fn corrupt(&self, index: usize, reason: String) -> RecordError {
        RecordError::Corrupt {
            tag: self.tag.clone(),
            index,
            reason,
        }
    }

    /// Checks that a typed reader for `kind` may read this tablet.
    ///
    /// A tablet no component has claimed yet is readable as any kind.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`] if the tablet is bound to a
    /// different kind.
    pub fn expect_kind(&self, kind: ComponentKind) -> Result<()> {
        match self.kind {
            Some(registered) if registered != kind => Err(TabletError::KindMismatch {
                tag: self.tag.clone(),
                registered,
                requested: kind,
            }
            .into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::numeric::{NumericKind, NumericValue};
    use crate::record::Payload;

    fn scalar(step: i64) -> Record {
        Record {
            step,
            timestamp: 0,
            payload: Payload::Scalar(NumericValue::F32(0.5)),
        }
    }

    #[test]
    fn test_bind_is_sticky() {
        let mut tablet = Tablet::new("loss");
        let kind = ComponentKind::Scalar(NumericKind::F32);
        tablet.bind(kind).unwrap();
        tablet.bind(kind).unwrap();

        let err = tablet.bind(ComponentKind::Text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TagKindMismatch);
        assert_eq!(tablet.kind(), Some(kind));
    }

    #[test]
    fn test_append_counts_committed_and_pending() {
        let mut meta = TabletMeta::empty("loss");
        meta.num_records = 3;
        meta.last_step = Some(2);
        let mut tablet = Tablet::from_meta(meta);

        tablet.append(scalar(2)).unwrap();
        tablet.append(scalar(5)).unwrap();
        assert_eq!(tablet.num_records(), 5);
        assert_eq!(tablet.last_step(), Some(5));
        assert!(tablet.has_pending());
    }

    #[test]
    fn test_step_regression_rejected() {
        let mut meta = TabletMeta::empty("loss");
        meta.num_records = 1;
        meta.last_step = Some(10);
        let mut tablet = Tablet::from_meta(meta);

        let err = tablet.append(scalar(9)).unwrap_err();
        assert!(err.to_string().contains("step 9"));
        assert_eq!(tablet.num_records(), 1);

        tablet.append(scalar(10)).unwrap();
        assert!(tablet.append(scalar(3)).is_err());
    }

    #[test]
    fn test_replace_discards_committed_count() {
        let mut meta = TabletMeta::empty("words");
        meta.num_records = 4;
        meta.last_step = Some(8);
        let mut tablet = Tablet::from_meta(meta);

        tablet.replace_with(scalar(0));
        tablet.replace_with(scalar(0));
        assert_eq!(tablet.num_records(), 1);
        assert!(tablet.replaces());
        assert_eq!(tablet.last_step(), Some(0));
    }

    #[test]
    fn test_commit_clears_pending() {
        let mut tablet = Tablet::new("loss");
        tablet.append(scalar(0)).unwrap();

        let mut meta = tablet.meta().clone();
        meta.num_records = 1;
        meta.last_step = Some(0);
        tablet.commit(meta);

        assert!(!tablet.has_pending());
        assert_eq!(tablet.num_records(), 1);
        assert_eq!(tablet.last_step(), Some(0));
    }

    #[test]
    fn test_snapshot_surfaces_corrupt_records() {
        let meta = TabletMeta::empty("loss");
        let snapshot = TabletSnapshot::new(
            &meta,
            vec![
                RecordSlot::Intact(scalar(0)),
                RecordSlot::Corrupt("checksum mismatch".to_string()),
                RecordSlot::Intact(scalar(2)),
            ],
        );

        assert_eq!(snapshot.num_records(), 3);
        assert_eq!(snapshot.num_corrupt(), 1);
        assert_eq!(snapshot.record(2).unwrap().step, 2);

        let err = snapshot.record(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);

        let err = snapshot.record(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(snapshot.records().filter(Result::is_ok).count(), 2);
    }

    #[test]
    fn test_expect_kind() {
        let mut meta = TabletMeta::empty("loss");
        let unbound = TabletSnapshot::new(&meta, Vec::new());
        assert!(unbound.expect_kind(ComponentKind::Text).is_ok());

        meta.kind = Some(ComponentKind::Scalar(NumericKind::F64));
        let bound = TabletSnapshot::new(&meta, Vec::new());
        assert!(bound.expect_kind(ComponentKind::Scalar(NumericKind::F64)).is_ok());
        let err = bound
            .expect_kind(ComponentKind::Scalar(NumericKind::F32))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TagKindMismatch);
    }
}
