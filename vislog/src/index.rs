//! Two-level mode → tag lookup shared by the writer and the reader.
//!
//! [`ModeIndex`] maps a mode name to its tags and each tag to a value: the
//! writer stores owned [`Tablet`](crate::tablet::Tablet)s, the reader stores
//! shared [`TabletView`](crate::tablet::TabletView)s loaded from disk. Modes
//! and tags are enumerated in first-seen order.
//!
//! This module also defines the capabilities both sides expose:
//! [`TabletLookup`] for read-only enumeration and [`ModeSelect`] with its
//! scoped [`ModeGuard`].

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::error::{Result, TabletError};
use crate::record::ComponentKind;

/// Mode selected when a writer or reader is opened.
pub const DEFAULT_MODE: &str = "default";

/// Tags and their values for one mode.
#[derive(Debug, Clone)]
struct ModeEntry<T> {
    name: String,
    /// Values in first-seen order.
    entries: Vec<(String, T)>,
    /// Tag → position in `entries`.
    positions: HashMap<String, usize>,
}

impl<T> ModeEntry<T> {
    fn new(name: String) -> Self {
        Self {
            name,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

/// Mode name → tag name → value.
#[derive(Debug, Clone)]
pub struct ModeIndex<T> {
    modes: Vec<ModeEntry<T>>,
}

impl<T> ModeIndex<T> {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self { modes: Vec::new() }
    }

    fn mode_entry(&self, mode: &str) -> Option<&ModeEntry<T>> {
        self.modes.iter().find(|entry| entry.name == mode)
    }

    /// Returns the position of `mode`, creating it if absent.
    pub fn ensure_mode(&mut self, mode: &str) -> usize {
        if let Some(position) = self.mode_position(mode) {
            return position;
        }
        self.modes.push(ModeEntry::new(mode.to_string()));
        self.modes.len() - 1
    }

    /// Returns the position of `mode` in first-seen order.
    pub fn mode_position(&self, mode: &str) -> Option<usize> {
        self.modes.iter().position(|entry| entry.name == mode)
    }

    /// Returns the value stored for `tag` in `mode`.
    pub fn get(&self, mode: &str, tag: &str) -> Option<&T> {
        let entry = self.mode_entry(mode)?;
        let position = *entry.positions.get(tag)?;
        Some(&entry.entries[position].1)
    }

    /// Returns the value stored for `tag` in `mode`, mutably.
    pub fn get_mut(&mut self, mode: &str, tag: &str) -> Option<&mut T> {
        let entry = self.modes.iter_mut().find(|entry| entry.name == mode)?;
        let position = *entry.positions.get(tag)?;
        Some(&mut entry.entries[position].1)
    }

    /// Returns the value for `tag` in `mode`, inserting one built by `create`
    /// if absent. `create` receives the mode position and the new tag's
    /// position within the mode.
    ///
    /// The returned flag is `true` if the value was created.
    pub fn get_or_insert_with<F>(&mut self, mode: &str, tag: &str, create: F) -> (&mut T, bool)
    where
        F: FnOnce(usize, usize) -> T,
    {
        let mode_position = self.ensure_mode(mode);
        let entry = &mut self.modes[mode_position];

        let (position, created) = match entry.positions.get(tag) {
            Some(&position) => (position, false),
            None => {
                let position = entry.entries.len();
                entry
                    .entries
                    .push((tag.to_string(), create(mode_position, position)));
                entry.positions.insert(tag.to_string(), position);
                (position, true)
            }
        };

        (&mut entry.entries[position].1, created)
    }

    /// Inserts or replaces the value for `tag` in `mode`.
    pub fn insert(&mut self, mode: &str, tag: &str, value: T) {
        let mode_position = self.ensure_mode(mode);
        let entry = &mut self.modes[mode_position];
        match entry.positions.get(tag) {
            Some(&position) => entry.entries[position].1 = value,
            None => {
                entry.positions.insert(tag.to_string(), entry.entries.len());
                entry.entries.push((tag.to_string(), value));
            }
        }
    }

    /// Mode names in first-seen order.
    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.modes.iter().map(|entry| entry.name.as_str())
    }

    /// Tags of `mode` in first-seen order. Empty if the mode is unknown.
    pub fn tags(&self, mode: &str) -> impl Iterator<Item = &str> {
        self.mode_entry(mode)
            .into_iter()
            .flat_map(|entry| entry.entries.iter().map(|(tag, _)| tag.as_str()))
    }

    /// Iterates `(mode, tag, value)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &T)> {
        self.modes.iter().flat_map(|entry| {
            entry
                .entries
                .iter()
                .map(move |(tag, value)| (entry.name.as_str(), tag.as_str(), value))
        })
    }

    /// Iterates every mode with its values, both in first-seen order.
    ///
    /// Unlike [`iter`](Self::iter), modes without tags are included.
    pub fn iter_modes(&self) -> impl Iterator<Item = (&str, impl Iterator<Item = &T>)> {
        self.modes.iter().map(|entry| {
            (
                entry.name.as_str(),
                entry.entries.iter().map(|(_, value)| value),
            )
        })
    }

    /// Iterates `(mode_position, tag_position, value)` mutably.
    pub fn iter_positions_mut(&mut self) -> impl Iterator<Item = (usize, usize, &mut T)> {
        self.modes
            .iter_mut()
            .enumerate()
            .flat_map(|(mode_position, entry)| {
                entry
                    .entries
                    .iter_mut()
                    .enumerate()
                    .map(move |(tag_position, (_, value))| (mode_position, tag_position, value))
            })
    }

    /// Total number of values across all modes.
    pub fn len(&self) -> usize {
        self.modes.iter().map(|entry| entry.entries.len()).sum()
    }

    /// Whether the index holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ModeIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejects empty tag and mode names.
///
/// # Errors
///
/// Returns [`TabletError::InvalidName`] if `name` is empty.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TabletError::InvalidName {
            name: name.to_string(),
            reason: "name cannot be empty".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Read-only tablet lookup shared by [`LogWriter`](crate::writer::LogWriter)
/// and [`LogReader`](crate::reader::LogReader).
pub trait TabletLookup {
    /// The currently selected mode.
    fn mode(&self) -> String;

    /// All known mode names, in first-seen order.
    fn modes(&self) -> Vec<String>;

    /// Tags of the selected mode, in first-seen order.
    fn tags(&self) -> Vec<String>;

    /// The component kind bound to `tag` in the selected mode, or `None` if
    /// the tag exists but no component has been bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::UnknownTag`] if the tag does not exist in the
    /// selected mode.
    fn kind_of(&self, tag: &str) -> Result<Option<ComponentKind>>;

    /// Whether `tag` exists in the selected mode.
    fn contains_tag(&self, tag: &str) -> bool {
        self.kind_of(tag).is_ok()
    }
}

/// Mode selection with scoped restoration.
pub trait ModeSelect {
    /// Replaces the selected mode, returning the previous one.
    ///
    /// Implementations must accept any mode previously returned by this
    /// method, since [`ModeGuard`] hands it back on drop.
    fn swap_mode(&mut self, mode: String) -> String;
}

/// Guard returned by `with_mode`; restores the previous mode when dropped.
///
/// The guard dereferences to the writer or reader it was created from, so
/// calls made through it resolve against the scoped mode.
///
/// ```rust,no_run
/// use vislog::{LogWriter, TabletLookup};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut writer = LogWriter::open("./logs", 100)?;
/// {
///     let mut test = writer.with_mode("test")?;
///     test.add_tablet("accuracy")?;
/// }
/// assert_eq!(writer.mode(), "default");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ModeGuard<'a, L: ModeSelect> {
    target: &'a mut L,
    previous: Option<String>,
}

impl<'a, L: ModeSelect> ModeGuard<'a, L> {
    /// Switches `target` to `mode` until the guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::InvalidName`] if `mode` is empty.
    pub fn new(target: &'a mut L, mode: &str) -> Result<Self> {
        validate_name(mode)?;
        let previous = target.swap_mode(mode.to_string());
        Ok(Self {
            target,
            previous: Some(previous),
        })
    }
}

impl<L: ModeSelect> Deref for ModeGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.target
    }
}

impl<L: ModeSelect> DerefMut for ModeGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut L {
        self.target
    }
}

impl<L: ModeSelect> Drop for ModeGuard<'_, L> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.target.swap_mode(previous);
        }
    }
}
