//! Embedding components.
//!
//! A tag holds a single table of labelled vectors that each write replaces.

use std::collections::HashMap;

use crate::component::ComponentReader;
use crate::error::{RecordError, Result};
use crate::record::{ComponentKind, EmbeddingTable, Payload, Record};
use crate::tablet::{TabletSnapshot, TabletView};
use crate::writer::TabletHandle;

/// Writes the embedding table of a tag. Each write replaces the previous
/// table.
#[derive(Debug)]
pub struct Embedding {
    tablet: TabletHandle,
}

impl Embedding {
    /// Binds `tablet` as an embedding.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet is bound to another kind.
    pub fn new(tablet: TabletHandle) -> Result<Self> {
        tablet.bind(ComponentKind::Embedding)?;
        Ok(Self { tablet })
    }

    /// Stores `embeddings` with `words[i]` labelling row `i`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::EmbeddingShape`] if the rows differ in dimension or
    ///   the word count differs from the row count
    /// - [`StorageError`](crate::error::StorageError) if a triggered flush
    ///   fails
    pub fn add_embeddings_with_word_list<S: AsRef<str>>(
        &self,
        embeddings: &[Vec<f32>],
        words: &[S],
    ) -> Result<()> {
        check_rows(embeddings)?;
        if words.len() != embeddings.len() {
            return Err(shape_error(format!(
                "{} words for {} embeddings",
                words.len(),
                embeddings.len()
            )));
        }

        self.write(EmbeddingTable {
            embeddings: embeddings.to_vec(),
            labels: words.iter().map(|w| w.as_ref().to_string()).collect(),
        })
    }

    /// Stores `embeddings` with `word_dict[word]` naming the row each word
    /// labels.
    ///
    /// # Errors
    ///
    /// - [`RecordError::EmbeddingShape`] if the rows differ in dimension, an
    ///   index is out of range, or the indices do not cover every row
    ///   exactly once
    /// - [`StorageError`](crate::error::StorageError) if a triggered flush
    ///   fails
    pub fn add_embeddings_with_word_dict(
        &self,
        embeddings: &[Vec<f32>],
        word_dict: &HashMap<String, usize>,
    ) -> Result<()> {
        check_rows(embeddings)?;

        let mut labels: Vec<Option<String>> = vec![None; embeddings.len()];
        for (word, &index) in word_dict {
            let Some(slot) = labels.get_mut(index) else {
                return Err(shape_error(format!(
                    "word '{word}' maps to row {index} of {}",
                    embeddings.len()
                )));
            };
            if slot.is_some() {
                return Err(shape_error(format!("row {index} is labelled twice")));
            }
            *slot = Some(word.clone());
        }

        let labels = labels
            .into_iter()
            .enumerate()
            .map(|(index, label)| label.ok_or_else(|| shape_error(format!("row {index} has no word"))))
            .collect::<Result<Vec<_>>>()?;

        self.write(EmbeddingTable {
            embeddings: embeddings.to_vec(),
            labels,
        })
    }

    fn write(&self, table: EmbeddingTable) -> Result<()> {
        self.tablet
            .replace(Record::now(0, Payload::Embedding(table)))
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
}

fn check_rows(embeddings: &[Vec<f32>]) -> Result<()> {
    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    if let Some((row, vector)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, vector)| vector.len() != first.len())
    {
        return Err(shape_error(format!(
            "row {row} has dimension {}, expected {}",
            vector.len(),
            first.len()
        )));
    }
    Ok(())
}

fn shape_error(reason: String) -> crate::error::VislogError {
    RecordError::EmbeddingShape { reason }.into()
}

/// Reads the embedding table of a tag.
#[derive(Debug, Clone)]
pub struct EmbeddingReader {
    view: TabletView,
}

impl EmbeddingReader {
    /// Wraps `view` as an embedding.
    ///
    /// # Errors
    ///
    /// Returns [`TabletError::KindMismatch`](crate::error::TabletError::KindMismatch)
    /// if the tablet holds another kind.
    pub fn new(view: TabletView) -> Result<Self> {
        view.expect_kind(ComponentKind::Embedding)?;
        Ok(Self { view })
    }

    /// The stored table, or `None` if nothing has been written.
    fn table(&self) -> Result<Option<&EmbeddingTable>> {
        let Some(last) = self.view.num_records().checked_sub(1) else {
            return Ok(None);
        };
        match &self.view.record(last)?.payload {
            Payload::Embedding(table) => Ok(Some(table)),
            _ => Err(self
                .view
                .corrupt(last, "record is not an embedding".to_string())
                .into()),
        }
    }

    /// Row labels, in row order. Empty if nothing has been written.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`] if the table is unreadable.
    pub fn get_all_labels(&self) -> Result<Vec<String>> {
        Ok(self.table()?.map(|t| t.labels.clone()).unwrap_or_default())
    }

    /// Embedding rows. Empty if nothing has been written.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`] if the table is unreadable.
    pub fn get_all_embeddings(&self) -> Result<Vec<Vec<f32>>> {
        Ok(self
            .table()?
            .map(|t| t.embeddings.clone())
            .unwrap_or_default())
    }

    /// Number of persisted tables: 0 or 1.
    pub fn total_records(&self) -> usize {
        self.view.num_records()
    }

    /// Number of rows in the table.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Corrupt`] if the table is unreadable.
    pub fn size(&self) -> Result<usize> {
        Ok(self.table()?.map_or(0, |t| t.embeddings.len()))
    }
}

impl ComponentReader for EmbeddingReader {
    fn view(&self) -> &TabletSnapshot {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::reader::LogReader;
    use crate::writer::LogWriter;
    use tempfile::tempdir;

    fn vectors() -> Vec<Vec<f32>> {
        vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]
    }

    #[test]
    fn test_word_list_round_trip() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        let words = writer.new_embedding("words").unwrap();
        words
            .add_embeddings_with_word_list(&vectors(), &["cat", "dog", "fish"])
            .unwrap();
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        let words = reader.embedding("words").unwrap();
        assert_eq!(words.get_all_labels().unwrap(), vec!["cat", "dog", "fish"]);
        assert_eq!(words.get_all_embeddings().unwrap(), vectors());
        assert_eq!(words.total_records(), 1);
        assert_eq!(words.size().unwrap(), 3);
    }

    #[test]
    fn test_word_dict_orders_by_index() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        let words = writer.new_embedding("words").unwrap();

        let dict: HashMap<String, usize> = [("fish", 2), ("cat", 0), ("dog", 1)]
            .into_iter()
            .map(|(w, i)| (w.to_string(), i))
            .collect();
        words.add_embeddings_with_word_dict(&vectors(), &dict).unwrap();
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        let labels = reader.embedding("words").unwrap().get_all_labels().unwrap();
        assert_eq!(labels, vec!["cat", "dog", "fish"]);
    }

    #[test]
    fn test_latest_write_wins() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        let words = writer.new_embedding("words").unwrap();
        words
            .add_embeddings_with_word_list(&vectors(), &["a", "b", "c"])
            .unwrap();
        writer.save().unwrap();
        words
            .add_embeddings_with_word_list(&[vec![9.0]], &["z"])
            .unwrap();
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        let words = reader.embedding("words").unwrap();
        assert_eq!(words.total_records(), 1);
        assert_eq!(words.get_all_labels().unwrap(), vec!["z"]);
        assert_eq!(words.get_all_embeddings().unwrap(), vec![vec![9.0]]);
    }

    #[test]
    fn test_inconsistent_input_rejected() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        let words = writer.new_embedding("words").unwrap();

        let ragged = vec![vec![1.0, 2.0], vec![3.0]];
        let err = words
            .add_embeddings_with_word_list(&ragged, &["a", "b"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert!(
            words
                .add_embeddings_with_word_list(&vectors(), &["a", "b"])
                .is_err()
        );

        let gap: HashMap<String, usize> =
            [("a".to_string(), 0), ("b".to_string(), 2), ("c".to_string(), 3)].into();
        assert!(words.add_embeddings_with_word_dict(&vectors(), &gap).is_err());

        let twice: HashMap<String, usize> =
            [("a".to_string(), 0), ("b".to_string(), 0), ("c".to_string(), 1)].into();
        assert!(words.add_embeddings_with_word_dict(&vectors(), &twice).is_err());
    }

    #[test]
    fn test_unwritten_table_is_empty() {
        let temp_dir = tempdir().unwrap();
        let writer = LogWriter::open(temp_dir.path(), 0).unwrap();
        writer.new_embedding("words").unwrap();
        writer.save().unwrap();

        let reader = LogReader::open(temp_dir.path()).unwrap();
        let words = reader.embedding("words").unwrap();
        assert!(words.get_all_labels().unwrap().is_empty());
        assert!(words.get_all_embeddings().unwrap().is_empty());
        assert_eq!(words.size().unwrap(), 0);
    }
}
