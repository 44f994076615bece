//! CLI for vislog experiment logs.
//!
//! Provides commands for inspecting a log directory and dumping the records
//! of a single tag.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use vislog::component::{BlobReader, Medium};
use vislog::numeric::{NumericKind, NumericValue};
use vislog::storage::INDEX_FILE;
use vislog::{ComponentKind, ComponentReader, DEFAULT_MODE, LogReader, Numeric, TabletLookup};

/// vislog: multi-modal experiment log inspector.
#[derive(Parser)]
#[command(name = "vislog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display modes, tags, component kinds, record counts and disk usage.
    Info {
        /// Path to the log directory.
        log_dir: PathBuf,
    },

    /// List the tags of one mode.
    Tags {
        /// Path to the log directory.
        log_dir: PathBuf,

        /// Mode to list.
        #[arg(long, default_value = DEFAULT_MODE)]
        mode: String,
    },

    /// Print the records of one tag.
    Dump {
        /// Path to the log directory.
        log_dir: PathBuf,

        /// Tag to dump.
        tag: String,

        /// Mode the tag belongs to.
        #[arg(long, default_value = DEFAULT_MODE)]
        mode: String,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },
}

/// Output format for dumped records.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with a record array.
    Json,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { log_dir } => render_info(&log_dir),
        Commands::Tags { log_dir, mode } => render_tags(&log_dir, &mode),
        Commands::Dump {
            log_dir,
            tag,
            mode,
            format,
        } => render_dump(&log_dir, &tag, &mode, format),
    };

    match result {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Opens a reader, refusing directories that hold no log.
fn open_log(log_dir: &Path) -> CliResult<LogReader> {
    if !log_dir.join(INDEX_FILE).exists() {
        return Err(format!("No log found at '{}'", log_dir.display()).into());
    }
    Ok(LogReader::open(log_dir)?)
}

/// Implements `vislog info <log_dir>`.
fn render_info(log_dir: &Path) -> CliResult<String> {
    let mut reader = open_log(log_dir)?;
    let mut out = String::new();

    writeln!(out, "Log: {}", log_dir.display())?;
    writeln!(out)?;

    let modes = reader.modes();
    writeln!(out, "Modes: {}", modes.len())?;
    for mode in &modes {
        reader.set_mode(mode)?;
        let tags = reader.tags();
        writeln!(out)?;
        writeln!(out, "  Mode \"{mode}\": {} tags", tags.len())?;

        for tag in &tags {
            let view = reader.tablet(tag)?;
            let kind = view
                .kind()
                .map_or_else(|| "unbound".to_string(), |k| k.to_string());
            write!(out, "    - {tag} ({kind}): {} records", view.num_records())?;
            if view.num_corrupt() > 0 {
                write!(out, ", {} corrupt", view.num_corrupt())?;
            }
            if !view.caption().is_empty() {
                write!(out, " \"{}\"", view.caption())?;
            }
            writeln!(out)?;
        }
    }

    let total_size = dir_size(log_dir)?;
    writeln!(out)?;
    writeln!(
        out,
        "Total disk usage: {} ({total_size} bytes)",
        format_bytes(total_size)
    )?;

    Ok(out)
}

/// Implements `vislog tags <log_dir> --mode <mode>`.
fn render_tags(log_dir: &Path, mode: &str) -> CliResult<String> {
    let mut reader = open_log(log_dir)?;
    reader.set_mode(mode)?;

    let mut out = String::new();
    for tag in reader.tags() {
        let kind = reader
            .kind_of(&tag)?
            .map_or_else(|| "unbound".to_string(), |k| k.to_string());
        writeln!(out, "{tag}\t{kind}")?;
    }
    Ok(out)
}

/// One dumped record.
struct Row {
    step: i64,
    timestamp: i64,
    value: Value,
}

/// A dumped record, or why it could not be read.
type Entry = Result<Row, String>;

/// Implements `vislog dump <log_dir> <tag>`.
fn render_dump(log_dir: &Path, tag: &str, mode: &str, format: OutputFormat) -> CliResult<String> {
    let mut reader = open_log(log_dir)?;
    reader.set_mode(mode)?;

    let kind = reader.kind_of(tag)?;
    let entries = match kind {
        None => Vec::new(),
        Some(ComponentKind::Scalar(numeric)) => match numeric {
            NumericKind::I32 => scalar_entries::<i32>(&reader, tag)?,
            NumericKind::I64 => scalar_entries::<i64>(&reader, tag)?,
            NumericKind::F32 => scalar_entries::<f32>(&reader, tag)?,
            NumericKind::F64 => scalar_entries::<f64>(&reader, tag)?,
        },
        Some(ComponentKind::Histogram(numeric)) => match numeric {
            NumericKind::I32 => histogram_entries::<i32>(&reader, tag)?,
            NumericKind::I64 => histogram_entries::<i64>(&reader, tag)?,
            NumericKind::F32 => histogram_entries::<f32>(&reader, tag)?,
            NumericKind::F64 => histogram_entries::<f64>(&reader, tag)?,
        },
        Some(ComponentKind::Text) => text_entries(&reader, tag)?,
        Some(ComponentKind::Image) => blob_entries(&reader.image(tag)?),
        Some(ComponentKind::Audio) => blob_entries(&reader.audio(tag)?),
        Some(ComponentKind::Embedding) => embedding_entries(&reader, tag)?,
    };

    let kind = kind.map_or_else(|| "unbound".to_string(), |k| k.to_string());
    match format {
        OutputFormat::Csv => {
            let mut out = String::new();
            writeln!(
                out,
                "# mode={mode}, tag={tag}, kind={kind}, records={}",
                entries.len()
            )?;
            writeln!(out, "step,timestamp_ms,value")?;
            for (index, entry) in entries.iter().enumerate() {
                match entry {
                    Ok(row) => writeln!(
                        out,
                        "{},{},{}",
                        row.step,
                        row.timestamp,
                        csv_value(&row.value)
                    )?,
                    Err(reason) => writeln!(out, "# record {index}: {reason}")?,
                }
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let records: Vec<Value> = entries
                .iter()
                .enumerate()
                .map(|(index, entry)| match entry {
                    Ok(row) => json!({
                        "step": row.step,
                        "timestamp_ms": row.timestamp,
                        "value": row.value,
                    }),
                    Err(reason) => json!({
                        "index": index,
                        "error": reason,
                    }),
                })
                .collect();

            let output = json!({
                "mode": mode,
                "tag": tag,
                "kind": kind,
                "count": records.len(),
                "records": records,
            });
            Ok(format!("{}\n", serde_json::to_string_pretty(&output)?))
        }
    }
}

fn scalar_entries<T: Numeric>(reader: &LogReader, tag: &str) -> CliResult<Vec<Entry>> {
    let scalar = reader.scalar::<T>(tag)?;
    let view = scalar.view();
    Ok((0..scalar.num_records())
        .map(|index| {
            let record = view.record(index).map_err(|e| e.to_string())?;
            let value = scalar.record(index).map_err(|e| e.to_string())?;
            Ok(Row {
                step: record.step,
                timestamp: record.timestamp,
                value: numeric_json(value.into_value()),
            })
        })
        .collect())
}

fn histogram_entries<T: Numeric>(reader: &LogReader, tag: &str) -> CliResult<Vec<Entry>> {
    let histogram = reader.histogram::<T>(tag)?;
    Ok((0..histogram.num_records())
        .map(|index| {
            let record = histogram.record(index).map_err(|e| e.to_string())?;
            let buckets: Vec<Value> = record
                .instances
                .iter()
                .map(|bucket| {
                    json!({
                        "left": numeric_json(bucket.left.into_value()),
                        "right": numeric_json(bucket.right.into_value()),
                        "frequency": bucket.frequency,
                    })
                })
                .collect();
            Ok(Row {
                step: record.step,
                timestamp: record.timestamp,
                value: Value::Array(buckets),
            })
        })
        .collect())
}

fn text_entries(reader: &LogReader, tag: &str) -> CliResult<Vec<Entry>> {
    let text = reader.text(tag)?;
    let view = text.view();
    Ok((0..text.total_records())
        .map(|index| {
            let record = view.record(index).map_err(|e| e.to_string())?;
            let value = text.record(index).map_err(|e| e.to_string())?;
            Ok(Row {
                step: record.step,
                timestamp: record.timestamp,
                value: Value::String(value),
            })
        })
        .collect())
}

/// Summarizes each sampling period by its sample count and shapes.
fn blob_entries<M: Medium>(blobs: &BlobReader<M>) -> Vec<Entry> {
    (0..blobs.num_records())
        .map(|offset| {
            let record = blobs.view().record(offset).map_err(|e| e.to_string())?;
            let count = blobs.num_samples(offset).map_err(|e| e.to_string())?;
            let shapes = (0..count)
                .map(|index| blobs.record(offset, index).map(|sample| sample.shape))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            Ok(Row {
                step: record.step,
                timestamp: record.timestamp,
                value: json!({ "samples": count, "shapes": shapes }),
            })
        })
        .collect()
}

/// Summarizes the embedding table by its size and labels.
fn embedding_entries(reader: &LogReader, tag: &str) -> CliResult<Vec<Entry>> {
    let embedding = reader.embedding(tag)?;
    if embedding.total_records() == 0 {
        return Ok(Vec::new());
    }

    let entry = embedding
        .view()
        .record(0)
        .and_then(|record| {
            let rows = embedding.get_all_embeddings()?;
            let labels = embedding.get_all_labels()?;
            Ok(Row {
                step: record.step,
                timestamp: record.timestamp,
                value: json!({
                    "rows": rows.len(),
                    "dimension": rows.first().map_or(0, Vec::len),
                    "labels": labels,
                }),
            })
        })
        .map_err(|e| e.to_string());
    Ok(vec![entry])
}

fn numeric_json(value: NumericValue) -> Value {
    match value {
        NumericValue::I32(v) => json!(v),
        NumericValue::I64(v) => json!(v),
        NumericValue::F32(v) => json!(v),
        NumericValue::F64(v) => json!(v),
    }
}

/// Formats a value as one CSV field, quoting when needed.
fn csv_value(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> CliResult<u64> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vislog::LogWriter;

    fn write_sample_log(path: &Path) {
        let mut writer = LogWriter::open(path, 0).unwrap();
        writer.set_mode("train").unwrap();
        let loss = writer.new_scalar::<f32>("loss").unwrap();
        loss.add_record(0, 0.5).unwrap();
        loss.add_record(1, 0.25).unwrap();
        let notes = writer.new_text("notes").unwrap();
        notes.set_caption("run notes").unwrap();
        notes.add_record(0, "lr=0.1, warmup").unwrap();
        writer
            .new_histogram::<i32>("tokens", 2)
            .unwrap()
            .add_record(0, &[1, 2, 3])
            .unwrap();
        writer.save().unwrap();
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }

    #[test]
    fn test_csv_value_quotes_when_needed() {
        assert_eq!(csv_value(&json!(0.5)), "0.5");
        assert_eq!(csv_value(&json!("plain")), "plain");
        assert_eq!(csv_value(&json!("a,b")), "\"a,b\"");
        assert_eq!(csv_value(&json!("say \"hi\"")), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_info_lists_modes_and_tags() {
        let temp_dir = tempdir().unwrap();
        write_sample_log(temp_dir.path());

        let info = render_info(temp_dir.path()).unwrap();
        assert!(info.contains("Mode \"train\": 3 tags"));
        assert!(info.contains("- loss (scalar<f32>): 2 records"));
        assert!(info.contains("- notes (text): 1 records \"run notes\""));
        assert!(info.contains("Total disk usage:"));
    }

    #[test]
    fn test_tags_for_mode() {
        let temp_dir = tempdir().unwrap();
        write_sample_log(temp_dir.path());

        let tags = render_tags(temp_dir.path(), "train").unwrap();
        assert_eq!(
            tags,
            "loss\tscalar<f32>\nnotes\ttext\ntokens\thistogram<i32>\n"
        );
        assert_eq!(render_tags(temp_dir.path(), "test").unwrap(), "");
    }

    #[test]
    fn test_dump_scalar_csv() {
        let temp_dir = tempdir().unwrap();
        write_sample_log(temp_dir.path());

        let csv = render_dump(temp_dir.path(), "loss", "train", OutputFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "# mode=train, tag=loss, kind=scalar<f32>, records=2");
        assert_eq!(lines[1], "step,timestamp_ms,value");
        assert!(lines[2].starts_with("0,") && lines[2].ends_with(",0.5"));
        assert!(lines[3].starts_with("1,") && lines[3].ends_with(",0.25"));
    }

    #[test]
    fn test_dump_text_json() {
        let temp_dir = tempdir().unwrap();
        write_sample_log(temp_dir.path());

        let out = render_dump(temp_dir.path(), "notes", "train", OutputFormat::Json).unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["kind"], "text");
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["records"][0]["value"], "lr=0.1, warmup");
    }

    #[test]
    fn test_dump_histogram_json() {
        let temp_dir = tempdir().unwrap();
        write_sample_log(temp_dir.path());

        let out = render_dump(temp_dir.path(), "tokens", "train", OutputFormat::Json).unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        let buckets = parsed["records"][0]["value"].as_array().unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0]["left"], 1);
        assert_eq!(buckets[1]["right"], 3);
    }

    #[test]
    fn test_missing_log_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let err = render_info(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("No log found"));
        assert!(render_dump(temp_dir.path(), "loss", "train", OutputFormat::Csv).is_err());
    }

    #[test]
    fn test_dump_unknown_tag_is_an_error() {
        let temp_dir = tempdir().unwrap();
        write_sample_log(temp_dir.path());
        assert!(render_dump(temp_dir.path(), "accuracy", "train", OutputFormat::Csv).is_err());
    }
}
