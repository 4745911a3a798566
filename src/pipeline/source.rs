//! Reading source abstraction for sensor ingestion.
//!
//! The monitoring loop calls [`ReadingSource::next_reading`] in a `select!`
//! with cancellation. Two sources ship with the crate: an in-memory replay
//! and a JSON-lines reader over a file or stdin.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::types::SensorReading;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_name}: {source}")]
    Io {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Events produced by a reading source.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingEvent {
    Reading(SensorReading),
    /// No more data
    Eof,
}

#[async_trait]
pub trait ReadingSource: Send {
    /// Next reading, or `Eof` when exhausted. `Err` is unrecoverable.
    async fn next_reading(&mut self) -> Result<ReadingEvent, SourceError>;

    /// Name for logging (e.g. "replay", "stdin").
    fn source_name(&self) -> &str;

    /// Input lines dropped because they did not parse.
    fn skipped(&self) -> u64 {
        0
    }
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded readings with an optional delay between them.
pub struct ReplaySource {
    readings: std::vec::IntoIter<SensorReading>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(readings: Vec<SensorReading>, delay_ms: u64) -> Self {
        Self {
            readings: readings.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }
}

#[async_trait]
impl ReadingSource for ReplaySource {
    async fn next_reading(&mut self) -> Result<ReadingEvent, SourceError> {
        // no delay before the first reading
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.readings.next() {
            Some(r) => {
                self.yielded_first = true;
                Ok(ReadingEvent::Reading(r))
            }
            None => Ok(ReadingEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// JSON-lines Source
// ============================================================================

/// One JSON `SensorReading` per line. Blank lines are ignored; malformed
/// lines are logged, counted and skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    name: String,
    line_buffer: Vec<u8>,
    line_number: u64,
    skipped: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
            line_buffer: Vec::with_capacity(256),
            line_number: 0,
            skipped: 0,
        }
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    pub fn from_stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let name = path.display().to_string();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| SourceError::Io {
                source_name: name.clone(),
                source,
            })?;
        Ok(Self::new(BufReader::new(file), name))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ReadingSource for JsonLinesSource<R> {
    async fn next_reading(&mut self) -> Result<ReadingEvent, SourceError> {
        loop {
            self.line_buffer.clear();
            let bytes = self
                .reader
                .read_until(b'\n', &mut self.line_buffer)
                .await
                .map_err(|source| SourceError::Io {
                    source_name: self.name.clone(),
                    source,
                })?;
            if bytes == 0 {
                return Ok(ReadingEvent::Eof);
            }
            self.line_number += 1;
            // Non-UTF-8 lines fail the parse below like any other bad line
            let line = self.line_buffer.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<SensorReading>(line) {
                Ok(reading) => return Ok(ReadingEvent::Reading(reading)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(source = %self.name, line = self.line_number, error = %e, "Skipping malformed reading");
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }

    fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    #[tokio::test]
    async fn test_replay_yields_then_eof() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut source = ReplaySource::new(
            vec![
                SensorReading::new("S1", "capacity", 150.0, "kPa", ts),
                SensorReading::new("S1", "capacity", 149.0, "kPa", ts),
            ],
            0,
        );
        assert!(matches!(source.next_reading().await.unwrap(), ReadingEvent::Reading(_)));
        assert!(matches!(source.next_reading().await.unwrap(), ReadingEvent::Reading(_)));
        assert_eq!(source.next_reading().await.unwrap(), ReadingEvent::Eof);
        assert_eq!(source.next_reading().await.unwrap(), ReadingEvent::Eof);
    }

    #[tokio::test]
    async fn test_json_lines_skips_malformed() {
        let input = concat!(
            r#"{"sensor_id":"S1","metric":"capacity","value":150.0,"unit":"kPa","timestamp":"2024-03-01T08:00:00Z"}"#,
            "\n\n",
            "not json\n",
            r#"{"sensor_id":"S1","metric":"capacity","value":148.5,"timestamp":"2024-03-01T08:00:10Z"}"#,
            "\n"
        );
        let mut source = JsonLinesSource::new(BufReader::new(input.as_bytes()), "inline");

        let mut values = Vec::new();
        while let ReadingEvent::Reading(r) = source.next_reading().await.unwrap() {
            values.push(r.value);
        }
        assert_eq!(values, vec![150.0, 148.5]);
        assert_eq!(source.skipped(), 1);
        assert_eq!(source.source_name(), "inline");
    }

    #[tokio::test]
    async fn test_json_lines_skips_invalid_utf8() {
        let mut input = Vec::new();
        input.extend_from_slice(
            br#"{"sensor_id":"S1","metric":"capacity","value":150.0,"timestamp":"2024-03-01T08:00:00Z"}"#,
        );
        input.extend_from_slice(b"\n\xff\xfe\n");
        input.extend_from_slice(
            br#"{"sensor_id":"S1","metric":"capacity","value":147.0,"timestamp":"2024-03-01T08:00:10Z"}"#,
        );
        input.push(b'\n');
        let mut source = JsonLinesSource::new(BufReader::new(input.as_slice()), "binary");

        let mut values = Vec::new();
        while let ReadingEvent::Reading(r) = source.next_reading().await.unwrap() {
            values.push(r.value);
        }
        assert_eq!(values, vec![150.0, 147.0]);
        assert_eq!(source.skipped(), 1);
    }

    #[tokio::test]
    async fn test_open_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"sensor_id":"S2","metric":"settlement","value":12.0,"unit":"mm","timestamp":"2024-03-01T08:00:00Z"}}"#
        )
        .unwrap();

        let mut source = JsonLinesSource::open(file.path()).await.unwrap();
        match source.next_reading().await.unwrap() {
            ReadingEvent::Reading(r) => assert_eq!(r.metric, "settlement"),
            ReadingEvent::Eof => panic!("expected a reading"),
        }

        let missing = JsonLinesSource::open(Path::new("/nonexistent/readings.jsonl")).await;
        assert!(matches!(missing, Err(SourceError::Io { .. })));
    }
}
