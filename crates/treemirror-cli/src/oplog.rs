//! Operation log
//!
//! Every sync event becomes one `<timestamp> - <message>` line in the log
//! file, optionally echoed to stdout.

use anyhow::{anyhow, bail, Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use console::style;
use std::io::Write;
use std::path::Path;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use treemirror_sync::EventSink;
use treemirror_types::{OperationRecord, OperationVerb, SyncEvent, Timestamp};

/// Writes operation log lines
pub struct OperationLog<W = NonBlocking> {
    writer: W,
    timestamp_format: String,
    echo: bool,
    _guard: Option<WorkerGuard>,
}

impl OperationLog {
    /// Open (or append to) the log file at `path`, creating its directory
    pub fn open(path: &Path, timestamp_format: &str, echo: bool) -> Result<Self> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(directory).with_context(|| {
            format!("Failed to create log directory '{}'", directory.display())
        })?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("Log file path '{}' has no file name", path.display()))?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name.to_string_lossy())
            .build(directory)
            .with_context(|| format!("Failed to open log file '{}'", path.display()))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let mut log = Self::with_writer(writer, timestamp_format, echo)?;
        log._guard = Some(guard);
        Ok(log)
    }
}

impl<W: Write> OperationLog<W> {
    /// Log to an arbitrary writer
    pub fn with_writer(writer: W, timestamp_format: &str, echo: bool) -> Result<Self> {
        if StrftimeItems::new(timestamp_format).any(|item| matches!(item, Item::Error)) {
            bail!("Invalid timestamp format '{}'", timestamp_format);
        }
        Ok(Self {
            writer,
            timestamp_format: timestamp_format.to_string(),
            echo,
            _guard: None,
        })
    }

    /// Log an error that stopped a whole pass
    pub fn error(&mut self, message: &str) {
        let line = format!("Error: {}", message);
        self.write_line(&Local::now(), &line, style(&line).red().bold().to_string());
    }

    fn write_line(&mut self, timestamp: &Timestamp, message: &str, styled: String) {
        let timestamp = timestamp.format(&self.timestamp_format).to_string();

        if let Err(e) = writeln!(self.writer, "{} - {}", timestamp, message) {
            warn!("Failed to write operation log: {}", e);
        }
        if self.echo {
            println!("{} - {}", style(timestamp).dim(), styled);
        }
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write> EventSink for OperationLog<W> {
    fn emit(&mut self, event: SyncEvent) {
        let message = describe(&event);
        let styled = match &event {
            SyncEvent::Operation(record) if record.verb.is_copy() => style(&message).green(),
            SyncEvent::Operation(record) if record.verb.is_removal() => style(&message).yellow(),
            SyncEvent::Operation(_) => style(&message).cyan(),
            SyncEvent::Failure(_) => style(&message).red().bold(),
        }
        .to_string();

        let timestamp = match &event {
            SyncEvent::Operation(record) => record.timestamp,
            SyncEvent::Failure(failure) => failure.timestamp,
        };
        self.write_line(&timestamp, &message, styled);
    }
}

/// Render the message part of a log line
pub fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::Operation(record) => describe_record(record),
        SyncEvent::Failure(failure) => format!("Error: {}", failure.message),
    }
}

fn describe_record(record: &OperationRecord) -> String {
    let dest = record.dest_path.display();
    let source = record.source_path.as_deref().unwrap_or_else(|| Path::new(""));
    match record.verb {
        OperationVerb::CopiedFile => {
            format!("Copied file from: {} to: {}", source.display(), dest)
        }
        OperationVerb::CopiedDirectory => {
            format!("Copied directory from: {} to: {}", source.display(), dest)
        }
        OperationVerb::RemovedFile => format!("Removed file {}", dest),
        OperationVerb::RemovedDirectory => format!("Removed directory {}", dest),
        OperationVerb::CreatedDirectory => format!("Created directory {}", dest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;
    use treemirror_config::DEFAULT_TIMESTAMP_FORMAT;
    use treemirror_types::SubtreeFailure;

    #[rstest]
    #[case(
        OperationRecord::copied("/s/a.txt", "/r/a.txt", false),
        "Copied file from: /s/a.txt to: /r/a.txt"
    )]
    #[case(
        OperationRecord::copied("/s/dir", "/r/dir", true),
        "Copied directory from: /s/dir to: /r/dir"
    )]
    #[case(OperationRecord::removed("/r/b.txt", false), "Removed file /r/b.txt")]
    #[case(OperationRecord::removed("/r/old", true), "Removed directory /r/old")]
    #[case(OperationRecord::created_directory("/r"), "Created directory /r")]
    fn test_describe_operation(#[case] record: OperationRecord, #[case] expected: &str) {
        assert_eq!(describe(&SyncEvent::Operation(record)), expected);
    }

    #[test]
    fn test_describe_failure() {
        let failure = SubtreeFailure::new("/r/locked", "Failed to list directory '/r/locked'");
        assert_eq!(
            describe(&SyncEvent::Failure(failure)),
            "Error: Failed to list directory '/r/locked'"
        );
    }

    #[test]
    fn test_lines_are_timestamped() {
        let mut log = OperationLog::with_writer(Vec::new(), DEFAULT_TIMESTAMP_FORMAT, false).unwrap();
        let record = OperationRecord::removed("/r/b.txt", false);
        let expected_prefix = record.timestamp.format(DEFAULT_TIMESTAMP_FORMAT).to_string();

        log.emit(SyncEvent::Operation(record));
        log.error("Source directory '/s' does not exist");

        let output = String::from_utf8(log.get_ref().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("{} - Removed file /r/b.txt", expected_prefix));
        assert!(lines[1].ends_with(" - Error: Source directory '/s' does not exist"));
    }

    #[test]
    fn test_invalid_timestamp_format_is_rejected() {
        assert!(OperationLog::with_writer(Vec::new(), "%Y-%Q", false).is_err());
    }

    #[test]
    fn test_open_creates_log_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/nested/treemirror.log");

        {
            let mut log = OperationLog::open(&path, DEFAULT_TIMESTAMP_FORMAT, false).unwrap();
            log.emit(SyncEvent::Operation(OperationRecord::created_directory("/r")));
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with(" - Created directory /r\n"));
    }
}
