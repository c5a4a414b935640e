//! Request journal: a bounded in-memory ring of log entries, mirrored to a
//! JSONL file when one is configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

struct Journal {
    entries: VecDeque<LogEntry>,
    writer: Option<BufWriter<File>>,
}

impl Journal {
    fn open(file_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut journal = Self::in_memory();

        // Seed the ring with the tail of a previous run.
        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    journal.remember(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        journal.writer = Some(BufWriter::new(file));

        Ok(journal)
    }

    fn in_memory() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            writer: None,
        }
    }

    fn append(&mut self, entry: LogEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{json}");
                let _ = writer.flush();
            }
        }
        self.remember(entry);
    }

    fn remember(&mut self, entry: LogEntry) {
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Journal>>);

impl SharedLogger {
    /// Journal backed by a JSONL file; previous entries are reloaded.
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Journal::open(file_path.as_ref())?))))
    }

    /// Journal that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Journal::in_memory())))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut journal) = self.0.lock() {
            journal.append(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn debug(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(LogEntry::new(level, component, message).with_context(context));
    }

    /// One line per handled HTTP request. `path` must already be redacted.
    pub fn request(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let level = match status {
            500..=u16::MAX => LogLevel::Error,
            400..=499 => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        self.log_with_context(
            level,
            "http",
            format!("{method} {path} {status} {elapsed_ms}ms"),
            serde_json::json!({
                "method": method,
                "path": path,
                "status": status,
                "elapsed_ms": elapsed_ms,
            }),
        );
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0
            .lock()
            .map(|j| j.entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_entries() {
        let logger = SharedLogger::in_memory();
        logger.request("POST", "/v1/messages", 200, Duration::from_millis(12));
        logger.request("POST", "/chat/completions", 400, Duration::from_millis(3));

        let recent = logger.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "POST /chat/completions 400 3ms");
        assert_eq!(recent[0].level, LogLevel::Warn);
        assert_eq!(recent[1].level, LogLevel::Info);
        assert_eq!(recent[1].context.as_ref().unwrap()["status"], 200);
    }

    #[test]
    fn test_file_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("gateway.jsonl");

        let logger = SharedLogger::new(&path).unwrap();
        logger.info("startup", "first run");
        drop(logger);

        let reopened = SharedLogger::new(&path).unwrap();
        reopened.error("proxy", "second run");

        let recent = reopened.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second run");
        assert_eq!(recent[1].message, "first run");

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[test]
    fn test_ring_is_bounded() {
        let logger = SharedLogger::in_memory();
        for i in 0..MAX_LOG_ENTRIES + 5 {
            logger.debug("test", format!("entry {i}"));
        }
        let all = logger.recent(usize::MAX);
        assert_eq!(all.len(), MAX_LOG_ENTRIES);
        assert_eq!(all[0].message, format!("entry {}", MAX_LOG_ENTRIES + 4));
    }
}
