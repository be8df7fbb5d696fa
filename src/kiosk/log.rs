use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    System,
    Admin,
    Emergency,
    Error,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogKind::System => "system",
            LogKind::Admin => "admin",
            LogKind::Emergency => "emergency",
            LogKind::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log shown on the kiosk screen.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: LogKind, content: impl Into<String>) -> &LogEntry {
        let entry = LogEntry {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        };
        info!(
            target: "busstop_alert::kiosk::screen",
            kind = %entry.kind,
            time = %entry.timestamp.format("%H:%M:%S"),
            "{}",
            entry.content
        );
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: LogKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }
}
