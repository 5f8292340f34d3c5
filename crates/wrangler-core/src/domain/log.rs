//! Lifecycle log entries: append-only, per task, time-ordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{JobId, LogId, TaskId};

/// Severity levels (RFC 5424 order, most severe first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Emergency => "emergency",
            LogLevel::Alert => "alert",
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Notice => "notice",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emergency" => Ok(LogLevel::Emergency),
            "alert" => Ok(LogLevel::Alert),
            "critical" => Ok(LogLevel::Critical),
            "error" => Ok(LogLevel::Error),
            "warning" => Ok(LogLevel::Warning),
            "notice" => Ok(LogLevel::Notice),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Lifecycle event tag of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Created,
    Started,
    Rescheduled,
    Retrying,
    Finished,
    Failed,
    Cancelled,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Created => "created",
            LogKind::Started => "started",
            LogKind::Rescheduled => "rescheduled",
            LogKind::Retrying => "retrying",
            LogKind::Finished => "finished",
            LogKind::Failed => "failed",
            LogKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(LogKind::Created),
            "started" => Ok(LogKind::Started),
            "rescheduled" => Ok(LogKind::Rescheduled),
            "retrying" => Ok(LogKind::Retrying),
            "finished" => Ok(LogKind::Finished),
            "failed" => Ok(LogKind::Failed),
            "cancelled" => Ok(LogKind::Cancelled),
            other => Err(format!("unknown log kind: {other}")),
        }
    }
}

/// One persisted lifecycle log entry. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogId,
    pub task_id: TaskId,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub kind: LogKind,
    pub message: String,
    /// Structured key/value payload (always a JSON object).
    pub context: serde_json::Value,
}
