//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type で型ごとに区別します。
//! - 時刻でソート可能（生成順にほぼ並ぶ）
//! - 調整なしで複数プロセスから生成できる
//! - `TaskId` と `JobId` はコンパイル時に混同できない

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind. Provides the prefix used by `Display`.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
///
/// `T` is a zero-sized marker, so `Id<T>` has the same size as `Ulid`.
/// Serialized form is the bare ULID string (no prefix).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse either the bare ULID (storage form) or the prefixed display form.
    pub fn parse(value: &str) -> Result<Self, ulid::DecodeError> {
        let raw = value.strip_prefix(T::prefix()).unwrap_or(value);
        Ulid::from_string(raw).map(Self::from_ulid)
    }

    /// Storage form: the bare ULID string.
    pub fn to_storage(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Marker for jobs owned by the external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Marker for persisted task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Marker for lifecycle log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Log {}

impl IdMarker for Log {
    fn prefix() -> &'static str {
        "log-"
    }
}

/// Identifier of a scheduler job (one scheduled execution of a task).
pub type JobId = Id<Job>;

/// Identifier of a task record (surrogate key assigned on first persist).
pub type TaskId = Id<Task>;

/// Identifier of a lifecycle log entry.
pub type LogId = Id<Log>;
