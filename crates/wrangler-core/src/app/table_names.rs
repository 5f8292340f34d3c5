//! Table and index names derived from a configurable prefix.

use sha2::{Digest, Sha256};

/// Longest identifier most SQL engines accept without truncation.
pub const IDENTIFIER_BUDGET: usize = 64;

const TASKS: &str = "tasks";
const TASK_LOGS: &str = "task_logs";
const TASKS_JOB_ID_IDX: &str = "tasks_job_id_idx";
const TASKS_FINGERPRINT_IDX: &str = "tasks_fingerprint_idx";
const TASK_LOGS_TASK_ID_IDX: &str = "task_logs_task_id_idx";

const LONGEST_SUFFIX: usize = TASK_LOGS_TASK_ID_IDX.len();
const HASH_CHARS: usize = 8;

/// Names of every schema object, computed once.
///
/// A prefix that would push any identifier past [`IDENTIFIER_BUDGET`] is
/// cut and tagged with the first 8 hex chars of its SHA-256, so two long
/// prefixes sharing a head still map to different tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    prefix: String,
    tasks: String,
    task_logs: String,
    tasks_job_id_idx: String,
    tasks_fingerprint_idx: String,
    task_logs_task_id_idx: String,
}

impl TableNames {
    pub fn new(prefix: &str) -> Self {
        let prefix = shorten(prefix);
        Self {
            tasks: format!("{prefix}{TASKS}"),
            task_logs: format!("{prefix}{TASK_LOGS}"),
            tasks_job_id_idx: format!("{prefix}{TASKS_JOB_ID_IDX}"),
            tasks_fingerprint_idx: format!("{prefix}{TASKS_FINGERPRINT_IDX}"),
            task_logs_task_id_idx: format!("{prefix}{TASK_LOGS_TASK_ID_IDX}"),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn tasks(&self) -> &str {
        &self.tasks
    }

    pub fn task_logs(&self) -> &str {
        &self.task_logs
    }

    pub fn tasks_job_id_idx(&self) -> &str {
        &self.tasks_job_id_idx
    }

    pub fn tasks_fingerprint_idx(&self) -> &str {
        &self.tasks_fingerprint_idx
    }

    pub fn task_logs_task_id_idx(&self) -> &str {
        &self.task_logs_task_id_idx
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_TABLE_PREFIX)
    }
}

fn shorten(prefix: &str) -> String {
    let max_prefix = IDENTIFIER_BUDGET - LONGEST_SUFFIX;
    if prefix.len() <= max_prefix {
        return prefix.to_string();
    }
    let keep = max_prefix - HASH_CHARS - 1;
    let mut head = String::with_capacity(max_prefix);
    for c in prefix.chars() {
        if head.len() + c.len_utf8() > keep {
            break;
        }
        head.push(c);
    }
    let digest = hex::encode(Sha256::digest(prefix.as_bytes()));
    format!("{head}{}_", &digest[..HASH_CHARS])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(names: &TableNames) -> [&str; 5] {
        [
            names.tasks(),
            names.task_logs(),
            names.tasks_job_id_idx(),
            names.tasks_fingerprint_idx(),
            names.task_logs_task_id_idx(),
        ]
    }

    #[test]
    fn short_prefix_is_used_verbatim() {
        let names = TableNames::new("acme_");
        assert_eq!(names.tasks(), "acme_tasks");
        assert_eq!(names.task_logs(), "acme_task_logs");
        assert_eq!(names.prefix(), "acme_");
    }

    #[test]
    fn long_prefix_is_shortened_deterministically() {
        let long = "a".repeat(80);
        let names = TableNames::new(&long);

        assert_eq!(names, TableNames::new(&long));
        assert!(names.prefix().ends_with('_'));
        for name in all(&names) {
            assert!(name.len() <= IDENTIFIER_BUDGET, "{name} is {} chars", name.len());
        }
        assert_eq!(names.task_logs_task_id_idx().len(), IDENTIFIER_BUDGET);
    }

    #[test]
    fn long_prefixes_with_a_common_head_do_not_collide() {
        let a = TableNames::new(&format!("{}_one_", "x".repeat(60)));
        let b = TableNames::new(&format!("{}_two_", "x".repeat(60)));
        assert_ne!(a.tasks(), b.tasks());
    }

    #[test]
    fn prefix_at_the_budget_edge_is_kept() {
        let edge = "p".repeat(IDENTIFIER_BUDGET - LONGEST_SUFFIX);
        assert_eq!(TableNames::new(&edge).prefix(), edge);
    }
}
