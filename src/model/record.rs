use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Pending,
    Matched,
    NotFound,
    Applied,
    Failed,
    Skipped,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Matched => "matched",
            RecordStatus::NotFound => "not_found",
            RecordStatus::Applied => "applied",
            RecordStatus::Failed => "failed",
            RecordStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dry-run mirror of the terminal statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    WouldApply,
    WouldSkip,
    Error,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::WouldApply => "would-apply",
            Disposition::WouldSkip => "would-skip",
            Disposition::Error => "error",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-of-run counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_found: usize,
    /// Mutating calls issued during this run.
    pub mutations: usize,
}

impl Summary {
    pub fn record(&mut self, status: RecordStatus) {
        self.total += 1;
        match status {
            RecordStatus::Applied => self.applied += 1,
            RecordStatus::Failed => self.failed += 1,
            RecordStatus::Skipped => self.skipped += 1,
            RecordStatus::NotFound => self.not_found += 1,
            RecordStatus::Pending | RecordStatus::Matched => {}
        }
    }

    /// Status counts without the mutation counter.
    #[cfg(test)]
    pub fn counts(&self) -> (usize, usize, usize, usize, usize) {
        (self.total, self.applied, self.skipped, self.failed, self.not_found)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Total records:  {}", self.total)?;
        writeln!(f, "  Applied:        {}", self.applied)?;
        writeln!(f, "  Skipped:        {}", self.skipped)?;
        writeln!(f, "  Failed:         {}", self.failed)?;
        writeln!(f, "  Not found:      {}", self.not_found)?;
        write!(f, "  Mutations:      {}", self.mutations)
    }
}
