pub mod rows;

use std::fmt;
use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ReconcileError, ReconcileResult};
use crate::model::record::RecordStatus;

/// The four kinds of mapping ledger, one CSV file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MappingKind {
    Comments,
    Milestones,
    Relationships,
    References,
}

impl MappingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingKind::Comments => "comments",
            MappingKind::Milestones => "milestones",
            MappingKind::Relationships => "relationships",
            MappingKind::References => "references",
        }
    }

    pub fn default_file(&self) -> &'static str {
        match self {
            MappingKind::Comments => "comments-map.csv",
            MappingKind::Milestones => "milestones-map.csv",
            MappingKind::Relationships => "relationships-map.csv",
            MappingKind::References => "references-map.csv",
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a mapping ledger.
///
/// Struct field order must match `COLUMNS`; both define the CSV layout.
pub trait LedgerRow: Serialize + DeserializeOwned + Clone {
    const COLUMNS: &'static [&'static str];

    fn status(&self) -> RecordStatus;
    fn set_status(&mut self, status: RecordStatus, notes: Option<String>);
    /// Short human-readable label used in logs and reports.
    fn label(&self) -> String;
}

/// A CSV file holding rows of one kind.
pub struct Ledger<R> {
    path: PathBuf,
    _row: PhantomData<R>,
}

impl<R: LedgerRow> Ledger<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _row: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add rows at the end of the file, writing the header first when the file
    /// is new or empty.
    pub fn append(&self, rows: &[R]) -> ReconcileResult<usize> {
        let is_new = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        if !is_new {
            let mut reader = csv::Reader::from_path(&self.path)?;
            check_header::<R>(reader.headers()?, &self.path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(R::COLUMNS)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        debug!(path = %self.path.display(), count = rows.len(), "Appended ledger rows");
        Ok(rows.len())
    }

    pub fn load(&self) -> ReconcileResult<Vec<R>> {
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| {
            ReconcileError::Ledger(format!("cannot open {}: {e}", self.path.display()))
        })?;
        check_header::<R>(reader.headers()?, &self.path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<R>, csv::Error>>()?;
        debug!(path = %self.path.display(), count = rows.len(), "Loaded ledger");
        Ok(rows)
    }

    /// Rewrite the whole file. Rows go to a temporary file in the same
    /// directory which then replaces the ledger in one rename.
    pub fn save(&self, rows: &[R]) -> ReconcileResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer.write_record(R::COLUMNS)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| ReconcileError::Ledger(format!("cannot replace {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), count = rows.len(), "Saved ledger");
        Ok(())
    }
}

fn check_header<R: LedgerRow>(header: &csv::StringRecord, path: &Path) -> ReconcileResult<()> {
    if header.iter().eq(R::COLUMNS.iter().copied()) {
        Ok(())
    } else {
        Err(ReconcileError::Ledger(format!(
            "{} has unexpected columns: {}",
            path.display(),
            header.iter().collect::<Vec<_>>().join(",")
        )))
    }
}

/// Count rows per status, in first-seen order.
pub fn status_counts<R: LedgerRow>(rows: &[R]) -> Vec<(RecordStatus, usize)> {
    let mut counts: Vec<(RecordStatus, usize)> = Vec::new();
    for row in rows {
        match counts.iter_mut().find(|(s, _)| *s == row.status()) {
            Some((_, n)) => *n += 1,
            None => counts.push((row.status(), 1)),
        }
    }
    counts
}
