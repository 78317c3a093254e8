pub mod comments;
pub mod milestones;
pub mod references;
pub mod relationships;
pub mod report;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ApplyConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::{status_counts, Ledger, LedgerRow, MappingKind};
use crate::matcher::{match_target, MatchResult, SourceKey};
use crate::model::entity::TargetIssue;
use crate::model::record::{Disposition, RecordStatus, Summary};
use crate::providers::TargetTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    /// Plan every record and report what would happen, without mutating
    /// the target or rewriting the ledger.
    Diagnostic,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Live => f.write_str("live"),
            Mode::Diagnostic => f.write_str("diagnostic"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub mode: Mode,
    pub mutation_delay: Duration,
    pub checkpoint_every: usize,
    pub include_cross_project: bool,
    /// Apply references whose replacement URL failed validation.
    pub force: bool,
}

impl ApplyOptions {
    pub fn new(mode: Mode, config: &ApplyConfig) -> Self {
        Self {
            mode,
            mutation_delay: config.mutation_delay(),
            checkpoint_every: config.checkpoint_every,
            include_cross_project: false,
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_cross_project(mut self, include: bool) -> Self {
        self.include_cross_project = include;
        self
    }
}

/// Result of looking at one record without touching the target.
#[derive(Debug)]
pub enum Plan<A> {
    Apply(A),
    Skip(String),
    /// An entity the record refers to does not exist on the target.
    NotFound(String),
    Error(ReconcileError),
}

impl<A> Plan<A> {
    /// A 404 from the target means the entity is missing, anything else is a
    /// failure of this record.
    pub fn from_error(err: ReconcileError, what: impl Into<String>) -> Self {
        match err {
            ReconcileError::RemoteRejected { status: 404, .. } => Plan::NotFound(what.into()),
            other => Plan::Error(other),
        }
    }
}

/// Per-kind planning and execution of ledger rows.
#[async_trait]
pub trait RecordHandler: Send {
    type Row: LedgerRow + Send;
    type Action: Send;

    /// Grouping used in report breakdowns.
    fn category(&self, row: &Self::Row) -> String;

    /// Reads, matching and guard checks. Never mutates the target.
    async fn plan(&mut self, row: &mut Self::Row) -> Plan<Self::Action>;

    fn describe(&self, action: &Self::Action) -> String;

    /// Perform the planned action and return the note for the ledger.
    async fn execute(
        &mut self,
        row: &mut Self::Row,
        action: Self::Action,
        pacer: &mut Pacer,
    ) -> ReconcileResult<String>;
}

/// Spaces out mutating calls. The first call of a run goes out immediately.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    issued: usize,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, issued: 0 }
    }

    pub async fn ready(&mut self) {
        if self.issued > 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.issued += 1;
    }

    pub fn issued(&self) -> usize {
        self.issued
    }
}

/// What happened to one record. In diagnostic mode `status` is the status a
/// live run would have written.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub label: String,
    pub category: String,
    pub status: RecordStatus,
    pub detail: String,
}

impl RecordOutcome {
    pub fn disposition(&self) -> Disposition {
        match self.status {
            RecordStatus::Applied => Disposition::WouldApply,
            RecordStatus::Failed => Disposition::Error,
            _ => Disposition::WouldSkip,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub kind: MappingKind,
    pub mode: Mode,
    pub ledger: String,
    pub target: String,
    pub summary: Summary,
    pub outcomes: Vec<RecordOutcome>,
}

/// Drives records through plan and execute, keeping the summary and writing
/// checkpoints.
pub struct Session {
    options: ApplyOptions,
    pacer: Pacer,
    summary: Summary,
    outcomes: Vec<RecordOutcome>,
    since_checkpoint: usize,
}

impl Session {
    pub fn new(options: ApplyOptions) -> Self {
        Self {
            pacer: Pacer::new(options.mutation_delay),
            options,
            summary: Summary::default(),
            outcomes: Vec::new(),
            since_checkpoint: 0,
        }
    }

    /// Process the rows at `indices`, in order. A failing record never stops
    /// the loop; only ledger write errors do.
    pub async fn process<H: RecordHandler>(
        &mut self,
        handler: &mut H,
        rows: &mut [H::Row],
        indices: impl IntoIterator<Item = usize>,
        ledger: &Ledger<H::Row>,
    ) -> ReconcileResult<()> {
        for i in indices {
            let Some(row) = rows.get_mut(i) else {
                continue;
            };
            let outcome = self.process_one(handler, row).await;
            self.outcomes.push(outcome);

            self.since_checkpoint += 1;
            if self.since_checkpoint >= self.options.checkpoint_every.max(1) {
                self.checkpoint(rows, ledger)?;
            }
        }
        Ok(())
    }

    async fn process_one<H: RecordHandler>(&mut self, handler: &mut H, row: &mut H::Row) -> RecordOutcome {
        let label = row.label();
        let category = handler.category(row);

        if row.status() == RecordStatus::Applied {
            self.summary.record(RecordStatus::Applied);
            debug!(record = %label, "Already applied");
            return RecordOutcome {
                label,
                category,
                status: RecordStatus::Applied,
                detail: "already applied".into(),
            };
        }

        let live = self.options.mode == Mode::Live;
        let (status, detail) = match handler.plan(row).await {
            Plan::Skip(reason) => (RecordStatus::Skipped, reason),
            Plan::NotFound(what) => (RecordStatus::NotFound, format!("not found: {what}")),
            Plan::Error(e) => (RecordStatus::Failed, e.to_string()),
            Plan::Apply(action) if !live => (RecordStatus::Applied, handler.describe(&action)),
            Plan::Apply(action) => {
                row.set_status(RecordStatus::Matched, None);
                match handler.execute(row, action, &mut self.pacer).await {
                    Ok(note) => (RecordStatus::Applied, note),
                    Err(e) => (RecordStatus::Failed, e.to_string()),
                }
            }
        };

        if live {
            row.set_status(status, Some(detail.clone()));
        }
        self.summary.record(status);

        match status {
            RecordStatus::Failed => warn!(record = %label, error = %detail, "Record failed"),
            _ => debug!(record = %label, status = %status, detail = %detail, "Record processed"),
        }

        RecordOutcome {
            label,
            category,
            status,
            detail,
        }
    }

    /// Rewrite the ledger with the current row states. No-op in diagnostic mode.
    pub fn checkpoint<R: LedgerRow>(&mut self, rows: &[R], ledger: &Ledger<R>) -> ReconcileResult<()> {
        self.since_checkpoint = 0;
        if self.options.mode == Mode::Live {
            ledger.save(rows)?;
            debug!(path = %ledger.path().display(), "Checkpoint written");
        }
        Ok(())
    }

    pub fn finish<R: LedgerRow>(mut self, kind: MappingKind, ledger: &Ledger<R>, target: &dyn TargetTracker) -> RunReport {
        self.summary.mutations = self.pacer.issued();
        info!(
            kind = %kind,
            mode = %self.options.mode,
            applied = self.summary.applied,
            skipped = self.summary.skipped,
            failed = self.summary.failed,
            not_found = self.summary.not_found,
            mutations = self.summary.mutations,
            "Apply finished"
        );
        RunReport {
            kind,
            mode: self.options.mode,
            ledger: ledger.path().display().to_string(),
            target: target.repo().full_name(),
            summary: self.summary,
            outcomes: self.outcomes,
        }
    }
}

/// Log where a resumed ledger stands, e.g. `applied=12 pending=30`.
pub(crate) fn log_loaded<R: LedgerRow>(kind: MappingKind, ledger: &Ledger<R>, rows: &[R]) {
    let statuses = status_counts(rows)
        .iter()
        .map(|(status, n)| format!("{status}={n}"))
        .collect::<Vec<_>>()
        .join(" ");
    info!(
        kind = %kind,
        count = rows.len(),
        path = %ledger.path().display(),
        statuses = %statuses,
        "Loaded ledger"
    );
}

/// Load a ledger, run every row through `handler` and save the result.
pub async fn run_ledger<H: RecordHandler>(
    kind: MappingKind,
    handler: &mut H,
    ledger: &Ledger<H::Row>,
    target: &dyn TargetTracker,
    options: ApplyOptions,
) -> ReconcileResult<RunReport> {
    let mut rows = ledger.load()?;
    log_loaded(kind, ledger, &rows);

    let mut session = Session::new(options);
    let count = rows.len();
    session.process(handler, &mut rows, 0..count, ledger).await?;
    session.checkpoint(&rows, ledger)?;
    Ok(session.finish(kind, ledger, target))
}

/// Apply the ledger at `path` for `kind` against the target tracker.
pub async fn apply(
    kind: MappingKind,
    target: &dyn TargetTracker,
    path: &Path,
    options: ApplyOptions,
) -> ReconcileResult<RunReport> {
    match kind {
        MappingKind::Comments => {
            comments::run(target, &Ledger::new(path), options).await
        }
        MappingKind::Milestones => {
            milestones::run(target, &Ledger::new(path), options).await
        }
        MappingKind::Relationships => {
            relationships::run(target, &Ledger::new(path), options).await
        }
        MappingKind::References => {
            references::run(target, &Ledger::new(path), options).await
        }
    }
}

/// Target issue listing, taken once per run and used for matching.
pub struct TargetIndex<'a> {
    target: &'a dyn TargetTracker,
    issues: Option<Vec<TargetIssue>>,
}

impl<'a> TargetIndex<'a> {
    pub fn new(target: &'a dyn TargetTracker) -> Self {
        Self {
            target,
            issues: None,
        }
    }

    pub async fn resolve(&mut self, key: &SourceKey) -> ReconcileResult<MatchResult> {
        if self.issues.is_none() {
            let listed = self.target.list_issues().await?;
            debug!(count = listed.len(), "Indexed target issues");
            self.issues = Some(listed);
        }
        Ok(match_target(key, self.issues.as_deref().unwrap_or(&[])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::rows::RelationshipRow;
    use crate::model::relation::{Provenance, RelationKind};
    use crate::providers::tests::{target_issue, MockTarget};

    fn options(mode: Mode) -> ApplyOptions {
        ApplyOptions {
            mode,
            mutation_delay: Duration::ZERO,
            checkpoint_every: 2,
            include_cross_project: false,
            force: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_waits_between_mutations_only() {
        let mut pacer = Pacer::new(Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        pacer.ready().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        pacer.ready().await;
        pacer.ready().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(pacer.issued(), 3);
    }

    #[test]
    fn not_found_errors_become_not_found_plans() {
        let plan: Plan<()> = Plan::from_error(
            ReconcileError::RemoteRejected {
                status: 404,
                body: "Not Found".into(),
            },
            "issue #3",
        );
        assert!(matches!(plan, Plan::NotFound(ref what) if what == "issue #3"));

        let plan: Plan<()> = Plan::from_error(ReconcileError::RemoteUnavailable("down".into()), "issue #3");
        assert!(matches!(plan, Plan::Error(_)));
    }

    #[tokio::test]
    async fn checkpoints_follow_interval_and_skip_diagnostic() {
        crate::logging::init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::<RelationshipRow>::new(dir.path().join("r.csv"));
        let rows = vec![RelationshipRow::new(1, 2, RelationKind::RelatesTo, Provenance::ApiLink, None)];

        let mut diagnostic = Session::new(options(Mode::Diagnostic));
        diagnostic.checkpoint(&rows, &ledger).unwrap();
        assert!(!ledger.path().exists());

        let mut live = Session::new(options(Mode::Live));
        live.checkpoint(&rows, &ledger).unwrap();
        assert_eq!(ledger.load().unwrap(), rows);
    }

    #[tokio::test]
    async fn index_lists_targets_once() {
        let target = MockTarget::new().with_issue(target_issue(4, "Four"));
        let mut index = TargetIndex::new(&target);
        assert_eq!(index.resolve(&SourceKey::number(4)).await.unwrap().number(), Some(4));

        target.issues.lock().unwrap().clear();
        assert_eq!(index.resolve(&SourceKey::number(4)).await.unwrap().number(), Some(4));
    }

    #[test]
    fn outcome_dispositions_mirror_status() {
        let outcome = |status| RecordOutcome {
            label: "x".into(),
            category: "comment".into(),
            status,
            detail: String::new(),
        };
        assert_eq!(outcome(RecordStatus::Skipped).disposition(), Disposition::WouldSkip);
        assert_eq!(outcome(RecordStatus::NotFound).disposition(), Disposition::WouldSkip);
        assert_eq!(outcome(RecordStatus::Applied).disposition(), Disposition::WouldApply);
        assert_eq!(outcome(RecordStatus::Failed).disposition(), Disposition::Error);
    }

    struct Lookup;

    #[async_trait]
    impl RecordHandler for Lookup {
        type Row = RelationshipRow;
        type Action = ();

        fn category(&self, row: &RelationshipRow) -> String {
            row.kind.to_string()
        }

        async fn plan(&mut self, row: &mut RelationshipRow) -> Plan<()> {
            if row.target_iid == 99 {
                Plan::NotFound(format!("issue #{} on target", row.target_iid))
            } else {
                Plan::Apply(())
            }
        }

        fn describe(&self, _action: &()) -> String {
            "would link".into()
        }

        async fn execute(&mut self, _row: &mut RelationshipRow, _action: (), pacer: &mut Pacer) -> ReconcileResult<String> {
            pacer.ready().await;
            Ok("linked".into())
        }
    }

    #[tokio::test]
    async fn missing_targets_are_recorded_as_not_found_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::<RelationshipRow>::new(dir.path().join("r.csv"));
        ledger
            .save(&[
                RelationshipRow::new(1, 2, RelationKind::Blocks, Provenance::ApiLink, None),
                RelationshipRow::new(1, 99, RelationKind::Blocks, Provenance::ApiLink, None),
            ])
            .unwrap();
        let target = MockTarget::new();

        let report = run_ledger(MappingKind::Relationships, &mut Lookup, &ledger, &target, options(Mode::Live))
            .await
            .unwrap();
        assert_eq!(report.summary.counts(), (2, 1, 0, 0, 1));

        let rows = ledger.load().unwrap();
        assert_eq!(rows[1].status, RecordStatus::NotFound);
        assert_eq!(rows[1].notes.as_deref(), Some("not found: issue #99 on target"));

        // Not-found rows are planned again; applied rows are not.
        let rerun = run_ledger(MappingKind::Relationships, &mut Lookup, &ledger, &target, options(Mode::Live))
            .await
            .unwrap();
        assert_eq!(rerun.summary.mutations, 0);
        assert_eq!(rerun.outcomes[0].detail, "already applied");
        assert_eq!(rerun.outcomes[1].status, RecordStatus::NotFound);
    }
}
