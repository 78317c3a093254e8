use async_trait::async_trait;
use tracing::info;

use super::{log_loaded, ApplyOptions, Pacer, Plan, RecordHandler, RunReport, Session, TargetIndex};
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::rows::{MilestoneAction, MilestoneRow};
use crate::ledger::{Ledger, MappingKind};
use crate::matcher::{match_target, SourceKey};
use crate::model::entity::NewMilestone;
use crate::providers::TargetTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MilestoneStep {
    Create(NewMilestone),
    /// `milestone` is `None` when the milestone is only planned for creation
    /// in this run.
    Assign {
        issue: u64,
        milestone: Option<u64>,
        title: String,
    },
}

/// Target-side fields for a source milestone. Only `active` source milestones
/// stay open; dates gain an end-of-day time.
pub fn new_milestone(row: &MilestoneRow) -> NewMilestone {
    let state = match row.source_state.as_deref() {
        None | Some("active") => "open",
        Some(_) => "closed",
    };
    NewMilestone {
        title: row.source_title.clone(),
        state: state.to_string(),
        description: row.source_description.clone().filter(|d| !d.is_empty()),
        due_on: row.source_due_date.as_deref().filter(|d| !d.is_empty()).map(|d| {
            if d.contains('T') {
                d.to_string()
            } else {
                format!("{d}T23:59:59Z")
            }
        }),
    }
}

pub struct MilestoneHandler<'a> {
    target: &'a dyn TargetTracker,
    index: TargetIndex<'a>,
    /// Titles whose creation was planned during this run.
    planned: Vec<String>,
}

impl<'a> MilestoneHandler<'a> {
    pub fn new(target: &'a dyn TargetTracker) -> Self {
        Self {
            target,
            index: TargetIndex::new(target),
            planned: Vec::new(),
        }
    }

    async fn plan_assign(&mut self, row: &mut MilestoneRow, milestone: Option<u64>) -> Plan<MilestoneStep> {
        let Some(iid) = row.source_issue_iid else {
            return Plan::Error(ReconcileError::UnresolvableEntity(format!(
                "assign row for '{}' names no issue",
                row.source_title
            )));
        };
        let milestone = match milestone {
            Some(number) => Some(number),
            None if self.planned.contains(&row.source_title) => None,
            None => return Plan::NotFound(format!("milestone '{}'", row.source_title)),
        };
        row.target_milestone_number = milestone;

        let number = match self.index.resolve(&SourceKey::number(iid)).await {
            Ok(result) => match result.number() {
                Some(number) => number,
                None => return Plan::NotFound(format!("issue #{iid} on target")),
            },
            Err(e) => return Plan::Error(e),
        };
        row.target_issue_number = Some(number);

        let issue = match self.target.get_issue(number).await {
            Ok(issue) => issue,
            Err(e) => return Plan::from_error(e, format!("issue #{number}")),
        };
        if milestone.is_some() && issue.milestone == milestone {
            return Plan::Skip(format!("#{number} already in '{}'", row.source_title));
        }

        Plan::Apply(MilestoneStep::Assign {
            issue: number,
            milestone,
            title: row.source_title.clone(),
        })
    }
}

#[async_trait]
impl<'a> RecordHandler for MilestoneHandler<'a> {
    type Row = MilestoneRow;
    type Action = MilestoneStep;

    fn category(&self, row: &MilestoneRow) -> String {
        row.action.as_str().to_string()
    }

    async fn plan(&mut self, row: &mut MilestoneRow) -> Plan<MilestoneStep> {
        let milestones = match self.target.list_milestones().await {
            Ok(milestones) => milestones,
            Err(e) => return Plan::Error(e),
        };
        let existing = match_target(&SourceKey::title(&row.source_title), &milestones).number();

        match row.action {
            MilestoneAction::Create => match existing {
                Some(number) => {
                    row.target_milestone_number = Some(number);
                    Plan::Skip(format!("exists as milestone {number}"))
                }
                None => {
                    self.planned.push(row.source_title.clone());
                    Plan::Apply(MilestoneStep::Create(new_milestone(row)))
                }
            },
            MilestoneAction::Assign => self.plan_assign(row, existing).await,
        }
    }

    fn describe(&self, action: &MilestoneStep) -> String {
        match action {
            MilestoneStep::Create(new) => format!("would create milestone '{}'", new.title),
            MilestoneStep::Assign { issue, title, .. } => {
                format!("would assign #{issue} to '{title}'")
            }
        }
    }

    async fn execute(
        &mut self,
        row: &mut MilestoneRow,
        action: MilestoneStep,
        pacer: &mut Pacer,
    ) -> ReconcileResult<String> {
        match action {
            MilestoneStep::Create(new) => {
                pacer.ready().await;
                let created = self.target.create_milestone(&new).await?;
                row.target_milestone_number = Some(created.number);
                Ok(format!("created milestone {}", created.number))
            }
            MilestoneStep::Assign {
                issue,
                milestone: Some(milestone),
                ..
            } => {
                pacer.ready().await;
                self.target.set_issue_milestone(issue, milestone).await?;
                Ok(format!("#{issue} assigned to milestone {milestone}"))
            }
            MilestoneStep::Assign {
                milestone: None,
                title,
                ..
            } => Err(ReconcileError::UnresolvableEntity(format!(
                "milestone '{title}' was not created"
            ))),
        }
    }
}

/// Create milestones first, then assign issues against a fresh listing.
pub async fn run(
    target: &dyn TargetTracker,
    ledger: &Ledger<MilestoneRow>,
    options: ApplyOptions,
) -> ReconcileResult<RunReport> {
    let mut rows = ledger.load()?;
    log_loaded(MappingKind::Milestones, ledger, &rows);
    let (creates, assigns): (Vec<usize>, Vec<usize>) =
        (0..rows.len()).partition(|&i| rows[i].action == MilestoneAction::Create);
    info!(creates = creates.len(), assigns = assigns.len(), "Milestone phases");

    let mut handler = MilestoneHandler::new(target);
    let mut session = Session::new(options);

    session.process(&mut handler, &mut rows, creates, ledger).await?;
    session.checkpoint(&rows, ledger)?;
    info!("Milestone creation phase done");

    session.process(&mut handler, &mut rows, assigns, ledger).await?;
    session.checkpoint(&rows, ledger)?;

    Ok(session.finish(MappingKind::Milestones, ledger, target))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::apply::Mode;
    use crate::model::record::RecordStatus;
    use crate::providers::tests::{target_issue, MockTarget};

    fn options(mode: Mode) -> ApplyOptions {
        ApplyOptions {
            mode,
            mutation_delay: Duration::ZERO,
            checkpoint_every: 25,
            include_cross_project: false,
            force: false,
        }
    }

    fn fixture() -> (MockTarget, Vec<MilestoneRow>) {
        let target = MockTarget::new()
            .with_issue(target_issue(4, "Four"))
            .with_milestone(1, "v0.9");
        let rows = vec![
            MilestoneRow::assign("v1.0", 4),
            MilestoneRow::create("V0.9 "),
            MilestoneRow {
                source_state: Some("active".into()),
                source_due_date: Some("2024-06-30".into()),
                ..MilestoneRow::create("v1.0")
            },
            MilestoneRow::assign("v0.9", 5),
        ];
        (target, rows)
    }

    #[test]
    fn new_milestone_maps_state_and_due_date() {
        let row = MilestoneRow {
            source_state: Some("closed".into()),
            source_due_date: Some("2024-06-30".into()),
            source_description: Some(String::new()),
            ..MilestoneRow::create("v1.0")
        };
        let new = new_milestone(&row);
        assert_eq!(new.state, "closed");
        assert_eq!(new.due_on.as_deref(), Some("2024-06-30T23:59:59Z"));
        assert_eq!(new.description, None);
        assert_eq!(new_milestone(&MilestoneRow::create("x")).state, "open");
    }

    #[tokio::test]
    async fn creates_run_before_assigns() {
        let (target, rows) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("milestones-map.csv"));
        ledger.save(&rows).unwrap();

        let report = run(&target, &ledger, options(Mode::Live)).await.unwrap();
        assert_eq!(report.summary.applied, 2);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.not_found, 1);
        assert_eq!(
            *target.mutations.lock().unwrap(),
            vec!["create_milestone v1.0", "set_issue_milestone #4 -> 2"]
        );

        let loaded = ledger.load().unwrap();
        assert_eq!(loaded[0].status, RecordStatus::Applied);
        assert_eq!(loaded[0].target_milestone_number, Some(2));
        assert_eq!(loaded[1].notes.as_deref(), Some("exists as milestone 1"));
        assert_eq!(loaded[2].target_milestone_number, Some(2));
        assert_eq!(loaded[3].status, RecordStatus::NotFound);
        assert_eq!(loaded[3].notes.as_deref(), Some("not found: issue #5 on target"));
    }

    #[tokio::test]
    async fn issue_already_in_milestone_is_skipped() {
        let mut issue = target_issue(4, "Four");
        issue.milestone = Some(1);
        let target = MockTarget::new().with_issue(issue).with_milestone(1, "v0.9");
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("milestones-map.csv"));
        ledger.save(&[MilestoneRow::assign("v0.9", 4)]).unwrap();

        let report = run(&target, &ledger, options(Mode::Live)).await.unwrap();
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(target.mutation_count(), 0);
    }

    #[tokio::test]
    async fn diagnostic_plans_assignments_to_planned_milestones() {
        let (dry_target, rows) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("milestones-map.csv"));
        ledger.save(&rows).unwrap();

        let dry = run(&dry_target, &ledger, options(Mode::Diagnostic)).await.unwrap();
        assert_eq!(dry_target.mutation_count(), 0);
        assert!(dry
            .outcomes
            .iter()
            .any(|o| o.detail == "would assign #4 to 'v1.0'"));

        let (live_target, _) = fixture();
        let live = run(&live_target, &ledger, options(Mode::Live)).await.unwrap();
        assert_eq!(dry.summary.counts(), live.summary.counts());
    }
}
