use std::collections::HashSet;

use async_trait::async_trait;

use super::{run_ledger, ApplyOptions, Pacer, Plan, RecordHandler, RunReport, TargetIndex};
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::rows::RelationshipRow;
use crate::ledger::{Ledger, MappingKind};
use crate::matcher::SourceKey;
use crate::model::relation::{RelationKind, TargetAction};
use crate::providers::TargetTracker;

const FALLBACK_NOTE: &str =
    "> *This relationship was automatically migrated from GitLab as a comment.*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipAction {
    /// Record that issue `blocked` is blocked by issue `blocking`.
    Link {
        blocked: u64,
        blocking: u64,
        blocking_id: u64,
    },
    Comment {
        number: u64,
        body: String,
        marker: String,
    },
}

/// Body of the comment used when the target has no native link for a kind.
pub fn fallback_body(kind: RelationKind, reference: &str, marker: &str) -> String {
    format!("{} {reference}\n\n{FALLBACK_NOTE}\n\n{marker}", kind.phrase())
}

pub struct RelationshipHandler<'a> {
    target: &'a dyn TargetTracker,
    index: TargetIndex<'a>,
    include_cross_project: bool,
    /// `(blocked, blocking_id)` pairs planned earlier in this run. GitLab
    /// reports a link from both ends, and both rows land on the same
    /// dependency.
    planned_links: HashSet<(u64, u64)>,
    /// Markers of fallback comments planned earlier in this run.
    planned_markers: HashSet<String>,
}

impl<'a> RelationshipHandler<'a> {
    pub fn new(target: &'a dyn TargetTracker, include_cross_project: bool) -> Self {
        Self {
            target,
            index: TargetIndex::new(target),
            include_cross_project,
            planned_links: HashSet::new(),
            planned_markers: HashSet::new(),
        }
    }

    async fn resolve(&mut self, iid: u64) -> Result<u64, Plan<RelationshipAction>> {
        match self.index.resolve(&SourceKey::number(iid)).await {
            Ok(result) => result
                .number()
                .ok_or_else(|| Plan::NotFound(format!("issue #{iid} on target"))),
            Err(e) => Err(Plan::Error(e)),
        }
    }

    async fn plan_comment(&mut self, number: u64, body: String, marker: String) -> Plan<RelationshipAction> {
        match self.target.list_comments(number).await {
            Ok(comments) if comments.iter().any(|c| c.body.contains(&marker)) => {
                Plan::Skip("fallback comment already present".into())
            }
            Ok(_) if self.planned_markers.contains(&marker) => {
                Plan::Skip("fallback comment already present".into())
            }
            Ok(_) => {
                self.planned_markers.insert(marker.clone());
                Plan::Apply(RelationshipAction::Comment {
                    number,
                    body,
                    marker,
                })
            }
            Err(e) => Plan::from_error(e, format!("issue #{number}")),
        }
    }

    async fn plan_link(&mut self, blocked: u64, blocking: u64) -> Plan<RelationshipAction> {
        let blocked_issue = match self.target.get_issue(blocked).await {
            Ok(issue) => issue,
            Err(e) => return Plan::from_error(e, format!("issue #{blocked}")),
        };
        let blocking_issue = match self.target.get_issue(blocking).await {
            Ok(issue) => issue,
            Err(e) => return Plan::from_error(e, format!("issue #{blocking}")),
        };

        if let Some(pr) = [&blocked_issue, &blocking_issue]
            .into_iter()
            .find(|i| i.is_pull_request)
        {
            return Plan::Error(ReconcileError::UnsupportedEntityType(format!(
                "#{} is a {}; dependencies link issues only",
                pr.number,
                pr.kind()
            )));
        }

        let key = (blocked, blocking_issue.id);
        match self.target.list_blocked_by(blocked).await {
            Ok(existing) if existing.iter().any(|i| i.id == blocking_issue.id) => {
                Plan::Skip(format!("#{blocked} already blocked by #{blocking}"))
            }
            Ok(_) if self.planned_links.contains(&key) => {
                Plan::Skip(format!("#{blocked} already blocked by #{blocking}"))
            }
            Ok(_) => {
                self.planned_links.insert(key);
                Plan::Apply(RelationshipAction::Link {
                    blocked,
                    blocking,
                    blocking_id: blocking_issue.id,
                })
            }
            Err(e) => Plan::Error(e),
        }
    }
}

#[async_trait]
impl<'a> RecordHandler for RelationshipHandler<'a> {
    type Row = RelationshipRow;
    type Action = RelationshipAction;

    fn category(&self, row: &RelationshipRow) -> String {
        row.kind.to_string()
    }

    async fn plan(&mut self, row: &mut RelationshipRow) -> Plan<RelationshipAction> {
        let cross_project = row.is_cross_project();
        if cross_project && !self.include_cross_project {
            return Plan::Skip("cross-project".into());
        }

        let source = match self.resolve(row.source_iid).await {
            Ok(number) => number,
            Err(plan) => return plan,
        };
        row.mapped_source_number = Some(source);

        if cross_project {
            let Some(url) = row.target_issue_url.clone() else {
                return Plan::Error(ReconcileError::UnresolvableEntity(format!(
                    "no source URL for {}",
                    row.target_iid
                )));
            };
            let marker = row.marker();
            let body = fallback_body(row.kind, &url, &marker);
            return self.plan_comment(source, body, marker).await;
        }

        let other = match self.resolve(row.target_iid).await {
            Ok(number) => number,
            Err(plan) => return plan,
        };
        row.mapped_target_number = Some(other);

        match row.action {
            TargetAction::BlockedBy => self.plan_link(source, other).await,
            TargetAction::Blocking => self.plan_link(other, source).await,
            TargetAction::Comment => {
                let marker = row.marker();
                let body = fallback_body(row.kind, &format!("#{other}"), &marker);
                self.plan_comment(source, body, marker).await
            }
        }
    }

    fn describe(&self, action: &RelationshipAction) -> String {
        match action {
            RelationshipAction::Link {
                blocked, blocking, ..
            } => format!("would mark #{blocked} blocked by #{blocking}"),
            RelationshipAction::Comment { number, .. } => {
                format!("would comment on #{number}")
            }
        }
    }

    async fn execute(
        &mut self,
        _row: &mut RelationshipRow,
        action: RelationshipAction,
        pacer: &mut Pacer,
    ) -> ReconcileResult<String> {
        pacer.ready().await;
        // A failed mutation leaves nothing behind, so a later row for the same
        // link or comment may try again.
        match action {
            RelationshipAction::Link {
                blocked,
                blocking,
                blocking_id,
            } => match self.target.add_blocked_by(blocked, blocking_id).await {
                Ok(()) => Ok(format!("#{blocked} blocked by #{blocking}")),
                Err(e) => {
                    self.planned_links.remove(&(blocked, blocking_id));
                    Err(e)
                }
            },
            RelationshipAction::Comment {
                number,
                body,
                marker,
            } => match self.target.create_comment(number, &body).await {
                Ok(comment) => Ok(format!("comment {} on #{number}", comment.id)),
                Err(e) => {
                    self.planned_markers.remove(&marker);
                    Err(e)
                }
            },
        }
    }
}

pub async fn run(
    target: &dyn TargetTracker,
    ledger: &Ledger<RelationshipRow>,
    options: ApplyOptions,
) -> ReconcileResult<RunReport> {
    let mut handler = RelationshipHandler::new(target, options.include_cross_project);
    run_ledger(MappingKind::Relationships, &mut handler, ledger, target, options).await
}
