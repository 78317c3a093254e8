use std::collections::HashMap;

use async_trait::async_trait;

use super::{run_ledger, ApplyOptions, Pacer, Plan, RecordHandler, RunReport, TargetIndex};
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::rows::CommentRow;
use crate::ledger::{Ledger, MappingKind};
use crate::matcher::SourceKey;
use crate::model::entity::TargetComment;
use crate::providers::TargetTracker;

/// Footer the importer leaves on every comment it copied over.
pub fn import_footer(author: &str, created_at: &str) -> String {
    format!("*Imported from GitLab comment by @{author} on {created_at}*")
}

/// Quote `parent` above `reply`, line by line.
pub fn quote_reply(parent: &str, reply: &str) -> String {
    let quoted = parent.lines().collect::<Vec<_>>().join("\n> ");
    format!("> {quoted}\n\n{reply}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteAction {
    pub number: u64,
    pub comment_id: u64,
    pub parent_id: u64,
    pub body: String,
}

pub struct CommentHandler<'a> {
    target: &'a dyn TargetTracker,
    index: TargetIndex<'a>,
    /// Footer of every source comment in the ledger, by source comment id.
    footers: HashMap<u64, String>,
}

impl<'a> CommentHandler<'a> {
    pub fn new(target: &'a dyn TargetTracker, rows: &[CommentRow]) -> Self {
        let footers = rows
            .iter()
            .map(|r| {
                (
                    r.source_comment_id,
                    import_footer(&r.source_comment_author, &r.source_comment_created_at),
                )
            })
            .collect();
        Self {
            target,
            index: TargetIndex::new(target),
            footers,
        }
    }

    fn locate<'c>(&self, comments: &'c [TargetComment], source_id: u64) -> Option<&'c TargetComment> {
        let footer = self.footers.get(&source_id)?;
        comments.iter().find(|c| c.body.contains(footer.as_str()))
    }
}

#[async_trait]
impl<'a> RecordHandler for CommentHandler<'a> {
    type Row = CommentRow;
    type Action = QuoteAction;

    fn category(&self, row: &CommentRow) -> String {
        let category = if row.is_root() { "thread root" } else { "reply" };
        category.to_string()
    }

    async fn plan(&mut self, row: &mut CommentRow) -> Plan<QuoteAction> {
        let key = SourceKey::title(&row.source_issue_title).with_number(row.source_issue_iid);
        let number = match self.index.resolve(&key).await {
            Ok(result) => match result.number() {
                Some(number) => number,
                None => {
                    return Plan::NotFound(format!(
                        "issue '{}' (#{})",
                        row.source_issue_title, row.source_issue_iid
                    ))
                }
            },
            Err(e) => return Plan::Error(e),
        };
        row.target_issue_number = Some(number);

        let comments = match self.target.list_comments(number).await {
            Ok(comments) => comments,
            Err(e) => return Plan::from_error(e, format!("issue #{number}")),
        };
        let reply = self.locate(&comments, row.source_comment_id);
        if let Some(reply) = reply {
            row.target_comment_id = Some(reply.id);
        }

        let Some(parent_source_id) = row.source_parent_comment_id else {
            return Plan::Skip("thread root".into());
        };
        let Some(reply) = reply else {
            return Plan::Error(ReconcileError::UnresolvableEntity(format!(
                "no comment on #{number} carries the import footer of comment {}",
                row.source_comment_id
            )));
        };
        let Some(parent) = self.locate(&comments, parent_source_id) else {
            return Plan::Error(ReconcileError::UnresolvableEntity(format!(
                "parent comment {parent_source_id} not found on #{number}"
            )));
        };

        if reply.body.trim_start().starts_with('>') {
            return Plan::Skip("already quoted".into());
        }

        Plan::Apply(QuoteAction {
            number,
            comment_id: reply.id,
            parent_id: parent.id,
            body: quote_reply(&parent.body, &reply.body),
        })
    }

    fn describe(&self, action: &QuoteAction) -> String {
        format!(
            "would quote comment {} in comment {}",
            action.parent_id, action.comment_id
        )
    }

    async fn execute(
        &mut self,
        _row: &mut CommentRow,
        action: QuoteAction,
        pacer: &mut Pacer,
    ) -> ReconcileResult<String> {
        pacer.ready().await;
        self.target
            .update_comment(action.number, action.comment_id, &action.body)
            .await?;
        Ok(format!(
            "comment {} now quotes comment {}",
            action.comment_id, action.parent_id
        ))
    }
}

pub async fn run(
    target: &dyn TargetTracker,
    ledger: &Ledger<CommentRow>,
    options: ApplyOptions,
) -> ReconcileResult<RunReport> {
    let rows = ledger.load()?;
    let mut handler = CommentHandler::new(target, &rows);
    run_ledger(MappingKind::Comments, &mut handler, ledger, target, options).await
}
