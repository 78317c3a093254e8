use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{run_ledger, ApplyOptions, Pacer, Plan, RecordHandler, RunReport};
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::rows::{ReferenceRow, ReferenceType, TextLocation};
use crate::ledger::{Ledger, MappingKind};
use crate::providers::TargetTracker;
use crate::util::urls::TargetRepo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub number: u64,
    pub location: TextLocation,
    pub text: String,
}

fn continues_token(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '/'
}

/// Replace whole occurrences of `original` in `text`. An occurrence followed by
/// more of a URL or word (`/issues/3` inside `/issues/30`) is left alone, as is
/// a short reference preceded by a path segment.
pub fn replace_reference(text: &str, original: &str, replacement: &str, kind: ReferenceType) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut replaced = false;

    for (start, matched) in text.match_indices(original) {
        let end = start + matched.len();
        let after_ok = !text[end..].chars().next().is_some_and(continues_token);
        let before_ok = kind == ReferenceType::SourceUrl
            || !text[..start].chars().next_back().is_some_and(continues_token);
        if after_ok && before_ok {
            out.push_str(&text[last..start]);
            out.push_str(replacement);
            last = end;
            replaced = true;
        }
    }

    replaced.then(|| {
        out.push_str(&text[last..]);
        out
    })
}

/// Issue or pull number of a replacement URL that points into `repo`.
fn target_number(url: &str, repo: &TargetRepo) -> Option<u64> {
    let rest = url.strip_prefix(&repo.web_url())?;
    let rest = rest
        .strip_prefix("/issues/")
        .or_else(|| rest.strip_prefix("/pull/"))?;
    let digits = rest.split(['#', '/', '?']).next()?;
    digits.parse().ok()
}

/// Tally of a validation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
}

/// Check that each replacement URL resolves on the target and record the
/// answer in `url_exists`. URLs outside the target repository are taken as
/// valid, and so is any number whose lookup fails for a reason other than 404.
pub async fn validate_urls(
    target: &dyn TargetTracker,
    repo: &TargetRepo,
    rows: &mut [ReferenceRow],
) -> Validation {
    let mut known: HashMap<u64, bool> = HashMap::new();
    let mut tally = Validation::default();

    for row in rows.iter_mut() {
        let exists = match target_number(&row.replacement_url, repo) {
            None => true,
            Some(number) => match known.get(&number) {
                Some(&exists) => exists,
                None => {
                    let exists = match target.get_issue(number).await {
                        Ok(_) => true,
                        Err(ReconcileError::RemoteRejected { status: 404, .. }) => false,
                        Err(e) => {
                            warn!(number, error = %e, "Could not check target item, assuming it exists");
                            true
                        }
                    };
                    known.insert(number, exists);
                    exists
                }
            },
        };
        if !exists {
            debug!(url = %row.replacement_url, "Replacement URL does not resolve");
        }
        row.url_exists = Some(exists);
        tally.checked += 1;
        if exists {
            tally.valid += 1;
        } else {
            tally.invalid += 1;
        }
    }
    tally
}

/// Re-check every row of a references ledger and save the result.
pub async fn revalidate(
    target: &dyn TargetTracker,
    repo: &TargetRepo,
    ledger: &Ledger<ReferenceRow>,
) -> ReconcileResult<Validation> {
    let mut rows = ledger.load()?;
    let tally = validate_urls(target, repo, &mut rows).await;
    ledger.save(&rows)?;
    Ok(tally)
}

pub struct ReferenceHandler<'a> {
    target: &'a dyn TargetTracker,
    force: bool,
}

impl<'a> ReferenceHandler<'a> {
    pub fn new(target: &'a dyn TargetTracker, force: bool) -> Self {
        Self { target, force }
    }

    async fn current_text(&self, number: u64, location: TextLocation) -> Result<String, Plan<Rewrite>> {
        match location {
            TextLocation::Body => match self.target.get_issue(number).await {
                Ok(issue) => Ok(issue.body.unwrap_or_default()),
                Err(e) => Err(Plan::from_error(e, format!("item #{number}"))),
            },
            TextLocation::Comment(id) => match self.target.list_comments(number).await {
                Ok(comments) => comments
                    .into_iter()
                    .find(|c| c.id == id)
                    .map(|c| c.body)
                    .ok_or_else(|| Plan::NotFound(format!("comment {id} on #{number}"))),
                Err(e) => Err(Plan::from_error(e, format!("item #{number}"))),
            },
        }
    }
}

#[async_trait]
impl<'a> RecordHandler for ReferenceHandler<'a> {
    type Row = ReferenceRow;
    type Action = Rewrite;

    fn category(&self, row: &ReferenceRow) -> String {
        row.reference_type.as_str().to_string()
    }

    async fn plan(&mut self, row: &mut ReferenceRow) -> Plan<Rewrite> {
        if row.url_exists == Some(false) && !self.force {
            return Plan::Skip("replacement URL failed validation, use --force to apply".into());
        }
        let Some(location) = TextLocation::parse(&row.location) else {
            return Plan::Error(ReconcileError::UnresolvableEntity(format!(
                "unknown text location '{}'",
                row.location
            )));
        };
        let text = match self.current_text(row.item_number, location).await {
            Ok(text) => text,
            Err(plan) => return plan,
        };

        match replace_reference(&text, &row.original_text, &row.replacement_url, row.reference_type) {
            Some(text) => Plan::Apply(Rewrite {
                number: row.item_number,
                location,
                text,
            }),
            None => Plan::Skip("reference no longer present".into()),
        }
    }

    fn describe(&self, action: &Rewrite) -> String {
        format!("would rewrite #{} {}", action.number, action.location)
    }

    async fn execute(
        &mut self,
        row: &mut ReferenceRow,
        action: Rewrite,
        pacer: &mut Pacer,
    ) -> ReconcileResult<String> {
        pacer.ready().await;
        match action.location {
            TextLocation::Body => {
                self.target.update_issue_body(action.number, &action.text).await?
            }
            TextLocation::Comment(id) => {
                self.target
                    .update_comment(action.number, id, &action.text)
                    .await?
            }
        }
        Ok(format!("replaced with {}", row.replacement_url))
    }
}

pub async fn run(
    target: &dyn TargetTracker,
    ledger: &Ledger<ReferenceRow>,
    options: ApplyOptions,
) -> ReconcileResult<RunReport> {
    let mut handler = ReferenceHandler::new(target, options.force);
    run_ledger(MappingKind::References, &mut handler, ledger, target, options).await
}
