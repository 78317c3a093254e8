pub mod patterns;

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::error::ReconcileResult;
use crate::ledger::rows::{ItemType, ReferenceType, TextLocation};
use crate::model::entity::{ProjectInfo, SourceDiscussion, SourceIssue, SourceMilestone, SourceNote};
use crate::model::relation::{Evidence, Provenance, RelationKind};
use crate::providers::{IssueState, SourceTracker, TargetTracker};

/// A non-system note placed in its thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadedComment {
    pub issue_id: u64,
    pub issue_iid: u64,
    pub issue_title: String,
    pub note: SourceNote,
    /// Thread root for replies, `None` for the root itself.
    pub parent_id: Option<u64>,
}

/// Milestones known to the source project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilestoneSet {
    pub milestones: Vec<SourceMilestone>,
    /// `(issue iid, milestone title)` for every issue that has a milestone.
    pub assignments: Vec<(u64, String)>,
}

/// A stale source reference inside target-tracker text.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundReference {
    pub item_type: ItemType,
    pub item_number: u64,
    pub location: TextLocation,
    pub original_text: String,
    pub reference_type: ReferenceType,
    /// Issue number for `repo#N` references.
    pub number: Option<u64>,
}

/// Open and closed issues, fetched concurrently and deduplicated by id.
pub async fn fetch_issues(source: &dyn SourceTracker) -> ReconcileResult<Vec<SourceIssue>> {
    let (opened, closed) = tokio::try_join!(
        source.list_issues(IssueState::Opened),
        source.list_issues(IssueState::Closed)
    )?;
    info!(opened = opened.len(), closed = closed.len(), "Fetched source issues");

    let mut seen = HashSet::new();
    Ok(opened
        .into_iter()
        .chain(closed)
        .filter(|issue| seen.insert(issue.id))
        .collect())
}

/// Place each note of each discussion in its thread. System notes are
/// dropped; the first remaining note of a discussion is the root.
pub fn thread_comments(issue: &SourceIssue, discussions: &[SourceDiscussion]) -> Vec<ThreadedComment> {
    let mut comments = Vec::new();
    for discussion in discussions {
        let mut root: Option<u64> = None;
        for note in discussion.notes.iter().filter(|n| !n.system) {
            comments.push(ThreadedComment {
                issue_id: issue.id,
                issue_iid: issue.iid,
                issue_title: issue.title.clone(),
                note: note.clone(),
                parent_id: root,
            });
            root.get_or_insert(note.id);
        }
    }
    comments
}

pub async fn extract_comments(
    source: &dyn SourceTracker,
    issues: &[SourceIssue],
) -> ReconcileResult<Vec<ThreadedComment>> {
    let mut comments = Vec::new();
    for (i, issue) in issues.iter().enumerate() {
        match source.list_discussions(issue.iid).await {
            Ok(discussions) => {
                let threaded = thread_comments(issue, &discussions);
                debug!(iid = issue.iid, count = threaded.len(), "Threaded comments");
                comments.extend(threaded);
            }
            Err(e) => warn!(iid = issue.iid, error = %e, "Skipping discussions for issue"),
        }
        if (i + 1) % 25 == 0 {
            info!("Processed {}/{} issues", i + 1, issues.len());
        }
    }
    Ok(comments)
}

/// Project and group milestones plus any milestone only seen on an issue.
pub async fn extract_milestones(
    source: &dyn SourceTracker,
    issues: &[SourceIssue],
) -> ReconcileResult<MilestoneSet> {
    let (project, group) = tokio::try_join!(
        source.list_project_milestones(),
        async {
            match source.list_group_milestones().await {
                Ok(group) => Ok(group),
                Err(e) => {
                    warn!(error = %e, "Group milestones unavailable; continuing with project milestones");
                    Ok(Vec::new())
                }
            }
        }
    )?;
    info!(project = project.len(), group = group.len(), "Fetched source milestones");

    let mut seen = HashSet::new();
    let mut milestones: Vec<SourceMilestone> = project
        .into_iter()
        .chain(group)
        .filter(|m| seen.insert(m.id))
        .collect();

    let mut assignments = Vec::new();
    for issue in issues {
        if let Some(milestone) = &issue.milestone {
            if seen.insert(milestone.id) {
                milestones.push(milestone.clone());
            }
            assignments.push((issue.iid, milestone.title.clone()));
        }
    }

    Ok(MilestoneSet {
        milestones,
        assignments,
    })
}

/// Relationship evidence mentioned in `text` of issue `source_iid`.
pub fn text_evidence(source_iid: u64, text: &str, provenance: Provenance) -> Vec<Evidence> {
    patterns::scan_relations(text)
        .into_iter()
        .filter(|(_, target)| *target != source_iid)
        .map(|(kind, target_iid)| Evidence {
            source_iid,
            target_iid,
            kind,
            provenance,
            target_project: None,
        })
        .collect()
}

/// Evidence from link objects, descriptions and comments, in that order per issue.
pub async fn extract_evidence(
    source: &dyn SourceTracker,
    project: &ProjectInfo,
    issues: &[SourceIssue],
) -> ReconcileResult<Vec<Evidence>> {
    let mut evidence = Vec::new();

    for (i, issue) in issues.iter().enumerate() {
        match source.list_issue_links(issue.iid).await {
            Ok(links) => {
                for link in links {
                    let target_project = (link.project_id != project.id).then(|| {
                        link.project_path()
                            .map(str::to_string)
                            .unwrap_or_else(|| link.project_id.to_string())
                    });
                    if target_project.is_none() && link.iid == issue.iid {
                        continue;
                    }
                    let kind = RelationKind::parse(&link.link_type).unwrap_or_else(|| {
                        warn!(iid = issue.iid, link_type = %link.link_type, "Unknown link type; recording as relates_to");
                        RelationKind::RelatesTo
                    });
                    evidence.push(Evidence {
                        source_iid: issue.iid,
                        target_iid: link.iid,
                        kind,
                        provenance: Provenance::ApiLink,
                        target_project,
                    });
                }
            }
            Err(e) => warn!(iid = issue.iid, error = %e, "Skipping links for issue"),
        }

        if let Some(description) = issue.description.as_deref() {
            evidence.extend(text_evidence(issue.iid, description, Provenance::DescriptionText));
        }

        match source.list_notes(issue.iid).await {
            Ok(notes) => {
                for note in notes.iter().filter(|n| !n.system) {
                    evidence.extend(text_evidence(issue.iid, &note.body, Provenance::CommentText));
                }
            }
            Err(e) => warn!(iid = issue.iid, error = %e, "Skipping notes for issue"),
        }

        if (i + 1) % 25 == 0 {
            info!("Scanned {}/{} issues for relationships", i + 1, issues.len());
        }
    }

    info!(count = evidence.len(), "Collected relationship evidence");
    Ok(evidence)
}

/// Stale source references in target issue and pull request text.
pub async fn extract_references(
    target: &dyn TargetTracker,
    source_host: &str,
) -> ReconcileResult<Vec<FoundReference>> {
    let repo_name = target.repo().base_name().to_string();
    let items = target.list_issues().await?;
    let mut found = Vec::new();

    for item in &items {
        let item_type = if item.is_pull_request {
            ItemType::PullRequest
        } else {
            ItemType::Issue
        };
        if let Some(body) = item.body.as_deref() {
            found.extend(scan_references(
                body,
                source_host,
                &repo_name,
                item_type,
                item.number,
                TextLocation::Body,
            ));
        }

        match target.list_comments(item.number).await {
            Ok(comments) => {
                for comment in comments {
                    found.extend(scan_references(
                        &comment.body,
                        source_host,
                        &repo_name,
                        item_type,
                        item.number,
                        TextLocation::Comment(comment.id),
                    ));
                }
            }
            Err(e) => warn!(number = item.number, error = %e, "Skipping comments for item"),
        }
    }

    info!(items = items.len(), references = found.len(), "Scanned target text for references");
    Ok(found)
}

fn scan_references(
    text: &str,
    source_host: &str,
    repo_name: &str,
    item_type: ItemType,
    item_number: u64,
    location: TextLocation,
) -> Vec<FoundReference> {
    let urls = patterns::find_source_urls(text, source_host)
        .into_iter()
        .map(|url| FoundReference {
            item_type,
            item_number,
            location,
            original_text: url,
            reference_type: ReferenceType::SourceUrl,
            number: None,
        });
    let refs = patterns::find_repo_refs(text, repo_name)
        .into_iter()
        .map(|(text, number)| FoundReference {
            item_type,
            item_number,
            location,
            original_text: text,
            reference_type: ReferenceType::RepoRef,
            number: Some(number),
        });
    urls.chain(refs).collect()
}
