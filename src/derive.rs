use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::extract::{FoundReference, MilestoneSet, ThreadedComment};
use crate::ledger::rows::{CommentRow, MilestoneRow, ReferenceRow, ReferenceType, RelationshipRow};
use crate::model::record::RecordStatus;
use crate::model::relation::{Evidence, Provenance, RelationKind, Relationship};
use crate::util::urls::{convert_source_url, SourceProject, TargetRepo};

type RelationKey = (u64, u64, RelationKind, Option<String>);

/// Collapse evidence into one relationship per (source, target, kind).
///
/// Link-object evidence replaces text evidence for the same key; otherwise the
/// first evidence seen wins. Output keeps the first-seen order of keys.
pub fn dedupe(evidence: Vec<Evidence>) -> Vec<Relationship> {
    let mut index: HashMap<RelationKey, usize> = HashMap::new();
    let mut relationships: Vec<Relationship> = Vec::new();

    for e in evidence {
        let key = (e.source_iid, e.target_iid, e.kind, e.target_project.clone());
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut relationships[i];
                if e.provenance == Provenance::ApiLink && existing.provenance != Provenance::ApiLink {
                    existing.provenance = Provenance::ApiLink;
                }
            }
            None => {
                index.insert(key, relationships.len());
                relationships.push(e.into());
            }
        }
    }

    debug!(count = relationships.len(), "Deduplicated relationships");
    relationships
}

pub fn relationship_rows(
    relationships: &[Relationship],
    source: &SourceProject,
    target: Option<&TargetRepo>,
) -> Vec<RelationshipRow> {
    relationships
        .iter()
        .map(|rel| {
            let mut row = RelationshipRow::new(
                rel.source_iid,
                rel.target_iid,
                rel.kind,
                rel.provenance,
                rel.target_project.clone(),
            );
            row.source_issue_url = Some(source.issue_url(rel.source_iid));
            row.target_issue_url = match rel.target_project.as_deref() {
                Some(project) if project.contains('/') => {
                    Some(source.foreign_issue_url(project, rel.target_iid))
                }
                Some(_) => None,
                None => Some(source.issue_url(rel.target_iid)),
            };
            if let Some(target) = target {
                row.mapped_source_url = Some(target.issue_url(rel.source_iid));
                row.mapped_target_url = match (&rel.target_project, &row.target_issue_url) {
                    (None, _) => Some(target.issue_url(rel.target_iid)),
                    (Some(_), Some(url)) => Some(convert_source_url(url, source, target)),
                    (Some(_), None) => None,
                };
            }
            row
        })
        .collect()
}

pub fn comment_rows(comments: &[ThreadedComment]) -> Vec<CommentRow> {
    comments
        .iter()
        .map(|c| CommentRow {
            source_issue_id: c.issue_id,
            source_issue_iid: c.issue_iid,
            source_issue_title: c.issue_title.clone(),
            source_comment_id: c.note.id,
            source_parent_comment_id: c.parent_id,
            source_comment_body: c.note.body.clone(),
            source_comment_author: c.note.author.clone(),
            source_comment_created_at: c.note.created_at.clone(),
            source_comment_updated_at: c.note.updated_at.clone(),
            target_issue_number: None,
            target_comment_id: None,
            status: RecordStatus::Pending,
            notes: None,
        })
        .collect()
}

/// `create` rows for every milestone, followed by `assign` rows.
pub fn milestone_rows(set: &MilestoneSet) -> Vec<MilestoneRow> {
    let creates = set.milestones.iter().map(|m| MilestoneRow {
        source_id: Some(m.id),
        source_iid: m.iid,
        source_description: m.description.clone(),
        source_state: m.state.clone(),
        source_due_date: m.due_date.clone(),
        source_scope: Some(m.scope),
        source_web_url: m.web_url.clone(),
        ..MilestoneRow::create(&m.title)
    });
    let assigns = set
        .assignments
        .iter()
        .map(|(iid, title)| MilestoneRow::assign(title, *iid));
    creates.chain(assigns).collect()
}

pub fn reference_rows(
    found: &[FoundReference],
    source: &SourceProject,
    target: &TargetRepo,
) -> Vec<ReferenceRow> {
    let mut seen = HashSet::new();
    found
        .iter()
        .filter_map(|f| {
            let replacement_url = match (f.reference_type, f.number) {
                (ReferenceType::RepoRef, Some(number)) => target.issue_url(number),
                _ => convert_source_url(&f.original_text, source, target),
            };
            if replacement_url == f.original_text {
                return None;
            }
            let key = (f.item_number, f.location, f.original_text.clone());
            if !seen.insert(key) {
                return None;
            }
            Some(ReferenceRow {
                item_type: f.item_type,
                item_number: f.item_number,
                location: f.location.to_string(),
                original_text: f.original_text.clone(),
                replacement_url,
                reference_type: f.reference_type,
                url_exists: None,
                status: RecordStatus::Pending,
                notes: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::rows::{ItemType, MilestoneAction, TextLocation};
    use crate::model::entity::{MilestoneScope, SourceMilestone};
    use crate::model::relation::TargetAction;
    use crate::providers::tests::note;

    fn evidence(src: u64, dst: u64, kind: RelationKind, provenance: Provenance) -> Evidence {
        Evidence {
            source_iid: src,
            target_iid: dst,
            kind,
            provenance,
            target_project: None,
        }
    }

    fn source() -> SourceProject {
        SourceProject::parse("https://gitlab.example.com/platform/widgets").unwrap()
    }

    fn target() -> TargetRepo {
        TargetRepo::parse("https://github.com/acme/widgets").unwrap()
    }

    #[test]
    fn api_link_wins_over_text() {
        let rels = dedupe(vec![
            evidence(7, 12, RelationKind::Blocks, Provenance::DescriptionText),
            evidence(7, 12, RelationKind::Blocks, Provenance::ApiLink),
        ]);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].provenance, Provenance::ApiLink);
    }

    #[test]
    fn first_text_evidence_wins_and_order_is_kept() {
        let rels = dedupe(vec![
            evidence(1, 2, RelationKind::RelatesTo, Provenance::CommentText),
            evidence(3, 4, RelationKind::Blocks, Provenance::DescriptionText),
            evidence(1, 2, RelationKind::RelatesTo, Provenance::DescriptionText),
            evidence(1, 2, RelationKind::Blocks, Provenance::DescriptionText),
        ]);
        let keys: Vec<_> = rels.iter().map(|r| (r.source_iid, r.target_iid, r.kind, r.provenance)).collect();
        assert_eq!(
            keys,
            vec![
                (1, 2, RelationKind::RelatesTo, Provenance::CommentText),
                (3, 4, RelationKind::Blocks, Provenance::DescriptionText),
                (1, 2, RelationKind::Blocks, Provenance::DescriptionText),
            ]
        );
    }

    #[test]
    fn relationship_rows_carry_urls_and_action() {
        let mut cross = evidence(7, 3, RelationKind::IsBlockedBy, Provenance::ApiLink);
        cross.target_project = Some("platform/gadgets".into());
        let rels = dedupe(vec![
            evidence(7, 12, RelationKind::DependsOn, Provenance::DescriptionText),
            cross,
        ]);

        let rows = relationship_rows(&rels, &source(), Some(&target()));
        assert_eq!(rows[0].action, TargetAction::BlockedBy);
        assert_eq!(
            rows[0].target_issue_url.as_deref(),
            Some("https://gitlab.example.com/platform/widgets/-/issues/12")
        );
        assert_eq!(
            rows[0].mapped_target_url.as_deref(),
            Some("https://github.com/acme/widgets/issues/12")
        );
        assert!(rows[1].is_cross_project());
        assert_eq!(
            rows[1].target_issue_url.as_deref(),
            Some("https://gitlab.example.com/platform/gadgets/-/issues/3")
        );
        assert_eq!(
            rows[1].mapped_target_url.as_deref(),
            Some("https://github.com/acme/gadgets/issues/3")
        );

        let unmapped = relationship_rows(&rels, &source(), None);
        assert_eq!(unmapped[0].mapped_source_url, None);
    }

    #[test]
    fn comment_rows_keep_threading() {
        let comments = vec![
            ThreadedComment {
                issue_id: 501,
                issue_iid: 7,
                issue_title: "Login fails".into(),
                note: note(2, "alice", "2024-01-01T00:00:00Z", "root"),
                parent_id: None,
            },
            ThreadedComment {
                issue_id: 501,
                issue_iid: 7,
                issue_title: "Login fails".into(),
                note: note(3, "bob", "2024-01-02T00:00:00Z", "reply"),
                parent_id: Some(2),
            },
        ];
        let rows = comment_rows(&comments);
        assert!(rows[0].is_root());
        assert_eq!(rows[1].source_parent_comment_id, Some(2));
        assert_eq!(rows[1].source_comment_author, "bob");
        assert!(rows.iter().all(|r| r.status == RecordStatus::Pending));
    }

    #[test]
    fn milestone_rows_put_creates_first() {
        let set = MilestoneSet {
            milestones: vec![SourceMilestone {
                id: 1,
                iid: Some(1),
                title: "v1.0".into(),
                description: Some("First".into()),
                state: Some("closed".into()),
                due_date: Some("2024-06-30".into()),
                web_url: None,
                scope: MilestoneScope::Group,
            }],
            assignments: vec![(4, "v1.0".into())],
        };
        let rows = milestone_rows(&set);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, MilestoneAction::Create);
        assert_eq!(rows[0].source_scope, Some(MilestoneScope::Group));
        assert_eq!(rows[1].action, MilestoneAction::Assign);
        assert_eq!(rows[1].source_issue_iid, Some(4));
    }

    #[test]
    fn reference_rows_compute_replacements_once() {
        let url = FoundReference {
            item_type: ItemType::Issue,
            item_number: 3,
            location: TextLocation::Body,
            original_text: "https://gitlab.example.com/platform/widgets/-/issues/9".into(),
            reference_type: ReferenceType::SourceUrl,
            number: None,
        };
        let short = FoundReference {
            location: TextLocation::Comment(70),
            original_text: "widgets#9".into(),
            reference_type: ReferenceType::RepoRef,
            number: Some(9),
            ..url.clone()
        };
        let rows = reference_rows(&[url.clone(), short, url], &source(), &target());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].replacement_url, "https://github.com/acme/widgets/issues/9");
        assert_eq!(rows[1].location, "comment-70");
        assert_eq!(rows[1].replacement_url, "https://github.com/acme/widgets/issues/9");
    }
}
