use std::fmt;

use serde::{Deserialize, Serialize};

use super::LedgerRow;
use crate::model::entity::MilestoneScope;
use crate::model::record::RecordStatus;
use crate::model::relation::{Provenance, RelationKind, TargetAction};

/// A source comment placed in its thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRow {
    pub source_issue_id: u64,
    pub source_issue_iid: u64,
    pub source_issue_title: String,
    pub source_comment_id: u64,
    /// Thread root for replies; empty for roots.
    pub source_parent_comment_id: Option<u64>,
    pub source_comment_body: String,
    pub source_comment_author: String,
    pub source_comment_created_at: String,
    pub source_comment_updated_at: Option<String>,
    pub target_issue_number: Option<u64>,
    pub target_comment_id: Option<u64>,
    pub status: RecordStatus,
    pub notes: Option<String>,
}

impl CommentRow {
    pub fn is_root(&self) -> bool {
        self.source_parent_comment_id.is_none()
    }
}

impl LedgerRow for CommentRow {
    const COLUMNS: &'static [&'static str] = &[
        "source_issue_id",
        "source_issue_iid",
        "source_issue_title",
        "source_comment_id",
        "source_parent_comment_id",
        "source_comment_body",
        "source_comment_author",
        "source_comment_created_at",
        "source_comment_updated_at",
        "target_issue_number",
        "target_comment_id",
        "status",
        "notes",
    ];

    fn status(&self) -> RecordStatus {
        self.status
    }

    fn set_status(&mut self, status: RecordStatus, notes: Option<String>) {
        self.status = status;
        self.notes = notes;
    }

    fn label(&self) -> String {
        format!(
            "comment {} on #{}",
            self.source_comment_id, self.source_issue_iid
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneAction {
    /// Make sure the milestone exists on the target.
    Create,
    /// Put an issue into the milestone.
    Assign,
}

impl MilestoneAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneAction::Create => "create",
            MilestoneAction::Assign => "assign",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRow {
    pub action: MilestoneAction,
    pub source_id: Option<u64>,
    pub source_iid: Option<u64>,
    pub source_title: String,
    pub source_description: Option<String>,
    pub source_state: Option<String>,
    pub source_due_date: Option<String>,
    pub source_scope: Option<MilestoneScope>,
    pub source_web_url: Option<String>,
    pub source_issue_iid: Option<u64>,
    pub target_milestone_number: Option<u64>,
    pub target_issue_number: Option<u64>,
    pub status: RecordStatus,
    pub notes: Option<String>,
}

impl MilestoneRow {
    pub fn create(title: &str) -> Self {
        Self {
            action: MilestoneAction::Create,
            source_id: None,
            source_iid: None,
            source_title: title.to_string(),
            source_description: None,
            source_state: None,
            source_due_date: None,
            source_scope: None,
            source_web_url: None,
            source_issue_iid: None,
            target_milestone_number: None,
            target_issue_number: None,
            status: RecordStatus::Pending,
            notes: None,
        }
    }

    pub fn assign(title: &str, issue_iid: u64) -> Self {
        Self {
            action: MilestoneAction::Assign,
            source_issue_iid: Some(issue_iid),
            ..Self::create(title)
        }
    }
}

impl LedgerRow for MilestoneRow {
    const COLUMNS: &'static [&'static str] = &[
        "action",
        "source_id",
        "source_iid",
        "source_title",
        "source_description",
        "source_state",
        "source_due_date",
        "source_scope",
        "source_web_url",
        "source_issue_iid",
        "target_milestone_number",
        "target_issue_number",
        "status",
        "notes",
    ];

    fn status(&self) -> RecordStatus {
        self.status
    }

    fn set_status(&mut self, status: RecordStatus, notes: Option<String>) {
        self.status = status;
        self.notes = notes;
    }

    fn label(&self) -> String {
        match (self.action, self.source_issue_iid) {
            (MilestoneAction::Assign, Some(iid)) => {
                format!("assign #{iid} to '{}'", self.source_title)
            }
            _ => format!("milestone '{}'", self.source_title),
        }
    }
}

/// A relationship between two source issues and where it lands on the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub source_iid: u64,
    pub target_iid: u64,
    pub kind: RelationKind,
    pub action: TargetAction,
    pub provenance: Provenance,
    /// Set when `target_iid` lives in another source project.
    pub target_project: Option<String>,
    pub source_issue_url: Option<String>,
    pub target_issue_url: Option<String>,
    pub mapped_source_url: Option<String>,
    pub mapped_target_url: Option<String>,
    pub mapped_source_number: Option<u64>,
    pub mapped_target_number: Option<u64>,
    pub status: RecordStatus,
    pub notes: Option<String>,
}

impl RelationshipRow {
    pub fn new(
        source_iid: u64,
        target_iid: u64,
        kind: RelationKind,
        provenance: Provenance,
        target_project: Option<String>,
    ) -> Self {
        Self {
            source_iid,
            target_iid,
            kind,
            action: kind.target_action(),
            provenance,
            target_project,
            source_issue_url: None,
            target_issue_url: None,
            mapped_source_url: None,
            mapped_target_url: None,
            mapped_source_number: None,
            mapped_target_number: None,
            status: RecordStatus::Pending,
            notes: None,
        }
    }

    pub fn is_cross_project(&self) -> bool {
        self.target_project.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Hidden marker appended to fallback comments so reruns can find them.
    /// Cross-project rows carry the project so they never share a marker
    /// with a same-project row for the same numbers.
    pub fn marker(&self) -> String {
        match self.target_project.as_deref().filter(|p| !p.is_empty()) {
            Some(project) => format!(
                "<!-- tracker-reconcile:relationship:{}:{}:{project}#{} -->",
                self.source_iid, self.kind, self.target_iid
            ),
            None => format!(
                "<!-- tracker-reconcile:relationship:{}:{}:{} -->",
                self.source_iid, self.kind, self.target_iid
            ),
        }
    }
}

impl LedgerRow for RelationshipRow {
    const COLUMNS: &'static [&'static str] = &[
        "source_iid",
        "target_iid",
        "kind",
        "action",
        "provenance",
        "target_project",
        "source_issue_url",
        "target_issue_url",
        "mapped_source_url",
        "mapped_target_url",
        "mapped_source_number",
        "mapped_target_number",
        "status",
        "notes",
    ];

    fn status(&self) -> RecordStatus {
        self.status
    }

    fn set_status(&mut self, status: RecordStatus, notes: Option<String>) {
        self.status = status;
        self.notes = notes;
    }

    fn label(&self) -> String {
        match &self.target_project {
            Some(project) if !project.is_empty() => format!(
                "#{} {} {project}#{}",
                self.source_iid, self.kind, self.target_iid
            ),
            _ => format!("#{} {} #{}", self.source_iid, self.kind, self.target_iid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Issue,
    PullRequest,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Issue => "issue",
            ItemType::PullRequest => "pull_request",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceType {
    /// A full URL into the source tracker.
    SourceUrl,
    /// A short `repo#N` reference.
    RepoRef,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::SourceUrl => "source-url",
            ReferenceType::RepoRef => "repo-ref",
        }
    }
}

/// Which piece of text on a target item holds the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextLocation {
    Body,
    Comment(u64),
}

impl TextLocation {
    pub fn parse(value: &str) -> Option<Self> {
        if value == "body" {
            return Some(TextLocation::Body);
        }
        value
            .strip_prefix("comment-")
            .and_then(|id| id.parse().ok())
            .map(TextLocation::Comment)
    }
}

impl fmt::Display for TextLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextLocation::Body => f.write_str("body"),
            TextLocation::Comment(id) => write!(f, "comment-{id}"),
        }
    }
}

/// A stale source-tracker reference found in target-tracker text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub item_type: ItemType,
    pub item_number: u64,
    pub location: String,
    pub original_text: String,
    pub replacement_url: String,
    pub reference_type: ReferenceType,
    /// Whether the replacement resolved on the target when last checked.
    /// Empty until checked.
    pub url_exists: Option<bool>,
    pub status: RecordStatus,
    pub notes: Option<String>,
}

impl LedgerRow for ReferenceRow {
    const COLUMNS: &'static [&'static str] = &[
        "item_type",
        "item_number",
        "location",
        "original_text",
        "replacement_url",
        "reference_type",
        "url_exists",
        "status",
        "notes",
    ];

    fn status(&self) -> RecordStatus {
        self.status
    }

    fn set_status(&mut self, status: RecordStatus, notes: Option<String>) {
        self.status = status;
        self.notes = notes;
    }

    fn label(&self) -> String {
        format!(
            "{} #{} {}: {}",
            self.item_type.as_str(),
            self.item_number,
            self.location,
            self.original_text
        )
    }
}
