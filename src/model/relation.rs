use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    RelatesTo,
    Blocks,
    IsBlockedBy,
    Duplicates,
    IsDuplicatedBy,
    DependsOn,
    IsDependencyFor,
}

impl RelationKind {
    pub const ALL: [RelationKind; 7] = [
        RelationKind::RelatesTo,
        RelationKind::Blocks,
        RelationKind::IsBlockedBy,
        RelationKind::Duplicates,
        RelationKind::IsDuplicatedBy,
        RelationKind::DependsOn,
        RelationKind::IsDependencyFor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::RelatesTo => "relates_to",
            RelationKind::Blocks => "blocks",
            RelationKind::IsBlockedBy => "is_blocked_by",
            RelationKind::Duplicates => "duplicates",
            RelationKind::IsDuplicatedBy => "is_duplicated_by",
            RelationKind::DependsOn => "depends_on",
            RelationKind::IsDependencyFor => "is_dependency_for",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// Phrase used in fallback comments on the target tracker.
    pub fn phrase(&self) -> &'static str {
        match self {
            RelationKind::RelatesTo => "Related to",
            RelationKind::Blocks => "Blocks",
            RelationKind::IsBlockedBy => "Is blocked by",
            RelationKind::Duplicates => "Duplicates",
            RelationKind::IsDuplicatedBy => "Is duplicated by",
            RelationKind::DependsOn => "Depends on",
            RelationKind::IsDependencyFor => "Is a dependency for",
        }
    }

    pub fn target_action(&self) -> TargetAction {
        match self {
            RelationKind::IsBlockedBy | RelationKind::DependsOn => TargetAction::BlockedBy,
            RelationKind::Blocks | RelationKind::IsDependencyFor => TargetAction::Blocking,
            _ => TargetAction::Comment,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a piece of relationship evidence was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    ApiLink,
    DescriptionText,
    CommentText,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::ApiLink => "api-link",
            Provenance::DescriptionText => "description-text",
            Provenance::CommentText => "comment-text",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub source_iid: u64,
    pub target_iid: u64,
    pub kind: RelationKind,
    pub provenance: Provenance,
    /// Path of the other project when the evidence points outside the configured one.
    pub target_project: Option<String>,
}

/// A deduplicated relationship between two source issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub source_iid: u64,
    pub target_iid: u64,
    pub kind: RelationKind,
    pub provenance: Provenance,
    pub target_project: Option<String>,
}

impl From<Evidence> for Relationship {
    fn from(e: Evidence) -> Self {
        Self {
            source_iid: e.source_iid,
            target_iid: e.target_iid,
            kind: e.kind,
            provenance: e.provenance,
            target_project: e.target_project,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetAction {
    BlockedBy,
    Blocking,
    Comment,
}

impl TargetAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetAction::BlockedBy => "blocked_by",
            TargetAction::Blocking => "blocking",
            TargetAction::Comment => "comment",
        }
    }
}

impl fmt::Display for TargetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
