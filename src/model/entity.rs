use serde::{Deserialize, Serialize};
use std::fmt;

/// The configured source project as reported by the source tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub id: u64,
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceIssue {
    pub id: u64,
    /// Project-local issue number.
    pub iid: u64,
    pub project_id: u64,
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub author: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub milestone: Option<SourceMilestone>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceNote {
    pub id: u64,
    pub body: String,
    pub author: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDiscussion {
    pub id: String,
    pub notes: Vec<SourceNote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneScope {
    Project,
    Group,
}

impl MilestoneScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneScope::Project => "project",
            MilestoneScope::Group => "group",
        }
    }
}

impl fmt::Display for MilestoneScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceMilestone {
    pub id: u64,
    pub iid: Option<u64>,
    pub title: String,
    pub description: Option<String>,
    pub state: Option<String>,
    pub due_date: Option<String>,
    pub web_url: Option<String>,
    pub scope: MilestoneScope,
}

/// A link object from the source tracker's issue links endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueLink {
    pub iid: u64,
    pub project_id: u64,
    pub link_type: String,
    /// Full reference such as `group/project#12`, when the API supplies one.
    pub reference: Option<String>,
    pub web_url: Option<String>,
}

impl IssueLink {
    /// Project path of the linked issue, taken from its full reference.
    pub fn project_path(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .and_then(|r| r.rsplit_once('#'))
            .map(|(path, _)| path)
            .filter(|path| !path.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetIssue {
    /// Internal id, distinct from the repository-local number.
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub is_pull_request: bool,
    pub milestone: Option<u64>,
}

impl TargetIssue {
    pub fn kind(&self) -> &'static str {
        if self.is_pull_request {
            "pull request"
        } else {
            "issue"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetComment {
    pub id: u64,
    pub body: String,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetMilestone {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub description: Option<String>,
    pub due_on: Option<String>,
}

/// Fields sent when creating a milestone on the target tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMilestone {
    pub title: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}
