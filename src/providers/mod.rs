pub mod client;
pub mod github;
pub mod gitlab;
pub mod rate_limit;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ClientConfig, SourceSettings, TargetSettings};
use crate::error::ReconcileResult;
use crate::model::entity::{
    IssueLink, NewMilestone, ProjectInfo, RateLimitStatus, SourceDiscussion, SourceIssue,
    SourceMilestone, SourceNote, TargetComment, TargetIssue, TargetMilestone,
};
use crate::util::urls::{SourceProject, TargetRepo};
use client::{ApiClient, HttpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Opened,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Opened => "opened",
            IssueState::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only access to the tracker being migrated from.
#[async_trait]
pub trait SourceTracker: Send + Sync {
    fn locator(&self) -> &SourceProject;
    async fn project(&self) -> ReconcileResult<ProjectInfo>;
    async fn list_issues(&self, state: IssueState) -> ReconcileResult<Vec<SourceIssue>>;
    async fn list_discussions(&self, iid: u64) -> ReconcileResult<Vec<SourceDiscussion>>;
    async fn list_notes(&self, iid: u64) -> ReconcileResult<Vec<SourceNote>>;
    async fn list_issue_links(&self, iid: u64) -> ReconcileResult<Vec<IssueLink>>;
    async fn list_project_milestones(&self) -> ReconcileResult<Vec<SourceMilestone>>;
    async fn list_group_milestones(&self) -> ReconcileResult<Vec<SourceMilestone>>;
}

/// Read and write access to the tracker being migrated to.
#[async_trait]
pub trait TargetTracker: Send + Sync {
    fn repo(&self) -> &TargetRepo;

    /// Every issue and pull request, open or closed.
    async fn list_issues(&self) -> ReconcileResult<Vec<TargetIssue>>;
    async fn get_issue(&self, number: u64) -> ReconcileResult<TargetIssue>;
    async fn list_comments(&self, number: u64) -> ReconcileResult<Vec<TargetComment>>;
    async fn list_milestones(&self) -> ReconcileResult<Vec<TargetMilestone>>;
    /// Issues that currently block `number`.
    async fn list_blocked_by(&self, number: u64) -> ReconcileResult<Vec<TargetIssue>>;
    async fn rate_limit(&self) -> ReconcileResult<RateLimitStatus>;

    async fn create_comment(&self, number: u64, body: &str) -> ReconcileResult<TargetComment>;
    async fn update_comment(&self, number: u64, comment_id: u64, body: &str) -> ReconcileResult<()>;
    async fn update_issue_body(&self, number: u64, body: &str) -> ReconcileResult<()>;
    async fn set_issue_milestone(&self, number: u64, milestone: u64) -> ReconcileResult<()>;
    async fn create_milestone(&self, milestone: &NewMilestone) -> ReconcileResult<TargetMilestone>;
    /// Record that `number` is blocked by the issue with internal id `blocking_id`.
    async fn add_blocked_by(&self, number: u64, blocking_id: u64) -> ReconcileResult<()>;
}


pub fn create_source(
    settings: &SourceSettings,
    config: &ClientConfig,
) -> ReconcileResult<Box<dyn SourceTracker>> {
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(config.timeout_secs))?);
    let client = ApiClient::new(transport, &settings.api_endpoint, &settings.token).with_config(config);
    Ok(Box::new(gitlab::GitLabSource::new(client, settings.project.clone())))
}

pub fn create_target(
    settings: &TargetSettings,
    config: &ClientConfig,
) -> ReconcileResult<Box<dyn TargetTracker>> {
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(config.timeout_secs))?);
    let client = ApiClient::new(transport, &settings.api_url, &settings.token)
        .with_config(config)
        .with_accept("application/vnd.github+json");
    Ok(Box::new(github::GitHubTarget::new(client, settings.repo.clone())))
}
