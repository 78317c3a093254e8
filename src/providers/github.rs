use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::client::{ApiClient, PageStrategy, PagedQuery};
use super::TargetTracker;
use crate::error::ReconcileResult;
use crate::model::entity::{NewMilestone, RateLimitStatus, TargetComment, TargetIssue, TargetMilestone};
use crate::util::urls::TargetRepo;

/// Listings memoized for the length of one run.
///
/// Mutations go through [`GitHubTarget`], which drops the affected entries so
/// the next read sees the change.
#[derive(Debug, Default)]
pub struct TargetCache {
    issues: Mutex<Option<Vec<TargetIssue>>>,
    comments: Mutex<HashMap<u64, Vec<TargetComment>>>,
    milestones: Mutex<Option<Vec<TargetMilestone>>>,
}

impl TargetCache {
    pub fn issues(&self) -> Option<Vec<TargetIssue>> {
        lock(&self.issues).clone()
    }

    pub fn store_issues(&self, issues: Vec<TargetIssue>) {
        *lock(&self.issues) = Some(issues);
    }

    pub fn comments(&self, number: u64) -> Option<Vec<TargetComment>> {
        lock(&self.comments).get(&number).cloned()
    }

    pub fn store_comments(&self, number: u64, comments: Vec<TargetComment>) {
        lock(&self.comments).insert(number, comments);
    }

    pub fn milestones(&self) -> Option<Vec<TargetMilestone>> {
        lock(&self.milestones).clone()
    }

    pub fn store_milestones(&self, milestones: Vec<TargetMilestone>) {
        *lock(&self.milestones) = Some(milestones);
    }

    /// Forget one issue's comments and the issue listing it appears in.
    pub fn invalidate_issue(&self, number: u64) {
        lock(&self.comments).remove(&number);
        *lock(&self.issues) = None;
    }

    pub fn invalidate_milestones(&self) {
        *lock(&self.milestones) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct GitHubTarget {
    client: ApiClient,
    repo: TargetRepo,
    cache: TargetCache,
}

impl GitHubTarget {
    pub fn new(client: ApiClient, repo: TargetRepo) -> Self {
        Self {
            client,
            repo,
            cache: TargetCache::default(),
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &TargetCache {
        &self.cache
    }

    fn repo_path(&self, rest: &str) -> String {
        format!("/repos/{}/{}{rest}", self.repo.owner, self.repo.repo)
    }
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Deserialize)]
struct GhMilestoneRef {
    number: u64,
}

#[derive(Deserialize)]
struct GhIssue {
    id: u64,
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    pull_request: Option<serde_json::Value>,
    milestone: Option<GhMilestoneRef>,
}

#[derive(Deserialize)]
struct GhComment {
    id: u64,
    body: Option<String>,
    user: Option<GhUser>,
}

#[derive(Deserialize)]
struct GhMilestone {
    number: u64,
    title: String,
    state: String,
    description: Option<String>,
    due_on: Option<String>,
}

#[derive(Deserialize)]
struct GhRate {
    limit: u64,
    remaining: u64,
    reset: i64,
}

#[derive(Deserialize)]
struct GhRateLimit {
    rate: GhRate,
}

impl From<GhIssue> for TargetIssue {
    fn from(issue: GhIssue) -> Self {
        TargetIssue {
            id: issue.id,
            number: issue.number,
            title: issue.title,
            body: issue.body,
            state: issue.state,
            is_pull_request: issue.pull_request.is_some(),
            milestone: issue.milestone.map(|m| m.number),
        }
    }
}

impl From<GhComment> for TargetComment {
    fn from(comment: GhComment) -> Self {
        TargetComment {
            id: comment.id,
            body: comment.body.unwrap_or_default(),
            author: comment.user.map(|u| u.login),
        }
    }
}

impl From<GhMilestone> for TargetMilestone {
    fn from(m: GhMilestone) -> Self {
        TargetMilestone {
            number: m.number,
            title: m.title,
            state: m.state,
            description: m.description,
            due_on: m.due_on,
        }
    }
}

#[async_trait]
impl TargetTracker for GitHubTarget {
    fn repo(&self) -> &TargetRepo {
        &self.repo
    }

    async fn list_issues(&self) -> ReconcileResult<Vec<TargetIssue>> {
        if let Some(issues) = self.cache.issues() {
            return Ok(issues);
        }
        let query = PagedQuery::new(self.repo_path("/issues"), PageStrategy::NextLink)
            .param("state", "all")
            .param("direction", "asc");
        let issues: Vec<GhIssue> = self.client.collect_all(query).await?;
        let issues: Vec<TargetIssue> = issues.into_iter().map(TargetIssue::from).collect();
        debug!(repo = %self.repo.full_name(), count = issues.len(), "Listed target issues");
        self.cache.store_issues(issues.clone());
        Ok(issues)
    }

    async fn get_issue(&self, number: u64) -> ReconcileResult<TargetIssue> {
        let issue: GhIssue = self
            .client
            .get_json(&self.repo_path(&format!("/issues/{number}")))
            .await?;
        Ok(issue.into())
    }

    async fn list_comments(&self, number: u64) -> ReconcileResult<Vec<TargetComment>> {
        if let Some(comments) = self.cache.comments(number) {
            return Ok(comments);
        }
        let query = PagedQuery::new(
            self.repo_path(&format!("/issues/{number}/comments")),
            PageStrategy::NextLink,
        );
        let comments: Vec<GhComment> = self.client.collect_all(query).await?;
        let comments: Vec<TargetComment> = comments.into_iter().map(TargetComment::from).collect();
        self.cache.store_comments(number, comments.clone());
        Ok(comments)
    }

    async fn list_milestones(&self) -> ReconcileResult<Vec<TargetMilestone>> {
        if let Some(milestones) = self.cache.milestones() {
            return Ok(milestones);
        }
        let query = PagedQuery::new(self.repo_path("/milestones"), PageStrategy::NextLink)
            .param("state", "all");
        let milestones: Vec<GhMilestone> = self.client.collect_all(query).await?;
        let milestones: Vec<TargetMilestone> =
            milestones.into_iter().map(TargetMilestone::from).collect();
        self.cache.store_milestones(milestones.clone());
        Ok(milestones)
    }

    async fn list_blocked_by(&self, number: u64) -> ReconcileResult<Vec<TargetIssue>> {
        let query = PagedQuery::new(
            self.repo_path(&format!("/issues/{number}/dependencies/blocked_by")),
            PageStrategy::NextLink,
        );
        let issues: Vec<GhIssue> = self.client.collect_all(query).await?;
        Ok(issues.into_iter().map(TargetIssue::from).collect())
    }

    async fn rate_limit(&self) -> ReconcileResult<RateLimitStatus> {
        let status: GhRateLimit = self.client.get_json("/rate_limit").await?;
        Ok(RateLimitStatus {
            limit: status.rate.limit,
            remaining: status.rate.remaining,
            reset: status.rate.reset,
        })
    }

    async fn create_comment(&self, number: u64, body: &str) -> ReconcileResult<TargetComment> {
        let comment: GhComment = self
            .client
            .post_json(
                &self.repo_path(&format!("/issues/{number}/comments")),
                &json!({ "body": body }),
            )
            .await?;
        self.cache.invalidate_issue(number);
        Ok(comment.into())
    }

    async fn update_comment(&self, number: u64, comment_id: u64, body: &str) -> ReconcileResult<()> {
        self.client
            .patch_json(
                &self.repo_path(&format!("/issues/comments/{comment_id}")),
                &json!({ "body": body }),
            )
            .await?;
        self.cache.invalidate_issue(number);
        Ok(())
    }

    async fn update_issue_body(&self, number: u64, body: &str) -> ReconcileResult<()> {
        self.client
            .patch_json(
                &self.repo_path(&format!("/issues/{number}")),
                &json!({ "body": body }),
            )
            .await?;
        self.cache.invalidate_issue(number);
        Ok(())
    }

    async fn set_issue_milestone(&self, number: u64, milestone: u64) -> ReconcileResult<()> {
        self.client
            .patch_json(
                &self.repo_path(&format!("/issues/{number}")),
                &json!({ "milestone": milestone }),
            )
            .await?;
        self.cache.invalidate_issue(number);
        Ok(())
    }

    async fn create_milestone(&self, milestone: &NewMilestone) -> ReconcileResult<TargetMilestone> {
        let created: GhMilestone = self
            .client
            .post_json(&self.repo_path("/milestones"), milestone)
            .await?;
        self.cache.invalidate_milestones();
        Ok(created.into())
    }

    async fn add_blocked_by(&self, number: u64, blocking_id: u64) -> ReconcileResult<()> {
        self.client
            .post(
                &self.repo_path(&format!("/issues/{number}/dependencies/blocked_by")),
                &json!({ "issue_id": blocking_id }),
            )
            .await?;
        Ok(())
    }
}
