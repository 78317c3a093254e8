use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::client::{ApiClient, PageStrategy, PagedQuery};
use super::{IssueState, SourceTracker};
use crate::error::ReconcileResult;
use crate::model::entity::{
    IssueLink, MilestoneScope, ProjectInfo, SourceDiscussion, SourceIssue, SourceMilestone,
    SourceNote,
};
use crate::util::urls::SourceProject;

pub struct GitLabSource {
    client: ApiClient,
    project: SourceProject,
}

impl GitLabSource {
    pub fn new(client: ApiClient, project: SourceProject) -> Self {
        Self { client, project }
    }

    fn project_path(&self, rest: &str) -> String {
        format!("/projects/{}{rest}", self.project.encoded_id())
    }
}

#[derive(Deserialize)]
struct GlProject {
    id: u64,
    path_with_namespace: String,
}

#[derive(Deserialize)]
struct GlUser {
    username: String,
}

#[derive(Deserialize)]
struct GlIssue {
    id: u64,
    iid: u64,
    project_id: u64,
    title: String,
    description: Option<String>,
    state: String,
    author: Option<GlUser>,
    created_at: Option<String>,
    updated_at: Option<String>,
    milestone: Option<GlMilestone>,
    web_url: Option<String>,
}

#[derive(Deserialize)]
struct GlMilestone {
    id: u64,
    iid: Option<u64>,
    title: String,
    description: Option<String>,
    state: Option<String>,
    due_date: Option<String>,
    web_url: Option<String>,
    group_id: Option<u64>,
}

#[derive(Deserialize)]
struct GlNote {
    id: u64,
    body: String,
    author: GlUser,
    created_at: String,
    updated_at: Option<String>,
    #[serde(default)]
    system: bool,
}

#[derive(Deserialize)]
struct GlDiscussion {
    id: String,
    #[serde(default)]
    notes: Vec<GlNote>,
}

#[derive(Deserialize)]
struct GlReferences {
    full: Option<String>,
}

#[derive(Deserialize)]
struct GlLink {
    iid: u64,
    project_id: u64,
    link_type: Option<String>,
    references: Option<GlReferences>,
    web_url: Option<String>,
}

impl GlMilestone {
    fn into_milestone(self, default_scope: MilestoneScope) -> SourceMilestone {
        let scope = if self.group_id.is_some() {
            MilestoneScope::Group
        } else {
            default_scope
        };
        SourceMilestone {
            id: self.id,
            iid: self.iid,
            title: self.title,
            description: self.description.filter(|d| !d.is_empty()),
            state: self.state,
            due_date: self.due_date,
            web_url: self.web_url,
            scope,
        }
    }
}

impl From<GlNote> for SourceNote {
    fn from(note: GlNote) -> Self {
        SourceNote {
            id: note.id,
            body: note.body,
            author: note.author.username,
            created_at: note.created_at,
            updated_at: note.updated_at,
            system: note.system,
        }
    }
}

impl From<GlIssue> for SourceIssue {
    fn from(issue: GlIssue) -> Self {
        SourceIssue {
            id: issue.id,
            iid: issue.iid,
            project_id: issue.project_id,
            title: issue.title,
            description: issue.description,
            state: issue.state,
            author: issue.author.map(|a| a.username),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            milestone: issue
                .milestone
                .map(|m| m.into_milestone(MilestoneScope::Project)),
            web_url: issue.web_url,
        }
    }
}

#[async_trait]
impl SourceTracker for GitLabSource {
    fn locator(&self) -> &SourceProject {
        &self.project
    }

    async fn project(&self) -> ReconcileResult<ProjectInfo> {
        let project: GlProject = self.client.get_json(&self.project_path("")).await?;
        Ok(ProjectInfo {
            id: project.id,
            path_with_namespace: project.path_with_namespace,
        })
    }

    async fn list_issues(&self, state: IssueState) -> ReconcileResult<Vec<SourceIssue>> {
        let query = PagedQuery::new(self.project_path("/issues"), PageStrategy::SizeBoundary)
            .param("state", state)
            .param("scope", "all");
        let issues: Vec<GlIssue> = self.client.collect_all(query).await?;
        debug!(state = %state, count = issues.len(), "Fetched source issues");
        Ok(issues.into_iter().map(SourceIssue::from).collect())
    }

    async fn list_discussions(&self, iid: u64) -> ReconcileResult<Vec<SourceDiscussion>> {
        let query = PagedQuery::new(
            self.project_path(&format!("/issues/{iid}/discussions")),
            PageStrategy::SizeBoundary,
        );
        let discussions: Vec<GlDiscussion> = self.client.collect_all(query).await?;
        Ok(discussions
            .into_iter()
            .map(|d| SourceDiscussion {
                id: d.id,
                notes: d.notes.into_iter().map(SourceNote::from).collect(),
            })
            .collect())
    }

    async fn list_notes(&self, iid: u64) -> ReconcileResult<Vec<SourceNote>> {
        let query = PagedQuery::new(
            self.project_path(&format!("/issues/{iid}/notes")),
            PageStrategy::SizeBoundary,
        )
        .param("sort", "asc");
        let notes: Vec<GlNote> = self.client.collect_all(query).await?;
        Ok(notes.into_iter().map(SourceNote::from).collect())
    }

    async fn list_issue_links(&self, iid: u64) -> ReconcileResult<Vec<IssueLink>> {
        let query = PagedQuery::new(
            self.project_path(&format!("/issues/{iid}/links")),
            PageStrategy::SizeBoundary,
        );
        let links: Vec<GlLink> = self.client.collect_all(query).await?;
        Ok(links
            .into_iter()
            .map(|l| IssueLink {
                iid: l.iid,
                project_id: l.project_id,
                link_type: l.link_type.unwrap_or_else(|| "relates_to".to_string()),
                reference: l.references.and_then(|r| r.full),
                web_url: l.web_url,
            })
            .collect())
    }

    async fn list_project_milestones(&self) -> ReconcileResult<Vec<SourceMilestone>> {
        // Omitting `state` returns active and closed milestones alike.
        let query = PagedQuery::new(self.project_path("/milestones"), PageStrategy::SizeBoundary);
        let milestones: Vec<GlMilestone> = self.client.collect_all(query).await?;
        Ok(milestones
            .into_iter()
            .map(|m| m.into_milestone(MilestoneScope::Project))
            .collect())
    }

    async fn list_group_milestones(&self) -> ReconcileResult<Vec<SourceMilestone>> {
        let query = PagedQuery::new(
            format!("/groups/{}/milestones", self.project.encoded_group()),
            PageStrategy::SizeBoundary,
        );
        let milestones: Vec<GlMilestone> = self.client.collect_all(query).await?;
        Ok(milestones
            .into_iter()
            .map(|m| m.into_milestone(MilestoneScope::Group))
            .collect())
    }
}
