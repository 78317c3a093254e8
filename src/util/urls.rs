use reqwest::Url;

use crate::error::{ReconcileError, ReconcileResult};

/// A source-tracker project, parsed from its web URL
/// (`https://gitlab.example.com/group/sub/project`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProject {
    pub base: String,
    pub namespace: String,
    pub project: String,
    pub group: String,
}

impl SourceProject {
    pub fn parse(repo_url: &str) -> ReconcileResult<Self> {
        let (base, parts) = split_repo_url(repo_url)?;
        if parts.len() < 2 {
            return Err(ReconcileError::Configuration(format!(
                "invalid source repository URL: {repo_url}"
            )));
        }
        let project = parts[parts.len() - 1].clone();
        let namespace = parts[..parts.len() - 1].join("/");
        Ok(Self {
            base,
            group: parts[0].clone(),
            namespace,
            project,
        })
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace, self.project)
    }

    /// URL-encoded `namespace/project`, usable as `:id` in API paths.
    pub fn encoded_id(&self) -> String {
        urlencoding::encode(&self.path()).into_owned()
    }

    pub fn encoded_group(&self) -> String {
        urlencoding::encode(&self.group).into_owned()
    }

    pub fn issue_url(&self, iid: u64) -> String {
        format!("{}/{}/-/issues/{iid}", self.base, self.path())
    }

    /// Issue URL inside another project on the same host.
    pub fn foreign_issue_url(&self, project_path: &str, iid: u64) -> String {
        format!("{}/{project_path}/-/issues/{iid}", self.base)
    }

    pub fn host(&self) -> &str {
        self.base
            .split_once("://")
            .map(|(_, host)| host)
            .unwrap_or(&self.base)
    }
}

/// A target-tracker repository (`https://github.com/owner/repo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRepo {
    pub base: String,
    pub owner: String,
    pub repo: String,
}

impl TargetRepo {
    pub fn parse(repo_url: &str) -> ReconcileResult<Self> {
        let (base, parts) = split_repo_url(repo_url)?;
        if parts.len() < 2 {
            return Err(ReconcileError::Configuration(format!(
                "invalid target repository URL: {repo_url}"
            )));
        }
        Ok(Self {
            base,
            owner: parts[0].clone(),
            repo: parts[1].clone(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn web_url(&self) -> String {
        format!("{}/{}", self.base, self.full_name())
    }

    pub fn issue_url(&self, number: u64) -> String {
        format!("{}/issues/{number}", self.web_url())
    }

    /// Repository name with a trailing `-<digits>` suffix removed, which is how
    /// migrated repositories get disambiguated on import.
    pub fn base_name(&self) -> &str {
        match self.repo.rsplit_once('-') {
            Some((head, tail))
                if !head.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) =>
            {
                head
            }
            _ => &self.repo,
        }
    }
}

fn split_repo_url(repo_url: &str) -> ReconcileResult<(String, Vec<String>)> {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| {
        ReconcileError::Configuration(format!("invalid repository URL {repo_url}: {e}"))
    })?;
    let host = url.host_str().ok_or_else(|| {
        ReconcileError::Configuration(format!("repository URL has no host: {repo_url}"))
    })?;
    let base = match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    };
    let parts = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    Ok((base, parts))
}

/// Rewrite a source-tracker URL into its target-tracker equivalent.
///
/// Links into the configured project land in the configured target repository;
/// links into other projects keep their project name under the target owner.
/// `/-/` segments are dropped, merge requests become pulls and `#L10-L20` line
/// fragments survive.
pub fn convert_source_url(source_url: &str, source: &SourceProject, target: &TargetRepo) -> String {
    let Ok(parsed) = Url::parse(source_url) else {
        return source_url.to_string();
    };
    let parts: Vec<&str> = parsed
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return source_url.to_string();
    }

    // Project path ends at the first `-` marker or at a bare issues/merge_requests segment.
    let project_end = parts
        .iter()
        .enumerate()
        .skip(2)
        .find(|(_, p)| **p == "-" || p.starts_with("issue") || p.starts_with("merge_request"))
        .map(|(i, _)| i)
        .unwrap_or(parts.len());
    let project_name = parts[project_end - 1];

    let mut rest: Vec<&str> = parts[project_end..].to_vec();
    if rest.first() == Some(&"-") {
        rest.remove(0);
    }
    let mut remaining = if rest.is_empty() {
        String::new()
    } else {
        format!("/{}", rest.join("/"))
    };
    if remaining.starts_with("/merge_requests/") {
        remaining = remaining.replacen("/merge_requests/", "/pull/", 1);
    }

    let mut converted = if project_name == source.project {
        format!("{}{remaining}", target.web_url())
    } else {
        format!("{}/{}/{project_name}{remaining}", target.base, target.owner)
    };

    if let Some(fragment) = parsed.fragment() {
        if is_line_fragment(fragment) {
            converted.push('#');
            converted.push_str(fragment);
        }
    }
    converted
}

fn is_line_fragment(fragment: &str) -> bool {
    let mut pieces = fragment.splitn(2, '-');
    let is_line = |s: &str| {
        s.strip_prefix('L')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    };
    match (pieces.next(), pieces.next()) {
        (Some(first), None) => is_line(first),
        (Some(first), Some(second)) => is_line(first) && is_line(second),
        _ => false,
    }
}
