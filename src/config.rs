use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReconcileError, ReconcileResult};
use crate::util::urls::{SourceProject, TargetRepo};

pub const DEFAULT_TARGET_API: &str = "https://api.github.com";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SourceConfig {
    pub api_endpoint: Option<String>,
    pub token: Option<String>,
    pub repo_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TargetConfig {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub repo_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub page_size: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub min_rate_limit_wait_secs: u64,
    pub rate_limit_margin_secs: u64,
    pub wait_on_exhaustion: bool,
    pub page_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            timeout_secs: 30,
            max_attempts: 3,
            backoff_ms: 500,
            min_rate_limit_wait_secs: 60,
            rate_limit_margin_secs: 1,
            wait_on_exhaustion: true,
            page_delay_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApplyConfig {
    pub mutation_delay_ms: u64,
    pub checkpoint_every: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            mutation_delay_ms: 1000,
            checkpoint_every: 25,
        }
    }
}

impl ApplyConfig {
    pub fn mutation_delay(&self) -> Duration {
        Duration::from_millis(self.mutation_delay_ms)
    }
}

/// Validated connection settings for the source tracker.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub api_endpoint: String,
    pub token: String,
    pub project: SourceProject,
}

/// Validated connection settings for the target tracker.
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub api_url: String,
    pub token: String,
    pub repo: TargetRepo,
}

impl AppConfig {
    pub fn source_settings(&self) -> ReconcileResult<SourceSettings> {
        let mut missing = Vec::new();
        let api_endpoint = require(&self.source.api_endpoint, "GITLAB_API_ENDPOINT", &mut missing);
        let token = require(&self.source.token, "GITLAB_API_PRIVATE_TOKEN", &mut missing);
        let repo_url = require(&self.source.repo_url, "GITLAB_REPO_URL", &mut missing);
        if !missing.is_empty() {
            return Err(missing_settings(&missing));
        }
        Ok(SourceSettings {
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            token,
            project: SourceProject::parse(&repo_url)?,
        })
    }

    pub fn target_settings(&self) -> ReconcileResult<TargetSettings> {
        let mut missing = Vec::new();
        let token = require(&self.target.token, "GITHUB_TOKEN", &mut missing);
        let repo_url = require(&self.target.repo_url, "GITHUB_REPO_URL", &mut missing);
        if !missing.is_empty() {
            return Err(missing_settings(&missing));
        }
        let api_url = self
            .target
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_TARGET_API.to_string());
        Ok(TargetSettings {
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            repo: TargetRepo::parse(&repo_url)?,
        })
    }

    /// The source project locator alone, for work that never calls the source API.
    pub fn source_project(&self) -> ReconcileResult<SourceProject> {
        let mut missing = Vec::new();
        let repo_url = require(&self.source.repo_url, "GITLAB_REPO_URL", &mut missing);
        if !missing.is_empty() {
            return Err(missing_settings(&missing));
        }
        SourceProject::parse(&repo_url)
    }

    /// The target repository, when configured. Build-map uses it only to
    /// pre-compute target URLs, so its absence is not an error there.
    pub fn target_repo(&self) -> Option<TargetRepo> {
        self.target
            .repo_url
            .as_deref()
            .and_then(|url| TargetRepo::parse(url).ok())
    }

    /// Overlay environment variables on top of the file configuration.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let pick = |key: &str, slot: &mut Option<String>| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = Some(value);
            }
        };
        pick("GITLAB_API_ENDPOINT", &mut self.source.api_endpoint);
        pick("GITLAB_API_PRIVATE_TOKEN", &mut self.source.token);
        pick("GITLAB_REPO_URL", &mut self.source.repo_url);
        pick("GITHUB_API_URL", &mut self.target.api_url);
        pick("GITHUB_TOKEN", &mut self.target.token);
        pick("GITHUB_REPO_URL", &mut self.target.repo_url);
    }
}

fn require(value: &Option<String>, env_name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            missing.push(env_name);
            String::new()
        }
    }
}

fn missing_settings(missing: &[&str]) -> ReconcileError {
    ReconcileError::Configuration(format!(
        "missing required settings: {}",
        missing.join(", ")
    ))
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tracker-reconcile")
}

fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Load the configuration file (explicit path or the default location) and
/// overlay the process environment.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut config = match explicit {
        Some(path) => read_config(path)?,
        None => {
            let path = config_path();
            if path.exists() {
                read_config(&path)?
            } else {
                AppConfig::default()
            }
        }
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_full_file() {
        let config: AppConfig = toml::from_str(
            r#"
            [source]
            api_endpoint = "https://gitlab.example.com/api/v4/"
            token = "glpat-123"
            repo_url = "https://gitlab.example.com/platform/widgets"

            [target]
            token = "ghp-456"
            repo_url = "https://github.com/acme/widgets"

            [client]
            page_size = 50

            [apply]
            mutation_delay_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.client.page_size, 50);
        assert_eq!(config.client.max_attempts, 3);
        assert_eq!(config.apply.mutation_delay_ms, 0);
        assert_eq!(config.apply.checkpoint_every, 25);

        let source = config.source_settings().unwrap();
        assert_eq!(source.api_endpoint, "https://gitlab.example.com/api/v4");
        assert_eq!(source.project.project, "widgets");

        let target = config.target_settings().unwrap();
        assert_eq!(target.api_url, DEFAULT_TARGET_API);
        assert_eq!(target.repo.full_name(), "acme/widgets");
    }

    #[test]
    fn missing_settings_are_configuration_errors() {
        let config = AppConfig::default();
        let err = config.source_settings().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ReconcileError::Configuration(_)));
        assert!(message.contains("GITLAB_API_ENDPOINT"));
        assert!(message.contains("GITLAB_API_PRIVATE_TOKEN"));
        assert!(message.contains("GITLAB_REPO_URL"));

        let err = config.target_settings().unwrap_err();
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[test]
    fn source_project_needs_only_the_repo_url() {
        let mut config = AppConfig::default();
        assert!(config.source_project().is_err());

        config.source.repo_url = Some("https://gitlab.example.com/platform/widgets".into());
        assert_eq!(config.source_project().unwrap().path(), "platform/widgets");
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config: AppConfig = toml::from_str(
            r#"
            [target]
            token = "from-file"
            repo_url = "https://github.com/acme/widgets"
            "#,
        )
        .unwrap();
        let vars = env(&[("GITHUB_TOKEN", "from-env"), ("GITHUB_REPO_URL", "  ")]);
        config.apply_env(|key| vars.get(key).cloned());

        assert_eq!(config.target.token.as_deref(), Some("from-env"));
        assert_eq!(
            config.target.repo_url.as_deref(),
            Some("https://github.com/acme/widgets")
        );
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(result.is_err());
    }
}
