use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::apply::references::{self, Validation};
use crate::apply::{self, report, ApplyOptions, Mode};
use crate::config::AppConfig;
use crate::derive;
use crate::extract;
use crate::ledger::{Ledger, LedgerRow, MappingKind};
use crate::providers::{self, SourceTracker};

/// Reconcile comments, milestones and issue links after a GitLab to GitHub migration.
#[derive(Debug, Parser)]
#[command(name = "reconcile", author, version, about, long_about = None)]
pub struct Cli {
    /// More log output; repeat for more detail.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to ~/.tracker-reconcile/config.toml).
    #[arg(long, global = true, env = "RECONCILE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write JSON logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read the source tracker and write a mapping ledger.
    BuildMap(BuildMapArgs),
    /// Apply a mapping ledger to the target tracker.
    Apply(ApplyArgs),
    /// Re-check that the replacement URLs of a references ledger resolve.
    Revalidate(RevalidateArgs),
}

#[derive(Debug, Args)]
pub struct BuildMapArgs {
    #[arg(value_enum)]
    pub kind: MappingKind,

    /// Ledger file to write (defaults to `<kind>-map.csv`).
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Add rows to an existing ledger instead of replacing it.
    #[arg(long)]
    pub append: bool,

    /// Do not check replacement URLs against the target (references only).
    #[arg(long)]
    pub skip_url_validation: bool,
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    #[arg(value_enum)]
    pub kind: MappingKind,

    /// Ledger file to read (defaults to `<kind>-map.csv`).
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Plan every record and report, without changing anything.
    #[arg(long)]
    pub diagnostic: bool,

    /// Write a Markdown report to this file.
    #[arg(long)]
    pub report_file: Option<PathBuf>,

    /// Print only the summary, not one line per record.
    #[arg(long)]
    pub summary_only: bool,

    /// Apply relationships that point into other source projects as comments.
    #[arg(long)]
    pub include_cross_project: bool,

    /// Also apply references whose replacement URL failed validation.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct RevalidateArgs {
    /// References ledger to check (defaults to `references-map.csv`).
    #[arg(long, short)]
    pub input: Option<PathBuf>,
}

fn ledger_path(explicit: &Option<PathBuf>, kind: MappingKind) -> PathBuf {
    explicit
        .clone()
        .unwrap_or_else(|| PathBuf::from(kind.default_file()))
}

fn write_ledger<R: LedgerRow>(path: &Path, rows: &[R], append: bool) -> Result<usize> {
    let ledger = Ledger::new(path);
    if append {
        ledger.append(rows)?;
    } else {
        ledger.save(rows)?;
    }
    Ok(rows.len())
}

pub async fn handle_build_map(args: &BuildMapArgs, config: &AppConfig) -> Result<()> {
    let output = ledger_path(&args.output, args.kind);
    info!(kind = %args.kind, path = %output.display(), "Building ledger");

    let count = match args.kind {
        MappingKind::References => {
            let project = config.source_project()?;
            let settings = config.target_settings()?;
            let target = providers::create_target(&settings, &config.client)?;
            let found = extract::extract_references(target.as_ref(), project.host())
                .await
                .context("Failed to scan the target tracker")?;
            let mut rows = derive::reference_rows(&found, &project, &settings.repo);
            if args.skip_url_validation {
                info!("Skipping replacement URL validation");
            } else {
                let tally =
                    references::validate_urls(target.as_ref(), &settings.repo, &mut rows).await;
                print_validation(&tally);
            }
            write_ledger(&output, &rows, args.append)?
        }
        kind => {
            let settings = config.source_settings()?;
            let source = providers::create_source(&settings, &config.client)?;
            build_from_source(kind, source.as_ref(), config, &output, args.append).await?
        }
    };

    println!("Wrote {count} {} rows to {}", args.kind, output.display());
    Ok(())
}

async fn build_from_source(
    kind: MappingKind,
    source: &dyn SourceTracker,
    config: &AppConfig,
    output: &Path,
    append: bool,
) -> Result<usize> {
    let (project, issues) = tokio::try_join!(source.project(), extract::fetch_issues(source))
        .context("Failed to read the source project")?;
    info!(project = %project.path_with_namespace, issues = issues.len(), "Source project loaded");

    match kind {
        MappingKind::Comments => {
            let comments = extract::extract_comments(source, &issues).await?;
            write_ledger(output, &derive::comment_rows(&comments), append)
        }
        MappingKind::Milestones => {
            let set = extract::extract_milestones(source, &issues)
                .await
                .context("Failed to list source milestones")?;
            write_ledger(output, &derive::milestone_rows(&set), append)
        }
        MappingKind::Relationships => {
            let evidence = extract::extract_evidence(source, &project, &issues).await?;
            let relationships = derive::dedupe(evidence);
            let rows = derive::relationship_rows(
                &relationships,
                source.locator(),
                config.target_repo().as_ref(),
            );
            write_ledger(output, &rows, append)
        }
        MappingKind::References => bail!("references are read from the target tracker"),
    }
}

pub async fn handle_apply(args: &ApplyArgs, config: &AppConfig) -> Result<()> {
    let input = ledger_path(&args.input, args.kind);
    if !input.exists() {
        bail!(
            "Ledger {} not found. Run `reconcile build-map {}` first.",
            input.display(),
            args.kind
        );
    }

    let settings = config.target_settings()?;
    let target = providers::create_target(&settings, &config.client)?;
    let status = target
        .rate_limit()
        .await
        .context("Cannot reach the target tracker")?;
    info!(
        remaining = status.remaining,
        limit = status.limit,
        "Connected to {}",
        settings.repo.full_name()
    );

    let mode = if args.diagnostic {
        Mode::Diagnostic
    } else {
        Mode::Live
    };
    let options = ApplyOptions::new(mode, &config.apply)
        .with_cross_project(args.include_cross_project)
        .with_force(args.force);

    let run = apply::apply(args.kind, target.as_ref(), &input, options)
        .await
        .with_context(|| format!("Failed to apply {}", input.display()))?;

    report::print_report(&run, args.summary_only);
    if let Some(path) = &args.report_file {
        report::write_markdown(&run, path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_validation(tally: &Validation) {
    println!(
        "Checked {} replacement URLs: {} valid, {} invalid",
        tally.checked, tally.valid, tally.invalid
    );
    if tally.invalid > 0 {
        println!(
            "{} rows will be skipped on apply. Use --force to include them.",
            tally.invalid
        );
    }
}

pub async fn handle_revalidate(args: &RevalidateArgs, config: &AppConfig) -> Result<()> {
    let input = ledger_path(&args.input, MappingKind::References);
    if !input.exists() {
        bail!(
            "Ledger {} not found. Run `reconcile build-map references` first.",
            input.display()
        );
    }
    let settings = config.target_settings()?;
    let target = providers::create_target(&settings, &config.client)?;
    let tally = references::revalidate(target.as_ref(), &settings.repo, &Ledger::new(input.clone()))
        .await
        .with_context(|| format!("Failed to revalidate {}", input.display()))?;
    print_validation(&tally);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("reconcile").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn build_map_takes_kind_and_output() {
        let cli = parse(&["build-map", "relationships", "--output", "rels.csv"]);
        match cli.command {
            Commands::BuildMap(args) => {
                assert_eq!(args.kind, MappingKind::Relationships);
                assert_eq!(args.output, Some(PathBuf::from("rels.csv")));
                assert!(!args.append);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn apply_flags_parse() {
        let cli = parse(&[
            "-vv",
            "apply",
            "comments",
            "--diagnostic",
            "--summary-only",
            "--report-file",
            "report.md",
            "--include-cross-project",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Apply(args) => {
                assert_eq!(args.kind, MappingKind::Comments);
                assert!(args.diagnostic);
                assert!(args.summary_only);
                assert!(args.include_cross_project);
                assert_eq!(args.report_file, Some(PathBuf::from("report.md")));
                assert_eq!(args.input, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn url_validation_flags_parse() {
        let cli = parse(&["build-map", "references", "--skip-url-validation"]);
        match cli.command {
            Commands::BuildMap(args) => assert!(args.skip_url_validation),
            other => panic!("unexpected command: {other:?}"),
        }
        let cli = parse(&["apply", "references", "--force"]);
        match cli.command {
            Commands::Apply(args) => assert!(args.force),
            other => panic!("unexpected command: {other:?}"),
        }
        let cli = parse(&["revalidate", "-i", "refs.csv"]);
        match cli.command {
            Commands::Revalidate(args) => assert_eq!(args.input, Some(PathBuf::from("refs.csv"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn revalidate_requires_an_existing_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let args = RevalidateArgs {
            input: Some(dir.path().join("missing.csv")),
        };
        let err = handle_revalidate(&args, &AppConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("build-map references"));
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = parse(&["apply", "milestones", "-q", "--log-file", "run.json"]);
        assert!(cli.quiet);
        assert_eq!(cli.log_file, Some(PathBuf::from("run.json")));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["reconcile", "build-map", "labels"]).is_err());
    }

    #[test]
    fn default_ledger_names_follow_kind() {
        assert_eq!(
            ledger_path(&None, MappingKind::Milestones),
            PathBuf::from("milestones-map.csv")
        );
        assert_eq!(
            ledger_path(&Some(PathBuf::from("x.csv")), MappingKind::Milestones),
            PathBuf::from("x.csv")
        );
    }

    #[tokio::test]
    async fn apply_requires_an_existing_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let args = ApplyArgs {
            kind: MappingKind::Comments,
            input: Some(dir.path().join("missing.csv")),
            diagnostic: true,
            report_file: None,
            summary_only: false,
            include_cross_project: false,
            force: false,
        };
        let err = handle_apply(&args, &AppConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("build-map comments"));
    }

    #[tokio::test]
    async fn build_map_reports_missing_configuration() {
        let args = BuildMapArgs {
            kind: MappingKind::Comments,
            output: None,
            append: false,
            skip_url_validation: false,
        };
        let err = handle_build_map(&args, &AppConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("GITLAB_API_ENDPOINT"));
    }
}
