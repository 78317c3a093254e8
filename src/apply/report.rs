use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Local};
use tracing::info;

use super::{Mode, RunReport};
use crate::error::ReconcileResult;
use crate::model::record::RecordStatus;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct CategoryCounts {
    total: usize,
    applied: usize,
    skipped: usize,
    failed: usize,
}

fn breakdown(report: &RunReport) -> BTreeMap<&str, CategoryCounts> {
    let mut counts: BTreeMap<&str, CategoryCounts> = BTreeMap::new();
    for outcome in &report.outcomes {
        let entry = counts.entry(outcome.category.as_str()).or_default();
        entry.total += 1;
        match outcome.status {
            RecordStatus::Applied => entry.applied += 1,
            RecordStatus::Failed => entry.failed += 1,
            _ => entry.skipped += 1,
        }
    }
    counts
}

/// Per-record lines followed by the summary, on stdout.
pub fn print_report(report: &RunReport, summary_only: bool) {
    if report.mode == Mode::Diagnostic {
        println!("{}", "=".repeat(72));
        println!("{:^72}", "DIAGNOSTIC MODE - NO CHANGES WILL BE MADE");
        println!("{}", "=".repeat(72));
    }

    if !summary_only {
        println!();
        println!("{:<12} {:<40} {}", "Outcome", "Record", "Detail");
        println!("{}", "-".repeat(72));
        for outcome in &report.outcomes {
            let tag = match report.mode {
                Mode::Live => outcome.status.to_string(),
                Mode::Diagnostic => outcome.disposition().to_string(),
            };
            println!("{:<12} {:<40} {}", tag, outcome.label, outcome.detail);
        }
    }

    println!();
    println!("Summary ({} {}, {}):", report.kind, report.mode, report.target);
    println!("{}", report.summary);
}

pub fn render_markdown(report: &RunReport, generated_at: DateTime<Local>) -> String {
    let s = &report.summary;
    let diagnostic = report.mode == Mode::Diagnostic;
    let mut out = String::new();

    let _ = writeln!(out, "# Reconciliation report: {}\n", report.kind);
    let _ = writeln!(out, "Generated {}\n", generated_at.format("%Y-%m-%d %H:%M:%S"));

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "- Ledger: `{}`", report.ledger);
    let _ = writeln!(out, "- Target repository: {}", report.target);
    let _ = writeln!(out, "- Mode: {}", report.mode);
    let _ = writeln!(out, "- Total records: {}", s.total);
    if diagnostic {
        let _ = writeln!(out, "- Would apply: {}", s.applied);
        let _ = writeln!(out, "- Would skip: {}", s.skipped);
        let _ = writeln!(out, "- Potential errors: {}", s.failed);
    } else {
        let _ = writeln!(out, "- Applied: {}", s.applied);
        let _ = writeln!(out, "- Skipped: {}", s.skipped);
        let _ = writeln!(out, "- Failed: {}", s.failed);
        let _ = writeln!(out, "- Mutations: {}", s.mutations);
    }
    let _ = writeln!(out, "- Not found on target: {}\n", s.not_found);

    let _ = writeln!(out, "## Breakdown\n");
    let _ = writeln!(out, "| Type | Total | Apply | Skip | Error |");
    let _ = writeln!(out, "|------|------:|------:|-----:|------:|");
    for (category, c) in breakdown(report) {
        let _ = writeln!(
            out,
            "| {category} | {} | {} | {} | {} |",
            c.total, c.applied, c.skipped, c.failed
        );
    }

    let problems: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.status, RecordStatus::Failed | RecordStatus::NotFound))
        .collect();
    if !problems.is_empty() {
        let _ = writeln!(out, "\n## Records needing attention\n");
        for o in problems {
            let _ = writeln!(out, "- {}: {}", o.label, o.detail);
        }
    }

    let _ = writeln!(out, "\n## Next steps\n");
    if diagnostic {
        let _ = writeln!(out, "1. Review this report and adjust the ledger where needed.");
        let _ = writeln!(out, "2. Run with `--diagnostic` again to verify the changes.");
        let _ = writeln!(out, "3. Run without `--diagnostic` to apply.");
    } else {
        let _ = writeln!(out, "1. Inspect failed rows in the ledger; their notes hold the error.");
        let _ = writeln!(out, "2. Re-run the same command; applied rows are not repeated.");
    }
    if s.not_found > 0 {
        let _ = writeln!(
            out,
            "\nSome source entities have no counterpart on the target. Check that the issue migration completed."
        );
    }
    out
}

pub fn write_markdown(report: &RunReport, path: &Path) -> ReconcileResult<()> {
    std::fs::write(path, render_markdown(report, Local::now()))?;
    info!(path = %path.display(), "Wrote report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::RecordOutcome;
    use crate::ledger::MappingKind;
    use crate::model::record::Summary;

    fn outcome(category: &str, status: RecordStatus) -> RecordOutcome {
        let detail = match status {
            RecordStatus::NotFound => "not found: issue #12 on target".into(),
            _ => String::new(),
        };
        RecordOutcome {
            label: format!("#7 {category} #12"),
            category: category.into(),
            status,
            detail,
        }
    }

    fn report(mode: Mode) -> RunReport {
        let outcomes = vec![
            outcome("blocks", RecordStatus::Applied),
            outcome("blocks", RecordStatus::NotFound),
            outcome("relates_to", RecordStatus::Failed),
        ];
        let mut summary = Summary::default();
        for o in &outcomes {
            summary.record(o.status);
        }
        RunReport {
            kind: MappingKind::Relationships,
            mode,
            ledger: "relationships-map.csv".into(),
            target: "acme/widgets".into(),
            summary,
            outcomes,
        }
    }

    #[test]
    fn markdown_has_counts_breakdown_and_next_steps() {
        let text = render_markdown(&report(Mode::Diagnostic), Local::now());
        assert!(text.starts_with("# Reconciliation report: relationships\n"));
        assert!(text.contains("- Would apply: 1\n"));
        assert!(text.contains("- Not found on target: 1\n"));
        assert!(text.contains("| blocks | 2 | 1 | 1 | 0 |"));
        assert!(text.contains("| relates_to | 1 | 0 | 0 | 1 |"));
        assert!(text.contains("- #7 blocks #12: not found: issue #12 on target"));
        assert!(text.contains("Run with `--diagnostic` again"));
    }

    #[test]
    fn live_report_lists_mutations() {
        let text = render_markdown(&report(Mode::Live), Local::now());
        assert!(text.contains("- Applied: 1\n"));
        assert!(text.contains("- Mutations: 0\n"));
        assert!(!text.contains("Would apply"));
    }

    #[test]
    fn report_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        write_markdown(&report(Mode::Live), &path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("## Breakdown"));
    }
}
