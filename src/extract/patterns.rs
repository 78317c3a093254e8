use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::model::relation::RelationKind;

/// A phrase that, when followed by an issue number, implies a relationship.
pub struct RelationPattern {
    pub kind: RelationKind,
    pub pattern: &'static str,
}

/// Relationship phrases recognised in descriptions and comments. Each pattern
/// captures the referenced issue number in group 1.
pub const RELATION_PATTERNS: &[RelationPattern] = &[
    RelationPattern {
        kind: RelationKind::RelatesTo,
        pattern: r"(?i)\brelates?\s+to\s+(?:issue\s+)?#?(\d+)",
    },
    RelationPattern {
        kind: RelationKind::Blocks,
        pattern: r"(?i)\bblocks\s+(?:issue\s+)?#?(\d+)",
    },
    RelationPattern {
        kind: RelationKind::IsBlockedBy,
        pattern: r"(?i)\b(?:is\s+)?blocked\s+by\s+(?:issue\s+)?#?(\d+)",
    },
    RelationPattern {
        kind: RelationKind::Duplicates,
        pattern: r"(?i)\bduplicates?\s+(?:issue\s+)?#?(\d+)",
    },
    RelationPattern {
        kind: RelationKind::IsDuplicatedBy,
        pattern: r"(?i)\b(?:is\s+)?duplicated\s+by\s+(?:issue\s+)?#?(\d+)",
    },
    RelationPattern {
        kind: RelationKind::DependsOn,
        pattern: r"(?i)\bdepends\s+on\s+(?:issue\s+)?#?(\d+)",
    },
    RelationPattern {
        kind: RelationKind::IsDependencyFor,
        pattern: r"(?i)\b(?:is\s+)?dependency\s+(?:of|for)\s+(?:issue\s+)?#?(\d+)",
    },
];

static COMPILED: OnceLock<Vec<(RelationKind, Regex)>> = OnceLock::new();

fn compiled() -> &'static [(RelationKind, Regex)] {
    COMPILED.get_or_init(|| {
        RELATION_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p.pattern) {
                Ok(re) => Some((p.kind, re)),
                Err(e) => {
                    warn!(kind = %p.kind, error = %e, "Skipping invalid relation pattern");
                    None
                }
            })
            .collect()
    })
}

/// Every `(kind, issue number)` mentioned in `text`, in table order and then
/// position order.
pub fn scan_relations(text: &str) -> Vec<(RelationKind, u64)> {
    let mut found = Vec::new();
    for (kind, re) in compiled() {
        for caps in re.captures_iter(text) {
            if let Some(number) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                found.push((*kind, number));
            }
        }
    }
    found
}

/// Full URLs pointing at `host`, with trailing punctuation trimmed.
pub fn find_source_urls(text: &str, host: &str) -> Vec<String> {
    let pattern = format!(r#"(?i)https?://{}[^\s)\]>"'<]*"#, regex::escape(host));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
        .collect()
}

/// Short `name#N` references to the repository, returned as the exact text
/// found and the issue number.
pub fn find_repo_refs(text: &str, repo_name: &str) -> Vec<(String, u64)> {
    let pattern = format!(r"(?i)(?:^|[^/\w])({}#(\d+))", regex::escape(repo_name));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(1)?;
            let followed_by_word = text[whole.end()..]
                .chars()
                .next()
                .is_some_and(|c| c == '/' || c.is_alphanumeric() || c == '_');
            if followed_by_word {
                return None;
            }
            let number = caps.get(2)?.as_str().parse().ok()?;
            Some((whole.as_str().to_string(), number))
        })
        .collect()
}
