use std::fmt;

use crate::model::entity::{TargetIssue, TargetMilestone};

/// What is known about a source entity when looking for its target twin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceKey {
    pub title: Option<String>,
    pub number: Option<u64>,
}

impl SourceKey {
    pub fn title(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            number: None,
        }
    }

    pub fn number(number: u64) -> Self {
        Self {
            title: None,
            number: Some(number),
        }
    }

    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    ExactTitle,
    CaseInsensitiveTitle,
    Number,
}

impl MatchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::ExactTitle => "exact title",
            MatchRule::CaseInsensitiveTitle => "case-insensitive title",
            MatchRule::Number => "number",
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Matched { number: u64, rule: MatchRule },
    NotFound,
}

impl MatchResult {
    pub fn number(&self) -> Option<u64> {
        match self {
            MatchResult::Matched { number, .. } => Some(*number),
            MatchResult::NotFound => None,
        }
    }
}

/// A target entity that can be matched by title or number.
pub trait Matchable {
    fn match_number(&self) -> u64;
    fn match_title(&self) -> &str;
}

impl Matchable for TargetIssue {
    fn match_number(&self) -> u64 {
        self.number
    }

    fn match_title(&self) -> &str {
        &self.title
    }
}

impl Matchable for TargetMilestone {
    fn match_number(&self) -> u64 {
        self.number
    }

    fn match_title(&self) -> &str {
        &self.title
    }
}

/// Resolve a source key against the target listing. Rules are tried in order
/// and, within a rule, the first target in listing order wins.
pub fn match_target<T: Matchable>(key: &SourceKey, targets: &[T]) -> MatchResult {
    if let Some(title) = key.title.as_deref() {
        if let Some(found) = targets.iter().find(|t| t.match_title() == title) {
            return MatchResult::Matched {
                number: found.match_number(),
                rule: MatchRule::ExactTitle,
            };
        }

        let wanted = title.trim().to_lowercase();
        if let Some(found) = targets
            .iter()
            .find(|t| t.match_title().trim().to_lowercase() == wanted)
        {
            return MatchResult::Matched {
                number: found.match_number(),
                rule: MatchRule::CaseInsensitiveTitle,
            };
        }
    }

    match key.number {
        Some(number) if targets.iter().any(|t| t.match_number() == number) => MatchResult::Matched {
            number,
            rule: MatchRule::Number,
        },
        _ => MatchResult::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(number: u64, title: &str) -> TargetIssue {
        TargetIssue {
            id: number,
            number,
            title: title.to_string(),
            body: None,
            state: "open".into(),
            is_pull_request: false,
            milestone: None,
        }
    }

    #[test]
    fn exact_beats_case_insensitive_regardless_of_order() {
        let key = SourceKey::title("Fix login bug");
        let forward = vec![issue(1, "FIX LOGIN BUG"), issue(2, "Fix login bug")];
        let reverse = vec![issue(2, "Fix login bug"), issue(1, "FIX LOGIN BUG")];

        let expected = MatchResult::Matched {
            number: 2,
            rule: MatchRule::ExactTitle,
        };
        assert_eq!(match_target(&key, &forward), expected);
        assert_eq!(match_target(&key, &reverse), expected);
    }

    #[test]
    fn case_insensitive_match_trims_whitespace() {
        let key = SourceKey::title("  Fix Login Bug ");
        let targets = vec![issue(4, "fix login bug")];
        assert_eq!(
            match_target(&key, &targets),
            MatchResult::Matched {
                number: 4,
                rule: MatchRule::CaseInsensitiveTitle
            }
        );
    }

    #[test]
    fn ties_break_by_listing_order() {
        let key = SourceKey::title("duplicate");
        let targets = vec![issue(9, "Duplicate"), issue(3, "DUPLICATE")];
        assert_eq!(match_target(&key, &targets).number(), Some(9));
    }

    #[test]
    fn falls_back_to_number() {
        let targets = vec![issue(7, "Renamed after import")];
        let key = SourceKey::title("Original title").with_number(7);
        assert_eq!(
            match_target(&key, &targets),
            MatchResult::Matched {
                number: 7,
                rule: MatchRule::Number
            }
        );
        assert_eq!(match_target(&SourceKey::number(8), &targets), MatchResult::NotFound);
        assert_eq!(match_target(&SourceKey::title("nope"), &targets), MatchResult::NotFound);
    }

    #[test]
    fn number_only_keys_skip_title_rules() {
        let targets = vec![issue(5, "5"), issue(6, "Six")];
        assert_eq!(
            match_target(&SourceKey::number(6), &targets),
            MatchResult::Matched {
                number: 6,
                rule: MatchRule::Number
            }
        );
    }
}
