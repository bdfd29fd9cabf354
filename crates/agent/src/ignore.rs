use glob::{MatchOptions, Pattern, PatternError};

/// Operator-configured filename masks. A submitted file whose base name
/// matches any mask is marked Ignored instead of being uploaded. Matching
/// is case-insensitive on both sides, so a `*.tmp` mask covers `a.TMP`.
pub struct IgnoreList {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl IgnoreList {
    pub fn new(masks: &[String]) -> Result<Self, PatternError> {
        let patterns = masks
            .iter()
            .map(|mask| Pattern::new(mask))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IgnoreList { patterns })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(file_name, MATCH_OPTIONS))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
