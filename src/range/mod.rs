//! Forecast year-range parsing for report descriptions.
//!
//! raw text → [`normalize`] → [`extract`] → [`snippet`]
//!
//! Known limits: the `in`/`by`/`through` rules pair the first occurrence of
//! each keyword anywhere in the text, so unrelated year mentions can be
//! joined, and no rule checks that the end year is after the start year.

pub mod extract;
pub mod normalize;
pub mod snippet;

pub use extract::{extract, Cascade, Extraction, RangeFormat, Rule, YearRange};
pub use normalize::normalize;
pub use snippet::snippet;

/// A match plus the text around it, for exports that carry evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub range: YearRange,
    pub rule: Rule,
    pub context: String,
}

/// Normalize, extract and cut the context snippet in one go.
pub fn scan(raw: &str, cascade: Cascade) -> Option<Finding> {
    let text = normalize(raw);
    let hit = extract(&text, cascade)?;
    Some(Finding {
        context: snippet(&text, hit.offset),
        range: hit.range,
        rule: hit.rule,
    })
}
