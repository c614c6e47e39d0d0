use regex::{Match, Regex};
use std::fmt;
use std::sync::LazyLock;

// Year tokens are four ASCII digits with no word boundary, so "20301" still
// yields "2030" and "within 2020" satisfies the `in <year>` search.
static BETWEEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)between\s+([0-9]{4})\s+and\s+([0-9]{4})").unwrap());

static YEAR_TO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]{4})\s+to\s+([0-9]{4})").unwrap());

static YEAR_HYPHEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{4})-([0-9]{4})").unwrap());

static IN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)in\s+([0-9]{4})").unwrap());

static BY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)by\s+([0-9]{4})").unwrap());

static THROUGH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)through\s+([0-9]{4})").unwrap());

/// How a range is rendered for its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFormat {
    /// `2025 to 2035` / `to 2035`, used in CSV exports.
    Human,
    /// `2025-2035` / `-2035`, stored in `report_market_metrics.forecast_year`.
    Compact,
}

/// Which rule list to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    /// between / to / hyphen / in..by / by-only, in that order.
    Forecast,
    /// in..through, for rows the forecast cascade left unmatched.
    Through,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rule {
    Between,
    YearTo,
    YearHyphen,
    InBy,
    ByOnly,
    InThrough,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Between => "between",
            Rule::YearTo => "year_to",
            Rule::YearHyphen => "year_hyphen",
            Rule::InBy => "in_by",
            Rule::ByOnly => "by_only",
            Rule::InThrough => "in_through",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forecast horizon. `start` is absent only for the by-only fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearRange {
    pub start: Option<String>,
    pub end: String,
}

impl YearRange {
    fn new(start: &str, end: &str) -> Self {
        YearRange {
            start: Some(start.to_string()),
            end: end.to_string(),
        }
    }

    fn open(end: &str) -> Self {
        YearRange {
            start: None,
            end: end.to_string(),
        }
    }

    pub fn render(&self, format: RangeFormat) -> String {
        match (format, &self.start) {
            (RangeFormat::Human, Some(start)) => format!("{} to {}", start, self.end),
            (RangeFormat::Human, None) => format!("to {}", self.end),
            (RangeFormat::Compact, Some(start)) => format!("{}-{}", start, self.end),
            (RangeFormat::Compact, None) => format!("-{}", self.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub range: YearRange,
    pub rule: Rule,
    /// Char offset into the normalized text where the leading token starts.
    pub offset: usize,
}

type Matcher = fn(&str) -> Option<Extraction>;

const FORECAST_RULES: &[Matcher] = &[between, year_to, year_hyphen, in_by, by_only];
const THROUGH_RULES: &[Matcher] = &[in_through];

/// Run a cascade over already-normalized text; the first rule that fires wins.
pub fn extract(text: &str, cascade: Cascade) -> Option<Extraction> {
    let rules = match cascade {
        Cascade::Forecast => FORECAST_RULES,
        Cascade::Through => THROUGH_RULES,
    };
    rules.iter().find_map(|rule| rule(text))
}

fn char_offset(text: &str, m: &Match<'_>) -> usize {
    text[..m.start()].chars().count()
}

fn two_year_rule(text: &str, re: &Regex, rule: Rule) -> Option<Extraction> {
    let caps = re.captures(text)?;
    let whole = caps.get(0)?;
    Some(Extraction {
        range: YearRange::new(caps.get(1)?.as_str(), caps.get(2)?.as_str()),
        rule,
        offset: char_offset(text, &whole),
    })
}

fn between(text: &str) -> Option<Extraction> {
    two_year_rule(text, &BETWEEN_RE, Rule::Between)
}

fn year_to(text: &str) -> Option<Extraction> {
    two_year_rule(text, &YEAR_TO_RE, Rule::YearTo)
}

fn year_hyphen(text: &str) -> Option<Extraction> {
    two_year_rule(text, &YEAR_HYPHEN_RE, Rule::YearHyphen)
}

/// First match of `re` anywhere in the text: (whole match, year).
fn first_year<'t>(text: &'t str, re: &Regex) -> Option<(Match<'t>, &'t str)> {
    let caps = re.captures(text)?;
    Some((caps.get(0)?, caps.get(1)?.as_str()))
}

// The two keyword searches are independent; no proximity or ordering is
// required between them.
fn paired(text: &str, closing: &Regex, rule: Rule) -> Option<Extraction> {
    let (in_match, start) = first_year(text, &IN_RE)?;
    let (_, end) = first_year(text, closing)?;
    Some(Extraction {
        range: YearRange::new(start, end),
        rule,
        offset: char_offset(text, &in_match),
    })
}

fn in_by(text: &str) -> Option<Extraction> {
    paired(text, &BY_RE, Rule::InBy)
}

fn by_only(text: &str) -> Option<Extraction> {
    if IN_RE.is_match(text) {
        return None;
    }
    let (by_match, end) = first_year(text, &BY_RE)?;
    Some(Extraction {
        range: YearRange::open(end),
        rule: Rule::ByOnly,
        offset: char_offset(text, &by_match),
    })
}

fn in_through(text: &str) -> Option<Extraction> {
    paired(text, &THROUGH_RE, Rule::InThrough)
}
