// Treatment-date resolution from free text
//
// Two policies coexist and callers pick one explicitly:
// - FirstDateAfter: first match in pattern order, then text order
// - EarliestDateAfter: chronologically smallest match across all patterns

use chrono::{Datelike, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Cutoff used by the pipeline's first-match policy.
pub const FIRST_DATE_CUTOFF_YEAR: i32 = 2015;
/// Cutoff used by the earliest-match policy.
pub const EARLIEST_DATE_CUTOFF_YEAR: i32 = 2005;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static WORD_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2}),?\s+(\d{4})\b",
    )
    .unwrap()
});

// Order matters for the first-match policy.
static NUMERIC_DATES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
        r"\b\d{4}-\d{1,2}-\d{1,2}\b",
        r"\b\d{1,2}-\d{1,2}-\d{2,4}\b",
        r"\b\d{1,2}\.\d{1,2}\.\d{2,4}\b",
        r"\b\d{2}/\d{2}/\d{4}\b",
        r"\b\d{2}\.\d{2}\.\d{4}\b",
        r"\b\d{2}/\d{2}/\d{2}\b",
        r"\b\d{1,2}/\d{2}/\d{4}\b",
        r"\b\d{2}/\d{1,2}/\d{4}\b",
        r"\b\d{1,2}/\d{1,2}/\d{4}\b",
        r"\b\d{1,2}/\d{1,2}/\d{2}\b",
        r"\b\d{2}\s*[/-]\s*\d{2}\s*[/-]\s*\d{4}\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePolicy {
    /// First valid date in scan order with `year >= cutoff`.
    FirstDateAfter(i32),
    /// Earliest valid date anywhere in the text with `year >= cutoff`.
    EarliestDateAfter(i32),
}

#[derive(Debug, Clone)]
pub struct DateResolver {
    policy: DatePolicy,
    reference_year: i32,
}

impl DateResolver {
    pub fn new(policy: DatePolicy) -> Self {
        Self {
            policy,
            reference_year: Local::now().year(),
        }
    }

    pub fn first_date_after(cutoff_year: i32) -> Self {
        Self::new(DatePolicy::FirstDateAfter(cutoff_year))
    }

    pub fn earliest_date_after(cutoff_year: i32) -> Self {
        Self::new(DatePolicy::EarliestDateAfter(cutoff_year))
    }

    /// Year that anchors the two-digit-year window (defaults to this year).
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = year;
        self
    }

    pub fn policy(&self) -> DatePolicy {
        self.policy
    }

    /// Resolve a date as `YYYY-MM-DD`.
    pub fn resolve(&self, text: &str) -> Option<String> {
        self.resolve_date(text)
            .map(|date| date.format("%Y-%m-%d").to_string())
    }

    pub fn resolve_date(&self, text: &str) -> Option<NaiveDate> {
        if text.trim().is_empty() {
            tracing::debug!("Empty text provided");
            return None;
        }

        let found = match self.policy {
            DatePolicy::FirstDateAfter(cutoff) => self.first_valid(text, cutoff),
            DatePolicy::EarliestDateAfter(cutoff) => self.earliest_valid(text, cutoff),
        };

        match found {
            Some(date) => tracing::info!(%date, policy = ?self.policy, "Found valid date in text"),
            None => tracing::info!(policy = ?self.policy, "No valid date found in text"),
        }
        found
    }

    /// Read a single date value, such as one returned by the model, with the
    /// same day-first rules as text resolution. No cutoff applies.
    pub fn normalize(&self, value: &str) -> Option<NaiveDate> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Some(date) = WORD_DATE.captures(value).and_then(|caps| parse_word_date(&caps)) {
            return Some(date);
        }
        NUMERIC_DATES.iter().find_map(|pattern| {
            pattern
                .find(value)
                .and_then(|m| self.parse_numeric(m.as_str()))
        })
    }

    fn first_valid(&self, text: &str, cutoff: i32) -> Option<NaiveDate> {
        let word_date = WORD_DATE
            .captures_iter(text)
            .filter_map(|caps| parse_word_date(&caps))
            .find(|date| date.year() >= cutoff);
        if word_date.is_some() {
            return word_date;
        }

        NUMERIC_DATES.iter().find_map(|pattern| {
            pattern
                .find_iter(text)
                .filter_map(|m| self.parse_numeric(m.as_str()))
                .find(|date| date.year() >= cutoff)
        })
    }

    fn earliest_valid(&self, text: &str, cutoff: i32) -> Option<NaiveDate> {
        let word_dates = WORD_DATE
            .captures_iter(text)
            .filter_map(|caps| parse_word_date(&caps));
        let numeric_dates = NUMERIC_DATES.iter().flat_map(|pattern| {
            pattern
                .find_iter(text)
                .filter_map(|m| self.parse_numeric(m.as_str()))
        });

        word_dates
            .chain(numeric_dates)
            .filter(|date| date.year() >= cutoff)
            .min()
    }

    /// Parse one numeric candidate with day-first precedence.
    fn parse_numeric(&self, candidate: &str) -> Option<NaiveDate> {
        let compact: String = candidate.chars().filter(|c| !c.is_whitespace()).collect();
        let parts: Vec<&str> = compact.split(['/', '-', '.']).collect();
        let [first, second, third] = parts.as_slice() else {
            return None;
        };

        let parsed = if first.len() == 4 {
            // Year-first is unambiguous.
            let year: i32 = first.parse().ok()?;
            NaiveDate::from_ymd_opt(year, second.parse().ok()?, third.parse().ok()?)
        } else {
            let a: u32 = first.parse().ok()?;
            let b: u32 = second.parse().ok()?;
            let year = self.expand_year(third)?;
            // Day first unless the middle value cannot be a month.
            let (day, month) = if b <= 12 { (a, b) } else { (b, a) };
            NaiveDate::from_ymd_opt(year, month, day)
        };

        if parsed.is_none() {
            tracing::debug!(candidate, "Failed to parse date candidate");
        }
        parsed
    }

    /// Two-digit years land within 50 years of the reference year.
    fn expand_year(&self, digits: &str) -> Option<i32> {
        let value: i32 = digits.parse().ok()?;
        if digits.len() > 2 {
            return Some(value);
        }
        let century = self.reference_year / 100 * 100;
        let mut year = century + value;
        if year >= self.reference_year + 50 {
            year -= 100;
        } else if year < self.reference_year - 50 {
            year += 100;
        }
        Some(year)
    }
}

fn parse_word_date(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let month = MONTHS.iter().position(|m| *m == &caps[1])? as u32 + 1;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day);
    if date.is_none() {
        tracing::debug!(candidate = &caps[0], "Failed to parse word-based date");
    }
    date
}
