//! Heading detection for chunk titles.
//!
//! Matchers run in a fixed priority order and the first one that recognizes
//! a unit wins:
//!
//! 1. `markdown`: `#` to `######` followed by whitespace and text
//! 2. `numbered`: a section number (`3`, `2.1`, `4.`) followed by a
//!    capitalized word
//! 3. `all-caps`: a single short line written entirely in capitals
//!
//! The first two look only at the first line of a unit. Extracted text of
//! [`MAX_HEADING_CHARS`] characters or more is not treated as a heading.

use regex::Regex;

use crate::error::Result;

/// Headings at or above this many characters are ignored.
pub const MAX_HEADING_CHARS: usize = 100;

/// All-caps headings must be shorter than this.
const MAX_ALL_CAPS_CHARS: usize = 30;

/// Result of testing one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadingMatch {
    Heading { text: String },
    NotHeading,
}

impl HeadingMatch {
    pub fn is_heading(&self) -> bool {
        matches!(self, HeadingMatch::Heading { .. })
    }

    fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() || text.chars().count() >= MAX_HEADING_CHARS {
            HeadingMatch::NotHeading
        } else {
            HeadingMatch::Heading {
                text: text.to_string(),
            }
        }
    }
}

#[derive(Debug)]
enum Rule {
    /// First line matched against a pattern with a `text` capture group.
    FirstLine(Regex),
    /// Whole unit is one short line with no lowercase letters.
    AllCaps,
}

/// One named heading rule.
#[derive(Debug)]
pub struct HeadingMatcher {
    name: &'static str,
    rule: Rule,
}

impl HeadingMatcher {
    pub fn markdown() -> Result<Self> {
        Ok(Self {
            name: "markdown",
            rule: Rule::FirstLine(Regex::new(r"^#{1,6}\s+(?P<text>.+)$")?),
        })
    }

    pub fn numbered() -> Result<Self> {
        Ok(Self {
            name: "numbered",
            rule: Rule::FirstLine(Regex::new(
                r"^\d+(?:\.\d+)*\.?\s+(?P<text>\p{Lu}.*)$",
            )?),
        })
    }

    pub fn all_caps() -> Self {
        Self {
            name: "all-caps",
            rule: Rule::AllCaps,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn check(&self, unit: &str) -> HeadingMatch {
        let unit = unit.trim();
        match &self.rule {
            Rule::FirstLine(pattern) => {
                let first_line = unit.lines().next().unwrap_or_default().trim();
                pattern
                    .captures(first_line)
                    .and_then(|caps| caps.name("text"))
                    .map_or(HeadingMatch::NotHeading, |text| {
                        HeadingMatch::from_text(text.as_str())
                    })
            }
            Rule::AllCaps => {
                let is_caps = !unit.contains('\n')
                    && unit.chars().count() < MAX_ALL_CAPS_CHARS
                    && unit.chars().any(char::is_alphabetic)
                    && !unit.chars().any(char::is_lowercase);
                if is_caps {
                    HeadingMatch::from_text(unit)
                } else {
                    HeadingMatch::NotHeading
                }
            }
        }
    }
}

/// Ordered list of heading matchers.
#[derive(Debug)]
pub struct HeadingDetector {
    matchers: Vec<HeadingMatcher>,
}

impl HeadingDetector {
    /// The default rules in priority order.
    pub fn new() -> Result<Self> {
        Ok(Self::with_matchers(vec![
            HeadingMatcher::markdown()?,
            HeadingMatcher::numbered()?,
            HeadingMatcher::all_caps(),
        ]))
    }

    pub fn with_matchers(matchers: Vec<HeadingMatcher>) -> Self {
        Self { matchers }
    }

    pub fn matchers(&self) -> impl Iterator<Item = &HeadingMatcher> {
        self.matchers.iter()
    }

    /// First matching rule wins.
    pub fn detect(&self, unit: &str) -> HeadingMatch {
        self.matchers
            .iter()
            .map(|matcher| matcher.check(unit))
            .find(HeadingMatch::is_heading)
            .unwrap_or(HeadingMatch::NotHeading)
    }
}

#[cfg(test)]
#[path = "heading_tests.rs"]
mod tests;
