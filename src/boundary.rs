use crate::config::Config;
use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// First page of a question and the heading text that started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBoundary {
    pub page: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingMatch {
    pub offset: usize,
    pub label: String,
}

/// Decides whether a page's text opens a new question.
pub trait BoundaryMatcher: Send + Sync {
    /// Earliest heading in `text`, if any.
    fn find(&self, text: &str) -> Option<HeadingMatch>;
}

pub struct RegexMatcher {
    re: Regex,
    normalize_unicode: bool,
}

impl RegexMatcher {
    pub fn new(pattern: &str, normalize_unicode: bool) -> Result<Self> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("compile question pattern: {pattern}"))?;
        Ok(Self {
            re,
            normalize_unicode,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.detection.question_pattern,
            cfg.detection.normalize_unicode,
        )
    }
}

impl BoundaryMatcher for RegexMatcher {
    fn find(&self, text: &str) -> Option<HeadingMatch> {
        let normalized;
        let haystack = if self.normalize_unicode {
            normalized = text.nfkc().collect::<String>();
            normalized.as_str()
        } else {
            text
        };
        // `find` returns the leftmost match, so later headings on the page are ignored.
        self.re.find(haystack).map(|m| HeadingMatch {
            offset: m.start(),
            label: collapse_whitespace(m.as_str()),
        })
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scans pages in order and emits at most one boundary per page.
///
/// Pages whose recognition failed should be passed as empty text; they never
/// produce a boundary and do not affect their neighbours.
pub fn locate_boundaries<S: AsRef<str>>(
    matcher: &dyn BoundaryMatcher,
    page_texts: &[S],
) -> Vec<QuestionBoundary> {
    page_texts
        .iter()
        .enumerate()
        .filter_map(|(page, text)| {
            matcher.find(text.as_ref()).map(|m| QuestionBoundary {
                page,
                label: m.label,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_matcher() -> RegexMatcher {
        RegexMatcher::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn matches_common_phrasings() {
        let m = default_matcher();
        assert_eq!(m.find("Question 3").unwrap().label, "Question 3");
        assert_eq!(m.find("PROBLEM   12 (5 pts)").unwrap().label, "PROBLEM 12");
        assert_eq!(m.find("q7) compute").unwrap().label, "q7");
        assert_eq!(m.find("Q\n4").unwrap().label, "Q 4");
        assert!(m.find("no heading on this sheet").is_none());
    }

    #[test]
    fn earliest_heading_on_page_wins() {
        let m = default_matcher();
        let hit = m.find("scratch work\nQuestion 3 ... Question 4").unwrap();
        assert_eq!(hit.label, "Question 3");
    }

    #[test]
    fn fullwidth_digits_are_normalized() {
        let m = default_matcher();
        assert_eq!(m.find("Question \u{FF15}").unwrap().label, "Question 5");
    }
}
