//! Offline SEO scoring
//!
//! A post scores 0 to 100 as the sum of the weights of the checks it passes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::fixer::{contains_ci, is_prose};
use crate::services::markdown::{word_count, MarkdownRenderer};

static SUBHEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{2,6}\s+\S|(?i)<h[2-6][\s>]").expect("valid regex"));
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]+\]\([^)\s]+\)|https?://\S+").expect("valid regex"));

const TITLE_RANGE: (usize, usize) = (30, 60);
const DESCRIPTION_RANGE: (usize, usize) = (120, 160);
const DENSITY_RANGE: (f64, f64) = (0.5, 2.5);
const MIN_WORDS: usize = 300;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeoInput {
    pub title: String,
    #[serde(default)]
    pub meta_description: Option<String>,
    pub content: String,
    #[serde(default)]
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SeoCheck {
    pub name: &'static str,
    pub passed: bool,
    /// Points awarded when passed
    pub weight: u8,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SeoReport {
    pub score: u8,
    pub word_count: usize,
    /// Percentage of words taken by the keyword, when one was given
    pub keyword_density: Option<f64>,
    pub checks: Vec<SeoCheck>,
}

pub fn score(input: &SeoInput) -> SeoReport {
    let text = MarkdownRenderer::new().plain_text(&input.content);
    let words = word_count(&text);
    let keyword = input
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let description = input.meta_description.as_deref().unwrap_or("").trim();

    let mut checks = Vec::with_capacity(9);

    let title_len = input.title.trim().chars().count();
    checks.push(check(
        "title_length",
        15,
        (TITLE_RANGE.0..=TITLE_RANGE.1).contains(&title_len),
        format!(
            "Title is {} characters (aim for {}-{})",
            title_len, TITLE_RANGE.0, TITLE_RANGE.1
        ),
    ));

    let description_len = description.chars().count();
    checks.push(check(
        "description_length",
        15,
        (DESCRIPTION_RANGE.0..=DESCRIPTION_RANGE.1).contains(&description_len),
        format!(
            "Meta description is {} characters (aim for {}-{})",
            description_len, DESCRIPTION_RANGE.0, DESCRIPTION_RANGE.1
        ),
    ));

    let density = keyword.map(|k| keyword_density(&text, k));
    match keyword {
        Some(k) => {
            checks.push(check(
                "keyword_in_title",
                15,
                contains_ci(&input.title, k),
                format!("Keyword \"{}\" in title", k),
            ));
            checks.push(check(
                "keyword_in_description",
                10,
                contains_ci(description, k),
                format!("Keyword \"{}\" in meta description", k),
            ));
            let first = input
                .content
                .split("\n\n")
                .find(|p| is_prose(p))
                .unwrap_or("");
            checks.push(check(
                "keyword_in_first_paragraph",
                10,
                contains_ci(first, k),
                format!("Keyword \"{}\" in first paragraph", k),
            ));
            let d = density.unwrap_or(0.0);
            checks.push(check(
                "keyword_density",
                10,
                d >= DENSITY_RANGE.0 && d <= DENSITY_RANGE.1,
                format!(
                    "Keyword density is {:.1}% (aim for {}-{}%)",
                    d, DENSITY_RANGE.0, DENSITY_RANGE.1
                ),
            ));
        }
        None => {
            for (name, weight) in [
                ("keyword_in_title", 15),
                ("keyword_in_description", 10),
                ("keyword_in_first_paragraph", 10),
                ("keyword_density", 10),
            ] {
                checks.push(check(name, weight, false, "No focus keyword set".to_string()));
            }
        }
    }

    checks.push(check(
        "word_count",
        10,
        words >= MIN_WORDS,
        format!("{} words (aim for at least {})", words, MIN_WORDS),
    ));
    checks.push(check(
        "has_subheadings",
        10,
        SUBHEADING_RE.is_match(&input.content),
        "Content uses subheadings".to_string(),
    ));
    checks.push(check(
        "has_links",
        5,
        LINK_RE.is_match(&input.content),
        "Content contains links".to_string(),
    ));

    let score: u32 = checks
        .iter()
        .filter(|c| c.passed)
        .map(|c| c.weight as u32)
        .sum();

    SeoReport {
        score: score.min(100) as u8,
        word_count: words,
        keyword_density: density,
        checks,
    }
}

fn check(name: &'static str, weight: u8, passed: bool, message: String) -> SeoCheck {
    SeoCheck {
        name,
        passed,
        weight,
        message,
    }
}

/// Keyword words as a percentage of all words
pub fn keyword_density(text: &str, keyword: &str) -> f64 {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let needle: Vec<String> = keyword
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if words.is_empty() || needle.is_empty() || needle.len() > words.len() {
        return 0.0;
    }

    let mut hits = 0;
    let mut i = 0;
    while i + needle.len() <= words.len() {
        if words[i..i + needle.len()] == needle[..] {
            hits += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }

    (hits * needle.len()) as f64 / words.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn long_body(keyword: &str) -> String {
        let filler = "Good records make the filing season calmer for everyone involved. ";
        let mut body = format!(
            "Our guide to {} starts here.\n\n## Why it matters\n\n",
            keyword
        );
        for i in 0..40 {
            body.push_str(filler);
            if i % 10 == 0 {
                body.push_str(&format!("Plan your {} early. ", keyword));
            }
        }
        body.push_str("\n\nSee [the IRS](https://www.irs.gov) for details.");
        body
    }

    #[test]
    fn test_perfect_post_scores_100() {
        let report = score(&SeoInput {
            title: "Estimated Tax Payments: A Practical Guide".into(),
            meta_description: Some(
                "Everything freelancers need to know about estimated tax payments: who must pay, \
                 when each quarterly deadline falls, and how to avoid penalties."
                    .into(),
            ),
            content: long_body("estimated tax"),
            keyword: Some("estimated tax".into()),
        });

        let failed: Vec<_> = report.checks.iter().filter(|c| !c.passed).collect();
        assert!(failed.is_empty(), "{:?}", failed);
        assert_eq!(report.score, 100);
        assert!(report.word_count >= 300);
    }

    #[test]
    fn test_bare_post_scores_low() {
        let report = score(&SeoInput {
            title: "Hi".into(),
            content: "Short.".into(),
            ..Default::default()
        });
        assert_eq!(report.score, 0);
        assert_eq!(report.checks.len(), 9);
        assert!(report.keyword_density.is_none());
    }

    #[test]
    fn test_checks_weights_sum_to_100() {
        let report = score(&SeoInput::default());
        let total: u32 = report.checks.iter().map(|c| c.weight as u32).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_keyword_density() {
        let text = "Payroll tax is due. Payroll tax, again! Other words here now";
        // 2 hits * 2 words / 11 words
        let d = keyword_density(text, "payroll tax");
        assert!((d - 400.0 / 11.0).abs() < 1e-9);
        assert_eq!(keyword_density("", "vat"), 0.0);
    }

    proptest! {
        #[test]
        fn score_is_bounded(
            title in ".{0,80}",
            content in "[a-z #\\[\\]()\n]{0,500}",
            keyword in proptest::option::of("[a-z]{1,10}"),
        ) {
            let report = score(&SeoInput {
                title,
                meta_description: None,
                content,
                keyword,
            });
            prop_assert!(report.score <= 100);
        }
    }
}
