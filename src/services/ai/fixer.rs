//! Offline content fixes: spelling, focus keyword placement and meta
//! description length.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::services::markdown::{truncate_at_word, MarkdownRenderer, EXCERPT_LENGTH};

/// Longest title the keyword suffix may produce
pub const MAX_TITLE_LENGTH: usize = 60;

const MISSPELLINGS: &[(&str, &str)] = &[
    ("accomodate", "accommodate"),
    ("accountent", "accountant"),
    ("acount", "account"),
    ("adress", "address"),
    ("ammount", "amount"),
    ("beleive", "believe"),
    ("bookeeping", "bookkeeping"),
    ("buisness", "business"),
    ("calender", "calendar"),
    ("comission", "commission"),
    ("deductable", "deductible"),
    ("definately", "definitely"),
    ("enviroment", "environment"),
    ("existance", "existence"),
    ("expence", "expense"),
    ("finacial", "financial"),
    ("goverment", "government"),
    ("guarentee", "guarantee"),
    ("independant", "independent"),
    ("intrest", "interest"),
    ("liabilty", "liability"),
    ("liason", "liaison"),
    ("maintainance", "maintenance"),
    ("neccessary", "necessary"),
    ("occassion", "occasion"),
    ("occured", "occurred"),
    ("payrol", "payroll"),
    ("persue", "pursue"),
    ("publically", "publicly"),
    ("reciept", "receipt"),
    ("recieve", "receive"),
    ("reconcilation", "reconciliation"),
    ("refferal", "referral"),
    ("responsability", "responsibility"),
    ("seperate", "separate"),
    ("teh", "the"),
    ("tommorow", "tomorrow"),
    ("untill", "until"),
    ("wich", "which"),
];

static SPELLING_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    MISSPELLINGS
        .iter()
        .filter_map(|(wrong, right)| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(wrong)))
                .ok()
                .map(|re| (re, *right))
        })
        .collect()
});

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixInput {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FixResult {
    pub title: String,
    pub content: String,
    pub meta_description: String,
    /// Human-readable list of what was changed
    pub changes: Vec<String>,
}

/// Apply every fix to a post draft
pub fn fix_content(input: &FixInput) -> FixResult {
    let mut changes = Vec::new();

    let (title, title_fixes) = fix_spelling(&input.title);
    let (mut content, content_fixes) = fix_spelling(&input.content);
    for (wrong, right) in title_fixes.iter().chain(content_fixes.iter()) {
        changes.push(format!("Corrected \"{}\" to \"{}\"", wrong, right));
    }

    let mut title = title;
    if let Some(keyword) = input.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        if !contains_ci(&content, keyword) {
            content = insert_keyword(&content, keyword);
            changes.push(format!("Added keyword \"{}\" to the first paragraph", keyword));
        }
        if let Some(new_title) = keyword_title(&title, keyword) {
            title = new_title;
            changes.push(format!("Added keyword \"{}\" to the title", keyword));
        }
    }

    let source = match input.meta_description.as_deref().map(str::trim) {
        Some(meta) if !meta.is_empty() => meta.to_string(),
        _ => MarkdownRenderer::new().plain_text(&content),
    };
    let meta_description = meta_description(&source);
    if input.meta_description.as_deref().map(str::trim) != Some(meta_description.as_str()) {
        changes.push("Rewrote meta description".to_string());
    }

    FixResult {
        title,
        content,
        meta_description,
        changes,
    }
}

/// Correct known misspellings, whole words only, keeping the original
/// capitalization. Returns the corrected text and each `(found, fixed)` pair.
pub fn fix_spelling(text: &str) -> (String, Vec<(String, String)>) {
    let mut fixed = text.to_string();
    let mut corrections = Vec::new();

    for (re, right) in SPELLING_RULES.iter() {
        if !re.is_match(&fixed) {
            continue;
        }
        fixed = re
            .replace_all(&fixed, |caps: &Captures| {
                let found = &caps[0];
                let replacement = match_case(found, right);
                corrections.push((found.to_string(), replacement.clone()));
                replacement
            })
            .into_owned();
    }

    (fixed, corrections)
}

fn match_case(original: &str, replacement: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    replacement.to_string()
}

/// Append a sentence naming `keyword` to the first prose paragraph
pub fn insert_keyword(content: &str, keyword: &str) -> String {
    let sentence = format!("This guide covers {}.", keyword);
    if content.trim().is_empty() {
        return sentence;
    }

    let mut paragraphs: Vec<String> = content.split("\n\n").map(str::to_string).collect();
    let target = paragraphs.iter().position(|p| is_prose(p));
    match target {
        Some(i) => {
            let paragraph = paragraphs[i].trim_end().to_string();
            let joiner = if paragraph.ends_with(['.', '!', '?', ':']) {
                " "
            } else {
                ". "
            };
            paragraphs[i] = format!("{}{}{}", paragraph, joiner, sentence);
            paragraphs.join("\n\n")
        }
        None => format!("{}\n\n{}", sentence, content),
    }
}

pub(crate) fn is_prose(paragraph: &str) -> bool {
    let first = paragraph.trim_start();
    !first.is_empty()
        && !first.starts_with('#')
        && !first.starts_with("```")
        && !first.starts_with('>')
        && !first.starts_with('|')
        && !first.starts_with("- ")
        && !first.starts_with("* ")
}

/// `Title | Keyword` when the keyword is missing and the result fits
pub fn keyword_title(title: &str, keyword: &str) -> Option<String> {
    if contains_ci(title, keyword) {
        return None;
    }
    let candidate = format!("{} | {}", title.trim(), keyword);
    (candidate.chars().count() <= MAX_TITLE_LENGTH).then_some(candidate)
}

/// Meta description of at most 160 characters, cut at a word boundary
pub fn meta_description(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_at_word(&collapsed, EXCERPT_LENGTH)
}

pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fix_spelling_preserves_case() {
        let (fixed, corrections) =
            fix_spelling("Recieve your reciept. RECIEVE it. We recieve payrol.");
        assert_eq!(fixed, "Receive your receipt. RECEIVE it. We receive payroll.");
        assert_eq!(corrections.len(), 5);
    }

    #[test]
    fn test_fix_spelling_whole_words_only() {
        let (fixed, corrections) = fix_spelling("Tehran and teh acountant");
        assert_eq!(fixed, "Tehran and the acountant");
        assert_eq!(corrections, vec![("teh".to_string(), "the".to_string())]);
    }

    #[test]
    fn test_insert_keyword_into_first_paragraph() {
        let content = "# Heading\n\nQuarterly estimates matter\n\nSecond paragraph.";
        let result = insert_keyword(content, "estimated tax");
        assert_eq!(
            result,
            "# Heading\n\nQuarterly estimates matter. This guide covers estimated tax.\n\nSecond paragraph."
        );
        assert_eq!(insert_keyword("", "vat"), "This guide covers vat.");
    }

    #[test]
    fn test_keyword_title() {
        assert_eq!(
            keyword_title("Year-End Checklist", "Small Business Tax").as_deref(),
            Some("Year-End Checklist | Small Business Tax")
        );
        assert!(keyword_title("Small business tax basics", "small business tax").is_none());

        let long = "A very long title about quarterly estimated payments";
        assert!(keyword_title(long, "self-employment tax").is_none());
    }

    #[test]
    fn test_fix_content_reports_changes() {
        let result = fix_content(&FixInput {
            title: "Seperate your accounts".into(),
            content: "Keep buisness and personal money apart.".into(),
            keyword: Some("bookkeeping".into()),
            meta_description: None,
        });

        assert_eq!(result.title, "Separate your accounts | bookkeeping");
        assert!(result.content.starts_with("Keep business and personal money apart."));
        assert!(result.content.contains("bookkeeping"));
        assert!(result.meta_description.starts_with("Keep business"));
        assert!(result.changes.len() >= 4);
    }

    #[test]
    fn test_fix_content_keeps_good_meta() {
        let result = fix_content(&FixInput {
            title: "Payroll".into(),
            content: "Payroll basics.".into(),
            keyword: None,
            meta_description: Some("Payroll basics for employers.".into()),
        });
        assert_eq!(result.meta_description, "Payroll basics for employers.");
        assert!(result.changes.is_empty());
    }

    proptest! {
        #[test]
        fn meta_description_fits(text in "[a-zA-Z ,.]{0,400}") {
            prop_assert!(meta_description(&text).chars().count() <= EXCERPT_LENGTH);
        }

        #[test]
        fn keyword_title_respects_limit(title in "[a-zA-Z ]{1,70}", keyword in "[a-z]{1,20}") {
            if let Some(t) = keyword_title(&title, &keyword) {
                prop_assert!(t.chars().count() <= MAX_TITLE_LENGTH);
            }
        }
    }
}
