//! Markdown rendering and text helpers
//!
//! Post bodies are written in Markdown and rendered to HTML with
//! pulldown-cmark. Raw HTML in the source is escaped rather than passed
//! through, and links with script-capable schemes are neutralized.
//!
//! # Example
//!
//! ```
//! use ledgerpress::services::markdown::MarkdownRenderer;
//!
//! let renderer = MarkdownRenderer::new();
//! let html = renderer.render("# Year end\n\nFile **before** 31 January.");
//! assert!(html.contains("<h1>"));
//! assert!(html.contains("<strong>"));
//! ```

use pulldown_cmark::{html, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

/// Words per minute used for reading-time estimates
pub const WORDS_PER_MINUTE: usize = 200;

/// Length of derived excerpts and meta descriptions, in characters
pub const EXCERPT_LENGTH: usize = 160;

const BLOCKED_SCHEMES: [&str; 3] = ["javascript:", "vbscript:", "data:"];

#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: Options,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_SMART_PUNCTUATION);
        Self { options }
    }

    /// Render Markdown to HTML
    pub fn render(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, self.options);
        let events = self.process_events(parser);

        let mut html_output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut html_output, events.into_iter());
        html_output
    }

    /// Text content of a Markdown document, without markup
    pub fn plain_text(&self, markdown: &str) -> String {
        let mut text = String::with_capacity(markdown.len());
        for event in Parser::new_ext(markdown, self.options) {
            match event {
                Event::Text(t) | Event::Code(t) => text.push_str(&t),
                Event::SoftBreak | Event::HardBreak => text.push(' '),
                Event::End(TagEnd::Paragraph)
                | Event::End(TagEnd::Heading(_))
                | Event::End(TagEnd::Item)
                | Event::End(TagEnd::CodeBlock)
                | Event::End(TagEnd::TableCell) => text.push(' '),
                _ => {}
            }
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Escape raw HTML, neutralize unsafe link targets and tag fenced code
    /// blocks with their language class.
    fn process_events<'a>(&self, parser: Parser<'a>) -> Vec<Event<'a>> {
        let mut events = Vec::new();
        let mut code_block: Option<(Option<String>, String)> = None;

        for event in parser {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(lang) if !lang.trim().is_empty() => {
                            lang.split_whitespace().next().map(str::to_string)
                        }
                        _ => None,
                    };
                    code_block = Some((lang, String::new()));
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, code)) = code_block.take() {
                        events.push(Event::Html(code_block_html(&code, lang.as_deref()).into()));
                    }
                }
                Event::Text(text) if code_block.is_some() => {
                    if let Some((_, code)) = code_block.as_mut() {
                        code.push_str(&text);
                    }
                }
                Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
                Event::Start(Tag::Link {
                    link_type,
                    dest_url,
                    title,
                    id,
                }) if is_blocked_url(&dest_url) => events.push(Event::Start(Tag::Link {
                    link_type,
                    dest_url: "#".into(),
                    title,
                    id,
                })),
                Event::Start(Tag::Image {
                    link_type,
                    dest_url,
                    title,
                    id,
                }) if is_blocked_url(&dest_url) => events.push(Event::Start(Tag::Image {
                    link_type,
                    dest_url: "".into(),
                    title,
                    id,
                })),
                other => events.push(other),
            }
        }

        events
    }
}

fn is_blocked_url(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    BLOCKED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

fn code_block_html(code: &str, lang: Option<&str>) -> String {
    match lang {
        Some(lang) => format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            html_escape(lang),
            html_escape(code)
        ),
        None => format!("<pre><code>{}</code></pre>\n", html_escape(code)),
    }
}

/// Escapes HTML special characters in a string.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// `ceil(words / 200)`, never less than one minute
pub fn reading_time_minutes(text: &str) -> i32 {
    let words = word_count(text);
    words.div_ceil(WORDS_PER_MINUTE).max(1) as i32
}

/// Shorten `text` to at most `max_chars` characters, cutting at a word
/// boundary and appending `…` when anything was removed.
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    // Leave room for the ellipsis
    let budget = max_chars - 1;
    let byte_end = text
        .char_indices()
        .nth(budget)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..byte_end];

    // Cut mid-word only when the next char would have been a boundary
    let next_is_space = text[byte_end..]
        .chars()
        .next()
        .is_some_and(char::is_whitespace);
    let cut = if next_is_space {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(i) if i > 0 => &head[..i],
            _ => head,
        }
    };

    let cut = cut.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-'));
    format!("{}…", cut)
}
