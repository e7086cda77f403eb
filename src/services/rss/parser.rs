//! Feed document parsing by tag matching
//!
//! Handles RSS 2.0 `<item>` and Atom `<entry>` blocks. This is deliberately
//! not a full XML parser: elements are located by name, CDATA sections are
//! unwrapped and the common entities decoded.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ParsedItem;

static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>").expect("valid regex"));
static ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>").expect("valid regex"));
static LINK_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<link\b([^>]*?)/?>").expect("valid regex"));
static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bhref\s*=\s*["']([^"']*)["']"#).expect("valid regex"));
static REL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\brel\s*=\s*["']([^"']*)["']"#).expect("valid regex"));
static CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static BLOCK_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)</?(?:p|br|div|li|ul|ol|h[1-6]|tr|td|th|blockquote|pre|hr)\b[^>]*>")
        .expect("valid regex")
});
static NUMERIC_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"));

/// Parse up to `max_items` entries out of an RSS or Atom document.
/// Entries with neither a title nor a link are skipped.
pub fn parse_feed(xml: &str, max_items: usize) -> Vec<ParsedItem> {
    let blocks: Vec<(&str, bool)> = {
        let items: Vec<_> = ITEM_RE
            .captures_iter(xml)
            .filter_map(|c| c.get(1))
            .map(|m| (m.as_str(), false))
            .collect();
        if items.is_empty() {
            ENTRY_RE
                .captures_iter(xml)
                .filter_map(|c| c.get(1))
                .map(|m| (m.as_str(), true))
                .collect()
        } else {
            items
        }
    };

    blocks
        .into_iter()
        .filter_map(|(block, atom)| {
            if atom {
                parse_entry(block)
            } else {
                parse_item(block)
            }
        })
        .take(max_items)
        .collect()
}

fn parse_item(block: &str) -> Option<ParsedItem> {
    let title = element_text(block, "title");
    let link = element_text(block, "link").filter(|l| !l.is_empty());
    let guid = element_text(block, "guid");
    let description = element(block, "description")
        .or_else(|| element(block, "content:encoded"))
        .map(html_to_text)
        .filter(|d| !d.is_empty());
    let author = element_text(block, "author").or_else(|| element_text(block, "dc:creator"));
    let published_at = element_text(block, "pubDate")
        .or_else(|| element_text(block, "dc:date"))
        .and_then(|d| parse_date(&d));

    build(title, link, guid, description, author, published_at)
}

fn parse_entry(block: &str) -> Option<ParsedItem> {
    let title = element(block, "title").map(html_to_text);
    let link = atom_link(block);
    let guid = element_text(block, "id");
    let description = element(block, "summary")
        .or_else(|| element(block, "content"))
        .map(html_to_text)
        .filter(|d| !d.is_empty());
    let author = element(block, "author").and_then(|a| element_text(a, "name"));
    let published_at = element_text(block, "published")
        .or_else(|| element_text(block, "updated"))
        .and_then(|d| parse_date(&d));

    build(title, link, guid, description, author, published_at)
}

fn build(
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    author: Option<String>,
    published_at: Option<DateTime<Utc>>,
) -> Option<ParsedItem> {
    let title = title.filter(|t| !t.is_empty());
    if title.is_none() && link.is_none() {
        return None;
    }

    let guid = guid
        .filter(|g| !g.is_empty())
        .or_else(|| link.clone())
        .or_else(|| title.clone())?;
    let title = title.or_else(|| link.clone())?;

    Some(ParsedItem {
        guid,
        title,
        link,
        description,
        author: author.filter(|a| !a.is_empty()),
        published_at,
    })
}

/// Raw inner content of the first `<name>` element, or `""` when the
/// element is self-closing.
fn element<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{}", name);
    let mut from = 0;
    while let Some(pos) = block[from..].find(&open) {
        let start = from + pos;
        let after = start + open.len();
        match block[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {
                let tag_end = after + block[after..].find('>')?;
                if block[..tag_end].ends_with('/') {
                    return Some("");
                }
                let content_start = tag_end + 1;
                let close = format!("</{}>", name);
                let content_end = content_start + block[content_start..].find(&close)?;
                return Some(&block[content_start..content_end]);
            }
            // `<link` must not match `<linkedin>`
            _ => from = after,
        }
    }
    None
}

fn element_text(block: &str, name: &str) -> Option<String> {
    element(block, name).map(clean_text)
}

/// Atom `<link href=".."/>`: the `alternate` link, else the first one
fn atom_link(block: &str) -> Option<String> {
    let mut first = None;
    for cap in LINK_TAG_RE.captures_iter(block) {
        let attrs = cap.get(1).map_or("", |m| m.as_str());
        let Some(href) = HREF_RE.captures(attrs).and_then(|c| c.get(1)) else {
            continue;
        };
        let href = decode_entities(href.as_str().trim());
        let rel = REL_RE
            .captures(attrs)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase());
        match rel.as_deref() {
            None | Some("alternate") => return Some(href),
            _ => {
                first.get_or_insert(href);
            }
        }
    }
    first
}

/// Unwrap CDATA, decode entities and trim
pub fn clean_text(raw: &str) -> String {
    let unwrapped = CDATA_RE.replace_all(raw, "$1");
    decode_entities(unwrapped.trim()).trim().to_string()
}

/// Like `clean_text`, then strip markup and collapse whitespace. Block tags
/// separate words; inline tags vanish so `<b>70</b>.` stays `70.`
pub fn html_to_text(raw: &str) -> String {
    let text = clean_text(raw);
    let blocks = BLOCK_TAG_RE.replace_all(&text, " ");
    let stripped = TAG_RE.replace_all(&blocks, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let numeric = NUMERIC_ENTITY_RE.replace_all(s, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    // `&amp;` last so `&amp;lt;` stays `&lt;`
    numeric
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// RFC 2822 (RSS) or RFC 3339 (Atom)
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
<channel>
  <title>Tax Newsroom</title>
  <link>https://news.example.gov</link>
  <item>
    <title><![CDATA[New mileage rates & limits]]></title>
    <link>https://news.example.gov/mileage</link>
    <guid isPermaLink="false">news-101</guid>
    <description>&lt;p&gt;Rates rise to &lt;b&gt;70 cents&lt;/b&gt;.&lt;/p&gt;</description>
    <dc:creator>Newsroom</dc:creator>
    <pubDate>Tue, 02 Jan 2024 10:30:00 +0000</pubDate>
  </item>
  <item>
    <title>No guid here</title>
    <link>https://news.example.gov/no-guid</link>
  </item>
  <item>
    <description>Neither title nor link</description>
  </item>
  <item>
    <title>Title only &#8212; &#x2019;quoted&#x2019;</title>
  </item>
</channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Practice Blog</title>
  <link href="https://blog.example.com/"/>
  <entry>
    <title type="html">Payroll &amp;amp; you</title>
    <link rel="self" href="https://blog.example.com/self/1"/>
    <link rel="alternate" type="text/html" href="https://blog.example.com/payroll"/>
    <id>urn:uuid:1225c695</id>
    <published>2024-03-01T09:00:00Z</published>
    <author><name>Jo Clerk</name></author>
    <summary>Short &lt;em&gt;summary&lt;/em&gt;</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let items = parse_feed(RSS, 50);
        assert_eq!(items.len(), 3);

        let first = &items[0];
        assert_eq!(first.title, "New mileage rates & limits");
        assert_eq!(first.guid, "news-101");
        assert_eq!(first.link.as_deref(), Some("https://news.example.gov/mileage"));
        assert_eq!(first.description.as_deref(), Some("Rates rise to 70 cents."));
        assert_eq!(first.author.as_deref(), Some("Newsroom"));
        assert_eq!(
            first.published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 10, 30, 0).unwrap())
        );

        // guid falls back to link, then title
        assert_eq!(items[1].guid, "https://news.example.gov/no-guid");
        assert_eq!(items[2].guid, "Title only \u{2014} \u{2019}quoted\u{2019}");
        assert!(items[2].link.is_none());
    }

    #[test]
    fn test_parse_atom_entries() {
        let items = parse_feed(ATOM, 50);
        assert_eq!(items.len(), 1);

        let entry = &items[0];
        assert_eq!(entry.title, "Payroll & you");
        assert_eq!(entry.link.as_deref(), Some("https://blog.example.com/payroll"));
        assert_eq!(entry.guid, "urn:uuid:1225c695");
        assert_eq!(entry.author.as_deref(), Some("Jo Clerk"));
        assert_eq!(entry.description.as_deref(), Some("Short summary"));
        assert_eq!(
            entry.published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_max_items() {
        assert_eq!(parse_feed(RSS, 1).len(), 1);
        assert!(parse_feed("<html>not a feed</html>", 10).is_empty());
    }

    #[test]
    fn test_element_requires_exact_name() {
        let block = "<linkedin>x</linkedin><link>https://a.example</link>";
        assert_eq!(element(block, "link"), Some("https://a.example"));
        assert_eq!(element("<link/>", "link"), Some(""));
    }

    #[test]
    fn test_html_to_text_spacing() {
        assert_eq!(html_to_text("<b>IRS</b>, <i>FASB</i>; <a href=\"x\">GAAP</a>!"), "IRS, FASB; GAAP!");
        assert_eq!(html_to_text("<p>One</p><p>Two</p>"), "One Two");
        assert_eq!(html_to_text("line<br/>break<li>item</li>"), "line break item");
        // <b> must not be read as a block tag
        assert_eq!(html_to_text("<blockquote>a</blockquote><b>b</b>"), "a b");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp;lt; b"), "a &lt; b");
        assert_eq!(decode_entities("&#65;&#x42;&quot;"), "AB\"");
        assert_eq!(decode_entities("&#xZZ; stays"), "&#xZZ; stays");
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Wed, 10 Jul 2024 08:00:00 GMT").is_some());
        assert!(parse_date("2024-07-10T08:00:00+02:00").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
