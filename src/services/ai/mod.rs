//! AI writing helpers
//!
//! - `fixer` and `seo` work offline and are always available
//! - Generation goes through a `CompletionProvider`; without one every
//!   generation call fails with `AiError::NotConfigured`

pub mod fixer;
pub mod provider;
pub mod seo;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::Platform;
use crate::services::markdown::{truncate_at_word, EXCERPT_LENGTH};

pub use fixer::{FixInput, FixResult};
pub use provider::{CompletionProvider, CompletionRequest, OpenAiCompatibleProvider};
pub use seo::{SeoInput, SeoReport};

/// Longest post body sent to the provider, in characters
const MAX_PROMPT_CONTENT: usize = 8000;
const NEWSLETTER_MAX_CHARS: usize = 6000;
const IMPROVE_MAX_CHARS: usize = 20000;

const SYSTEM_PROMPT: &str = "You are a copywriter for a small accounting and tax practice. \
Write clear, accurate, friendly copy for business owners. Never invent figures, deadlines \
or legal advice that is not in the source. Reply with the requested text only.";

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\n?```$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI provider is not configured")]
    NotConfigured,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Excerpt,
    MetaDescription,
    Social,
    Newsletter,
    Improve,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub title: String,
    pub content: String,
    /// Required for social copy
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Extra direction for `improve`
    #[serde(default)]
    pub instruction: Option<String>,
    /// Link appended to social copy
    #[serde(default)]
    pub url: Option<String>,
}

pub struct AiService {
    provider: Option<Arc<dyn CompletionProvider>>,
}

impl AiService {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self { provider }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn fix(&self, input: &FixInput) -> FixResult {
        fixer::fix_content(input)
    }

    pub fn seo_score(&self, input: &SeoInput) -> SeoReport {
        seo::score(input)
    }

    pub async fn generate(
        &self,
        kind: GenerationKind,
        request: &GenerateRequest,
    ) -> Result<String, AiError> {
        match kind {
            GenerationKind::Excerpt => self.excerpt(&request.title, &request.content).await,
            GenerationKind::MetaDescription => {
                self.meta_description(&request.title, &request.content).await
            }
            GenerationKind::Social => {
                let platform = request.platform.ok_or_else(|| {
                    AiError::ValidationError("platform is required for social copy".to_string())
                })?;
                self.social_post(platform, &request.title, &request.content, request.url.as_deref())
                    .await
            }
            GenerationKind::Newsletter => {
                self.newsletter_body(&request.title, &request.content).await
            }
            GenerationKind::Improve => {
                self.improve(&request.content, request.instruction.as_deref())
                    .await
            }
        }
    }

    pub async fn excerpt(&self, title: &str, content: &str) -> Result<String, AiError> {
        let prompt = format!(
            "Write a one or two sentence excerpt (under {} characters) for this blog post.\n\n{}",
            EXCERPT_LENGTH,
            source(title, content)
        );
        self.run(prompt, EXCERPT_LENGTH, Some(120)).await
    }

    pub async fn meta_description(&self, title: &str, content: &str) -> Result<String, AiError> {
        let prompt = format!(
            "Write an SEO meta description between 120 and {} characters for this blog post.\n\n{}",
            EXCERPT_LENGTH,
            source(title, content)
        );
        self.run(prompt, EXCERPT_LENGTH, Some(120)).await
    }

    /// Copy for one platform, never longer than the platform allows
    pub async fn social_post(
        &self,
        platform: Platform,
        title: &str,
        content: &str,
        url: Option<&str>,
    ) -> Result<String, AiError> {
        let limit = platform.max_chars();
        // Reserve room for the link
        let link_len = url.map_or(0, |u| u.chars().count() + 2);
        let budget = limit.saturating_sub(link_len).max(1);

        let prompt = format!(
            "Write a {} post (at most {} characters) promoting this blog post. \
             Do not include a link.\n\n{}",
            platform.display_name(),
            budget,
            source(title, content)
        );
        let text = self.run(prompt, budget, None).await?;

        Ok(match url {
            Some(u) if !u.is_empty() => format!("{}\n\n{}", text, u),
            _ => text,
        })
    }

    pub async fn newsletter_body(&self, title: &str, content: &str) -> Result<String, AiError> {
        let prompt = format!(
            "Write a short newsletter in Markdown introducing this blog post to our clients. \
             Use a greeting, two or three short paragraphs and a sign-off.\n\n{}",
            source(title, content)
        );
        self.run(prompt, NEWSLETTER_MAX_CHARS, None).await
    }

    pub async fn improve(&self, content: &str, instruction: Option<&str>) -> Result<String, AiError> {
        if content.trim().is_empty() {
            return Err(AiError::ValidationError(
                "Content cannot be empty".to_string(),
            ));
        }
        let direction = instruction
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .unwrap_or("Improve clarity, grammar and flow without changing the meaning.");
        let prompt = format!(
            "{}\nKeep the Markdown formatting.\n\n{}",
            direction,
            clip(content, MAX_PROMPT_CONTENT)
        );
        self.run(prompt, IMPROVE_MAX_CHARS, None).await
    }

    async fn run(
        &self,
        prompt: String,
        max_chars: usize,
        max_tokens: Option<u32>,
    ) -> Result<String, AiError> {
        let provider = self.provider.as_ref().ok_or(AiError::NotConfigured)?;
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            max_tokens,
        };

        let raw = provider.complete(&request).await.map_err(|e| {
            tracing::warn!("AI completion failed: {}", e);
            AiError::Provider(e.to_string())
        })?;

        let cleaned = clean_output(&raw, max_chars);
        if cleaned.is_empty() {
            return Err(AiError::Provider("Provider returned empty text".to_string()));
        }
        Ok(cleaned)
    }
}

fn source(title: &str, content: &str) -> String {
    format!("Title: {}\n\n{}", title.trim(), clip(content, MAX_PROMPT_CONTENT))
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Strip code fences and wrapping quotes, trim, and cut to `max_chars`
pub fn clean_output(raw: &str, max_chars: usize) -> String {
    let mut text = raw.trim().to_string();

    if let Some(inner) = FENCE_RE.captures(&text).and_then(|c| c.get(1)) {
        text = inner.as_str().trim().to_string();
    }

    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}'), ('\'', '\'')] {
        if text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close) {
            let inner = &text[open.len_utf8()..text.len() - close.len_utf8()];
            // Leave text alone when the quotes are not a single wrapping pair
            if !inner.contains(close) {
                text = inner.trim().to_string();
            }
            break;
        }
    }

    truncate_at_word(&text, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with a fixed text and records prompts
    struct CannedProvider {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedProvider {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for CannedProvider {
        async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(self.reply.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl CompletionProvider for FailingProvider {
        async fn complete(&self, _request: &CompletionRequest) -> anyhow::Result<String> {
            Err(anyhow!("upstream timeout"))
        }
    }

    #[tokio::test]
    async fn test_not_configured() {
        let service = AiService::new(None);
        assert!(!service.is_configured());
        assert!(matches!(
            service.excerpt("T", "Body").await,
            Err(AiError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_provider_failure() {
        let service = AiService::new(Some(Arc::new(FailingProvider)));
        assert!(matches!(
            service.meta_description("T", "Body").await,
            Err(AiError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_social_post_respects_platform_limit() {
        let long_reply = "Tax season tip. ".repeat(100);
        let provider = CannedProvider::new(&long_reply);
        let service = AiService::new(Some(provider.clone()));

        let url = "https://example.com/blog/tips";
        let post = service
            .social_post(Platform::Twitter, "Tips", "Body", Some(url))
            .await
            .unwrap();
        assert!(post.chars().count() <= 280, "{}", post.chars().count());
        assert!(post.ends_with(url));

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("X (Twitter)"));
    }

    #[tokio::test]
    async fn test_generate_social_requires_platform() {
        let service = AiService::new(Some(CannedProvider::new("x")));
        let err = service
            .generate(
                GenerationKind::Social,
                &GenerateRequest {
                    content: "Body".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_generate_excerpt_is_cleaned() {
        let service = AiService::new(Some(CannedProvider::new(
            "\"Quarterly estimates explained for freelancers.\"",
        )));
        let excerpt = service
            .generate(
                GenerationKind::Excerpt,
                &GenerateRequest {
                    title: "Estimates".into(),
                    content: "Body".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(excerpt, "Quarterly estimates explained for freelancers.");
    }

    #[tokio::test]
    async fn test_improve_rejects_empty() {
        let service = AiService::new(Some(CannedProvider::new("x")));
        assert!(matches!(
            service.improve("  ", None).await,
            Err(AiError::ValidationError(_))
        ));
    }

    #[test]
    fn test_clean_output() {
        assert_eq!(clean_output("```markdown\nHello there\n```", 100), "Hello there");
        assert_eq!(clean_output("  \u{201c}Quoted\u{201d}  ", 100), "Quoted");
        assert_eq!(
            clean_output("\"One\" and \"two\"", 100),
            "\"One\" and \"two\""
        );
        assert_eq!(clean_output("word ".repeat(50).as_str(), 20).chars().count(), 20);
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("abcdef", 3), "abc");
        assert_eq!(clip("ab", 3), "ab");
        assert_eq!(clip("ééé", 2), "éé");
    }
}
