//! Newsletter subscriptions and sending
//!
//! Unsubscribe links carry `token = hex(HMAC-SHA256(secret, email))`, so they
//! work without a login and cannot be forged for other addresses.

use crate::db::repositories::SubscriberRepository;
use crate::models::{
    ListParams, PagedResult, SendFailure, SendReport, SubscribeInput, Subscriber, SubscriberStatus,
};
use crate::services::email::{EmailMessage, EmailSender};
use crate::services::markdown::{html_escape, MarkdownRenderer};
use crate::services::user::normalize_email;
use anyhow::Context;
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum NewsletterError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid unsubscribe token")]
    InvalidToken,

    #[error("Subscriber not found: {0}")]
    NotFound(String),

    /// No email provider configured
    #[error("Email delivery is not configured")]
    NotConfigured,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What a public signup did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    AlreadyActive,
    Reactivated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendNewsletterInput {
    pub subject: String,
    /// Markdown
    pub body: String,
}

pub struct NewsletterService {
    repo: Arc<dyn SubscriberRepository>,
    sender: Option<Arc<dyn EmailSender>>,
    secret: String,
    unsubscribe_url: String,
    renderer: MarkdownRenderer,
}

impl NewsletterService {
    /// `unsubscribe_url` is the absolute URL of the public unsubscribe endpoint
    pub fn new(
        repo: Arc<dyn SubscriberRepository>,
        sender: Option<Arc<dyn EmailSender>>,
        secret: impl Into<String>,
        unsubscribe_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            sender,
            secret: secret.into(),
            unsubscribe_url: unsubscribe_url.into(),
            renderer: MarkdownRenderer::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.sender.is_some()
    }

    pub async fn subscribe(
        &self,
        input: SubscribeInput,
    ) -> Result<(Subscriber, SubscribeOutcome), NewsletterError> {
        let email = normalize_email(&input.email)
            .ok_or_else(|| NewsletterError::ValidationError("Invalid email address".to_string()))?;

        if let Some(existing) = self
            .repo
            .get_by_email(&email)
            .await
            .context("Failed to look up subscriber")?
        {
            if existing.status == SubscriberStatus::Active {
                return Ok((existing, SubscribeOutcome::AlreadyActive));
            }
            self.repo
                .set_status(existing.id, SubscriberStatus::Active)
                .await
                .context("Failed to reactivate subscriber")?;
            let subscriber = self.require(existing.id).await?;
            tracing::info!("Subscriber reactivated: {}", subscriber.email);
            return Ok((subscriber, SubscribeOutcome::Reactivated));
        }

        let name = input.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let source = input.source.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let subscriber = self
            .repo
            .create(&email, name, source)
            .await
            .context("Failed to create subscriber")?;
        tracing::info!("New subscriber: {}", subscriber.email);
        Ok((subscriber, SubscribeOutcome::Created))
    }

    /// Unsubscribe through a signed link
    pub async fn unsubscribe(&self, email: &str, token: &str) -> Result<Subscriber, NewsletterError> {
        let email = normalize_email(email).ok_or(NewsletterError::InvalidToken)?;
        if !self.verify_token(&email, token) {
            return Err(NewsletterError::InvalidToken);
        }

        let subscriber = self
            .repo
            .get_by_email(&email)
            .await
            .context("Failed to look up subscriber")?
            .ok_or_else(|| NewsletterError::NotFound(email.clone()))?;

        if subscriber.status == SubscriberStatus::Unsubscribed {
            return Ok(subscriber);
        }
        self.repo
            .set_status(subscriber.id, SubscriberStatus::Unsubscribed)
            .await
            .context("Failed to unsubscribe")?;
        tracing::info!("Subscriber left: {}", email);
        self.require(subscriber.id).await
    }

    pub async fn list(
        &self,
        status: Option<SubscriberStatus>,
        params: &ListParams,
    ) -> Result<PagedResult<Subscriber>, NewsletterError> {
        let items = self
            .repo
            .list(status, params.offset(), params.limit())
            .await
            .context("Failed to list subscribers")?;
        let total = self
            .repo
            .count(status)
            .await
            .context("Failed to count subscribers")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn active_count(&self) -> Result<i64, NewsletterError> {
        Ok(self
            .repo
            .count(Some(SubscriberStatus::Active))
            .await
            .context("Failed to count subscribers")?)
    }

    pub async fn delete(&self, id: i64) -> Result<(), NewsletterError> {
        if !self.repo.delete(id).await.context("Failed to delete subscriber")? {
            return Err(NewsletterError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Send to every active subscriber, one at a time. A failed recipient
    /// is recorded in the report and does not stop the run.
    pub async fn send(&self, input: &SendNewsletterInput) -> Result<SendReport, NewsletterError> {
        let sender = self.sender.as_ref().ok_or(NewsletterError::NotConfigured)?;

        let subject = input.subject.trim();
        if subject.is_empty() || input.body.trim().is_empty() {
            return Err(NewsletterError::ValidationError(
                "Subject and body are required".to_string(),
            ));
        }
        let body_html = self.renderer.render(&input.body);

        let recipients = self
            .repo
            .list_active()
            .await
            .context("Failed to list active subscribers")?;
        tracing::info!("Sending newsletter '{}' to {} subscriber(s)", subject, recipients.len());

        let mut report = SendReport::default();
        for subscriber in recipients {
            let link = self.unsubscribe_link(&subscriber.email)?;
            let message = EmailMessage {
                to: subscriber.email.clone(),
                subject: subject.to_string(),
                text: format!("{}\n\n--\nUnsubscribe: {}\n", input.body.trim_end(), link),
                html: format!(
                    "{}<hr><p><a href=\"{}\">Unsubscribe</a></p>",
                    body_html,
                    html_escape(&link)
                ),
            };

            match sender.send(&message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!("Newsletter delivery to {} failed: {}", subscriber.email, e);
                    report.failed += 1;
                    report.failures.push(SendFailure {
                        email: subscriber.email,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Newsletter sent: {} ok, {} failed", report.sent, report.failed);
        Ok(report)
    }

    /// Lowercase hex HMAC of the (normalized) address
    pub fn token_for(&self, email: &str) -> Result<String, NewsletterError> {
        Ok(HEXLOWER.encode(&self.mac(email)?.finalize().into_bytes()))
    }

    pub fn verify_token(&self, email: &str, token: &str) -> bool {
        let Ok(bytes) = HEXLOWER_PERMISSIVE.decode(token.trim().as_bytes()) else {
            return false;
        };
        match self.mac(email) {
            Ok(mac) => mac.verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }

    pub fn unsubscribe_link(&self, email: &str) -> Result<String, NewsletterError> {
        Ok(format!(
            "{}?email={}&token={}",
            self.unsubscribe_url,
            urlencoding::encode(email),
            self.token_for(email)?
        ))
    }

    fn mac(&self, email: &str) -> Result<HmacSha256, NewsletterError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid signing key: {}", e))?;
        mac.update(email.as_bytes());
        Ok(mac)
    }

    async fn require(&self, id: i64) -> Result<Subscriber, NewsletterError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get subscriber")?
            .ok_or_else(|| NewsletterError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxSubscriberRepository;
    use crate::db::{create_test_pool, migrations};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Records messages; fails for addresses containing "bounce"
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
            if message.to.contains("bounce") {
                anyhow::bail!("mailbox unavailable");
            }
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    async fn setup_test_service(
        sender: Option<Arc<dyn EmailSender>>,
    ) -> NewsletterService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        NewsletterService::new(
            SqlxSubscriberRepository::boxed(pool),
            sender,
            "test-secret",
            "https://firm.example/api/newsletter/unsubscribe",
        )
    }

    fn signup(email: &str) -> SubscribeInput {
        SubscribeInput {
            email: email.to_string(),
            name: Some("Client".into()),
            source: Some("footer".into()),
        }
    }

    #[tokio::test]
    async fn test_subscribe_flow() {
        let service = setup_test_service(None).await;

        let (sub, outcome) = service.subscribe(signup(" Client@Example.com ")).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Created);
        assert_eq!(sub.email, "client@example.com");

        let (again, outcome) = service.subscribe(signup("client@example.com")).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::AlreadyActive);
        assert_eq!(again.id, sub.id);

        let token = service.token_for("client@example.com").unwrap();
        let left = service.unsubscribe("client@example.com", &token).await.unwrap();
        assert_eq!(left.status, SubscriberStatus::Unsubscribed);
        assert!(left.unsubscribed_at.is_some());

        let (back, outcome) = service.subscribe(signup("client@example.com")).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Reactivated);
        assert_eq!(back.id, sub.id);
        assert_eq!(back.status, SubscriberStatus::Active);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_bad_email() {
        let service = setup_test_service(None).await;
        assert!(matches!(
            service.subscribe(signup("nope")).await,
            Err(NewsletterError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_forged_token_rejected() {
        let service = setup_test_service(None).await;
        service.subscribe(signup("a@example.com")).await.unwrap();

        let other = service.token_for("b@example.com").unwrap();
        assert!(matches!(
            service.unsubscribe("a@example.com", &other).await,
            Err(NewsletterError::InvalidToken)
        ));
        assert!(matches!(
            service.unsubscribe("a@example.com", "zz-not-hex").await,
            Err(NewsletterError::InvalidToken)
        ));
    }

    #[test]
    fn test_token_is_hex_sha256() {
        let service = NewsletterService::new(
            Arc::new(NoRepo),
            None,
            "key",
            "https://x.example/u",
        );
        let token = service.token_for("a@example.com").unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(service.verify_token("a@example.com", &token.to_uppercase()));

        let link = service.unsubscribe_link("a+b@example.com").unwrap();
        assert!(link.starts_with("https://x.example/u?email=a%2Bb%40example.com&token="));
    }

    #[tokio::test]
    async fn test_send_not_configured() {
        let service = setup_test_service(None).await;
        let result = service
            .send(&SendNewsletterInput {
                subject: "Hi".into(),
                body: "Body".into(),
            })
            .await;
        assert!(matches!(result, Err(NewsletterError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_send_isolates_failures() {
        let sender = Arc::new(RecordingSender::default());
        let service = setup_test_service(Some(sender.clone())).await;

        service.subscribe(signup("one@example.com")).await.unwrap();
        service.subscribe(signup("bounce@example.com")).await.unwrap();
        service.subscribe(signup("two@example.com")).await.unwrap();
        let (gone, _) = service.subscribe(signup("gone@example.com")).await.unwrap();
        service
            .unsubscribe(&gone.email, &service.token_for(&gone.email).unwrap())
            .await
            .unwrap();

        let report = service
            .send(&SendNewsletterInput {
                subject: "Budget update".into(),
                body: "## What changed\n\nAllowances rose.".into(),
            })
            .await
            .unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].email, "bounce@example.com");

        let sent = sender.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.to != "gone@example.com"));
        let first = &sent[0];
        assert!(first.html.contains("<h2>What changed</h2>"));
        assert!(first.text.contains(&service.token_for(&first.to).unwrap()));
        assert!(first.html.contains("Unsubscribe"));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let service = setup_test_service(None).await;
        let (a, _) = service.subscribe(signup("a@example.com")).await.unwrap();
        service.subscribe(signup("b@example.com")).await.unwrap();

        let page = service.list(None, &ListParams::new(1, 10)).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(service.active_count().await.unwrap(), 2);

        service.delete(a.id).await.unwrap();
        assert!(matches!(
            service.delete(a.id).await,
            Err(NewsletterError::NotFound(_))
        ));
    }

    struct NoRepo;

    #[async_trait]
    impl SubscriberRepository for NoRepo {
        async fn create(&self, _: &str, _: Option<&str>, _: Option<&str>) -> anyhow::Result<Subscriber> {
            unimplemented!()
        }
        async fn get_by_id(&self, _: i64) -> anyhow::Result<Option<Subscriber>> {
            Ok(None)
        }
        async fn get_by_email(&self, _: &str) -> anyhow::Result<Option<Subscriber>> {
            Ok(None)
        }
        async fn set_status(&self, _: i64, _: SubscriberStatus) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list(
            &self,
            _: Option<SubscriberStatus>,
            _: i64,
            _: i64,
        ) -> anyhow::Result<Vec<Subscriber>> {
            Ok(vec![])
        }
        async fn count(&self, _: Option<SubscriberStatus>) -> anyhow::Result<i64> {
            Ok(0)
        }
        async fn list_active(&self) -> anyhow::Result<Vec<Subscriber>> {
            Ok(vec![])
        }
        async fn delete(&self, _: i64) -> anyhow::Result<bool> {
            Ok(false)
        }
    }
}
