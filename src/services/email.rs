//! Outbound email
//!
//! `EmailSender` is the seam the newsletter sends through; `SmtpEmailSender`
//! delivers over an SMTP STARTTLS relay with lettre.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// One outgoing message with plain-text and HTML bodies
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

pub struct SmtpEmailSender {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    /// Build a sender from the `email` config section
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| anyhow!("SMTP host not configured"))?;

        let from = parse_from(config)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .port(config.smtp_port);
        if let Some(username) = config.smtp_username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                config.smtp_password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            from,
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let email = build_message(&self.from, message)?;
        self.mailer
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email to {}: {}", message.to, e))?;
        Ok(())
    }
}

fn parse_from(config: &EmailConfig) -> Result<Mailbox> {
    let name = config.from_name.trim();
    let raw = if name.is_empty() {
        config.from_address.clone()
    } else {
        format!("{} <{}>", name, config.from_address)
    };
    raw.parse()
        .with_context(|| format!("Invalid from address: {}", raw))
}

fn build_message(from: &Mailbox, message: &EmailMessage) -> Result<Message> {
    let to: Mailbox = message
        .to
        .parse()
        .with_context(|| format!("Invalid recipient address: {}", message.to))?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(message.subject.clone())
        .multipart(MultiPart::alternative_plain_html(
            message.text.clone(),
            message.html.clone(),
        ))
        .map_err(|e| anyhow!("Failed to build email: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: Some("smtp.example.com".into()),
            smtp_username: Some("mailer".into()),
            smtp_password: Some("secret".into()),
            from_address: "news@example.com".into(),
            from_name: "Ledgerpress".into(),
            ..EmailConfig::default()
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to: "client@example.com".into(),
            subject: "Year-end checklist".into(),
            text: "Plain body".into(),
            html: "<p>HTML body</p>".into(),
        }
    }

    #[test]
    fn test_from_config_requires_host() {
        assert!(SmtpEmailSender::from_config(&EmailConfig::default()).is_err());
    }

    #[test]
    fn test_message_is_multipart_alternative() {
        let from = parse_from(&config()).unwrap();
        let built = build_message(&from, &message()).unwrap();
        let raw = String::from_utf8(built.formatted()).unwrap();

        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Plain body"));
        assert!(raw.contains("<p>HTML body</p>"));
        assert!(raw.contains("Subject: Year-end checklist"));
        assert!(raw.contains("From: Ledgerpress <news@example.com>"));
    }

    #[test]
    fn test_invalid_recipient() {
        let from = parse_from(&config()).unwrap();
        let bad = EmailMessage {
            to: "not an address".into(),
            ..message()
        };
        assert!(build_message(&from, &bad).is_err());
    }
}
