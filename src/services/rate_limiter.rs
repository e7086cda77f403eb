//! Login rate limiting
//!
//! Two sliding windows guard the login endpoint:
//! - failed attempts per email: 5 per 15 minutes
//! - requests per client IP: 10 per minute

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::RwLock;

const MAX_FAILED_PER_EMAIL: usize = 5;
const EMAIL_WINDOW_MINUTES: i64 = 15;
const MAX_REQUESTS_PER_IP: usize = 10;
const IP_WINDOW_MINUTES: i64 = 1;

pub struct LoginRateLimiter {
    email_failures: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
    ip_requests: RwLock<HashMap<IpAddr, Vec<DateTime<Utc>>>>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            email_failures: RwLock::new(HashMap::new()),
            ip_requests: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the email has used up its failed attempts
    pub async fn is_email_limited(&self, email: &str) -> bool {
        let cutoff = Utc::now() - Duration::minutes(EMAIL_WINDOW_MINUTES);
        let mut failures = self.email_failures.write().await;
        match failures.get_mut(&email.to_lowercase()) {
            Some(times) => {
                times.retain(|t| *t > cutoff);
                times.len() >= MAX_FAILED_PER_EMAIL
            }
            None => false,
        }
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        self.email_failures
            .write()
            .await
            .entry(email.to_lowercase())
            .or_default()
            .push(Utc::now());
    }

    /// Forget failures after a successful login
    pub async fn clear_email(&self, email: &str) {
        self.email_failures.write().await.remove(&email.to_lowercase());
    }

    /// Record a login request from `ip` and report whether it is over the limit.
    /// Requests rejected for being over the limit are not counted.
    pub async fn check_ip(&self, ip: IpAddr) -> bool {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(IP_WINDOW_MINUTES);
        let mut requests = self.ip_requests.write().await;
        let times = requests.entry(ip).or_default();
        times.retain(|t| *t > cutoff);

        if times.len() >= MAX_REQUESTS_PER_IP {
            return true;
        }
        times.push(now);
        false
    }

    /// Drop windows with no recent entries; returns how many keys were removed
    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        let email_cutoff = now - Duration::minutes(EMAIL_WINDOW_MINUTES);
        let ip_cutoff = now - Duration::minutes(IP_WINDOW_MINUTES);
        let mut removed = 0;

        {
            let mut failures = self.email_failures.write().await;
            let before = failures.len();
            failures.retain(|_, times| {
                times.retain(|t| *t > email_cutoff);
                !times.is_empty()
            });
            removed += before - failures.len();
        }
        {
            let mut requests = self.ip_requests.write().await;
            let before = requests.len();
            requests.retain(|_, times| {
                times.retain(|t| *t > ip_cutoff);
                !times.is_empty()
            });
            removed += before - requests.len();
        }

        removed
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_email_limit_after_five_failures() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..4 {
            limiter.record_failed_attempt("owner@example.com").await;
        }
        assert!(!limiter.is_email_limited("owner@example.com").await);

        limiter.record_failed_attempt("owner@example.com").await;
        assert!(limiter.is_email_limited("owner@example.com").await);

        limiter.clear_email("owner@example.com").await;
        assert!(!limiter.is_email_limited("owner@example.com").await);
    }

    #[tokio::test]
    async fn test_email_is_case_insensitive() {
        let limiter = LoginRateLimiter::new();
        for email in ["A@x.com", "a@x.com", "A@X.COM", "a@X.com", "a@x.COM"] {
            limiter.record_failed_attempt(email).await;
        }
        assert!(limiter.is_email_limited("a@x.com").await);
    }

    #[tokio::test]
    async fn test_ip_limit() {
        let limiter = LoginRateLimiter::new();
        let ip = IpAddr::from_str("10.0.0.1").unwrap();
        let other = IpAddr::from_str("10.0.0.2").unwrap();

        for _ in 0..10 {
            assert!(!limiter.check_ip(ip).await);
        }
        assert!(limiter.check_ip(ip).await);
        assert!(!limiter.check_ip(other).await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_windows() {
        let limiter = LoginRateLimiter::new();
        limiter.record_failed_attempt("a@x.com").await;
        limiter.check_ip(IpAddr::from_str("10.0.0.1").unwrap()).await;

        assert_eq!(limiter.cleanup().await, 0);
        assert!(!limiter.is_email_limited("a@x.com").await);
    }
}
