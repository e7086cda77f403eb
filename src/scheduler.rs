//! Background jobs
//!
//! Each job runs on its own tokio interval. A failing tick is logged and the
//! job keeps running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::{LoginRateLimiter, PostService, RssService, SocialDispatcher, UserService};

pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(60);
pub const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
pub const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

pub struct Scheduler {
    pub posts: Arc<PostService>,
    pub rss: Arc<RssService>,
    pub users: Arc<UserService>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    /// Absent when no webhook is configured
    pub social: Option<Arc<SocialDispatcher>>,
    /// Zero disables automatic feed refresh
    pub rss_interval: Duration,
    pub social_interval: Duration,
}

impl Scheduler {
    /// Start every job; the handles may be dropped to detach them
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let posts = self.posts.clone();
        handles.push(every("publish-scheduled", PUBLISH_INTERVAL, move || {
            let posts = posts.clone();
            async move {
                let ids = posts.publish_due().await?;
                if !ids.is_empty() {
                    tracing::info!("Scheduler published {} post(s)", ids.len());
                }
                Ok::<(), anyhow::Error>(())
            }
        }));

        if self.rss_interval.is_zero() {
            tracing::info!("Automatic RSS refresh disabled");
        } else {
            let rss = self.rss.clone();
            handles.push(every("rss-refresh", self.rss_interval, move || {
                let rss = rss.clone();
                async move {
                    rss.refresh_all().await?;
                    Ok::<(), anyhow::Error>(())
                }
            }));
        }

        match self.social {
            Some(dispatcher) => {
                handles.push(every("social-dispatch", self.social_interval, move || {
                    let dispatcher = dispatcher.clone();
                    async move {
                        let report = dispatcher.dispatch_due().await?;
                        if report != Default::default() {
                            tracing::info!(
                                "Social dispatch: {} posted, {} retrying, {} failed",
                                report.posted,
                                report.retried,
                                report.failed
                            );
                        }
                        Ok::<(), anyhow::Error>(())
                    }
                }));
            }
            None => tracing::info!("No social webhook configured, dispatcher not started"),
        }

        let users = self.users.clone();
        handles.push(every("session-cleanup", SESSION_CLEANUP_INTERVAL, move || {
            let users = users.clone();
            async move {
                let removed = users.cleanup_expired_sessions().await?;
                if removed > 0 {
                    tracing::info!("Removed {} expired session(s)", removed);
                }
                Ok::<(), anyhow::Error>(())
            }
        }));

        let limiter = self.rate_limiter.clone();
        handles.push(every(
            "rate-limit-cleanup",
            RATE_LIMIT_CLEANUP_INTERVAL,
            move || {
                let limiter = limiter.clone();
                async move {
                    limiter.cleanup().await;
                    Ok::<(), anyhow::Error>(())
                }
            },
        ));

        handles
    }
}

/// Run `job` every `period`, logging errors
pub fn every<F, Fut, E>(name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: std::fmt::Display,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = job().await {
                tracing::warn!("Background job {} failed: {}", name, e);
            }
        }
    })
}
