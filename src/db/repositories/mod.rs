//! Database repositories
//!
//! One repository trait per aggregate, each with an SQLx implementation that
//! dispatches on the configured driver.

pub mod campaign;
pub mod category;
pub mod post;
pub mod rss;
pub mod session;
pub mod settings;
pub mod social;
pub mod subscriber;
pub mod sync;
pub mod tag;
pub mod user;

pub use campaign::{CampaignRepository, SqlxCampaignRepository};
pub use category::{CategoryRepository, SqlxCategoryRepository};
pub use post::{PostRepository, SqlxPostRepository};
pub use rss::{RssRepository, SqlxRssRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use settings::{Setting, SettingsRepository, SqlxSettingsRepository};
pub use social::{SocialPostRepository, SqlxSocialPostRepository};
pub use subscriber::{SqlxSubscriberRepository, SubscriberRepository};
pub use sync::{SqlxSyncRepository, SyncRepository};
pub use tag::{SqlxTagRepository, TagRepository};
pub use user::{SqlxUserRepository, UserRepository};
