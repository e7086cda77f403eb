//! Services layer - Business logic
//!
//! Services implement the business rules on top of the repositories:
//! validation, slugging, rendering, cache invalidation and the calls out to
//! email, AI and webhook endpoints.

pub mod ai;
pub mod campaign;
pub mod category;
pub mod email;
pub mod feeds;
pub mod markdown;
pub mod newsletter;
pub mod password;
pub mod post;
pub mod rate_limiter;
pub mod rss;
pub mod settings;
pub mod social;
pub mod sync;
pub mod tag;
pub mod user;

pub use ai::{AiError, AiService};
pub use campaign::{CampaignError, CampaignService};
pub use category::{generate_slug, CategoryService, CategoryServiceError};
pub use email::{EmailSender, SmtpEmailSender};
pub use feeds::FeedService;
pub use markdown::MarkdownRenderer;
pub use newsletter::{NewsletterError, NewsletterService};
pub use password::{hash_password, verify_password};
pub use post::{PostService, PostServiceError};
pub use rate_limiter::LoginRateLimiter;
pub use rss::{RssError, RssService};
pub use settings::{SettingsService, SettingsServiceError, SiteSettings};
pub use social::{SocialDispatcher, SocialError, SocialService};
pub use sync::{SyncError, SyncService};
pub use tag::{TagService, TagServiceError};
pub use user::{LoginInput, SetupInput, UserService, UserServiceError};
