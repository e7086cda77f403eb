//! Data models
//!
//! Database entities, API request payloads and small value types shared by
//! the repositories, services and handlers.

mod campaign;
mod category;
mod pagination;
mod post;
mod rss;
mod session;
mod social;
mod subscriber;
mod sync;
mod tag;
mod user;

pub use campaign::{
    Campaign, CampaignStatus, CreateCampaignInput, GeneratedSocialPost, PublishCampaignInput,
};
pub use category::{Category, CategoryWithCount, CreateCategoryInput, UpdateCategoryInput};
pub use pagination::{ListParams, PagedResult};
pub use post::{CreatePostInput, Post, PostFilter, PostStatus, PostStatusCounts, UpdatePostInput};
pub use rss::{
    CreateFeedInput, FeedRefreshReport, ItemFilter, ParsedItem, RssFeed, RssItem, UpdateFeedInput,
};
pub use session::Session;
pub use social::{CreateSocialPostInput, Platform, SocialPost, SocialStatus};
pub use subscriber::{SendFailure, SendReport, SubscribeInput, Subscriber, SubscriberStatus};
pub use sync::{SyncAction, SyncBatch, SyncOperation, SyncOutcome, SyncResult};
pub use tag::{Tag, TagWithCount};
pub use user::{CreateUserInput, UpdateUserInput, User, UserRole, UserStatus};
