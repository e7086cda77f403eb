//! RSS subsystem
//!
//! External feeds are fetched with reqwest, parsed by tag matching and stored
//! item by item (insert-or-ignore on `(feed_id, guid)`). Items can be turned
//! into draft posts exactly once.

pub mod parser;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::RssConfig;
use crate::db::repositories::{CategoryRepository, RssRepository};
use crate::models::{
    CreateFeedInput, CreatePostInput, FeedRefreshReport, ItemFilter, ListParams, PagedResult,
    Post, RssFeed, RssItem, UpdateFeedInput, User,
};
use crate::services::category::generate_slug;
use crate::services::post::{PostService, PostServiceError};

pub use parser::parse_feed;

#[derive(Debug, Error)]
pub enum RssError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Feed URL already registered: {0}")]
    DuplicateUrl(String),

    #[error("Item {0} has already been imported")]
    AlreadyImported(i64),

    #[error("Failed to fetch feed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Post(#[from] PostServiceError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct RssService {
    repo: Arc<dyn RssRepository>,
    categories: Arc<dyn CategoryRepository>,
    posts: Arc<PostService>,
    client: reqwest::Client,
    config: RssConfig,
}

impl RssService {
    pub fn new(
        repo: Arc<dyn RssRepository>,
        categories: Arc<dyn CategoryRepository>,
        posts: Arc<PostService>,
        config: RssConfig,
    ) -> Result<Self, RssError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(concat!("ledgerpress/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            repo,
            categories,
            posts,
            client,
            config,
        })
    }

    // ----- feeds -----

    pub async fn create_feed(&self, input: CreateFeedInput) -> Result<RssFeed, RssError> {
        let name = validate_name(&input.name)?;
        let url = validate_url(&input.url)?;
        self.check_category(input.category_id).await?;

        if self
            .repo
            .get_feed_by_url(&url)
            .await
            .context("Failed to check feed URL")?
            .is_some()
        {
            return Err(RssError::DuplicateUrl(url));
        }

        let feed = RssFeed {
            id: 0,
            name,
            url,
            category_id: input.category_id,
            is_active: input.is_active.unwrap_or(true),
            last_fetched_at: None,
            last_error: None,
            created_at: chrono::Utc::now(),
        };
        let created = self
            .repo
            .create_feed(&feed)
            .await
            .context("Failed to create feed")?;
        tracing::info!("RSS feed added: {} ({})", created.name, created.url);
        Ok(created)
    }

    pub async fn get_feed(&self, id: i64) -> Result<RssFeed, RssError> {
        self.repo
            .get_feed(id)
            .await
            .context("Failed to get feed")?
            .ok_or_else(|| RssError::NotFound(format!("feed {}", id)))
    }

    pub async fn list_feeds(&self) -> Result<Vec<RssFeed>, RssError> {
        Ok(self.repo.list_feeds().await.context("Failed to list feeds")?)
    }

    pub async fn update_feed(&self, id: i64, input: UpdateFeedInput) -> Result<RssFeed, RssError> {
        let mut feed = self.get_feed(id).await?;

        if let Some(name) = input.name {
            feed.name = validate_name(&name)?;
        }
        if let Some(url) = input.url {
            let url = validate_url(&url)?;
            if url != feed.url {
                let existing = self
                    .repo
                    .get_feed_by_url(&url)
                    .await
                    .context("Failed to check feed URL")?;
                if existing.is_some_and(|f| f.id != id) {
                    return Err(RssError::DuplicateUrl(url));
                }
                feed.url = url;
            }
        }
        if input.category_id.is_some() {
            self.check_category(input.category_id).await?;
            feed.category_id = input.category_id;
        }
        if let Some(active) = input.is_active {
            feed.is_active = active;
        }

        self.repo
            .update_feed(&feed)
            .await
            .context("Failed to update feed")?;
        Ok(feed)
    }

    pub async fn delete_feed(&self, id: i64) -> Result<(), RssError> {
        let deleted = self
            .repo
            .delete_feed(id)
            .await
            .context("Failed to delete feed")?;
        if !deleted {
            return Err(RssError::NotFound(format!("feed {}", id)));
        }
        Ok(())
    }

    pub async fn active_feed_count(&self) -> Result<usize, RssError> {
        Ok(self
            .repo
            .list_active_feeds()
            .await
            .context("Failed to list feeds")?
            .len())
    }

    // ----- items -----

    pub async fn list_items(
        &self,
        filter: &ItemFilter,
        params: &ListParams,
    ) -> Result<PagedResult<RssItem>, RssError> {
        let items = self
            .repo
            .list_items(filter, params.offset(), params.limit())
            .await
            .context("Failed to list items")?;
        let total = self
            .repo
            .count_items(filter)
            .await
            .context("Failed to count items")?;
        Ok(PagedResult::new(items, total, params))
    }

    // ----- refresh -----

    /// Fetch one feed and store its new items. The outcome, success or
    /// not, is recorded on the feed.
    pub async fn refresh_feed(&self, id: i64) -> Result<usize, RssError> {
        let feed = self.get_feed(id).await?;
        self.refresh(&feed).await
    }

    /// Refresh every active feed with bounded concurrency. A failing feed
    /// shows up in its report and does not affect the others.
    pub async fn refresh_all(&self) -> Result<Vec<FeedRefreshReport>, RssError> {
        let feeds = self
            .repo
            .list_active_feeds()
            .await
            .context("Failed to list active feeds")?;
        let concurrency = self.config.max_concurrent_fetches.max(1);

        let reports: Vec<FeedRefreshReport> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.refresh(&feed).await;
                match result {
                    Ok(new_items) => FeedRefreshReport {
                        feed_id: feed.id,
                        feed_name: feed.name,
                        new_items,
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!("RSS feed {} failed: {}", feed.name, e);
                        FeedRefreshReport {
                            feed_id: feed.id,
                            feed_name: feed.name,
                            new_items: 0,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let new_items: usize = reports.iter().map(|r| r.new_items).sum();
        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        tracing::info!(
            "RSS refresh: {} feeds, {} new items, {} failed",
            reports.len(),
            new_items,
            failed
        );
        Ok(reports)
    }

    async fn refresh(&self, feed: &RssFeed) -> Result<usize, RssError> {
        let fetched = self.fetch(&feed.url).await;
        let now = chrono::Utc::now();

        let body = match fetched {
            Ok(body) => body,
            Err(e) => {
                self.repo
                    .record_fetch(feed.id, now, Some(&e.to_string()))
                    .await
                    .context("Failed to record fetch")?;
                return Err(e);
            }
        };

        let mut new_items = 0;
        for item in parse_feed(&body, self.config.max_items_per_feed) {
            let inserted = self
                .repo
                .insert_item(feed.id, &item)
                .await
                .context("Failed to store feed item")?;
            if inserted {
                new_items += 1;
            }
        }

        self.repo
            .record_fetch(feed.id, now, None)
            .await
            .context("Failed to record fetch")?;
        tracing::debug!("RSS feed {}: {} new items", feed.name, new_items);
        Ok(new_items)
    }

    async fn fetch(&self, url: &str) -> Result<String, RssError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RssError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RssError::Fetch(format!("{} returned {}", url, status)));
        }

        response
            .text()
            .await
            .map_err(|e| RssError::Fetch(e.to_string()))
    }

    // ----- import -----

    /// Create a draft post from an item. Each item can be imported once.
    pub async fn import_item(&self, item_id: i64, author: &User) -> Result<Post, RssError> {
        let item = self
            .repo
            .get_item(item_id)
            .await
            .context("Failed to get item")?
            .ok_or_else(|| RssError::NotFound(format!("item {}", item_id)))?;
        if item.imported {
            return Err(RssError::AlreadyImported(item.id));
        }
        let feed = self.get_feed(item.feed_id).await?;

        let input = CreatePostInput {
            title: item.title.clone(),
            content: import_content(&item),
            category_ids: feed.category_id.into_iter().collect(),
            ..Default::default()
        };
        let post = match self.posts.create(author.id, input.clone()).await {
            Err(PostServiceError::DuplicateSlug(_)) => {
                let slug = format!("{}-{}", generate_slug(&item.title), item.id);
                self.posts
                    .create(
                        author.id,
                        CreatePostInput {
                            slug: Some(slug),
                            ..input
                        },
                    )
                    .await?
            }
            other => other?,
        };

        let marked = self
            .repo
            .mark_imported(item.id, post.id)
            .await
            .context("Failed to mark item imported")?;
        if !marked {
            // Lost a race with a concurrent import
            self.posts.delete(author, post.id).await?;
            return Err(RssError::AlreadyImported(item.id));
        }

        tracing::info!("RSS item {} imported as post {}", item.id, post.slug);
        Ok(post)
    }

    async fn check_category(&self, category_id: Option<i64>) -> Result<(), RssError> {
        if let Some(id) = category_id {
            let found = self
                .categories
                .get_by_id(id)
                .await
                .context("Failed to get category")?;
            if found.is_none() {
                return Err(RssError::ValidationError(format!(
                    "Unknown category: {}",
                    id
                )));
            }
        }
        Ok(())
    }
}

/// Markdown body of a post imported from `item`
fn import_content(item: &RssItem) -> String {
    let mut content = item.description.clone().unwrap_or_default();
    if let Some(link) = &item.link {
        if !content.is_empty() {
            content.push_str("\n\n");
        }
        content.push_str(&format!("Originally published at <{}>", link));
    }
    content
}

fn validate_name(name: &str) -> Result<String, RssError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RssError::ValidationError(
            "Feed name cannot be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_url(url: &str) -> Result<String, RssError> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| RssError::ValidationError("Feed URL must be http or https".to_string()))?;
    if rest.is_empty() || rest.starts_with('/') || rest.contains(char::is_whitespace) {
        return Err(RssError::ValidationError(format!("Invalid feed URL: {}", url)));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::CacheConfig;
    use crate::db::repositories::{
        SqlxCategoryRepository, SqlxPostRepository, SqlxRssRepository, SqlxTagRepository,
        SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Category, PostStatus, UserRole};
    use crate::services::tag::TagService;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<rss version="2.0"><channel><title>Newsroom</title>
<item><title>Mileage rates</title><link>https://news.example.gov/mileage</link>
<guid>n-1</guid><description>Rates rise to 70 cents.</description></item>
<item><title>Filing season opens</title><link>https://news.example.gov/season</link>
<guid>n-2</guid></item>
</channel></rss>"#;

    struct Fixture {
        service: RssService,
        author: User,
        category: Category,
    }

    async fn setup_test_service() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let author = SqlxUserRepository::new(pool.clone())
            .create(&User::new(
                "editor@example.com".into(),
                "Editor".into(),
                "x".into(),
                UserRole::Editor,
            ))
            .await
            .unwrap();
        let categories = SqlxCategoryRepository::boxed(pool.clone());
        let category = categories
            .create(&Category::new("irs-news".into(), "IRS News".into(), None))
            .await
            .unwrap();

        let posts = Arc::new(PostService::new(
            SqlxPostRepository::boxed(pool.clone()),
            categories.clone(),
            Arc::new(TagService::new(SqlxTagRepository::boxed(pool.clone()))),
            create_cache(&CacheConfig::default()),
        ));
        let config = RssConfig {
            fetch_timeout_secs: 5,
            ..RssConfig::default()
        };
        let service = RssService::new(SqlxRssRepository::boxed(pool), categories, posts, config)
            .expect("Failed to create service");

        Fixture {
            service,
            author,
            category,
        }
    }

    async fn feed_server(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn feed_input(name: &str, url: String) -> CreateFeedInput {
        CreateFeedInput {
            name: name.into(),
            url,
            category_id: None,
            is_active: None,
        }
    }

    #[tokio::test]
    async fn test_create_feed_validation() {
        let fx = setup_test_service().await;

        for url in ["ftp://example.com/feed", "example.com/feed", "https://", "https:// x"] {
            let err = fx
                .service
                .create_feed(feed_input("Bad", url.into()))
                .await
                .unwrap_err();
            assert!(matches!(err, RssError::ValidationError(_)), "{}", url);
        }

        let err = fx
            .service
            .create_feed(feed_input("  ", "https://example.com/feed".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RssError::ValidationError(_)));

        let feed = fx
            .service
            .create_feed(feed_input("IRS", "https://example.com/feed".into()))
            .await
            .unwrap();
        assert!(feed.is_active);

        let err = fx
            .service
            .create_feed(feed_input("IRS again", "https://example.com/feed".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RssError::DuplicateUrl(_)));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let fx = setup_test_service().await;
        let server = feed_server(FEED).await;

        let feed = fx
            .service
            .create_feed(feed_input("Newsroom", format!("{}/feed.xml", server.uri())))
            .await
            .unwrap();

        assert_eq!(fx.service.refresh_feed(feed.id).await.unwrap(), 2);
        assert_eq!(fx.service.refresh_feed(feed.id).await.unwrap(), 0);

        let items = fx
            .service
            .list_items(&ItemFilter::default(), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(items.total, 2);

        let feed = fx.service.get_feed(feed.id).await.unwrap();
        assert!(feed.last_fetched_at.is_some());
        assert!(feed.last_error.is_none());
    }

    #[tokio::test]
    async fn test_refresh_all_isolates_failures() {
        let fx = setup_test_service().await;
        let good = feed_server(FEED).await;
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&bad)
            .await;

        let ok_feed = fx
            .service
            .create_feed(feed_input("Good", format!("{}/feed.xml", good.uri())))
            .await
            .unwrap();
        let bad_feed = fx
            .service
            .create_feed(feed_input("Broken", format!("{}/feed.xml", bad.uri())))
            .await
            .unwrap();
        fx.service
            .create_feed(CreateFeedInput {
                is_active: Some(false),
                ..feed_input("Paused", "https://paused.example.com/rss".into())
            })
            .await
            .unwrap();

        let reports = fx.service.refresh_all().await.unwrap();
        assert_eq!(reports.len(), 2);

        let good_report = reports.iter().find(|r| r.feed_id == ok_feed.id).unwrap();
        assert_eq!(good_report.new_items, 2);
        assert!(good_report.is_ok());

        let bad_report = reports.iter().find(|r| r.feed_id == bad_feed.id).unwrap();
        assert!(bad_report.error.is_some());

        let stored = fx.service.get_feed(bad_feed.id).await.unwrap();
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn test_refresh_fetch_error() {
        let fx = setup_test_service().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let feed = fx
            .service
            .create_feed(feed_input("Gone", format!("{}/feed.xml", server.uri())))
            .await
            .unwrap();
        assert!(matches!(
            fx.service.refresh_feed(feed.id).await,
            Err(RssError::Fetch(_))
        ));
        assert!(matches!(
            fx.service.refresh_feed(9999).await,
            Err(RssError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_import_item_once() {
        let fx = setup_test_service().await;
        let server = feed_server(FEED).await;

        let feed = fx
            .service
            .create_feed(CreateFeedInput {
                category_id: Some(fx.category.id),
                ..feed_input("Newsroom", format!("{}/feed.xml", server.uri()))
            })
            .await
            .unwrap();
        fx.service.refresh_feed(feed.id).await.unwrap();

        let items = fx
            .service
            .list_items(
                &ItemFilter {
                    feed_id: Some(feed.id),
                    imported: Some(false),
                },
                &ListParams::default(),
            )
            .await
            .unwrap();
        let item = items.items.iter().find(|i| i.guid == "n-1").unwrap();

        let post = fx.service.import_item(item.id, &fx.author).await.unwrap();
        assert_eq!(post.status, PostStatus::Draft);
        assert_eq!(post.title, "Mileage rates");
        assert!(post.content.starts_with("Rates rise to 70 cents."));
        assert!(post
            .content
            .contains("Originally published at <https://news.example.gov/mileage>"));
        assert_eq!(post.category_ids(), vec![fx.category.id]);

        let err = fx.service.import_item(item.id, &fx.author).await.unwrap_err();
        assert!(matches!(err, RssError::AlreadyImported(_)));

        let imported = fx
            .service
            .list_items(
                &ItemFilter {
                    feed_id: None,
                    imported: Some(true),
                },
                &ListParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(imported.total, 1);
        assert_eq!(imported.items[0].post_id, Some(post.id));
    }

    #[tokio::test]
    async fn test_import_resolves_slug_clash() {
        let fx = setup_test_service().await;
        let server = feed_server(FEED).await;
        let feed = fx
            .service
            .create_feed(feed_input("Newsroom", format!("{}/feed.xml", server.uri())))
            .await
            .unwrap();
        fx.service.refresh_feed(feed.id).await.unwrap();

        fx.service
            .posts
            .create(
                fx.author.id,
                CreatePostInput {
                    title: "Mileage rates".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let items = fx
            .service
            .list_items(&ItemFilter::default(), &ListParams::default())
            .await
            .unwrap();
        let item = items.items.iter().find(|i| i.guid == "n-1").unwrap();

        let post = fx.service.import_item(item.id, &fx.author).await.unwrap();
        assert_eq!(post.slug, format!("mileage-rates-{}", item.id));
    }

    #[test]
    fn test_import_content_without_link() {
        let item = RssItem {
            id: 1,
            feed_id: 1,
            guid: "g".into(),
            title: "T".into(),
            link: None,
            description: Some("Body".into()),
            author: None,
            published_at: None,
            imported: false,
            post_id: None,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(import_content(&item), "Body");
    }
}
