//! Public XML output: the blog's RSS feed and the sitemap
//!
//! Both documents are cached under `feeds:` and dropped together with the
//! post cache whenever content changes.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;
use std::sync::Arc;

use crate::cache::{Cache, CacheLayer, FEEDS_PREFIX};
use crate::config::SiteConfig;
use crate::db::repositories::CategoryRepository;
use crate::models::Post;
use crate::services::post::{PostService, PostServiceError};

/// Marketing pages always listed in the sitemap
pub const STATIC_PATHS: [&str; 5] = ["/", "/about", "/services", "/contact", "/blog"];

pub struct FeedService {
    posts: Arc<PostService>,
    categories: Arc<dyn CategoryRepository>,
    cache: Arc<Cache>,
    site: SiteConfig,
}

impl FeedService {
    pub fn new(
        posts: Arc<PostService>,
        categories: Arc<dyn CategoryRepository>,
        cache: Arc<Cache>,
        site: SiteConfig,
    ) -> Self {
        Self {
            posts,
            categories,
            cache,
            site,
        }
    }

    /// RSS 2.0 document of the latest published posts
    pub async fn rss(&self) -> Result<String, PostServiceError> {
        let key = format!("{}rss", FEEDS_PREFIX);
        if let Ok(Some(xml)) = self.cache.get::<String>(&key).await {
            return Ok(xml);
        }

        let posts = self
            .posts
            .latest_published(self.site.feed_item_limit as i64)
            .await?;
        let xml = render_rss(&self.site, &posts);

        self.store(&key, &xml).await;
        Ok(xml)
    }

    pub async fn sitemap(&self) -> Result<String, PostServiceError> {
        let key = format!("{}sitemap", FEEDS_PREFIX);
        if let Ok(Some(xml)) = self.cache.get::<String>(&key).await {
            return Ok(xml);
        }

        let posts = self.posts.published_slugs().await?;
        let categories: Vec<String> = self
            .categories
            .list()
            .await
            .context("Failed to list categories")?
            .into_iter()
            .map(|c| c.slug)
            .collect();
        let xml = render_sitemap(&self.site, &posts, &categories);

        self.store(&key, &xml).await;
        Ok(xml)
    }

    async fn store(&self, key: &str, xml: &String) {
        if let Err(e) = self.cache.set(key, xml, self.cache.default_ttl()).await {
            tracing::warn!("Failed to cache {}: {}", key, e);
        }
    }
}

pub fn render_rss(site: &SiteConfig, posts: &[Post]) -> String {
    let mut xml = String::with_capacity(1024 + posts.len() * 512);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<rss version=\"2.0\" xmlns:atom=\"http://www.w3.org/2005/Atom\">\n<channel>\n");
    let _ = writeln!(xml, "  <title>{}</title>", xml_escape(&site.name));
    let _ = writeln!(xml, "  <link>{}</link>", xml_escape(&site.absolute_url("/")));
    let _ = writeln!(
        xml,
        "  <description>{}</description>",
        xml_escape(&site.description)
    );
    let _ = writeln!(
        xml,
        "  <atom:link href=\"{}\" rel=\"self\" type=\"application/rss+xml\"/>",
        xml_escape(&site.absolute_url("/rss.xml"))
    );
    if let Some(latest) = posts.iter().filter_map(|p| p.published_at).max() {
        let _ = writeln!(xml, "  <lastBuildDate>{}</lastBuildDate>", latest.to_rfc2822());
    }

    for post in posts {
        let link = post_url(site, &post.slug);
        xml.push_str("  <item>\n");
        let _ = writeln!(xml, "    <title>{}</title>", xml_escape(&post.title));
        let _ = writeln!(xml, "    <link>{}</link>", xml_escape(&link));
        let _ = writeln!(
            xml,
            "    <guid isPermaLink=\"true\">{}</guid>",
            xml_escape(&link)
        );
        if let Some(published) = post.published_at {
            let _ = writeln!(xml, "    <pubDate>{}</pubDate>", published.to_rfc2822());
        }
        if let Some(excerpt) = &post.excerpt {
            let _ = writeln!(
                xml,
                "    <description>{}</description>",
                xml_escape(excerpt)
            );
        }
        for category in &post.categories {
            let _ = writeln!(xml, "    <category>{}</category>", xml_escape(&category.name));
        }
        xml.push_str("  </item>\n");
    }

    xml.push_str("</channel>\n</rss>\n");
    xml
}

/// Public address of a post; slugs may carry non-ASCII letters
fn post_url(site: &SiteConfig, slug: &str) -> String {
    site.absolute_url(&format!("/blog/{}", urlencoding::encode(slug)))
}

pub fn render_sitemap(
    site: &SiteConfig,
    posts: &[(String, DateTime<Utc>)],
    category_slugs: &[String],
) -> String {
    let mut xml = String::with_capacity(512 + (posts.len() + category_slugs.len()) * 128);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n");

    let mut entry = |loc: &str, lastmod: Option<&DateTime<Utc>>| {
        xml.push_str("  <url>\n");
        let _ = writeln!(xml, "    <loc>{}</loc>", xml_escape(loc));
        if let Some(at) = lastmod {
            let _ = writeln!(
                xml,
                "    <lastmod>{}</lastmod>",
                at.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
        }
        xml.push_str("  </url>\n");
    };

    for path in STATIC_PATHS {
        entry(&site.absolute_url(path), None);
    }
    for (slug, updated_at) in posts {
        let loc = post_url(site, slug);
        entry(&loc, Some(updated_at));
    }
    for slug in category_slugs {
        entry(
            &site.absolute_url(&format!("/blog/category/{}", urlencoding::encode(slug))),
            None,
        );
    }

    xml.push_str("</urlset>\n");
    xml
}

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Not representable in XML 1.0
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::CacheConfig;
    use crate::db::repositories::{
        SqlxCategoryRepository, SqlxPostRepository, SqlxTagRepository, SqlxUserRepository,
        UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Category, CreatePostInput, PostStatus, UpdatePostInput, User, UserRole};
    use crate::services::tag::TagService;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn site() -> SiteConfig {
        SiteConfig {
            name: "Hart & Co".into(),
            description: "Tax <advice>".into(),
            base_url: "https://hart.example".into(),
            feed_item_limit: 20,
        }
    }

    fn published_post(slug: &str, published: DateTime<Utc>) -> Post {
        Post {
            id: 1,
            slug: slug.into(),
            title: "Q1 \"deadlines\" & you".into(),
            excerpt: Some("Pay <before> April".into()),
            content: String::new(),
            content_html: String::new(),
            featured_image: None,
            author_id: 1,
            status: PostStatus::Published,
            seo_title: None,
            seo_description: None,
            reading_time_minutes: 1,
            published_at: Some(published),
            scheduled_at: None,
            created_at: published,
            updated_at: published,
            categories: vec![Category::new("tax".into(), "Tax & VAT".into(), None)],
            tags: vec![],
        }
    }

    #[test]
    fn test_render_rss_escapes_text() {
        let published = Utc.with_ymd_and_hms(2024, 4, 15, 9, 0, 0).unwrap();
        let post = published_post("q1-deadlines", published);

        let xml = render_rss(&site(), &[post]);
        assert!(xml.contains("<title>Hart &amp; Co</title>"));
        assert!(xml.contains("<description>Tax &lt;advice&gt;</description>"));
        assert!(xml.contains("<title>Q1 &quot;deadlines&quot; &amp; you</title>"));
        assert!(xml.contains("<link>https://hart.example/blog/q1-deadlines</link>"));
        assert!(xml.contains("<pubDate>Mon, 15 Apr 2024 09:00:00 +0000</pubDate>"));
        assert!(xml.contains("<description>Pay &lt;before&gt; April</description>"));
        assert!(xml.contains("<category>Tax &amp; VAT</category>"));
    }

    #[test]
    fn test_render_sitemap() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let xml = render_sitemap(&site(), &[("payroll-101".into(), at)], &["tax".into()]);

        for path in ["", "about", "services", "contact", "blog"] {
            assert!(xml.contains(&format!("<loc>https://hart.example/{}</loc>", path)));
        }
        assert!(xml.contains("<loc>https://hart.example/blog/payroll-101</loc>"));
        assert!(xml.contains("<lastmod>2024-05-01T12:00:00Z</lastmod>"));
        assert!(xml.contains("<loc>https://hart.example/blog/category/tax</loc>"));
    }

    #[test]
    fn test_rss_and_sitemap_agree_on_non_ascii_slug() {
        let published = Utc.with_ymd_and_hms(2024, 4, 15, 9, 0, 0).unwrap();
        let post = published_post("impôt-2024", published);
        let expected = "https://hart.example/blog/imp%C3%B4t-2024";

        let rss = render_rss(&site(), &[post]);
        assert!(rss.contains(&format!("<link>{}</link>", expected)));
        assert!(rss.contains(&format!("<guid isPermaLink=\"true\">{}</guid>", expected)));
        assert!(!rss.contains("impôt"));

        let sitemap = render_sitemap(&site(), &[("impôt-2024".into(), published)], &[]);
        assert!(sitemap.contains(&format!("<loc>{}</loc>", expected)));
    }

    #[tokio::test]
    async fn test_feed_cache_invalidated_by_post_changes() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let admin = SqlxUserRepository::new(pool.clone())
            .create(&User::new("a@example.com".into(), "A".into(), "x".into(), UserRole::Admin))
            .await
            .unwrap();

        let cache = create_cache(&CacheConfig::default());
        let categories = SqlxCategoryRepository::boxed(pool.clone());
        let posts = Arc::new(PostService::new(
            SqlxPostRepository::boxed(pool.clone()),
            categories.clone(),
            Arc::new(TagService::new(SqlxTagRepository::boxed(pool))),
            cache.clone(),
        ));
        let feeds = FeedService::new(posts.clone(), categories, cache, site());

        let post = posts
            .create(
                admin.id,
                CreatePostInput {
                    title: "First Post".into(),
                    status: Some(PostStatus::Published),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let draft = posts
            .create(
                admin.id,
                CreatePostInput {
                    title: "Hidden Draft".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = feeds.rss().await.unwrap();
        assert!(first.contains("First Post"));
        assert!(!first.contains("Hidden Draft"));

        posts
            .update(
                &admin,
                draft.id,
                UpdatePostInput {
                    status: Some(PostStatus::Published),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let second = feeds.rss().await.unwrap();
        assert!(second.contains("Hidden Draft"));

        let sitemap = feeds.sitemap().await.unwrap();
        assert!(sitemap.contains(&format!("/blog/{}", post.slug)));
        assert!(sitemap.contains("/blog/hidden-draft"));
    }

    proptest! {
        #[test]
        fn xml_escape_leaves_no_markup(s in "\\PC{0,64}") {
            let escaped = xml_escape(&s);
            prop_assert!(!escaped.contains('<'));
            prop_assert!(!escaped.contains('>'));
            prop_assert!(!escaped.contains('"'));
            prop_assert!(escaped.matches('&').count() == escaped.matches(';').count() - s.matches(';').count());
        }
    }
}
