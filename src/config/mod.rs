//! Configuration management
//!
//! Configuration is loaded from `config.yml` and then overridden by
//! `LEDGERPRESS_*` environment variables. Every section is optional; missing
//! values fall back to defaults suitable for a single-node deployment.
//!
//! Secrets (AI API key, SMTP password, signing secret) are normally supplied
//! through the environment rather than the file.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "LEDGERPRESS_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub rss: RssConfig,
    #[serde(default)]
    pub social: SocialConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (the admin front end, for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Reverse proxies whose `X-Forwarded-For` / `X-Real-IP` headers are
    /// believed. Empty means the socket peer is always the client.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Pool size; the driver's default when absent
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
            max_connections: None,
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory SQLite database
    pub fn in_memory() -> Self {
        Self {
            url: ":memory:".to_string(),
            ..Self::default()
        }
    }
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_database_url() -> String {
    "data/ledgerpress.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached entries
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_capacity: default_cache_capacity(),
        }
    }
}

fn default_ttl() -> u64 {
    600
}

fn default_cache_capacity() -> u64 {
    10_000
}

/// Public site identity, used for feed and sitemap output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_name")]
    pub name: String,
    #[serde(default = "default_site_description")]
    pub description: String,
    /// Absolute base URL of the public site, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Number of posts in /rss.xml
    #[serde(default = "default_feed_item_limit")]
    pub feed_item_limit: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: default_site_name(),
            description: default_site_description(),
            base_url: default_base_url(),
            feed_item_limit: default_feed_item_limit(),
        }
    }
}

impl SiteConfig {
    /// Join a site-relative path onto the base URL
    pub fn absolute_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn default_site_name() -> String {
    "Ledgerpress Accounting".to_string()
}

fn default_site_description() -> String {
    "Tax, bookkeeping and advisory insights".to_string()
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_feed_item_limit() -> u32 {
    20
}

/// Upload (object storage) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Upload directory path
    #[serde(default = "default_upload_path")]
    pub path: PathBuf,
    /// Maximum file size in bytes (default: 10MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Allowed MIME types
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: default_upload_path(),
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_upload_path() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/gif".to_string(),
        "image/webp".to_string(),
        "application/pdf".to_string(),
    ]
}

impl UploadConfig {
    /// Check if a MIME type is allowed
    pub fn is_type_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types.iter().any(|t| t == mime_type)
    }

    /// Get file extension for a MIME type
    pub fn get_extension(&self, mime_type: &str) -> &'static str {
        match mime_type {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            "application/pdf" => "pdf",
            _ => "bin",
        }
    }
}

/// AI completion provider configuration (OpenAI-compatible API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_temperature")]
    pub temperature: f32,
    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            api_key: None,
            model: default_ai_model(),
            temperature: default_ai_temperature(),
            max_tokens: default_ai_max_tokens(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

impl AiConfig {
    /// An API key is the only hard requirement for the provider
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().map_or(false, |k| !k.trim().is_empty())
    }
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_temperature() -> f32 {
    0.7
}

fn default_ai_max_tokens() -> u32 {
    1200
}

fn default_ai_timeout() -> u64 {
    60
}

/// Outbound email (SMTP) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_address: default_from_address(),
            from_name: default_from_name(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.as_deref().map_or(false, |h| !h.trim().is_empty())
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "newsletter@localhost".to_string()
}

fn default_from_name() -> String {
    "Ledgerpress".to_string()
}

/// RSS ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    /// Seconds between automatic refreshes of all active feeds (0 disables)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_max_items_per_feed")]
    pub max_items_per_feed: usize,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_items_per_feed: default_max_items_per_feed(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_max_items_per_feed() -> usize {
    50
}

/// Social post delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialConfig {
    /// Webhook receiving due social posts (e.g. an automation service)
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_attempts: default_max_attempts(),
            dispatch_interval_secs: default_dispatch_interval(),
        }
    }
}

fn default_max_attempts() -> i32 {
    5
}

fn default_dispatch_interval() -> u64 {
    60
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Secret used to sign unsubscribe links
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Session lifetime in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            session_days: default_session_days(),
        }
    }
}

fn default_secret() -> String {
    "change-me".to_string()
}

fn default_session_days() -> i64 {
    7
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

impl Config {
    /// Load configuration from file
    ///
    /// A missing or empty file yields the default configuration; invalid YAML
    /// is an error that carries the line and column.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        Ok(config)
    }

    /// Load configuration from file, then apply `LEDGERPRESS_*` overrides
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(host) = env_var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("SERVER_PORT") {
            self.server.port = port;
        }
        if let Some(origin) = env_var("SERVER_CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Some(proxies) = env_var("SERVER_TRUSTED_PROXIES") {
            self.server.trusted_proxies = proxies
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect();
        }

        if let Some(driver) = env_var("DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {}
            }
        }
        if let Some(url) = env_var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(ttl) = env_parse("CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = ttl;
        }

        if let Some(base_url) = env_var("SITE_BASE_URL") {
            self.site.base_url = base_url;
        }
        if let Some(name) = env_var("SITE_NAME") {
            self.site.name = name;
        }

        if let Some(path) = env_var("UPLOAD_PATH") {
            self.upload.path = PathBuf::from(path);
        }

        if let Some(base_url) = env_var("AI_BASE_URL") {
            self.ai.base_url = base_url;
        }
        if let Some(key) = env_var("AI_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(model) = env_var("AI_MODEL") {
            self.ai.model = model;
        }

        if let Some(host) = env_var("EMAIL_SMTP_HOST") {
            self.email.smtp_host = Some(host);
        }
        if let Some(port) = env_parse("EMAIL_SMTP_PORT") {
            self.email.smtp_port = port;
        }
        if let Some(username) = env_var("EMAIL_SMTP_USERNAME") {
            self.email.smtp_username = Some(username);
        }
        if let Some(password) = env_var("EMAIL_SMTP_PASSWORD") {
            self.email.smtp_password = Some(password);
        }
        if let Some(from) = env_var("EMAIL_FROM_ADDRESS") {
            self.email.from_address = from;
        }

        if let Some(interval) = env_parse("RSS_REFRESH_INTERVAL_SECS") {
            self.rss.refresh_interval_secs = interval;
        }

        if let Some(url) = env_var("SOCIAL_WEBHOOK_URL") {
            self.social.webhook_url = Some(url);
        }

        if let Some(secret) = env_var("SECURITY_SECRET") {
            self.security.secret = secret;
        }
        if let Some(days) = env_parse("SECURITY_SESSION_DAYS") {
            self.security.session_days = days;
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

/// Parse an override, ignoring values that don't parse
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
