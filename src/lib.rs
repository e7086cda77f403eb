//! Ledgerpress - content backend for an accounting firm's website
//!
//! Blog posts, categories and tags, a newsletter, RSS import, AI writing
//! helpers, marketing campaigns and scheduled social posts behind a JSON API.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod scheduler;
pub mod services;
