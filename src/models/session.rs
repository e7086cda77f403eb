//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login session; `id` is the opaque token handed to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
