//! User (profile) model
//!
//! Admin-panel accounts, stored in the `profiles` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An admin-panel account.
///
/// Roles determine what a user can do: admins manage everything including
/// other profiles, editors manage all content, authors only their own posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Login identifier (unique, lowercased)
    pub email: String,
    pub display_name: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new User. The password must already be hashed.
    pub fn new(email: String, display_name: String, password_hash: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            email,
            display_name,
            password_hash,
            role,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Editors and admins
    pub fn is_editor(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::Editor)
    }

    /// Editors edit anything; authors only their own posts
    pub fn can_edit(&self, author_id: i64) -> bool {
        self.is_editor() || self.id == author_id
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Editor,
    #[default]
    Author,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Editor => "editor",
            UserRole::Author => "author",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [UserRole::Admin, UserRole::Editor, UserRole::Author]
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown role: {}", s))
    }
}

/// Disabled accounts cannot log in and lose their sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        })
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "disabled" => Ok(UserStatus::Disabled),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

/// Input for creating a new user (before password hashing)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    pub email: String,
    pub display_name: String,
    /// Plaintext password (will be hashed)
    pub password: String,
    /// Defaults to Author
    #[serde(default)]
    pub role: Option<UserRole>,
}

/// Input for updating a user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserInput {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub status: Option<UserStatus>,
}
