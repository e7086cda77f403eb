//! Profile and session management
//!
//! - one-time setup of the first (admin) profile
//! - login/logout with opaque session tokens
//! - admin management of other profiles

use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{CreateUserInput, Session, UpdateUserInput, User, UserRole, UserStatus};
use crate::services::password::{hash_password, validate_password, verify_password};
use anyhow::Context;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_SESSION_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found: {0}")]
    NotFound(i64),

    /// Setup is only possible while no profile exists
    #[error("Setup has already been completed")]
    SetupComplete,

    /// An admin tried to demote or disable their own profile
    #[error("You cannot {0} your own account")]
    SelfLockout(&'static str),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// First-run setup payload
#[derive(Debug, Clone, Deserialize)]
pub struct SetupInput {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    session_days: i64,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
    ) -> Self {
        Self::with_session_days(user_repo, session_repo, DEFAULT_SESSION_DAYS)
    }

    pub fn with_session_days(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        session_days: i64,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            session_days: session_days.max(1),
        }
    }

    /// True until the first profile has been created
    pub async fn needs_setup(&self) -> Result<bool, UserServiceError> {
        let count = self.user_repo.count().await.context("Failed to count users")?;
        Ok(count == 0)
    }

    /// Create the first profile, which is always an admin
    pub async fn setup(&self, input: SetupInput) -> Result<User, UserServiceError> {
        if !self.needs_setup().await? {
            return Err(UserServiceError::SetupComplete);
        }

        // The insert itself re-checks that no profile exists
        let user = self.new_profile(&input.email, &input.display_name, &input.password, UserRole::Admin)?;
        let user = self
            .user_repo
            .create_first(&user)
            .await
            .context("Failed to create initial profile")?
            .ok_or(UserServiceError::SetupComplete)?;
        tracing::info!("Initial admin profile created: {}", user.email);
        Ok(user)
    }

    /// Check credentials and open a session
    pub async fn login(&self, input: LoginInput) -> Result<(Session, User), UserServiceError> {
        let email = normalize_email(&input.email).ok_or_else(|| {
            UserServiceError::AuthenticationError("Invalid email or password".to_string())
        })?;

        let user = self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to get user by email")?
            .ok_or_else(|| {
                UserServiceError::AuthenticationError("Invalid email or password".to_string())
            })?;

        let valid = verify_password(&input.password, &user.password_hash)
            .context("Failed to verify password")?;
        if !valid {
            return Err(UserServiceError::AuthenticationError(
                "Invalid email or password".to_string(),
            ));
        }

        if !user.is_active() {
            return Err(UserServiceError::AuthenticationError(
                "This account has been disabled".to_string(),
            ));
        }

        let session = self.create_session(user.id).await?;
        Ok((session, user))
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its active profile
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            if let Err(e) = self.session_repo.delete(token).await {
                tracing::warn!("Failed to delete expired session: {}", e);
            }
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;

        Ok(user.filter(User::is_active))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    pub async fn list(&self) -> Result<Vec<User>, UserServiceError> {
        Ok(self.user_repo.list().await.context("Failed to list users")?)
    }

    /// Admin: create another profile
    pub async fn create(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        self.create_profile(
            &input.email,
            &input.display_name,
            &input.password,
            input.role.unwrap_or_default(),
        )
        .await
    }

    /// Admin: change a profile. `actor` is the admin making the change.
    pub async fn update(
        &self,
        actor: &User,
        id: i64,
        input: UpdateUserInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user")?
            .ok_or(UserServiceError::NotFound(id))?;

        if actor.id == user.id {
            if matches!(input.role, Some(role) if role != UserRole::Admin) && user.is_admin() {
                return Err(UserServiceError::SelfLockout("demote"));
            }
            if input.status == Some(UserStatus::Disabled) {
                return Err(UserServiceError::SelfLockout("disable"));
            }
        }

        if let Some(name) = input.display_name {
            let name = name.trim();
            if name.is_empty() {
                return Err(UserServiceError::ValidationError(
                    "Display name cannot be empty".to_string(),
                ));
            }
            user.display_name = name.to_string();
        }
        if let Some(password) = input.password {
            if let Some(problem) = validate_password(&password) {
                return Err(UserServiceError::ValidationError(problem));
            }
            user.password_hash = hash_password(&password).context("Failed to hash password")?;
        }
        if let Some(role) = input.role {
            user.role = role;
        }
        let disabling = input.status == Some(UserStatus::Disabled) && user.is_active();
        if let Some(status) = input.status {
            user.status = status;
        }

        let updated = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update user")?;

        if disabling {
            self.session_repo
                .delete_by_user(updated.id)
                .await
                .context("Failed to revoke sessions")?;
            tracing::info!("Profile {} disabled, sessions revoked", updated.email);
        }

        Ok(updated)
    }

    /// Remove expired sessions; returns how many were deleted
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self
            .session_repo
            .delete_expired(Utc::now())
            .await
            .context("Failed to delete expired sessions")?)
    }

    async fn create_profile(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User, UserServiceError> {
        let user = self.new_profile(email, display_name, password, role)?;

        if self
            .user_repo
            .get_by_email(&user.email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(user.email));
        }

        Ok(self
            .user_repo
            .create(&user)
            .await
            .context("Failed to create user")?)
    }

    /// Validate input and hash the password
    fn new_profile(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User, UserServiceError> {
        let email = normalize_email(email)
            .ok_or_else(|| UserServiceError::ValidationError("Invalid email address".to_string()))?;
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Display name cannot be empty".to_string(),
            ));
        }
        if let Some(problem) = validate_password(password) {
            return Err(UserServiceError::ValidationError(problem));
        }

        let hash = hash_password(password).context("Failed to hash password")?;
        Ok(User::new(email, display_name.to_string(), hash, role))
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::days(self.session_days),
            created_at: now,
        };

        Ok(self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?)
    }
}

/// Trim and lowercase an email address; `None` if it is not plausibly valid.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return None;
    }
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.contains('@') {
        return None;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }
    Some(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_service() -> UserService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool),
        )
    }

    fn setup_input(email: &str) -> SetupInput {
        SetupInput {
            email: email.to_string(),
            password: "password123".to_string(),
            display_name: "Owner".to_string(),
        }
    }

    async fn with_admin() -> (UserService, User) {
        let service = setup_test_service().await;
        let admin = service.setup(setup_input("Owner@Example.com")).await.unwrap();
        (service, admin)
    }

    #[tokio::test]
    async fn test_setup_creates_admin_once() {
        let service = setup_test_service().await;
        assert!(service.needs_setup().await.unwrap());

        let admin = service.setup(setup_input("Owner@Example.com")).await.unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert_eq!(admin.email, "owner@example.com");

        let again = service.setup(setup_input("other@example.com")).await;
        assert!(matches!(again, Err(UserServiceError::SetupComplete)));
    }

    #[tokio::test]
    async fn test_concurrent_setup_creates_one_admin() {
        let service = setup_test_service().await;

        let (a, b) = tokio::join!(
            service.setup(setup_input("one@example.com")),
            service.setup(setup_input("two@example.com")),
        );

        assert!(a.is_ok() != b.is_ok());
        assert!(matches!(
            a.err().or(b.err()),
            Some(UserServiceError::SetupComplete)
        ));
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_rejects_short_password() {
        let service = setup_test_service().await;
        let mut input = setup_input("a@example.com");
        input.password = "short".into();
        assert!(matches!(
            service.setup(input).await,
            Err(UserServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_login_and_validate_session() {
        let (service, admin) = with_admin().await;

        let (session, user) = service
            .login(LoginInput {
                email: " OWNER@example.com ".into(),
                password: "password123".into(),
            })
            .await
            .expect("Failed to login");
        assert_eq!(user.id, admin.id);

        let resolved = service.validate_session(&session.id).await.unwrap();
        assert_eq!(resolved.unwrap().id, admin.id);

        service.logout(&session.id).await.unwrap();
        assert!(service.validate_session(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (service, _) = with_admin().await;
        let result = service
            .login(LoginInput {
                email: "owner@example.com".into(),
                password: "wrong-password".into(),
            })
            .await;
        assert!(matches!(result, Err(UserServiceError::AuthenticationError(_))));
    }

    #[tokio::test]
    async fn test_disabled_profile_cannot_login_and_loses_sessions() {
        let (service, admin) = with_admin().await;
        let editor = service
            .create(CreateUserInput {
                email: "ed@example.com".into(),
                display_name: "Ed".into(),
                password: "password123".into(),
                role: Some(UserRole::Editor),
            })
            .await
            .unwrap();

        let login = || LoginInput {
            email: "ed@example.com".into(),
            password: "password123".into(),
        };
        let (session, _) = service.login(login()).await.unwrap();

        service
            .update(
                &admin,
                editor.id,
                UpdateUserInput {
                    status: Some(UserStatus::Disabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(service.validate_session(&session.id).await.unwrap().is_none());
        assert!(matches!(
            service.login(login()).await,
            Err(UserServiceError::AuthenticationError(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_cannot_lock_themselves_out() {
        let (service, admin) = with_admin().await;

        let demote = service
            .update(
                &admin,
                admin.id,
                UpdateUserInput {
                    role: Some(UserRole::Editor),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(demote, Err(UserServiceError::SelfLockout("demote"))));

        let disable = service
            .update(
                &admin,
                admin.id,
                UpdateUserInput {
                    status: Some(UserStatus::Disabled),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(disable, Err(UserServiceError::SelfLockout("disable"))));

        let rename = service
            .update(
                &admin,
                admin.id,
                UpdateUserInput {
                    display_name: Some("Boss".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rename.display_name, "Boss");
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (service, _) = with_admin().await;
        let result = service
            .create(CreateUserInput {
                email: "OWNER@example.com".into(),
                display_name: "Dup".into(),
                password: "password123".into(),
                role: None,
            })
            .await;
        assert!(matches!(result, Err(UserServiceError::UserExists(_))));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Jane.Doe@Example.COM "),
            Some("jane.doe@example.com".to_string())
        );
        assert_eq!(normalize_email("no-at-sign"), None);
        assert_eq!(normalize_email("a@b"), None);
        assert_eq!(normalize_email("a@@b.com"), None);
        assert_eq!(normalize_email("a b@c.com"), None);
        assert_eq!(normalize_email("@c.com"), None);
    }
}
