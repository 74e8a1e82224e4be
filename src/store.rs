//! User store interface consumed by the auth layer.
//!
//! The relational database behind the platform is an external collaborator;
//! the auth layer only needs to look a user up by id or e-mail and read the
//! permission bitmask and token salt. The one write it originates is
//! [`UserStore::set_salt`], used to force logout on every device.
//!
//! [`InMemoryUserStore`] is the bundled backend used by the binary and tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Length in bytes of freshly generated token salts.
pub const SALT_LEN: usize = 32;

/// Generate a new random token salt.
pub fn generate_salt() -> Vec<u8> {
    rand::random::<[u8; SALT_LEN]>().to_vec()
}

/// Key used to locate a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLookup<'a> {
    Id(&'a str),
    Email(&'a str),
}

/// Authentication-relevant slice of a user record.
///
/// `salt` and `password_hash` stay inside the verification path and are never
/// serialized.
#[derive(Clone)]
pub struct UserAuthInfo {
    pub id: String,
    pub email: String,
    pub permissions: u32,
    pub salt: Vec<u8>,
    pub password_hash: String,
}

impl fmt::Debug for UserAuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAuthInfo")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("permissions", &format_args!("{:#010x}", self.permissions))
            .finish_non_exhaustive()
    }
}

/// Data needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub permissions: u32,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user store unavailable: {0}")]
    Unavailable(String),

    #[error("user already exists: {0}")]
    Conflict(String),

    #[error("user not found: {0}")]
    NotFound(String),
}

/// Read (and narrowly write) access to user authentication data.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch id, bitmask and salt by id or e-mail. `Ok(None)` if absent.
    async fn get_user_auth_info(
        &self,
        lookup: UserLookup<'_>,
    ) -> Result<Option<UserAuthInfo>, StoreError>;

    /// Create a user with a fresh salt and return its auth info.
    async fn create_user(&self, user: NewUser) -> Result<UserAuthInfo, StoreError>;

    /// Replace the user's salt, revoking every outstanding token.
    async fn set_salt(&self, user_id: &str, salt: Vec<u8>) -> Result<(), StoreError>;

    /// Replace the user's permission bitmask.
    async fn set_permissions(&self, user_id: &str, permissions: u32) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<String, UserAuthInfo>,
    id_by_email: HashMap<String, String>,
}

/// Process-local store backed by a pair of hash maps.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.tables.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user_auth_info(
        &self,
        lookup: UserLookup<'_>,
    ) -> Result<Option<UserAuthInfo>, StoreError> {
        let tables = self.tables.read().await;
        let user = match lookup {
            UserLookup::Id(id) => tables.by_id.get(id),
            UserLookup::Email(email) => tables
                .id_by_email
                .get(&normalize_email(email))
                .and_then(|id| tables.by_id.get(id)),
        };
        Ok(user.cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<UserAuthInfo, StoreError> {
        let email = normalize_email(&user.email);
        let mut tables = self.tables.write().await;

        if tables.id_by_email.contains_key(&email) {
            return Err(StoreError::Conflict(email));
        }

        let info = UserAuthInfo {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            permissions: user.permissions,
            salt: generate_salt(),
            password_hash: user.password_hash,
        };
        tables.id_by_email.insert(email, info.id.clone());
        tables.by_id.insert(info.id.clone(), info.clone());

        Ok(info)
    }

    async fn set_salt(&self, user_id: &str, salt: Vec<u8>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .by_id
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        user.salt = salt;
        Ok(())
    }

    async fn set_permissions(&self, user_id: &str, permissions: u32) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .by_id
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        user.permissions = permissions;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            permissions: 5,
        }
    }

    #[test]
    fn test_generate_salt_is_random() {
        let a = generate_salt();
        let b = generate_salt();
        assert_eq!(a.len(), SALT_LEN);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_create_and_lookup_by_id_and_email() {
        let store = InMemoryUserStore::new();
        let created = store.create_user(new_user("Founder@Example.com")).await.unwrap();

        let by_id = store
            .get_user_auth_info(UserLookup::Id(&created.id))
            .await
            .unwrap()
            .unwrap();
        let by_email = store
            .get_user_auth_info(UserLookup::Email("founder@example.com"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(by_id.id, by_email.id);
        assert_eq!(by_id.email, "founder@example.com");
        assert_eq!(by_id.permissions, 5);
        assert_eq!(by_id.salt.len(), SALT_LEN);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = InMemoryUserStore::new();
        store.create_user(new_user("a@example.com")).await.unwrap();
        let err = store.create_user(new_user(" A@example.com ")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let store = InMemoryUserStore::new();
        assert!(store.is_empty().await);
        assert!(
            store
                .get_user_auth_info(UserLookup::Id("nope"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_set_salt_and_permissions() {
        let store = InMemoryUserStore::new();
        let user = store.create_user(new_user("b@example.com")).await.unwrap();

        store.set_salt(&user.id, vec![1, 2, 3]).await.unwrap();
        store.set_permissions(&user.id, 0xff).await.unwrap();

        let info = store
            .get_user_auth_info(UserLookup::Id(&user.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.salt, vec![1, 2, 3]);
        assert_eq!(info.permissions, 0xff);
    }

    #[tokio::test]
    async fn test_set_salt_unknown_user() {
        let store = InMemoryUserStore::new();
        let err = store.set_salt("ghost", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_debug_hides_salt_and_hash() {
        let info = UserAuthInfo {
            id: "u".into(),
            email: "e@example.com".into(),
            permissions: 1,
            salt: b"super-secret-salt".to_vec(),
            password_hash: "$argon2id$secret".into(),
        };
        let rendered = format!("{info:?}");
        assert!(!rendered.contains("argon2id"));
        assert!(!rendered.contains("salt"));
    }
}
