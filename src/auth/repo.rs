use std::{future::Future, time::Duration};

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    auth::repo_types::{NewUser, ProfileChanges, UniqueField, User},
    db::{self, DbError},
};

/// Constraint names from the `users` migration.
const USERNAME_CONSTRAINT: &str = "users_username_key";
const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already present")]
    Conflict(UniqueField),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Credential store. Implementations enforce username and email uniqueness at
/// write time, so a racing caller gets `StoreError::Conflict` even if its own
/// pre-check passed.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn insert(&self, new_user: NewUser) -> Result<User, StoreError>;
    /// Applies every supplied field in one write. Returns `None` if the user is gone.
    async fn update_fields(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<Option<User>, StoreError>;
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError>;
}

pub struct PgUserRepo {
    db: PgPool,
    io_timeout: Duration,
}

impl PgUserRepo {
    pub fn new(db: PgPool, io_timeout: Duration) -> Self {
        Self { db, io_timeout }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        db::timed(self.io_timeout, fut).await.map_err(|e| match e {
            DbError::Timeout(limit) => StoreError::Timeout(limit),
            DbError::Sqlx(err) => map_db_error(err),
        })
    }
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    let field = match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => match db.constraint() {
            Some(USERNAME_CONSTRAINT) => Some(UniqueField::Username),
            Some(EMAIL_CONSTRAINT) => Some(UniqueField::Email),
            _ => None,
        },
        _ => None,
    };
    match field {
        Some(field) => StoreError::Conflict(field),
        None => StoreError::Database(err),
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.timed(
            sqlx::query_as::<_, User>(
                r#"
                SELECT id, username, email, password_hash, created_at
                FROM users
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.db),
        )
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.timed(
            sqlx::query_as::<_, User>(
                r#"
                SELECT id, username, email, password_hash, created_at
                FROM users
                WHERE username = $1
                "#,
            )
            .bind(username)
            .fetch_optional(&self.db),
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.timed(
            sqlx::query_as::<_, User>(
                r#"
                SELECT id, username, email, password_hash, created_at
                FROM users
                WHERE email = $1
                "#,
            )
            .bind(email)
            .fetch_optional(&self.db),
        )
        .await
    }

    async fn insert(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.timed(
            sqlx::query_as::<_, User>(
                r#"
                INSERT INTO users (id, username, email, password_hash)
                VALUES ($1, $2, $3, $4)
                RETURNING id, username, email, password_hash, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .fetch_one(&self.db),
        )
        .await
    }

    async fn update_fields(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<Option<User>, StoreError> {
        self.timed(
            sqlx::query_as::<_, User>(
                r#"
                UPDATE users
                   SET username = COALESCE($2, username),
                       email    = COALESCE($3, email)
                 WHERE id = $1
                RETURNING id, username, email, password_hash, created_at
                "#,
            )
            .bind(id)
            .bind(changes.username.as_deref())
            .bind(changes.email.as_deref())
            .fetch_optional(&self.db),
        )
        .await
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        let res = self
            .timed(
                sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
                    .bind(id)
                    .bind(password_hash)
                    .execute(&self.db),
            )
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use time::OffsetDateTime;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use super::{StoreError, UserRepo};
    use crate::auth::repo_types::{NewUser, ProfileChanges, UniqueField, User};

    /// In-process store. Every check-and-write runs under the one write lock,
    /// which is what makes uniqueness hold under concurrent callers.
    #[derive(Default)]
    pub struct MemoryUserRepo {
        users: RwLock<HashMap<Uuid, User>>,
    }

    fn conflict_with(
        users: &HashMap<Uuid, User>,
        id: Option<Uuid>,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Option<UniqueField> {
        let others = || users.values().filter(move |u| Some(u.id) != id);
        if let Some(name) = username {
            if others().any(|u| u.username == name) {
                return Some(UniqueField::Username);
            }
        }
        if let Some(mail) = email {
            if others().any(|u| u.email == mail) {
                return Some(UniqueField::Email);
            }
        }
        None
    }

    #[async_trait]
    impl UserRepo for MemoryUserRepo {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            Ok(self.users.read().await.get(&id).cloned())
        }

        async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            let users = self.users.read().await;
            Ok(users.values().find(|u| u.username == username).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            let users = self.users.read().await;
            Ok(users.values().find(|u| u.email == email).cloned())
        }

        async fn insert(&self, new_user: NewUser) -> Result<User, StoreError> {
            let mut users = self.users.write().await;
            if let Some(field) = conflict_with(
                &users,
                None,
                Some(&new_user.username),
                Some(&new_user.email),
            ) {
                return Err(StoreError::Conflict(field));
            }
            let user = User {
                id: Uuid::new_v4(),
                username: new_user.username,
                email: new_user.email,
                password_hash: new_user.password_hash,
                created_at: OffsetDateTime::now_utc(),
            };
            users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn update_fields(
            &self,
            id: Uuid,
            changes: &ProfileChanges,
        ) -> Result<Option<User>, StoreError> {
            let mut users = self.users.write().await;
            if let Some(field) = conflict_with(
                &users,
                Some(id),
                changes.username.as_deref(),
                changes.email.as_deref(),
            ) {
                return Err(StoreError::Conflict(field));
            }
            let Some(user) = users.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(name) = &changes.username {
                user.username = name.clone();
            }
            if let Some(mail) = &changes.email {
                user.email = mail.clone();
            }
            Ok(Some(user.clone()))
        }

        async fn set_password_hash(
            &self,
            id: Uuid,
            password_hash: &str,
        ) -> Result<bool, StoreError> {
            let mut users = self.users.write().await;
            match users.get_mut(&id) {
                Some(user) => {
                    user.password_hash = password_hash.to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }
}
