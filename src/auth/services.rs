use std::sync::Arc;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::auth::{
    error::AuthError,
    jwt::{IssuedToken, JwtKeys},
    password::Hasher,
    repo::UserRepo,
    repo_types::{NewUser, ProfileChanges, User},
};

const MAX_USERNAME_LEN: usize = 64;

/// Hashed once per service and verified against when a login names no account.
const DUMMY_PASSWORD: &str = "dexnote-dummy-password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

fn normalize_username(raw: &str) -> Result<String, AuthError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(AuthError::Validation("Username must not be empty".into()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AuthError::Validation(format!(
            "Username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.contains('@') {
        return Err(AuthError::Validation("Username must not contain '@'".into()));
    }
    Ok(username.to_string())
}

fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AuthError::Validation("Invalid email".into()));
    }
    Ok(email)
}

/// A user together with the token just minted for them.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: IssuedToken,
}

/// Auth gateway: signup, login, token authentication and profile edits over an
/// injected credential store.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepo>,
    keys: JwtKeys,
    hasher: Hasher,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepo>, keys: JwtKeys, hasher: Hasher) -> Self {
        Self {
            users,
            keys,
            hasher,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Builds the hash that unknown-account logins verify against, so the first
    /// such login does not pay for it.
    pub async fn warm_up(&self) -> Result<(), AuthError> {
        self.dummy_hash().await.map(|_| ())
    }

    #[cfg(test)]
    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let username = normalize_username(username)?;
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(AuthError::Validation("Password must not be empty".into()));
        }

        if self.users.find_by_username(&username).await?.is_some() {
            warn!(%username, "username already taken");
            return Err(AuthError::DuplicateUsername);
        }
        if self.users.find_by_email(&email).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = self.hash(password).await?;
        // A concurrent signup can still win between the checks above and here;
        // the store constraint turns that into the same duplicate errors.
        let user = self
            .users
            .insert(NewUser {
                username,
                email,
                password_hash,
            })
            .await?;
        let token = self.keys.issue(user.id)?;

        info!(user_id = %user.id, username = %user.username, "user signed up");
        Ok(Session { user, token })
    }

    /// `identifier` is an email if it contains `@`, a username otherwise.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Session, AuthError> {
        let identifier = identifier.trim();
        let found = if identifier.contains('@') {
            self.users.find_by_email(&identifier.to_lowercase()).await?
        } else {
            self.users.find_by_username(identifier).await?
        };

        let Some(user) = found else {
            // Same Argon2 cost as a wrong password.
            let dummy = self.dummy_hash().await?;
            self.verify(password, dummy).await?;
            warn!("login unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        if self.hasher.needs_rehash(&user.password_hash) {
            self.upgrade_hash(&user, password).await;
        }

        let token = self.keys.issue(user.id)?;
        info!(user_id = %user.id, "user logged in");
        Ok(Session { user, token })
    }

    /// Resolves a bearer token to the user's current record.
    pub async fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        let user_id = self.keys.validate(token).map_err(|e| {
            debug!(error = %e, "token rejected");
            AuthError::from(e)
        })?;

        self.users.find_by_id(user_id).await?.ok_or_else(|| {
            warn!(%user_id, "token subject no longer exists");
            AuthError::UserNotFound
        })
    }

    /// Applies all supplied fields or none of them.
    pub async fn update_profile(
        &self,
        user: &User,
        changes: ProfileChanges,
    ) -> Result<User, AuthError> {
        let changes = ProfileChanges {
            username: changes.username.as_deref().map(normalize_username).transpose()?,
            email: changes.email.as_deref().map(normalize_email).transpose()?,
        };
        if changes.is_empty() {
            return Ok(user.clone());
        }

        if let Some(username) = &changes.username {
            let taken = self.users.find_by_username(username).await?;
            if taken.is_some_and(|other| other.id != user.id) {
                warn!(user_id = %user.id, %username, "username already taken");
                return Err(AuthError::DuplicateUsername);
            }
        }
        if let Some(email) = &changes.email {
            let taken = self.users.find_by_email(email).await?;
            if taken.is_some_and(|other| other.id != user.id) {
                warn!(user_id = %user.id, %email, "email already registered");
                return Err(AuthError::DuplicateEmail);
            }
        }

        let updated = self
            .users
            .update_fields(user.id, &changes)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!(user_id = %updated.id, "profile updated");
        Ok(updated)
    }

    /// Re-hashes with the current cost parameters. Failure leaves the old hash in place.
    async fn upgrade_hash(&self, user: &User, password: &str) {
        let result = match self.hash(password).await {
            Ok(hash) => self
                .users
                .set_password_hash(user.id, &hash)
                .await
                .map_err(AuthError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => debug!(user_id = %user.id, "password hash upgraded"),
            Err(e) => warn!(user_id = %user.id, error = %e, "password hash upgrade failed"),
        }
    }

    async fn dummy_hash(&self) -> Result<&str, AuthError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await?;
        Ok(hash.as_str())
    }

    async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task failed")??;
        Ok(hash)
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let hash = hash.to_owned();
        let ok = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .context("password verification task failed")??;
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::repo::memory::MemoryUserRepo, config::AppConfig};

    fn service() -> AuthService {
        let keys = JwtKeys::from_config(&AppConfig::for_tests().jwt);
        AuthService::new(Arc::new(MemoryUserRepo::default()), keys, Hasher::fast())
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("alice@x.com"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("alice@x"));
        assert!(!is_valid_email("a lice@x.com"));
    }

    #[tokio::test]
    async fn signup_returns_user_and_valid_token() {
        let auth = service();
        let session = auth.signup("alice", "alice@x.com", "pw1").await.unwrap();
        assert_eq!(session.user.username, "alice");
        assert_eq!(session.user.email, "alice@x.com");
        assert_ne!(session.user.password_hash, "pw1");
        assert_eq!(auth.keys().validate(&session.token.token), Ok(session.user.id));
    }

    #[tokio::test]
    async fn signup_rejects_duplicate_username_and_email() {
        let auth = service();
        auth.signup("alice", "alice@x.com", "pw1").await.unwrap();

        let err = auth.signup("alice", "bob@x.com", "pw2").await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUsername));

        let err = auth.signup("bob", "ALICE@x.com", "pw2").await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail));
    }

    #[tokio::test]
    async fn signup_validates_input() {
        let auth = service();
        for (u, e, p) in [
            ("  ", "a@x.com", "pw"),
            ("alice", "not-an-email", "pw"),
            ("alice", "a@x.com", ""),
            ("al@ce", "a@x.com", "pw"),
        ] {
            let err = auth.signup(u, e, p).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)), "{u:?} {e:?} {p:?}");
        }
    }

    #[tokio::test]
    async fn concurrent_signups_with_one_username_admit_one() {
        let auth = service();
        let mut handles = Vec::new();
        for i in 0..8 {
            let auth = auth.clone();
            handles.push(tokio::spawn(async move {
                auth.signup("alice", &format!("alice{i}@x.com"), "pw").await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AuthError::DuplicateUsername) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn login_by_username_or_email() {
        let auth = service();
        let signup = auth.signup("alice", "alice@x.com", "pw1").await.unwrap();

        let err = auth.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let by_name = auth.login("alice", "pw1").await.unwrap();
        assert_ne!(by_name.token.token, signup.token.token);
        assert_eq!(auth.keys().validate(&by_name.token.token), Ok(signup.user.id));

        let by_email = auth.login(" Alice@X.com ", "pw1").await.unwrap();
        assert_eq!(by_email.user.id, signup.user.id);
    }

    #[tokio::test]
    async fn login_unknown_account_looks_like_wrong_password() {
        let auth = service();
        auth.signup("alice", "alice@x.com", "pw1").await.unwrap();
        let unknown = auth.login("mallory", "pw1").await.unwrap_err();
        let wrong = auth.login("alice", "nope").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(unknown, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn authenticate_sees_profile_changes_made_after_issuance() {
        let auth = service();
        let session = auth.signup("alice", "alice@x.com", "pw1").await.unwrap();

        let changes = ProfileChanges {
            username: Some("alice_renamed".into()),
            email: None,
        };
        auth.update_profile(&session.user, changes).await.unwrap();

        let current = auth.authenticate(&session.token.token).await.unwrap();
        assert_eq!(current.id, session.user.id);
        assert_eq!(current.username, "alice_renamed");
    }

    #[tokio::test]
    async fn authenticate_rejects_bad_and_expired_tokens() {
        let auth = service();
        let err = auth.authenticate("garbage").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        let session = auth.signup("alice", "alice@x.com", "pw1").await.unwrap();
        let old = time::OffsetDateTime::now_utc() - time::Duration::days(30);
        let expired = auth.keys().issue_at(session.user.id, old).unwrap();
        let err = auth.authenticate(&expired.token).await.unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken));
    }

    #[tokio::test]
    async fn authenticate_unknown_subject_is_user_not_found() {
        let auth = service();
        let token = auth.keys().issue(uuid::Uuid::new_v4()).unwrap();
        let err = auth.authenticate(&token.token).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn update_profile_is_atomic() {
        let auth = service();
        let alice = auth.signup("alice", "alice@x.com", "pw1").await.unwrap().user;
        auth.signup("bob", "bob@x.com", "pw2").await.unwrap();

        let changes = ProfileChanges {
            username: Some("alice2".into()),
            email: Some("bob@x.com".into()),
        };
        let err = auth.update_profile(&alice, changes).await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail));

        let changes = ProfileChanges {
            username: Some("bob".into()),
            email: Some("alice2@x.com".into()),
        };
        let err = auth.update_profile(&alice, changes).await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUsername));

        let token = auth.login("alice", "pw1").await.unwrap().token;
        let current = auth.authenticate(&token.token).await.unwrap();
        assert_eq!(current.username, "alice");
        assert_eq!(current.email, "alice@x.com");
    }

    #[tokio::test]
    async fn update_profile_applies_both_fields_and_allows_own_values() {
        let auth = service();
        let alice = auth.signup("alice", "alice@x.com", "pw1").await.unwrap().user;

        let same = ProfileChanges {
            username: Some("alice".into()),
            email: Some("alice@x.com".into()),
        };
        auth.update_profile(&alice, same).await.unwrap();

        let both = ProfileChanges {
            username: Some("alicia".into()),
            email: Some("Alicia@X.com".into()),
        };
        let updated = auth.update_profile(&alice, both).await.unwrap();
        assert_eq!(updated.username, "alicia");
        assert_eq!(updated.email, "alicia@x.com");

        let unchanged = auth
            .update_profile(&updated, ProfileChanges::default())
            .await
            .unwrap();
        assert_eq!(unchanged.username, "alicia");
    }

    #[tokio::test]
    async fn login_upgrades_hashes_made_with_other_costs() {
        let users: Arc<dyn UserRepo> = Arc::new(MemoryUserRepo::default());
        let keys = JwtKeys::from_config(&AppConfig::for_tests().jwt);
        let weak = AuthService::new(users.clone(), keys.clone(), Hasher::fast());
        let alice = weak.signup("alice", "alice@x.com", "pw1").await.unwrap().user;

        let strong = AuthService::new(users.clone(), keys, Hasher::default());
        strong.login("alice", "pw1").await.unwrap();

        let stored = users.find_by_id(alice.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, alice.password_hash);
        assert!(!Hasher::default().needs_rehash(&stored.password_hash));
        strong.login("alice@x.com", "pw1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_account_login_still_verifies_a_hash() {
        let auth = service();
        assert!(!auth.dummy_hash.initialized());

        let err = auth.login("ghost", "pw1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(auth.dummy_hash.initialized());

        let dummy = auth.dummy_hash().await.unwrap().to_string();
        assert!(dummy.starts_with("$argon2id$"));
        assert!(auth.hasher.verify(DUMMY_PASSWORD, &dummy).unwrap());

        let err = auth.login("ghost@x.com", "pw1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(auth.dummy_hash().await.unwrap(), dummy);
    }

    #[tokio::test]
    async fn warm_up_prepares_the_dummy_hash() {
        let auth = service();
        auth.warm_up().await.unwrap();
        assert!(auth.dummy_hash.initialized());
    }
}
