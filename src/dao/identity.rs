//! Identity collaborator: sign-up/sign-in/sign-out, current-user lookup and
//! auth-state notifications. Profiles are persisted through the [`RoomStore`].

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::dao::{
    models::{ProfileEntity, UserId, UserRole},
    room_store::{PROFILES_USERNAME_KEY, RoomStore},
    storage::StorageError,
};

const MIN_PASSWORD_LENGTH: usize = 6;
const MAX_USERNAME_LENGTH: usize = 32;
const AUTH_EVENT_CAPACITY: usize = 32;

/// Result alias for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Failures reported by the identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Username/password pair did not match.
    #[error("invalid username or password")]
    InvalidCredentials,
    /// Another account already uses the username.
    #[error("username `{0}` is already taken")]
    UsernameTaken(String),
    /// Malformed sign-up payload.
    #[error("{0}")]
    InvalidInput(String),
    /// Token does not belong to an open session.
    #[error("session not found")]
    SessionNotFound,
    /// Profile persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Sign-up payload.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

/// Open session returned by sign-up and sign-in.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user: ProfileEntity,
}

/// Auth-state change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: UserId },
    SignedOut { user_id: UserId },
}

/// Abstraction over the external identity provider.
pub trait IdentityProvider: Send + Sync {
    fn sign_up(&self, request: SignUp) -> BoxFuture<'static, IdentityResult<AuthSession>>;
    fn sign_in(
        &self,
        username: String,
        password: String,
    ) -> BoxFuture<'static, IdentityResult<AuthSession>>;
    fn sign_out(&self, token: String) -> BoxFuture<'static, IdentityResult<()>>;
    /// Profile of the user owning `token`, or `None` when the token is unknown.
    fn current_user(&self, token: String)
    -> BoxFuture<'static, IdentityResult<Option<ProfileEntity>>>;
    /// Subscribe to sign-in/sign-out notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

struct Credential {
    user_id: UserId,
    salt: String,
    digest: String,
}

/// In-process identity provider storing salted SHA-256 password digests.
#[derive(Clone)]
pub struct MemoryIdentity {
    store: Arc<dyn RoomStore>,
    credentials: Arc<DashMap<String, Credential>>,
    sessions: Arc<DashMap<String, UserId>>,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryIdentity {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        let (events, _rx) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            store,
            credentials: Arc::new(DashMap::new()),
            sessions: Arc::new(DashMap::new()),
            events,
        }
    }

    fn open_session(&self, user: ProfileEntity) -> AuthSession {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone(), user.id);
        let _ = self.events.send(AuthEvent::SignedIn { user_id: user.id });
        AuthSession { token, user }
    }

    async fn register(&self, request: SignUp) -> IdentityResult<AuthSession> {
        let username = normalize_username(&request.username)?;
        if request.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(IdentityError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let profile = ProfileEntity {
            id: Uuid::new_v4(),
            username: username.clone(),
            display_name: request
                .display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            avatar_url: None,
            role: UserRole::User,
            created_at: SystemTime::now(),
        };

        self.store
            .upsert_profile(profile.clone())
            .await
            .map_err(|err| {
                if err.is_unique_violation_of(PROFILES_USERNAME_KEY) {
                    IdentityError::UsernameTaken(username.clone())
                } else {
                    IdentityError::Storage(err)
                }
            })?;

        let salt = Uuid::new_v4().simple().to_string();
        let digest = hash_password(&salt, &request.password);
        self.credentials.insert(
            username.clone(),
            Credential {
                user_id: profile.id,
                salt,
                digest,
            },
        );

        info!(user_id = %profile.id, %username, "user signed up");
        Ok(self.open_session(profile))
    }

    async fn authenticate(&self, username: String, password: String) -> IdentityResult<AuthSession> {
        let username = normalize_username(&username).map_err(|_| IdentityError::InvalidCredentials)?;
        let user_id = {
            let credential = self
                .credentials
                .get(&username)
                .ok_or(IdentityError::InvalidCredentials)?;
            if hash_password(&credential.salt, &password) != credential.digest {
                return Err(IdentityError::InvalidCredentials);
            }
            credential.user_id
        };

        let profile = self
            .store
            .find_profile(user_id)
            .await?
            .ok_or(IdentityError::InvalidCredentials)?;
        Ok(self.open_session(profile))
    }
}

impl IdentityProvider for MemoryIdentity {
    fn sign_up(&self, request: SignUp) -> BoxFuture<'static, IdentityResult<AuthSession>> {
        let identity = self.clone();
        Box::pin(async move { identity.register(request).await })
    }

    fn sign_in(
        &self,
        username: String,
        password: String,
    ) -> BoxFuture<'static, IdentityResult<AuthSession>> {
        let identity = self.clone();
        Box::pin(async move { identity.authenticate(username, password).await })
    }

    fn sign_out(&self, token: String) -> BoxFuture<'static, IdentityResult<()>> {
        let identity = self.clone();
        Box::pin(async move {
            let (_, user_id) = identity
                .sessions
                .remove(&token)
                .ok_or(IdentityError::SessionNotFound)?;
            let _ = identity.events.send(AuthEvent::SignedOut { user_id });
            Ok(())
        })
    }

    fn current_user(
        &self,
        token: String,
    ) -> BoxFuture<'static, IdentityResult<Option<ProfileEntity>>> {
        let identity = self.clone();
        Box::pin(async move {
            let Some(user_id) = identity.sessions.get(&token).map(|entry| *entry) else {
                return Ok(None);
            };
            Ok(identity.store.find_profile(user_id).await?)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// Client-side handle binding the identity provider to one (possibly absent) session token.
#[derive(Clone)]
pub struct AuthContext {
    identity: Arc<dyn IdentityProvider>,
    token: Option<String>,
}

impl AuthContext {
    /// Context for a caller without a session.
    pub fn anonymous(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            token: None,
        }
    }

    /// Context bound to an existing session token.
    pub fn with_token(identity: Arc<dyn IdentityProvider>, token: impl Into<String>) -> Self {
        Self {
            identity,
            token: Some(token.into()),
        }
    }

    /// Currently authenticated user, if any.
    pub async fn current_user(&self) -> IdentityResult<Option<ProfileEntity>> {
        match &self.token {
            Some(token) => self.identity.current_user(token.clone()).await,
            None => Ok(None),
        }
    }

    /// Identifier of the currently authenticated user, if any.
    pub async fn current_user_id(&self) -> IdentityResult<Option<UserId>> {
        Ok(self.current_user().await?.map(|profile| profile.id))
    }
}

fn normalize_username(raw: &str) -> IdentityResult<String> {
    let username = raw.trim().to_lowercase();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(IdentityError::InvalidInput(format!(
            "username must be between 1 and {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(IdentityError::InvalidInput(
            "username may only contain letters, digits, `_` and `.`".into(),
        ));
    }
    Ok(username)
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::room_store::MemoryRoomStore;

    fn identity() -> MemoryIdentity {
        MemoryIdentity::new(Arc::new(MemoryRoomStore::new()))
    }

    fn sign_up(username: &str) -> SignUp {
        SignUp {
            username: username.into(),
            password: "hunter22".into(),
            display_name: Some("Alice".into()),
        }
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_resolves_same_user() {
        let identity = identity();
        let created = identity.sign_up(sign_up("Alice")).await.unwrap();
        assert_eq!(created.user.username, "alice");

        let session = identity
            .sign_in("alice".into(), "hunter22".into())
            .await
            .unwrap();
        let current = identity.current_user(session.token).await.unwrap().unwrap();
        assert_eq!(current.id, created.user.id);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let identity = identity();
        identity.sign_up(sign_up("alice")).await.unwrap();
        let err = identity
            .sign_in("alice".into(), "nope".into())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredentials));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let identity = identity();
        identity.sign_up(sign_up("alice")).await.unwrap();
        let err = identity.sign_up(sign_up("ALICE")).await.unwrap_err();
        assert!(matches!(err, IdentityError::UsernameTaken(name) if name == "alice"));
    }

    #[tokio::test]
    async fn sign_out_forgets_session_and_notifies() {
        let identity = identity();
        let mut events = identity.subscribe();
        let session = identity.sign_up(sign_up("alice")).await.unwrap();
        identity.sign_out(session.token.clone()).await.unwrap();

        assert!(identity.current_user(session.token).await.unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::SignedIn {
                user_id: session.user.id
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::SignedOut {
                user_id: session.user.id
            }
        );
    }

    #[tokio::test]
    async fn anonymous_context_has_no_user() {
        let context = AuthContext::anonymous(Arc::new(identity()));
        assert!(context.current_user_id().await.unwrap().is_none());
    }
}
