use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    routing::{get, post},
};
use axum_valid::Valid;
use std::convert::Infallible;

use crate::{
    dao::{
        identity::AuthContext,
        models::{ProfileEntity, UserId},
    },
    dto::{
        auth::{AuthResponse, SignInRequest, SignUpRequest, UpdateProfileRequest},
        room::ProfileSummary,
    },
    error::AppError,
    state::SharedState,
};

/// Caller identity resolved from an optional `Authorization: Bearer <token>` header.
pub struct Caller {
    token: Option<String>,
    auth: AuthContext,
}

impl FromRequestParts<SharedState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        let identity = state.identity().clone();
        let auth = match &token {
            Some(token) => AuthContext::with_token(identity, token.clone()),
            None => AuthContext::anonymous(identity),
        };
        Ok(Self { token, auth })
    }
}

impl Caller {
    /// Signed-in profile. Callers without a token, or with a token matching no open
    /// session, are anonymous.
    pub async fn profile(&self) -> Result<Option<ProfileEntity>, AppError> {
        Ok(self.auth.current_user().await?)
    }

    pub async fn user_id(&self) -> Result<Option<UserId>, AppError> {
        Ok(self.profile().await?.map(|profile| profile.id))
    }

    pub async fn require_user(&self) -> Result<ProfileEntity, AppError> {
        self.profile()
            .await?
            .ok_or_else(|| AppError::Unauthorized("sign in required".into()))
    }
}

/// Routes handling sign-up, sign-in and the caller's own profile.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/me", get(me).patch(update_me))
}

/// Register a new account and open a session for it.
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    tag = "auth",
    request_body = SignUpRequest,
    responses(
        (status = 200, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid payload or username taken")
    )
)]
pub async fn sign_up(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SignUpRequest>>,
) -> Result<Json<AuthResponse>, AppError> {
    let session = state.identity().sign_up(payload.into()).await?;
    Ok(Json(session.into()))
}

/// Open a session with username and password.
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    tag = "auth",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn sign_in(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SignInRequest>>,
) -> Result<Json<AuthResponse>, AppError> {
    let session = state
        .identity()
        .sign_in(payload.username, payload.password)
        .await?;
    Ok(Json(session.into()))
}

/// Close the caller's session.
#[utoipa::path(
    post,
    path = "/auth/sign-out",
    tag = "auth",
    responses(
        (status = 204, description = "Signed out"),
        (status = 401, description = "No open session")
    )
)]
pub async fn sign_out(
    State(state): State<SharedState>,
    caller: Caller,
) -> Result<StatusCode, AppError> {
    let token = caller
        .token
        .ok_or_else(|| AppError::Unauthorized("sign in required".into()))?;
    state.identity().sign_out(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Profile of the signed-in caller.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current profile", body = ProfileSummary),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn me(caller: Caller) -> Result<Json<ProfileSummary>, AppError> {
    Ok(Json(caller.require_user().await?.into()))
}

/// Edit the caller's display name or avatar.
#[utoipa::path(
    patch,
    path = "/auth/me",
    tag = "auth",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileSummary),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn update_me(
    State(state): State<SharedState>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<UpdateProfileRequest>>,
) -> Result<Json<ProfileSummary>, AppError> {
    let user = caller.require_user().await?;
    let profile = state
        .services()
        .profiles
        .update(user.id, payload.display_name, payload.avatar_url)
        .await?;
    Ok(Json(profile.into()))
}
