use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::identity::{AuthSession, SignUp},
    dto::room::ProfileSummary,
};

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SignUpRequest {
    #[validate(length(min = 1, max = 32))]
    pub username: String,
    #[validate(length(min = 6))]
    pub password: String,
    #[validate(length(max = 64))]
    pub display_name: Option<String>,
}

impl From<SignUpRequest> for SignUp {
    fn from(request: SignUpRequest) -> Self {
        Self {
            username: request.username,
            password: request.password,
            display_name: request.display_name,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SignInRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Session token plus the signed-in profile. Send the token back as
/// `Authorization: Bearer <token>`.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: ProfileSummary,
}

impl From<AuthSession> for AuthResponse {
    fn from(session: AuthSession) -> Self {
        Self {
            token: session.token,
            user: session.user.into(),
        }
    }
}

/// Profile edit. Omitted fields are untouched; blank strings clear the field.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 64))]
    pub display_name: Option<String>,
    #[validate(length(max = 2048))]
    pub avatar_url: Option<String>,
}
