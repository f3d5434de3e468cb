//! Profile reads and edits for the signed-in user.

use std::sync::Arc;

use tracing::debug;

use crate::{
    dao::{
        models::{ProfileEntity, ProfilePatch, UserId},
        room_store::RoomStore,
    },
    error::ServiceError,
};

const MAX_DISPLAY_NAME_LENGTH: usize = 64;

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn RoomStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<ProfileEntity>, ServiceError> {
        Ok(self.store.find_profile(user_id).await?)
    }

    /// Update display name and avatar. Blank values clear the field.
    pub async fn update(
        &self,
        user_id: UserId,
        display_name: Option<String>,
        avatar_url: Option<String>,
    ) -> Result<ProfileEntity, ServiceError> {
        let display_name = display_name.map(|name| blank_to_none(&name));
        if let Some(Some(name)) = &display_name
            && name.chars().count() > MAX_DISPLAY_NAME_LENGTH
        {
            return Err(ServiceError::Validation(format!(
                "display name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
            )));
        }

        let patch = ProfilePatch {
            display_name,
            avatar_url: avatar_url.map(|url| blank_to_none(&url)),
        };
        let profile = self.store.update_profile(user_id, patch).await?;
        debug!(%user_id, "profile updated");
        Ok(profile)
    }
}

fn blank_to_none(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
