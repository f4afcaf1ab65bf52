use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ports::profile::ProfileRepository;
use crate::util::now_ms;
use crate::DomainResult;

const MAX_NAME_LENGTH: usize = 120;
const MAX_LOCATION_LENGTH: usize = 120;
const MAX_DESCRIPTION_LENGTH: usize = 2_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub profile_id: String,
    pub external_id: String,
    pub name: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub verified: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Profile {
    /// Placeholder profile created on first contact, before the user has
    /// filled in any display fields.
    pub fn placeholder(external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        let now = now_ms();
        Self {
            profile_id: crate::util::uuid_v7_without_dashes(),
            name: format!("creator-{external_id}"),
            username: None,
            avatar: None,
            location: None,
            description: None,
            verified: false,
            external_id,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct ProfileService {
    repository: Arc<dyn ProfileRepository>,
}

impl ProfileService {
    pub fn new(repository: Arc<dyn ProfileRepository>) -> Self {
        Self { repository }
    }

    /// Find-or-create by external user id. Losing a creation race is not an
    /// error: the repository's unique index rejects the duplicate and the
    /// winner's profile is fetched and returned instead.
    pub async fn resolve(&self, external_id: &str) -> DomainResult<Profile> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(DomainError::Validation("external user id is required".into()));
        }

        if let Some(existing) = self.repository.get_by_external_id(external_id).await? {
            return Ok(existing);
        }

        let profile = Profile::placeholder(external_id);
        match self.repository.create(&profile).await {
            Ok(created) => Ok(created),
            Err(DomainError::Conflict) => self
                .repository
                .get_by_external_id(external_id)
                .await?
                .ok_or(DomainError::Conflict),
            Err(err) => Err(err),
        }
    }

    pub async fn get(&self, profile_id: &str) -> DomainResult<Profile> {
        self.repository
            .get(profile_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    pub async fn get_by_external_id(&self, external_id: &str) -> DomainResult<Profile> {
        self.repository
            .get_by_external_id(external_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    pub async fn list(&self) -> DomainResult<Vec<Profile>> {
        self.repository.list().await
    }

    /// Applies the non-empty fields of `update` to the caller's own profile.
    /// The external id is never writable through this path.
    pub async fn update_display(
        &self,
        external_id: &str,
        update: ProfileUpdate,
    ) -> DomainResult<Profile> {
        let update = validate_profile_update(update)?;
        let mut profile = self.get_by_external_id(external_id).await?;

        if let Some(name) = update.name {
            profile.name = name;
        }
        if let Some(username) = update.username {
            profile.username = Some(username);
        }
        if let Some(avatar) = update.avatar {
            profile.avatar = Some(avatar);
        }
        if let Some(location) = update.location {
            profile.location = Some(location);
        }
        if let Some(description) = update.description {
            profile.description = Some(description);
        }
        profile.updated_at_ms = now_ms();

        self.repository.update(&profile).await
    }
}

fn validate_profile_update(mut update: ProfileUpdate) -> DomainResult<ProfileUpdate> {
    update.name = update
        .name
        .take()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if update
        .name
        .as_ref()
        .is_some_and(|name| name.chars().count() > MAX_NAME_LENGTH)
    {
        return Err(DomainError::Validation(format!(
            "name exceeds max length of {MAX_NAME_LENGTH}"
        )));
    }

    update.username = update
        .username
        .take()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if update
        .location
        .as_ref()
        .is_some_and(|location| location.chars().count() > MAX_LOCATION_LENGTH)
    {
        return Err(DomainError::Validation(format!(
            "location exceeds max length of {MAX_LOCATION_LENGTH}"
        )));
    }

    if update
        .description
        .as_ref()
        .is_some_and(|description| description.chars().count() > MAX_DESCRIPTION_LENGTH)
    {
        return Err(DomainError::Validation(format!(
            "description exceeds max length of {MAX_DESCRIPTION_LENGTH}"
        )));
    }

    Ok(update)
}
