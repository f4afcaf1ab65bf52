use crate::profile::Profile;
use crate::ports::BoxFuture;
use crate::DomainResult;

/// Storage contract for creator profiles. `external_id` is unique; `create`
/// must fail with `Conflict` when another profile already owns it so that
/// concurrent find-or-create calls converge on a single profile.
pub trait ProfileRepository: Send + Sync {
    fn create(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>>;

    fn get(&self, profile_id: &str) -> BoxFuture<'_, DomainResult<Option<Profile>>>;

    fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Profile>>>;

    fn list(&self) -> BoxFuture<'_, DomainResult<Vec<Profile>>>;

    fn update(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>>;
}
