use crate::ports::BoxFuture;
use crate::submission::{Submission, SubmissionStatus};
use crate::DomainResult;

/// Storage contract for task submissions.
///
/// `create` must enforce one submission per (task, profile) pair and fail
/// with `Conflict` on a duplicate. `update` is a compare-and-swap on the
/// stored `version`: a mismatch fails with `Conflict` and leaves the stored
/// document untouched, surfacing lost-update races to the caller.
pub trait SubmissionRepository: Send + Sync {
    fn create(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>>;

    fn get(&self, submission_id: &str) -> BoxFuture<'_, DomainResult<Option<Submission>>>;

    fn find_by_task_and_profile(
        &self,
        task_id: &str,
        profile_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>>;

    fn list_by_profile(
        &self,
        profile_id: &str,
        status: Option<SubmissionStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>>;

    fn update(
        &self,
        submission: &Submission,
        expected_version: u64,
    ) -> BoxFuture<'_, DomainResult<Submission>>;
}
