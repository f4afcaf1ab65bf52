use std::sync::Arc;

use serde_json::Value;

use crate::auth::Role;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::notifications::{
    submission_event_payload, EVENT_SUBMISSION_UPDATED, EVENT_TASK_LIST_UPDATED,
};
use crate::ports::notifications::NotificationSink;
use crate::ports::submission::SubmissionRepository;
use crate::profile::ProfileService;
use crate::submission::{reproject, StepStatus, Submission, SubmissionStatus};
use crate::util::now_ms;
use crate::DomainResult;

/// Admin review of individually submitted steps, layered on the same
/// projection rule as user submissions. Both operations require the target
/// step to currently be in review.
#[derive(Clone)]
pub struct ModerationService {
    repository: Arc<dyn SubmissionRepository>,
    profiles: ProfileService,
    sink: Arc<dyn NotificationSink>,
}

impl ModerationService {
    pub fn new(
        repository: Arc<dyn SubmissionRepository>,
        profiles: ProfileService,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            profiles,
            sink,
        }
    }

    pub async fn approve_step(
        &self,
        reviewer: ActorIdentity,
        role: Role,
        submission_id: &str,
        step_number: u32,
    ) -> DomainResult<Submission> {
        ensure_can_moderate(&role)?;

        let mut submission = self.load(submission_id).await?;
        let expected_version = submission.version;
        let now = now_ms();
        {
            let record = step_in_review(&mut submission, step_number)?;
            record.status = StepStatus::Approved;
            record.reviewed_at_ms = Some(now);
            record.reviewed_by = Some(reviewer.user_id);
            record.rejection_reason = None;
        }
        reproject(&mut submission, step_number, now);
        submission.updated_at_ms = now;
        submission.version += 1;

        let persisted = self.repository.update(&submission, expected_version).await?;
        self.notify_owner(&persisted, submission_event_payload(&persisted))
            .await;
        Ok(persisted)
    }

    pub async fn reject_step(
        &self,
        reviewer: ActorIdentity,
        role: Role,
        submission_id: &str,
        step_number: u32,
        reason: &str,
    ) -> DomainResult<Submission> {
        ensure_can_moderate(&role)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::Validation(
                "rejection reason is required".into(),
            ));
        }

        let mut submission = self.load(submission_id).await?;
        let expected_version = submission.version;
        let now = now_ms();
        {
            let record = step_in_review(&mut submission, step_number)?;
            record.status = StepStatus::Rejected;
            record.reviewed_at_ms = Some(now);
            record.reviewed_by = Some(reviewer.user_id);
            record.rejection_reason = Some(reason.to_string());
        }
        reproject(&mut submission, step_number, now);
        // Direct the user straight back to the step that failed review,
        // overriding the ascending scan for this one case.
        submission.active_step = step_number;
        submission.updated_at_ms = now;
        submission.version += 1;

        let persisted = self.repository.update(&submission, expected_version).await?;
        self.notify_owner(&persisted, submission_event_payload(&persisted))
            .await;
        Ok(persisted)
    }

    async fn load(&self, submission_id: &str) -> DomainResult<Submission> {
        self.repository
            .get(submission_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    async fn notify_owner(&self, submission: &Submission, payload: Value) {
        let profile = match self.profiles.get(&submission.profile_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    profile_id = %submission.profile_id,
                    "skipping moderation notification, owner profile lookup failed"
                );
                return;
            }
        };
        if let Err(err) = self
            .sink
            .notify(&profile.external_id, EVENT_SUBMISSION_UPDATED, payload)
            .await
        {
            tracing::warn!(error = %err, "notification sink failed");
        }
        if submission.status == SubmissionStatus::Completed {
            if let Err(err) = self
                .sink
                .notify(
                    &profile.external_id,
                    EVENT_TASK_LIST_UPDATED,
                    serde_json::json!({ "task_id": submission.task_id }),
                )
                .await
            {
                tracing::warn!(error = %err, "notification sink failed");
            }
        }
    }
}

fn ensure_can_moderate(role: &Role) -> DomainResult<()> {
    if role.can_moderate() {
        return Ok(());
    }
    Err(DomainError::Forbidden(
        "moderator privilege required for step review".into(),
    ))
}

fn step_in_review<'a>(
    submission: &'a mut Submission,
    step_number: u32,
) -> DomainResult<&'a mut crate::submission::StepRecord> {
    let record = submission
        .steps
        .iter_mut()
        .find(|record| record.step_number == step_number)
        .ok_or(DomainError::NotFound)?;
    if record.status != StepStatus::InReview {
        return Err(DomainError::InvalidState(format!(
            "step {step_number} is {}, expected in_review",
            record.status
        )));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NullNotificationSink;
    use crate::ports::profile::ProfileRepository;
    use crate::ports::task::TaskRepository;
    use crate::ports::BoxFuture;
    use crate::profile::Profile;
    use crate::submission::{StepRecord, SubmissionService};
    use crate::task::{StepDefinition, StepType, TaskDefinition, TaskService, TaskStatus};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct MemoryProfileRepository {
        profiles: RwLock<HashMap<String, Profile>>,
        by_external: RwLock<HashMap<String, String>>,
    }

    impl ProfileRepository for MemoryProfileRepository {
        fn create(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>> {
            let profile = profile.clone();
            Box::pin(async move {
                let mut by_external = self.by_external.write().await;
                if by_external.contains_key(&profile.external_id) {
                    return Err(DomainError::Conflict);
                }
                by_external.insert(profile.external_id.clone(), profile.profile_id.clone());
                self.profiles
                    .write()
                    .await
                    .insert(profile.profile_id.clone(), profile.clone());
                Ok(profile)
            })
        }

        fn get(&self, profile_id: &str) -> BoxFuture<'_, DomainResult<Option<Profile>>> {
            let profile_id = profile_id.to_string();
            Box::pin(async move { Ok(self.profiles.read().await.get(&profile_id).cloned()) })
        }

        fn get_by_external_id(
            &self,
            external_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Profile>>> {
            let external_id = external_id.to_string();
            Box::pin(async move {
                let by_external = self.by_external.read().await;
                let Some(profile_id) = by_external.get(&external_id) else {
                    return Ok(None);
                };
                Ok(self.profiles.read().await.get(profile_id).cloned())
            })
        }

        fn list(&self) -> BoxFuture<'_, DomainResult<Vec<Profile>>> {
            Box::pin(async move { Ok(self.profiles.read().await.values().cloned().collect()) })
        }

        fn update(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>> {
            let profile = profile.clone();
            Box::pin(async move {
                let mut profiles = self.profiles.write().await;
                if !profiles.contains_key(&profile.profile_id) {
                    return Err(DomainError::NotFound);
                }
                profiles.insert(profile.profile_id.clone(), profile.clone());
                Ok(profile)
            })
        }
    }

    struct MemoryTaskRepository {
        tasks: RwLock<HashMap<String, TaskDefinition>>,
    }

    impl TaskRepository for MemoryTaskRepository {
        fn get(&self, task_id: &str) -> BoxFuture<'_, DomainResult<Option<TaskDefinition>>> {
            let task_id = task_id.to_string();
            Box::pin(async move { Ok(self.tasks.read().await.get(&task_id).cloned()) })
        }

        fn list_active_by_brand(
            &self,
            _brand_id: &str,
        ) -> BoxFuture<'_, DomainResult<Vec<TaskDefinition>>> {
            Box::pin(async move { Ok(vec![]) })
        }
    }

    #[derive(Default)]
    struct MemorySubmissionRepository {
        submissions: RwLock<HashMap<String, Submission>>,
        by_pair: RwLock<HashMap<(String, String), String>>,
    }

    impl SubmissionRepository for MemorySubmissionRepository {
        fn create(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>> {
            let submission = submission.clone();
            Box::pin(async move {
                let pair = (submission.task_id.clone(), submission.profile_id.clone());
                let mut by_pair = self.by_pair.write().await;
                if by_pair.contains_key(&pair) {
                    return Err(DomainError::Conflict);
                }
                by_pair.insert(pair, submission.submission_id.clone());
                self.submissions
                    .write()
                    .await
                    .insert(submission.submission_id.clone(), submission.clone());
                Ok(submission)
            })
        }

        fn get(&self, submission_id: &str) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
            let submission_id = submission_id.to_string();
            Box::pin(async move {
                Ok(self.submissions.read().await.get(&submission_id).cloned())
            })
        }

        fn find_by_task_and_profile(
            &self,
            task_id: &str,
            profile_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
            let pair = (task_id.to_string(), profile_id.to_string());
            Box::pin(async move {
                let by_pair = self.by_pair.read().await;
                let Some(submission_id) = by_pair.get(&pair) else {
                    return Ok(None);
                };
                Ok(self.submissions.read().await.get(submission_id).cloned())
            })
        }

        fn list_by_profile(
            &self,
            profile_id: &str,
            status: Option<SubmissionStatus>,
        ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
            let profile_id = profile_id.to_string();
            Box::pin(async move {
                Ok(self
                    .submissions
                    .read()
                    .await
                    .values()
                    .filter(|submission| submission.profile_id == profile_id)
                    .filter(|submission| {
                        status.map_or(true, |wanted| submission.status == wanted)
                    })
                    .cloned()
                    .collect())
            })
        }

        fn update(
            &self,
            submission: &Submission,
            expected_version: u64,
        ) -> BoxFuture<'_, DomainResult<Submission>> {
            let submission = submission.clone();
            Box::pin(async move {
                let mut submissions = self.submissions.write().await;
                let stored = submissions
                    .get(&submission.submission_id)
                    .ok_or(DomainError::NotFound)?;
                if stored.version != expected_version {
                    return Err(DomainError::Conflict);
                }
                submissions.insert(submission.submission_id.clone(), submission.clone());
                Ok(submission)
            })
        }
    }

    fn step(step_number: u32, step_type: StepType) -> StepDefinition {
        StepDefinition {
            step_number,
            title: format!("step {step_number}"),
            description: String::new(),
            step_type,
            required: true,
            fields: None,
        }
    }

    fn three_step_task() -> TaskDefinition {
        TaskDefinition {
            task_id: "task-1".to_string(),
            brand_id: "brand-1".to_string(),
            title: "launch promo".to_string(),
            description: String::new(),
            reward: 1_500,
            deadline_ms: 4_000_000_000,
            status: TaskStatus::Active,
            steps: vec![
                step(1, StepType::Form),
                step(2, StepType::Link),
                step(3, StepType::Report),
            ],
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
        }
    }

    struct Fixture {
        submissions: SubmissionService,
        moderation: ModerationService,
    }

    fn fixture() -> Fixture {
        let profile_repo = Arc::new(MemoryProfileRepository::default());
        let task_repo = Arc::new(MemoryTaskRepository {
            tasks: RwLock::new(
                [("task-1".to_string(), three_step_task())]
                    .into_iter()
                    .collect(),
            ),
        });
        let submission_repo = Arc::new(MemorySubmissionRepository::default());
        let sink = Arc::new(NullNotificationSink);

        let profiles = ProfileService::new(profile_repo);
        Fixture {
            submissions: SubmissionService::new(
                profiles.clone(),
                TaskService::new(task_repo),
                submission_repo.clone(),
                sink.clone(),
            ),
            moderation: ModerationService::new(submission_repo, profiles, sink),
        }
    }

    fn reviewer() -> ActorIdentity {
        ActorIdentity::with_user_id("admin-1")
    }

    async fn submit_all_steps(fx: &Fixture) -> Submission {
        fx.submissions
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("step 1");
        fx.submissions
            .submit_step("task-1", "tg-1", 2, Some(json!({"url": "y"})))
            .await
            .expect("step 2");
        fx.submissions
            .submit_step("task-1", "tg-1", 3, Some(json!({})))
            .await
            .expect("step 3")
    }

    fn record(submission: &Submission, step_number: u32) -> &StepRecord {
        submission.step(step_number).expect("step")
    }

    #[tokio::test]
    async fn approving_every_step_completes_submission() {
        let fx = fixture();
        let submission = submit_all_steps(&fx).await;

        for step_number in [1, 2] {
            let partial = fx
                .moderation
                .approve_step(reviewer(), Role::Admin, &submission.submission_id, step_number)
                .await
                .expect("approve");
            assert_eq!(partial.status, SubmissionStatus::PendingReview);
        }
        let completed = fx
            .moderation
            .approve_step(reviewer(), Role::Admin, &submission.submission_id, 3)
            .await
            .expect("final approve");

        assert_eq!(completed.status, SubmissionStatus::Completed);
        assert!(completed.completed_at_ms.is_some());
        assert!(completed
            .steps
            .iter()
            .all(|record| record.status == StepStatus::Approved));
        assert_eq!(record(&completed, 3).reviewed_by.as_deref(), Some("admin-1"));
    }

    #[tokio::test]
    async fn approving_step_not_in_review_is_invalid_state() {
        let fx = fixture();
        let submission = fx
            .submissions
            .get_or_create("task-1", "tg-1")
            .await
            .expect("submission");

        let err = fx
            .moderation
            .approve_step(reviewer(), Role::Admin, &submission.submission_id, 1)
            .await
            .expect_err("invalid state");
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[tokio::test]
    async fn re_approving_approved_step_fails_and_leaves_submission_unchanged() {
        let fx = fixture();
        let submission = submit_all_steps(&fx).await;
        fx.moderation
            .approve_step(reviewer(), Role::Admin, &submission.submission_id, 1)
            .await
            .expect("approve");
        let before = fx
            .submissions
            .get(&submission.submission_id)
            .await
            .expect("reload");

        let err = fx
            .moderation
            .approve_step(reviewer(), Role::Admin, &submission.submission_id, 1)
            .await
            .expect_err("invalid state");
        assert!(matches!(err, DomainError::InvalidState(_)));

        let after = fx
            .submissions
            .get(&submission.submission_id)
            .await
            .expect("reload");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn rejecting_requires_non_empty_reason() {
        let fx = fixture();
        let submission = submit_all_steps(&fx).await;

        let err = fx
            .moderation
            .reject_step(reviewer(), Role::Admin, &submission.submission_id, 1, "   ")
            .await
            .expect_err("validation");
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn rejecting_forces_active_step_back_to_rejected_step() {
        let fx = fixture();
        // Step 1 in review, steps 2 and 3 still pending.
        fx.submissions
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("step 1");
        let submission = fx
            .submissions
            .get_or_create("task-1", "tg-1")
            .await
            .expect("reload");

        let rejected = fx
            .moderation
            .reject_step(
                reviewer(),
                Role::Admin,
                &submission.submission_id,
                1,
                "blurry photo",
            )
            .await
            .expect("reject");

        assert_eq!(record(&rejected, 1).status, StepStatus::Rejected);
        assert_eq!(
            record(&rejected, 1).rejection_reason.as_deref(),
            Some("blurry photo")
        );
        assert_eq!(rejected.active_step, 1);
        assert_eq!(rejected.status, SubmissionStatus::InProgress);

        // Re-submitting the rejected step re-enters review and the ascending
        // scan takes over again.
        let resubmitted = fx
            .submissions
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "fixed"})))
            .await
            .expect("resubmit");
        assert_eq!(record(&resubmitted, 1).status, StepStatus::InReview);
        assert_eq!(record(&resubmitted, 1).rejection_reason, None);
        assert_eq!(resubmitted.active_step, 2);
    }

    #[tokio::test]
    async fn rejecting_from_pending_review_reverts_to_in_progress() {
        let fx = fixture();
        let submission = submit_all_steps(&fx).await;
        assert_eq!(submission.status, SubmissionStatus::PendingReview);

        let rejected = fx
            .moderation
            .reject_step(
                reviewer(),
                Role::Moderator,
                &submission.submission_id,
                2,
                "broken link",
            )
            .await
            .expect("reject");
        assert_eq!(rejected.status, SubmissionStatus::InProgress);
        assert_eq!(rejected.active_step, 2);
    }

    #[tokio::test]
    async fn non_moderator_roles_are_forbidden() {
        let fx = fixture();
        let submission = submit_all_steps(&fx).await;

        let err = fx
            .moderation
            .approve_step(reviewer(), Role::User, &submission.submission_id, 1)
            .await
            .expect_err("forbidden");
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[tokio::test]
    async fn moderating_unknown_submission_is_not_found() {
        let fx = fixture();
        let err = fx
            .moderation
            .approve_step(reviewer(), Role::Admin, "missing", 1)
            .await
            .expect_err("not found");
        assert!(matches!(err, DomainError::NotFound));
    }

    #[tokio::test]
    async fn approving_report_step_with_null_data_is_allowed() {
        let fx = fixture();
        let submission = submit_all_steps(&fx).await;
        assert_eq!(record(&submission, 3).data, None);

        let approved = fx
            .moderation
            .approve_step(reviewer(), Role::Admin, &submission.submission_id, 3)
            .await
            .expect("approve empty report");
        assert_eq!(record(&approved, 3).status, StepStatus::Approved);
    }
}
