use std::sync::Arc;
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::notifications::{
    step_event_payload, submission_event_payload, EVENT_STEP_COMPLETED, EVENT_SUBMISSION_CREATED,
    EVENT_SUBMISSION_UPDATED,
};
use crate::ports::notifications::NotificationSink;
use crate::ports::step_payload::{AcceptAllPayloads, StepPayloadValidator};
use crate::ports::submission::SubmissionRepository;
use crate::profile::{Profile, ProfileService};
use crate::task::{StepType, TaskDefinition, TaskService};
use crate::util::now_ms;
use crate::DomainResult;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// A step accepts user data only before review or after a rejection.
    /// `approved` is terminal.
    pub fn accepts_submission(&self) -> bool {
        matches!(self, Self::Pending | Self::Rejected)
    }

    pub fn needs_user_action(&self) -> bool {
        matches!(self, Self::Pending | Self::Rejected)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_review" => Ok(Self::InReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err("unknown step status"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    InProgress,
    PendingReview,
    Completed,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::PendingReview => "pending_review",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in_progress" => Ok(Self::InProgress),
            "pending_review" => Ok(Self::PendingReview),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            _ => Err("unknown submission status"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub step_number: u32,
    pub status: StepStatus,
    pub data: Option<Value>,
    pub submitted_at_ms: Option<i64>,
    pub reviewed_at_ms: Option<i64>,
    pub reviewed_by: Option<String>,
    pub rejection_reason: Option<String>,
}

impl StepRecord {
    fn pending(step_number: u32) -> Self {
        Self {
            step_number,
            status: StepStatus::Pending,
            data: None,
            submitted_at_ms: None,
            reviewed_at_ms: None,
            reviewed_by: None,
            rejection_reason: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub submission_id: String,
    pub task_id: String,
    pub profile_id: String,
    pub status: SubmissionStatus,
    pub active_step: u32,
    pub steps: Vec<StepRecord>,
    pub started_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    pub version: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Submission {
    /// Eagerly materializes one pending step record per step definition. The
    /// step-number set is fixed here and never changes afterwards.
    pub fn new_for_task(task: &TaskDefinition, profile_id: impl Into<String>, now: i64) -> Self {
        let steps = task
            .steps
            .iter()
            .map(|definition| StepRecord::pending(definition.step_number))
            .collect();
        Self {
            submission_id: crate::util::uuid_v7_without_dashes(),
            task_id: task.task_id.clone(),
            profile_id: profile_id.into(),
            status: SubmissionStatus::InProgress,
            active_step: 1,
            steps,
            started_at_ms: now,
            completed_at_ms: None,
            version: 0,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn step(&self, step_number: u32) -> Option<&StepRecord> {
        self.steps
            .iter()
            .find(|record| record.step_number == step_number)
    }

    fn step_mut(&mut self, step_number: u32) -> Option<&mut StepRecord> {
        self.steps
            .iter_mut()
            .find(|record| record.step_number == step_number)
    }
}

/// Empty means absent, JSON null, or an object with no keys.
pub(crate) fn payload_is_empty(payload: &Option<Value>) -> bool {
    match payload {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

pub(crate) fn normalize_payload(payload: Option<Value>) -> Option<Value> {
    if payload_is_empty(&payload) {
        None
    } else {
        payload
    }
}

/// The single derivation point for submission-level state. Runs after every
/// step mutation so the cached `status`/`active_step` can never drift from
/// the step records:
///
/// - every step approved: `completed`, `completed_at` set once, the active
///   step stays on the step that was just mutated;
/// - otherwise the first pending-or-rejected step in ascending step-number
///   order becomes the active step and the submission is `in_progress`;
/// - otherwise everything is in review or approved: `pending_review`, active
///   step stays on the just-mutated step.
pub(crate) fn reproject(submission: &mut Submission, mutated_step: u32, now: i64) {
    let all_approved = submission
        .steps
        .iter()
        .all(|record| record.status == StepStatus::Approved);
    if all_approved {
        submission.status = SubmissionStatus::Completed;
        submission.completed_at_ms.get_or_insert(now);
        submission.active_step = mutated_step;
        return;
    }

    let first_actionable = submission
        .steps
        .iter()
        .find(|record| record.status.needs_user_action())
        .map(|record| record.step_number);
    match first_actionable {
        Some(step_number) => {
            submission.status = SubmissionStatus::InProgress;
            submission.active_step = step_number;
        }
        None => {
            submission.status = SubmissionStatus::PendingReview;
            submission.active_step = mutated_step;
        }
    }
}

#[derive(Clone)]
pub struct SubmissionService {
    profiles: ProfileService,
    tasks: TaskService,
    repository: Arc<dyn SubmissionRepository>,
    sink: Arc<dyn NotificationSink>,
    payload_validator: Arc<dyn StepPayloadValidator>,
}

impl SubmissionService {
    pub fn new(
        profiles: ProfileService,
        tasks: TaskService,
        repository: Arc<dyn SubmissionRepository>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            profiles,
            tasks,
            repository,
            sink,
            payload_validator: Arc::new(AcceptAllPayloads),
        }
    }

    /// Installs a step-type-specific payload validator. Payload shape is a
    /// capability concern; the engine itself only enforces the required/empty
    /// rule.
    pub fn with_payload_validator(mut self, validator: Arc<dyn StepPayloadValidator>) -> Self {
        self.payload_validator = validator;
        self
    }

    /// Auto-provisioning entry point used by every read and write path: the
    /// profile and the submission both come into existence on first contact
    /// with a task.
    pub async fn get_or_create(
        &self,
        task_id: &str,
        external_user_id: &str,
    ) -> DomainResult<Submission> {
        let profile = self.profiles.resolve(external_user_id).await?;
        self.get_or_create_for_profile(task_id, &profile).await
    }

    pub async fn get(&self, submission_id: &str) -> DomainResult<Submission> {
        self.repository
            .get(submission_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    pub async fn list_for_user(
        &self,
        external_user_id: &str,
        status: Option<SubmissionStatus>,
    ) -> DomainResult<Vec<Submission>> {
        let profile = self.profiles.resolve(external_user_id).await?;
        self.repository
            .list_by_profile(&profile.profile_id, status)
            .await
    }

    pub async fn submit_step(
        &self,
        task_id: &str,
        external_user_id: &str,
        step_number: u32,
        payload: Option<Value>,
    ) -> DomainResult<Submission> {
        let profile = self.profiles.resolve(external_user_id).await?;
        let task = self.tasks.get_task(task_id).await?;
        let mut submission = self.get_or_create_for_profile(task_id, &profile).await?;

        let definition = task.step(step_number).ok_or(DomainError::NotFound)?;
        let payload = normalize_payload(payload);
        if definition.required
            && payload.is_none()
            && definition.step_type != StepType::Report
        {
            return Err(DomainError::Validation(format!(
                "step {step_number} requires data to be submitted"
            )));
        }
        if let Some(value) = payload.as_ref() {
            self.payload_validator.validate(definition, value)?;
        }

        let expected_version = submission.version;
        let now = now_ms();
        {
            let record = submission
                .step_mut(step_number)
                .ok_or(DomainError::NotFound)?;
            if !record.status.accepts_submission() {
                return Err(DomainError::InvalidState(format!(
                    "step {step_number} is {} and cannot be submitted",
                    record.status
                )));
            }
            record.data = payload;
            record.status = StepStatus::InReview;
            record.submitted_at_ms = Some(now);
            record.reviewed_at_ms = None;
            record.reviewed_by = None;
            record.rejection_reason = None;
        }
        reproject(&mut submission, step_number, now);
        submission.updated_at_ms = now;
        submission.version += 1;

        let persisted = self.repository.update(&submission, expected_version).await?;
        self.emit(
            &profile.external_id,
            EVENT_STEP_COMPLETED,
            step_event_payload(&persisted, step_number),
        )
        .await;
        self.emit(
            &profile.external_id,
            EVENT_SUBMISSION_UPDATED,
            submission_event_payload(&persisted),
        )
        .await;
        Ok(persisted)
    }

    async fn get_or_create_for_profile(
        &self,
        task_id: &str,
        profile: &Profile,
    ) -> DomainResult<Submission> {
        if let Some(existing) = self
            .repository
            .find_by_task_and_profile(task_id, &profile.profile_id)
            .await?
        {
            return Ok(existing);
        }

        let task = self.tasks.get_task(task_id).await?;
        let submission = Submission::new_for_task(&task, &profile.profile_id, now_ms());
        match self.repository.create(&submission).await {
            Ok(created) => {
                self.emit(
                    &profile.external_id,
                    EVENT_SUBMISSION_CREATED,
                    submission_event_payload(&created),
                )
                .await;
                Ok(created)
            }
            // A concurrent request won the creation race; the unique index on
            // (task, profile) rejected ours. Return the winner.
            Err(DomainError::Conflict) => self
                .repository
                .find_by_task_and_profile(task_id, &profile.profile_id)
                .await?
                .ok_or(DomainError::Conflict),
            Err(err) => Err(err),
        }
    }

    async fn emit(&self, user_id: &str, event: &'static str, payload: Value) {
        if let Err(err) = self.sink.notify(user_id, event, payload).await {
            tracing::warn!(error = %err, event, "notification sink failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::profile::ProfileRepository;
    use crate::ports::task::TaskRepository;
    use crate::ports::BoxFuture;
    use crate::task::{StepDefinition, TaskStatus};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub(crate) struct MockProfileRepository {
        profiles: RwLock<HashMap<String, Profile>>,
        by_external: RwLock<HashMap<String, String>>,
    }

    impl ProfileRepository for MockProfileRepository {
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

    pub(crate) struct MockTaskRepository {
        tasks: RwLock<HashMap<String, TaskDefinition>>,
    }

    impl MockTaskRepository {
        pub(crate) fn with_tasks(tasks: Vec<TaskDefinition>) -> Self {
            let tasks = tasks
                .into_iter()
                .map(|task| (task.task_id.clone(), task))
                .collect();
            Self {
                tasks: RwLock::new(tasks),
            }
        }
    }

    impl TaskRepository for MockTaskRepository {
        fn get(&self, task_id: &str) -> BoxFuture<'_, DomainResult<Option<TaskDefinition>>> {
            let task_id = task_id.to_string();
            Box::pin(async move { Ok(self.tasks.read().await.get(&task_id).cloned()) })
        }

        fn list_active_by_brand(
            &self,
            brand_id: &str,
        ) -> BoxFuture<'_, DomainResult<Vec<TaskDefinition>>> {
            let brand_id = brand_id.to_string();
            Box::pin(async move {
                Ok(self
                    .tasks
                    .read()
                    .await
                    .values()
                    .filter(|task| task.brand_id == brand_id)
                    .cloned()
                    .collect())
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct MockSubmissionRepository {
        submissions: RwLock<HashMap<String, Submission>>,
        by_pair: RwLock<HashMap<(String, String), String>>,
    }

    impl SubmissionRepository for MockSubmissionRepository {
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
                let mut submissions: Vec<_> = self
                    .submissions
                    .read()
                    .await
                    .values()
                    .filter(|submission| submission.profile_id == profile_id)
                    .filter(|submission| {
                        status.map_or(true, |wanted| submission.status == wanted)
                    })
                    .cloned()
                    .collect();
                submissions.sort_by(|left, right| {
                    right
                        .updated_at_ms
                        .cmp(&left.updated_at_ms)
                        .then_with(|| right.submission_id.cmp(&left.submission_id))
                });
                Ok(submissions)
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

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: RwLock<Vec<(String, String)>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(
            &self,
            user_id: &str,
            event: &str,
            _payload: Value,
        ) -> BoxFuture<'_, DomainResult<()>> {
            let entry = (user_id.to_string(), event.to_string());
            Box::pin(async move {
                self.events.write().await.push(entry);
                Ok(())
            })
        }
    }

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn notify(
            &self,
            _user_id: &str,
            _event: &str,
            _payload: Value,
        ) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Err(DomainError::Unavailable("sink offline".into())) })
        }
    }

    fn step(step_number: u32, step_type: StepType, required: bool) -> StepDefinition {
        StepDefinition {
            step_number,
            title: format!("step {step_number}"),
            description: String::new(),
            step_type,
            required,
            fields: None,
        }
    }

    pub(crate) fn three_step_task() -> TaskDefinition {
        TaskDefinition {
            task_id: "task-1".to_string(),
            brand_id: "brand-1".to_string(),
            title: "launch promo".to_string(),
            description: String::new(),
            reward: 1_500,
            deadline_ms: 4_000_000_000,
            status: TaskStatus::Active,
            steps: vec![
                step(1, StepType::Form, true),
                step(2, StepType::Link, true),
                step(3, StepType::Report, true),
            ],
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
        }
    }

    fn optional_step_task() -> TaskDefinition {
        TaskDefinition {
            task_id: "task-opt".to_string(),
            brand_id: "brand-1".to_string(),
            title: "optional extras".to_string(),
            description: String::new(),
            reward: 300,
            deadline_ms: 4_000_000_000,
            status: TaskStatus::Active,
            steps: vec![
                step(1, StepType::Form, true),
                step(2, StepType::Link, false),
            ],
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
        }
    }

    struct Fixture {
        service: SubmissionService,
        repository: Arc<MockSubmissionRepository>,
        sink: Arc<RecordingSink>,
    }

    fn fixture_with_tasks(tasks: Vec<TaskDefinition>) -> Fixture {
        let repository = Arc::new(MockSubmissionRepository::default());
        let sink = Arc::new(RecordingSink::default());
        let service = SubmissionService::new(
            ProfileService::new(Arc::new(MockProfileRepository::default())),
            TaskService::new(Arc::new(MockTaskRepository::with_tasks(tasks))),
            repository.clone(),
            sink.clone(),
        );
        Fixture {
            service,
            repository,
            sink,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_tasks(vec![three_step_task()])
    }

    fn step_status(submission: &Submission, step_number: u32) -> StepStatus {
        submission.step(step_number).expect("step").status
    }

    #[tokio::test]
    async fn get_or_create_provisions_fresh_submission() {
        let fx = fixture();
        let submission = fx
            .service
            .get_or_create("task-1", "tg-1")
            .await
            .expect("submission");

        assert_eq!(submission.status, SubmissionStatus::InProgress);
        assert_eq!(submission.active_step, 1);
        assert_eq!(submission.steps.len(), 3);
        assert!(submission
            .steps
            .iter()
            .all(|record| record.status == StepStatus::Pending && record.data.is_none()));
        let numbers: Vec<_> = submission
            .steps
            .iter()
            .map(|record| record.step_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let fx = fixture();
        let first = fx
            .service
            .get_or_create("task-1", "tg-1")
            .await
            .expect("first");
        let second = fx
            .service
            .get_or_create("task-1", "tg-1")
            .await
            .expect("second");
        assert_eq!(first.submission_id, second.submission_id);

        let events = fx.sink.events.read().await;
        let created = events
            .iter()
            .filter(|(_, event)| event == EVENT_SUBMISSION_CREATED)
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn get_or_create_for_unknown_task_is_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .get_or_create("task-missing", "tg-1")
            .await
            .expect_err("not found");
        assert!(matches!(err, DomainError::NotFound));
    }

    #[tokio::test]
    async fn duplicate_pair_create_conflicts_at_repository() {
        let fx = fixture();
        let submission = fx
            .service
            .get_or_create("task-1", "tg-1")
            .await
            .expect("submission");

        let mut duplicate = submission.clone();
        duplicate.submission_id = "another-id".to_string();
        let err = fx
            .repository
            .create(&duplicate)
            .await
            .expect_err("conflict");
        assert!(matches!(err, DomainError::Conflict));
    }

    #[tokio::test]
    async fn submit_step_advances_active_step() {
        let fx = fixture();
        let submission = fx
            .service
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("submit");

        assert_eq!(step_status(&submission, 1), StepStatus::InReview);
        assert_eq!(submission.active_step, 2);
        assert_eq!(submission.status, SubmissionStatus::InProgress);
        assert!(submission.step(1).expect("step").submitted_at_ms.is_some());
    }

    #[tokio::test]
    async fn all_steps_in_review_moves_to_pending_review() {
        let fx = fixture();
        fx.service
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("step 1");
        fx.service
            .submit_step("task-1", "tg-1", 2, Some(json!({"url": "y"})))
            .await
            .expect("step 2");
        // Report steps are allowed through with no data at all.
        let submission = fx
            .service
            .submit_step("task-1", "tg-1", 3, Some(json!({})))
            .await
            .expect("step 3");

        assert!(submission
            .steps
            .iter()
            .all(|record| record.status == StepStatus::InReview));
        assert_eq!(submission.status, SubmissionStatus::PendingReview);
        assert_eq!(submission.active_step, 3);
        assert_eq!(submission.step(3).expect("step").data, None);
    }

    #[tokio::test]
    async fn required_non_report_step_rejects_empty_payload() {
        let fx = fixture();
        let err = fx
            .service
            .submit_step("task-1", "tg-1", 2, Some(json!({})))
            .await
            .expect_err("validation");
        assert!(matches!(err, DomainError::Validation(_)));

        // The failed transition left no partial state behind.
        let submission = fx
            .service
            .get_or_create("task-1", "tg-1")
            .await
            .expect("reload");
        assert_eq!(step_status(&submission, 2), StepStatus::Pending);
        assert_eq!(submission.active_step, 1);
    }

    #[tokio::test]
    async fn optional_step_accepts_empty_payload_as_null() {
        let fx = fixture_with_tasks(vec![optional_step_task()]);
        let submission = fx
            .service
            .submit_step("task-opt", "tg-1", 2, None)
            .await
            .expect("submit");
        assert_eq!(step_status(&submission, 2), StepStatus::InReview);
        assert_eq!(submission.step(2).expect("step").data, None);
    }

    #[tokio::test]
    async fn payload_validator_capability_is_invoked_for_non_empty_payloads() {
        struct LinkPayloadValidator;

        impl StepPayloadValidator for LinkPayloadValidator {
            fn validate(
                &self,
                definition: &crate::task::StepDefinition,
                payload: &Value,
            ) -> DomainResult<()> {
                if definition.step_type == StepType::Link && payload.get("url").is_none() {
                    return Err(DomainError::Validation(
                        "link step payload must carry a url".into(),
                    ));
                }
                Ok(())
            }
        }

        let fx = fixture();
        let service = fx
            .service
            .clone()
            .with_payload_validator(Arc::new(LinkPayloadValidator));

        let err = service
            .submit_step("task-1", "tg-1", 2, Some(json!({"caption": "no link"})))
            .await
            .expect_err("shape rejected");
        assert!(matches!(err, DomainError::Validation(_)));

        let submission = service
            .submit_step("task-1", "tg-1", 2, Some(json!({"url": "https://t.me/post"})))
            .await
            .expect("shape accepted");
        assert_eq!(step_status(&submission, 2), StepStatus::InReview);
    }

    #[tokio::test]
    async fn submit_unknown_step_is_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .submit_step("task-1", "tg-1", 9, Some(json!({"name": "x"})))
            .await
            .expect_err("not found");
        assert!(matches!(err, DomainError::NotFound));
    }

    #[tokio::test]
    async fn resubmitting_step_in_review_is_invalid_state() {
        let fx = fixture();
        fx.service
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("first submit");
        let err = fx
            .service
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "y"})))
            .await
            .expect_err("invalid state");
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[tokio::test]
    async fn stale_version_update_conflicts() {
        let fx = fixture();
        let submission = fx
            .service
            .get_or_create("task-1", "tg-1")
            .await
            .expect("submission");

        let mut stale = submission.clone();
        stale.version += 1;
        let err = fx
            .repository
            .update(&stale, submission.version + 5)
            .await
            .expect_err("conflict");
        assert!(matches!(err, DomainError::Conflict));
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_transition() {
        let service = SubmissionService::new(
            ProfileService::new(Arc::new(MockProfileRepository::default())),
            TaskService::new(Arc::new(MockTaskRepository::with_tasks(vec![
                three_step_task(),
            ]))),
            Arc::new(MockSubmissionRepository::default()),
            Arc::new(FailingSink),
        );
        let submission = service
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("submit despite sink failure");
        assert_eq!(submission.active_step, 2);
    }

    #[tokio::test]
    async fn submit_emits_step_and_submission_events() {
        let fx = fixture();
        fx.service
            .submit_step("task-1", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("submit");

        let events = fx.sink.events.read().await;
        let kinds: Vec<&str> = events.iter().map(|(_, event)| event.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                EVENT_SUBMISSION_CREATED,
                EVENT_STEP_COMPLETED,
                EVENT_SUBMISSION_UPDATED
            ]
        );
        assert!(events.iter().all(|(user, _)| user == "tg-1"));
    }

    #[tokio::test]
    async fn list_for_user_filters_by_status() {
        let fx = fixture_with_tasks(vec![three_step_task(), optional_step_task()]);
        fx.service
            .get_or_create("task-1", "tg-1")
            .await
            .expect("first submission");
        fx.service
            .submit_step("task-opt", "tg-1", 1, Some(json!({"name": "x"})))
            .await
            .expect("submit");
        fx.service
            .submit_step("task-opt", "tg-1", 2, Some(json!({"url": "y"})))
            .await
            .expect("submit optional");

        let all = fx
            .service
            .list_for_user("tg-1", None)
            .await
            .expect("list all");
        assert_eq!(all.len(), 2);

        let pending_review = fx
            .service
            .list_for_user("tg-1", Some(SubmissionStatus::PendingReview))
            .await
            .expect("filtered");
        assert_eq!(pending_review.len(), 1);
        assert_eq!(pending_review[0].task_id, "task-opt");
    }

    #[test]
    fn reproject_marks_completion_once() {
        let task = three_step_task();
        let mut submission = Submission::new_for_task(&task, "profile-1", 1_000);
        for record in &mut submission.steps {
            record.status = StepStatus::Approved;
        }
        reproject(&mut submission, 3, 5_000);
        assert_eq!(submission.status, SubmissionStatus::Completed);
        assert_eq!(submission.completed_at_ms, Some(5_000));
        assert_eq!(submission.active_step, 3);

        // A later recomputation must not move the completion timestamp.
        reproject(&mut submission, 3, 9_000);
        assert_eq!(submission.completed_at_ms, Some(5_000));
    }

    #[test]
    fn reproject_prefers_lowest_actionable_step() {
        let task = three_step_task();
        let mut submission = Submission::new_for_task(&task, "profile-1", 1_000);
        submission.steps[0].status = StepStatus::InReview;
        submission.steps[1].status = StepStatus::Rejected;
        submission.steps[2].status = StepStatus::Pending;
        reproject(&mut submission, 1, 2_000);
        assert_eq!(submission.status, SubmissionStatus::InProgress);
        assert_eq!(submission.active_step, 2);
    }

    #[test]
    fn payload_normalization_treats_null_and_empty_object_as_absent() {
        assert!(payload_is_empty(&None));
        assert!(payload_is_empty(&Some(json!(null))));
        assert!(payload_is_empty(&Some(json!({}))));
        assert!(!payload_is_empty(&Some(json!({"a": 1}))));
        assert_eq!(normalize_payload(Some(json!({}))), None);
        assert_eq!(
            normalize_payload(Some(json!({"a": 1}))),
            Some(json!({"a": 1}))
        );
    }
}
