use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use facebase_domain::error::DomainError;
use facebase_domain::ports::profile::ProfileRepository;
use facebase_domain::ports::submission::SubmissionRepository;
use facebase_domain::ports::task::TaskRepository;
use facebase_domain::ports::BoxFuture;
use facebase_domain::profile::Profile;
use facebase_domain::submission::{Submission, SubmissionStatus};
use facebase_domain::task::{TaskDefinition, TaskStatus};
use facebase_domain::DomainResult;

/// In-memory repositories backing the `memory` data backend and the test
/// suites. They enforce the same uniqueness and versioning contracts as the
/// SurrealDB implementations.
#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: Arc<RwLock<HashMap<String, Profile>>>,
    by_external: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileRepository for InMemoryProfileRepository {
    fn create(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>> {
        let profile = profile.clone();
        let profiles = self.profiles.clone();
        let by_external = self.by_external.clone();
        Box::pin(async move {
            let mut by_external = by_external.write().await;
            let mut profiles = profiles.write().await;
            if profiles.contains_key(&profile.profile_id)
                || by_external.contains_key(&profile.external_id)
            {
                return Err(DomainError::Conflict);
            }
            by_external.insert(profile.external_id.clone(), profile.profile_id.clone());
            profiles.insert(profile.profile_id.clone(), profile.clone());
            Ok(profile)
        })
    }

    fn get(&self, profile_id: &str) -> BoxFuture<'_, DomainResult<Option<Profile>>> {
        let profile_id = profile_id.to_string();
        let profiles = self.profiles.clone();
        Box::pin(async move { Ok(profiles.read().await.get(&profile_id).cloned()) })
    }

    fn get_by_external_id(&self, external_id: &str) -> BoxFuture<'_, DomainResult<Option<Profile>>> {
        let external_id = external_id.to_string();
        let profiles = self.profiles.clone();
        let by_external = self.by_external.clone();
        Box::pin(async move {
            let by_external = by_external.read().await;
            let Some(profile_id) = by_external.get(&external_id) else {
                return Ok(None);
            };
            Ok(profiles.read().await.get(profile_id).cloned())
        })
    }

    fn list(&self) -> BoxFuture<'_, DomainResult<Vec<Profile>>> {
        let profiles = self.profiles.clone();
        Box::pin(async move {
            let mut rows: Vec<_> = profiles.read().await.values().cloned().collect();
            rows.sort_by(|left, right| {
                left.created_at_ms
                    .cmp(&right.created_at_ms)
                    .then_with(|| left.profile_id.cmp(&right.profile_id))
            });
            Ok(rows)
        })
    }

    fn update(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>> {
        let profile = profile.clone();
        let profiles = self.profiles.clone();
        Box::pin(async move {
            let mut profiles = profiles.write().await;
            let stored = profiles
                .get(&profile.profile_id)
                .ok_or(DomainError::NotFound)?;
            // The external id is the identity key; it never moves.
            let mut profile = profile;
            profile.external_id = stored.external_id.clone();
            profiles.insert(profile.profile_id.clone(), profile.clone());
            Ok(profile)
        })
    }
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<String, TaskDefinition>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeding hook for tests and the memory backend; the repository port
    /// itself stays read-only because tasks are authored elsewhere.
    pub async fn insert(&self, task: TaskDefinition) {
        self.tasks
            .write()
            .await
            .insert(task.task_id.clone(), task);
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn get(&self, task_id: &str) -> BoxFuture<'_, DomainResult<Option<TaskDefinition>>> {
        let task_id = task_id.to_string();
        let tasks = self.tasks.clone();
        Box::pin(async move { Ok(tasks.read().await.get(&task_id).cloned()) })
    }

    fn list_active_by_brand(
        &self,
        brand_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<TaskDefinition>>> {
        let brand_id = brand_id.to_string();
        let tasks = self.tasks.clone();
        Box::pin(async move {
            let mut rows: Vec<_> = tasks
                .read()
                .await
                .values()
                .filter(|task| task.brand_id == brand_id && task.status == TaskStatus::Active)
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                right
                    .created_at_ms
                    .cmp(&left.created_at_ms)
                    .then_with(|| right.task_id.cmp(&left.task_id))
            });
            Ok(rows)
        })
    }
}

#[derive(Default)]
pub struct InMemorySubmissionRepository {
    submissions: Arc<RwLock<HashMap<String, Submission>>>,
    by_pair: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl InMemorySubmissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubmissionRepository for InMemorySubmissionRepository {
    fn create(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>> {
        let submission = submission.clone();
        let submissions = self.submissions.clone();
        let by_pair = self.by_pair.clone();
        Box::pin(async move {
            let pair = (submission.task_id.clone(), submission.profile_id.clone());
            let mut by_pair = by_pair.write().await;
            if by_pair.contains_key(&pair) {
                return Err(DomainError::Conflict);
            }
            by_pair.insert(pair, submission.submission_id.clone());
            submissions
                .write()
                .await
                .insert(submission.submission_id.clone(), submission.clone());
            Ok(submission)
        })
    }

    fn get(&self, submission_id: &str) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let submission_id = submission_id.to_string();
        let submissions = self.submissions.clone();
        Box::pin(async move { Ok(submissions.read().await.get(&submission_id).cloned()) })
    }

    fn find_by_task_and_profile(
        &self,
        task_id: &str,
        profile_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let pair = (task_id.to_string(), profile_id.to_string());
        let submissions = self.submissions.clone();
        let by_pair = self.by_pair.clone();
        Box::pin(async move {
            let by_pair = by_pair.read().await;
            let Some(submission_id) = by_pair.get(&pair) else {
                return Ok(None);
            };
            Ok(submissions.read().await.get(submission_id).cloned())
        })
    }

    fn list_by_profile(
        &self,
        profile_id: &str,
        status: Option<SubmissionStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let profile_id = profile_id.to_string();
        let submissions = self.submissions.clone();
        Box::pin(async move {
            let mut rows: Vec<_> = submissions
                .read()
                .await
                .values()
                .filter(|submission| submission.profile_id == profile_id)
                .filter(|submission| status.map_or(true, |wanted| submission.status == wanted))
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                right
                    .updated_at_ms
                    .cmp(&left.updated_at_ms)
                    .then_with(|| right.submission_id.cmp(&left.submission_id))
            });
            Ok(rows)
        })
    }

    fn update(
        &self,
        submission: &Submission,
        expected_version: u64,
    ) -> BoxFuture<'_, DomainResult<Submission>> {
        let submission = submission.clone();
        let submissions = self.submissions.clone();
        Box::pin(async move {
            let mut submissions = submissions.write().await;
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
