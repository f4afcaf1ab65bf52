use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{to_value, Value};
use surrealdb::{
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
    Surreal,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use facebase_domain::error::DomainError;
use facebase_domain::ports::profile::ProfileRepository;
use facebase_domain::ports::submission::SubmissionRepository;
use facebase_domain::ports::task::TaskRepository;
use facebase_domain::ports::BoxFuture;
use facebase_domain::profile::Profile;
use facebase_domain::submission::{StepRecord, Submission, SubmissionStatus};
use facebase_domain::task::{StepDefinition, TaskDefinition};
use facebase_domain::DomainResult;

use crate::db::DbConfig;

async fn connect(db_config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&db_config.endpoint).await?;
    db.signin(Root {
        username: &db_config.username,
        password: &db_config.password,
    })
    .await?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await?;
    Ok(Arc::new(db))
}

fn to_rfc3339(timestamp_ms: i64) -> DomainResult<String> {
    let dt = OffsetDateTime::from_unix_timestamp_nanos(timestamp_ms as i128 * 1_000_000)
        .map_err(|err| DomainError::Validation(format!("invalid timestamp: {err}")))?;
    Ok(dt
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()))
}

fn to_rfc3339_opt(timestamp_ms: Option<i64>) -> DomainResult<Option<String>> {
    timestamp_ms.map(to_rfc3339).transpose()
}

fn parse_timestamp(value: &str) -> DomainResult<i64> {
    let datetime = OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| DomainError::Validation(format!("invalid datetime '{value}': {err}")))?;
    Ok((datetime.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn parse_timestamp_opt(value: Option<&str>) -> DomainResult<Option<i64>> {
    value.map(parse_timestamp).transpose()
}

fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let error_message = err.to_string().to_lowercase();
    if error_message.contains("already exists")
        || error_message.contains("duplicate")
        || error_message.contains("unique")
        || error_message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Unavailable(err.to_string())
}

fn take_rows(response: &mut surrealdb::Response, index: usize) -> DomainResult<Vec<Value>> {
    response
        .take(index)
        .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))
}

fn decode_rows<T, E, F>(rows: Vec<Value>, map_row: F) -> DomainResult<Vec<E>>
where
    T: DeserializeOwned,
    F: Fn(T) -> DomainResult<E>,
{
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<T>(row)
                .map_err(|err| DomainError::Validation(format!("invalid row: {err}")))
                .and_then(&map_row)
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealProfileRow {
    profile_id: String,
    external_id: String,
    name: String,
    username: Option<String>,
    avatar: Option<String>,
    location: Option<String>,
    description: Option<String>,
    verified: bool,
    created_at: String,
    updated_at: String,
}

pub struct SurrealProfileRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealProfileRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: connect(db_config).await?,
        })
    }

    /// The unique index backs the find-or-create race resolution in the
    /// profile resolver; without it two concurrent first contacts could both
    /// commit.
    pub async fn ensure_indexes(&self) -> DomainResult<()> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS profile_external_id \
                 ON TABLE profile FIELDS external_id UNIQUE",
            )
            .await
            .map_err(map_surreal_error)?
            .check()
            .map_err(map_surreal_error)?;
        Ok(())
    }

    fn to_row(profile: &Profile) -> DomainResult<SurrealProfileRow> {
        Ok(SurrealProfileRow {
            profile_id: profile.profile_id.clone(),
            external_id: profile.external_id.clone(),
            name: profile.name.clone(),
            username: profile.username.clone(),
            avatar: profile.avatar.clone(),
            location: profile.location.clone(),
            description: profile.description.clone(),
            verified: profile.verified,
            created_at: to_rfc3339(profile.created_at_ms)?,
            updated_at: to_rfc3339(profile.updated_at_ms)?,
        })
    }

    fn from_row(row: SurrealProfileRow) -> DomainResult<Profile> {
        Ok(Profile {
            profile_id: row.profile_id,
            external_id: row.external_id,
            name: row.name,
            username: row.username,
            avatar: row.avatar,
            location: row.location,
            description: row.description,
            verified: row.verified,
            created_at_ms: parse_timestamp(&row.created_at)?,
            updated_at_ms: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl ProfileRepository for SurrealProfileRepository {
    fn create(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>> {
        let payload = match Self::to_row(profile) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let profile_id = profile.profile_id.clone();
        let external_id = profile.external_id.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut existing = client
                .query("SELECT profile_id FROM profile WHERE external_id = $external_id LIMIT 1")
                .bind(("external_id", external_id))
                .await
                .map_err(map_surreal_error)?;
            if !take_rows(&mut existing, 0)?.is_empty() {
                return Err(DomainError::Conflict);
            }

            let payload = to_value(payload)
                .map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))?;
            let mut response = client
                .query("CREATE type::record('profile', $profile_id) CONTENT $payload")
                .bind(("profile_id", profile_id))
                .bind(("payload", payload))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            decode_rows(rows, Self::from_row)?
                .into_iter()
                .next()
                .ok_or_else(|| DomainError::Validation("create returned no row".to_string()))
        })
    }

    fn get(&self, profile_id: &str) -> BoxFuture<'_, DomainResult<Option<Profile>>> {
        let profile_id = profile_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * FROM type::record('profile', $profile_id)")
                .bind(("profile_id", profile_id))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            Ok(decode_rows(rows, Self::from_row)?.into_iter().next())
        })
    }

    fn get_by_external_id(&self, external_id: &str) -> BoxFuture<'_, DomainResult<Option<Profile>>> {
        let external_id = external_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * FROM profile WHERE external_id = $external_id LIMIT 1")
                .bind(("external_id", external_id))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            Ok(decode_rows(rows, Self::from_row)?.into_iter().next())
        })
    }

    fn list(&self) -> BoxFuture<'_, DomainResult<Vec<Profile>>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * FROM profile ORDER BY created_at ASC, profile_id ASC")
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            decode_rows(rows, Self::from_row)
        })
    }

    fn update(&self, profile: &Profile) -> BoxFuture<'_, DomainResult<Profile>> {
        let payload = match Self::to_row(profile) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let profile_id = profile.profile_id.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let payload = to_value(payload)
                .map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))?;
            let mut response = client
                .query("UPDATE type::record('profile', $profile_id) CONTENT $payload")
                .bind(("profile_id", profile_id))
                .bind(("payload", payload))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            decode_rows(rows, Self::from_row)?
                .into_iter()
                .next()
                .ok_or(DomainError::NotFound)
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealStepDefinitionRow {
    step_number: u32,
    title: String,
    description: String,
    step_type: String,
    required: bool,
    fields: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealTaskRow {
    task_id: String,
    brand_id: String,
    title: String,
    description: String,
    reward: i64,
    deadline: String,
    status: String,
    steps: Vec<SurrealStepDefinitionRow>,
    created_at: String,
    updated_at: String,
}

pub struct SurrealTaskRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealTaskRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: connect(db_config).await?,
        })
    }

    fn from_row(row: SurrealTaskRow) -> DomainResult<TaskDefinition> {
        let steps = row
            .steps
            .into_iter()
            .map(|step| {
                Ok(StepDefinition {
                    step_number: step.step_number,
                    title: step.title,
                    description: step.description,
                    step_type: step.step_type.parse().map_err(|_| {
                        DomainError::Validation(format!(
                            "invalid step type '{}'",
                            step.step_type
                        ))
                    })?,
                    required: step.required,
                    fields: step.fields,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(TaskDefinition {
            task_id: row.task_id,
            brand_id: row.brand_id,
            title: row.title,
            description: row.description,
            reward: row.reward,
            deadline_ms: parse_timestamp(&row.deadline)?,
            status: row
                .status
                .parse()
                .map_err(|_| DomainError::Validation(format!("invalid task status '{}'", row.status)))?,
            steps,
            created_at_ms: parse_timestamp(&row.created_at)?,
            updated_at_ms: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TaskRepository for SurrealTaskRepository {
    fn get(&self, task_id: &str) -> BoxFuture<'_, DomainResult<Option<TaskDefinition>>> {
        let task_id = task_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * FROM type::record('task', $task_id)")
                .bind(("task_id", task_id))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            Ok(decode_rows(rows, Self::from_row)?.into_iter().next())
        })
    }

    fn list_active_by_brand(
        &self,
        brand_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<TaskDefinition>>> {
        let brand_id = brand_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * FROM task \
                     WHERE brand_id = $brand_id AND status = 'active' \
                     ORDER BY created_at DESC, task_id DESC",
                )
                .bind(("brand_id", brand_id))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            decode_rows(rows, Self::from_row)
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealStepRecordRow {
    step_number: u32,
    status: String,
    data: Option<Value>,
    submitted_at: Option<String>,
    reviewed_at: Option<String>,
    reviewed_by: Option<String>,
    rejection_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealSubmissionRow {
    submission_id: String,
    task_id: String,
    profile_id: String,
    status: String,
    active_step: u32,
    steps: Vec<SurrealStepRecordRow>,
    started_at: String,
    completed_at: Option<String>,
    version: u64,
    created_at: String,
    updated_at: String,
}

pub struct SurrealSubmissionRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealSubmissionRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: connect(db_config).await?,
        })
    }

    /// One submission per (task, profile), enforced by the storage engine so
    /// that concurrent auto-provisioning cannot create duplicates.
    pub async fn ensure_indexes(&self) -> DomainResult<()> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS submission_task_profile \
                 ON TABLE submission FIELDS task_id, profile_id UNIQUE",
            )
            .await
            .map_err(map_surreal_error)?
            .check()
            .map_err(map_surreal_error)?;
        Ok(())
    }

    fn to_row(submission: &Submission) -> DomainResult<SurrealSubmissionRow> {
        let steps = submission
            .steps
            .iter()
            .map(|record| {
                Ok(SurrealStepRecordRow {
                    step_number: record.step_number,
                    status: record.status.as_str().to_string(),
                    data: record.data.clone(),
                    submitted_at: to_rfc3339_opt(record.submitted_at_ms)?,
                    reviewed_at: to_rfc3339_opt(record.reviewed_at_ms)?,
                    reviewed_by: record.reviewed_by.clone(),
                    rejection_reason: record.rejection_reason.clone(),
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(SurrealSubmissionRow {
            submission_id: submission.submission_id.clone(),
            task_id: submission.task_id.clone(),
            profile_id: submission.profile_id.clone(),
            status: submission.status.as_str().to_string(),
            active_step: submission.active_step,
            steps,
            started_at: to_rfc3339(submission.started_at_ms)?,
            completed_at: to_rfc3339_opt(submission.completed_at_ms)?,
            version: submission.version,
            created_at: to_rfc3339(submission.created_at_ms)?,
            updated_at: to_rfc3339(submission.updated_at_ms)?,
        })
    }

    fn from_row(row: SurrealSubmissionRow) -> DomainResult<Submission> {
        let steps = row
            .steps
            .into_iter()
            .map(|record| {
                Ok(StepRecord {
                    step_number: record.step_number,
                    status: record.status.parse().map_err(|_| {
                        DomainError::Validation(format!("invalid step status '{}'", record.status))
                    })?,
                    data: record.data,
                    submitted_at_ms: parse_timestamp_opt(record.submitted_at.as_deref())?,
                    reviewed_at_ms: parse_timestamp_opt(record.reviewed_at.as_deref())?,
                    reviewed_by: record.reviewed_by,
                    rejection_reason: record.rejection_reason,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Submission {
            submission_id: row.submission_id,
            task_id: row.task_id,
            profile_id: row.profile_id,
            status: row.status.parse().map_err(|_| {
                DomainError::Validation(format!("invalid submission status '{}'", row.status))
            })?,
            active_step: row.active_step,
            steps,
            started_at_ms: parse_timestamp(&row.started_at)?,
            completed_at_ms: parse_timestamp_opt(row.completed_at.as_deref())?,
            version: row.version,
            created_at_ms: parse_timestamp(&row.created_at)?,
            updated_at_ms: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl SubmissionRepository for SurrealSubmissionRepository {
    fn create(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>> {
        let payload = match Self::to_row(submission) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let submission_id = submission.submission_id.clone();
        let task_id = submission.task_id.clone();
        let profile_id = submission.profile_id.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut existing = client
                .query(
                    "SELECT submission_id FROM submission \
                     WHERE task_id = $task_id AND profile_id = $profile_id LIMIT 1",
                )
                .bind(("task_id", task_id))
                .bind(("profile_id", profile_id))
                .await
                .map_err(map_surreal_error)?;
            if !take_rows(&mut existing, 0)?.is_empty() {
                return Err(DomainError::Conflict);
            }

            let payload = to_value(payload)
                .map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))?;
            let mut response = client
                .query("CREATE type::record('submission', $submission_id) CONTENT $payload")
                .bind(("submission_id", submission_id))
                .bind(("payload", payload))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            decode_rows(rows, Self::from_row)?
                .into_iter()
                .next()
                .ok_or_else(|| DomainError::Validation("create returned no row".to_string()))
        })
    }

    fn get(&self, submission_id: &str) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let submission_id = submission_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * FROM type::record('submission', $submission_id)")
                .bind(("submission_id", submission_id))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            Ok(decode_rows(rows, Self::from_row)?.into_iter().next())
        })
    }

    fn find_by_task_and_profile(
        &self,
        task_id: &str,
        profile_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let task_id = task_id.to_string();
        let profile_id = profile_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * FROM submission \
                     WHERE task_id = $task_id AND profile_id = $profile_id LIMIT 1",
                )
                .bind(("task_id", task_id))
                .bind(("profile_id", profile_id))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            Ok(decode_rows(rows, Self::from_row)?.into_iter().next())
        })
    }

    fn list_by_profile(
        &self,
        profile_id: &str,
        status: Option<SubmissionStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let profile_id = profile_id.to_string();
        let status = status.map(|status| status.as_str().to_string());
        let client = self.client.clone();
        Box::pin(async move {
            let query = match status {
                Some(_) => {
                    "SELECT * FROM submission \
                     WHERE profile_id = $profile_id AND status = $status \
                     ORDER BY updated_at DESC, submission_id DESC"
                }
                None => {
                    "SELECT * FROM submission \
                     WHERE profile_id = $profile_id \
                     ORDER BY updated_at DESC, submission_id DESC"
                }
            };
            let mut request = client.query(query).bind(("profile_id", profile_id));
            if let Some(status) = status {
                request = request.bind(("status", status));
            }
            let mut response = request.await.map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            decode_rows(rows, Self::from_row)
        })
    }

    fn update(
        &self,
        submission: &Submission,
        expected_version: u64,
    ) -> BoxFuture<'_, DomainResult<Submission>> {
        let payload = match Self::to_row(submission) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let submission_id = submission.submission_id.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let payload = to_value(payload)
                .map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))?;
            let mut response = client
                .query(
                    "UPDATE type::record('submission', $submission_id) \
                     CONTENT $payload WHERE version = $expected",
                )
                .bind(("submission_id", submission_id.clone()))
                .bind(("payload", payload))
                .bind(("expected", expected_version))
                .await
                .map_err(map_surreal_error)?;
            let rows = take_rows(&mut response, 0)?;
            if let Some(updated) = decode_rows(rows, Self::from_row)?.into_iter().next() {
                return Ok(updated);
            }

            // No row matched: either the document is gone or another writer
            // advanced the version first.
            let mut current = client
                .query("SELECT submission_id FROM type::record('submission', $submission_id)")
                .bind(("submission_id", submission_id))
                .await
                .map_err(map_surreal_error)?;
            if take_rows(&mut current, 0)?.is_empty() {
                Err(DomainError::NotFound)
            } else {
                Err(DomainError::Conflict)
            }
        })
    }
}
