use std::sync::Arc;

use anyhow::Context;

use facebase_domain::moderation::ModerationService;
use facebase_domain::notifications::NullNotificationSink;
use facebase_domain::ports::db::DbAdapter;
use facebase_domain::ports::notifications::NotificationSink;
use facebase_domain::ports::profile::ProfileRepository;
use facebase_domain::ports::submission::SubmissionRepository;
use facebase_domain::ports::task::TaskRepository;
use facebase_domain::profile::ProfileService;
use facebase_domain::submission::SubmissionService;
use facebase_domain::task::TaskService;
use facebase_infra::config::AppConfig;
use facebase_infra::db::{DbConfig, SurrealAdapter};
use facebase_infra::notify::HttpNotificationSink;
use facebase_infra::repositories::{
    InMemoryProfileRepository, InMemorySubmissionRepository, InMemoryTaskRepository,
    SurrealProfileRepository, SurrealSubmissionRepository, SurrealTaskRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub profile_repo: Arc<dyn ProfileRepository>,
    pub task_repo: Arc<dyn TaskRepository>,
    pub submission_repo: Arc<dyn SubmissionRepository>,
    pub notification_sink: Arc<dyn NotificationSink>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let notification_sink: Arc<dyn NotificationSink> = if config.notify_enabled {
            Arc::new(HttpNotificationSink::new(
                config.notify_url.clone(),
                config.notify_timeout_ms,
            )?)
        } else {
            Arc::new(NullNotificationSink)
        };

        match config.data_backend.as_str() {
            "surreal" => {
                let db_config = DbConfig::from_app_config(&config);
                let adapter = SurrealAdapter::new(db_config.clone());
                adapter
                    .health_check()
                    .await
                    .context("surreal health check failed")?;

                let profile_repo = SurrealProfileRepository::new(&db_config).await?;
                profile_repo
                    .ensure_indexes()
                    .await
                    .context("profile index definition failed")?;
                let submission_repo = SurrealSubmissionRepository::new(&db_config).await?;
                submission_repo
                    .ensure_indexes()
                    .await
                    .context("submission index definition failed")?;
                let task_repo = SurrealTaskRepository::new(&db_config).await?;

                Ok(Self {
                    config,
                    profile_repo: Arc::new(profile_repo),
                    task_repo: Arc::new(task_repo),
                    submission_repo: Arc::new(submission_repo),
                    notification_sink,
                })
            }
            _ => Ok(Self::with_repositories(
                config,
                Arc::new(InMemoryProfileRepository::new()),
                Arc::new(InMemoryTaskRepository::new()),
                Arc::new(InMemorySubmissionRepository::new()),
                notification_sink,
            )),
        }
    }

    pub fn with_repositories(
        config: AppConfig,
        profile_repo: Arc<dyn ProfileRepository>,
        task_repo: Arc<dyn TaskRepository>,
        submission_repo: Arc<dyn SubmissionRepository>,
        notification_sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            profile_repo,
            task_repo,
            submission_repo,
            notification_sink,
        }
    }

    pub fn profile_service(&self) -> ProfileService {
        ProfileService::new(self.profile_repo.clone())
    }

    pub fn task_service(&self) -> TaskService {
        TaskService::new(self.task_repo.clone())
    }

    pub fn submission_service(&self) -> SubmissionService {
        SubmissionService::new(
            self.profile_service(),
            self.task_service(),
            self.submission_repo.clone(),
            self.notification_sink.clone(),
        )
    }

    pub fn moderation_service(&self) -> ModerationService {
        ModerationService::new(
            self.submission_repo.clone(),
            self.profile_service(),
            self.notification_sink.clone(),
        )
    }
}
