mod admin;

use axum::extract::{Extension, Path, Query, State};
use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use facebase_domain::identity::ActorIdentity;
use facebase_domain::profile::{Profile, ProfileUpdate};
use facebase_domain::submission::{Submission, SubmissionStatus};
use facebase_domain::task::TaskDefinition;

use crate::middleware::AuthContext;
use crate::observability;
use crate::{error::ApiError, middleware as app_middleware, state::AppState, validation};

pub fn router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/v1/brands/:brand_id/tasks", get(list_brand_tasks))
        .route("/v1/tasks/user/list", get(list_user_tasks))
        .route("/v1/tasks/:task_id", get(get_task))
        .route("/v1/tasks/:task_id/steps/:step_number", post(submit_step))
        .route(
            "/v1/profiles/me",
            get(get_my_profile).patch(update_my_profile),
        )
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let admin_routes = Router::new()
        .route(
            "/v1/admin/submissions/:submission_id/steps/:step_number/approve",
            post(admin::approve_step),
        )
        .route(
            "/v1/admin/submissions/:submission_id/steps/:step_number/reject",
            post(admin::reject_step),
        )
        .route_layer(middleware::from_fn(
            app_middleware::require_moderator_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(user_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> impl IntoResponse {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::SERVICE_UNAVAILABLE, String::new()),
    }
}

/// Task plus the caller's (auto-provisioned) submission, the envelope every
/// task-facing endpoint returns so clients never see a task without its
/// submission state.
#[derive(Serialize)]
struct TaskWithSubmission {
    task: TaskDefinition,
    submission: Submission,
}

async fn list_brand_tasks(
    State(state): State<AppState>,
    Path(brand_id): Path<String>,
) -> Result<Json<Vec<TaskDefinition>>, ApiError> {
    let tasks = state.task_service().list_active_by_brand(&brand_id).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskWithSubmission>, ApiError> {
    let actor = actor_identity(&auth)?;
    let task = state.task_service().get_task(&task_id).await?;
    let submission = state
        .submission_service()
        .get_or_create(&task_id, &actor.user_id)
        .await?;
    Ok(Json(TaskWithSubmission { task, submission }))
}

#[derive(Debug, Deserialize)]
struct UserTaskListQuery {
    status: Option<String>,
}

async fn list_user_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<UserTaskListQuery>,
) -> Result<Json<Vec<TaskWithSubmission>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let status = query
        .status
        .as_deref()
        .map(|value| {
            value
                .parse::<SubmissionStatus>()
                .map_err(|_| ApiError::Validation(format!("invalid status filter '{value}'")))
        })
        .transpose()?;

    let submissions = state
        .submission_service()
        .list_for_user(&actor.user_id, status)
        .await?;

    let task_service = state.task_service();
    let mut items = Vec::with_capacity(submissions.len());
    for submission in submissions {
        match task_service.get_task(&submission.task_id).await {
            Ok(task) => items.push(TaskWithSubmission { task, submission }),
            Err(err) => {
                // A submission referencing a vanished task is data damage,
                // not a reason to fail the whole listing.
                tracing::warn!(
                    error = %err,
                    task_id = %submission.task_id,
                    submission_id = %submission.submission_id,
                    "skipping submission with unresolvable task"
                );
            }
        }
    }
    Ok(Json(items))
}

async fn submit_step(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((task_id, step_number)): Path<(String, u32)>,
    payload: Option<Json<Value>>,
) -> Result<Json<Submission>, ApiError> {
    let actor = actor_identity(&auth)?;
    let payload = payload.map(|Json(value)| value);

    let submission = state
        .submission_service()
        .submit_step(&task_id, &actor.user_id, step_number, payload)
        .await?;
    observability::register_step_transition("submit");
    Ok(Json(submission))
}

async fn get_my_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Profile>, ApiError> {
    let actor = actor_identity(&auth)?;
    let profile = state.profile_service().resolve(&actor.user_id).await?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 120))]
    name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    username: Option<String>,
    avatar: Option<String>,
    #[validate(length(max = 120))]
    location: Option<String>,
    #[validate(length(max = 2000))]
    description: Option<String>,
}

async fn update_my_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;

    // Make sure the profile exists before patching it; first contact may
    // well be a profile edit.
    state.profile_service().resolve(&actor.user_id).await?;
    let profile = state
        .profile_service()
        .update_display(
            &actor.user_id,
            ProfileUpdate {
                name: payload.name,
                username: payload.username,
                avatar: payload.avatar,
                location: payload.location,
                description: payload.description,
            },
        )
        .await?;
    Ok(Json(profile))
}

pub(crate) fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    let user_id = auth.user_id.clone().ok_or(ApiError::Unauthorized)?;
    let username = auth.username.clone().unwrap_or_else(|| user_id.clone());
    Ok(ActorIdentity { user_id, username })
}
