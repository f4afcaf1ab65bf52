use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use facebase_domain::submission::Submission;

use crate::middleware::AuthContext;
use crate::observability;
use crate::routes::actor_identity;
use crate::{error::ApiError, state::AppState, validation};

#[derive(Serialize)]
pub(crate) struct ModerationResponse {
    message: &'static str,
    submission: Submission,
}

pub(crate) async fn approve_step(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((submission_id, step_number)): Path<(String, u32)>,
) -> Result<Json<ModerationResponse>, ApiError> {
    let reviewer = actor_identity(&auth)?;
    let submission = state
        .moderation_service()
        .approve_step(reviewer, auth.role.clone(), &submission_id, step_number)
        .await?;
    observability::register_step_transition("approve");
    Ok(Json(ModerationResponse {
        message: "step approved",
        submission,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RejectStepRequest {
    #[validate(length(min = 1, max = 512))]
    reason: String,
}

pub(crate) async fn reject_step(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((submission_id, step_number)): Path<(String, u32)>,
    Json(payload): Json<RejectStepRequest>,
) -> Result<Json<ModerationResponse>, ApiError> {
    validation::validate(&payload)?;
    let reviewer = actor_identity(&auth)?;
    let submission = state
        .moderation_service()
        .reject_step(
            reviewer,
            auth.role.clone(),
            &submission_id,
            step_number,
            &payload.reason,
        )
        .await?;
    observability::register_step_transition("reject");
    Ok(Json(ModerationResponse {
        message: "step rejected",
        submission,
    }))
}
