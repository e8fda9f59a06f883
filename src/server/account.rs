use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::HistoryRecord;
use crate::pipeline::{CredentialResolver, SERVER_FLOOR_MINUTES};

use super::{ApiError, SharedState};

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Deserialize)]
pub struct TokenBody {
    pub token: String,
}

#[derive(Serialize, Debug)]
pub struct EmailPartial {
    pub partial: String,
}

#[derive(Serialize)]
pub struct IssuedToken {
    pub token: String,
}

#[derive(Deserialize)]
pub struct PolicyBody {
    pub token: String,
    pub minutes: i64,
}

/// `GET /api/user/email?token=`: enough of the email for the local app to
/// show who the credential belongs to, and nothing more.
pub async fn email_partial(
    State(state): State<SharedState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<EmailPartial>, ApiError> {
    let owner = state.db.resolve(&query.token).await?;
    let partial: String = owner.as_str().chars().take(6).collect();
    Ok(Json(EmailPartial { partial }))
}

/// `POST /api/token/rotate`: issues a fresh token for the presenting owner.
/// The previous token stops resolving the moment this returns.
pub async fn rotate_token(
    State(state): State<SharedState>,
    Json(body): Json<TokenBody>,
) -> Result<Json<IssuedToken>, ApiError> {
    match state.db.rotate_token(&body.token).await? {
        Some(token) => Ok(Json(IssuedToken { token })),
        None => Err(PipelineError::UnknownToken.into()),
    }
}

/// `POST /api/policy`: owner-configured recording interval, minutes
/// granularity with a hard five-minute floor. Takes effect on the next
/// evaluated sample.
pub async fn set_policy(
    State(state): State<SharedState>,
    Json(body): Json<PolicyBody>,
) -> Result<String, ApiError> {
    let owner = state.db.resolve(&body.token).await?;

    if body.minutes < SERVER_FLOOR_MINUTES {
        return Err(PipelineError::rejected(format!(
            "minimum interval is {SERVER_FLOOR_MINUTES} minutes"
        ))
        .into());
    }

    let interval_ms = body.minutes * 60_000;
    state.db.set_policy_interval_ms(&owner, interval_ms).await?;
    Ok(format!("interval set to {} minutes", body.minutes))
}

/// `GET /api/history?token=`: the owner's records, newest first.
pub async fn history(
    State(state): State<SharedState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let owner = state.db.resolve(&query.token).await?;
    let records = state.db.readings_for_owner(&owner).await?;
    Ok(Json(records))
}

/// `POST /api/history/clear`: owner-scoped purge. The throttle baseline is
/// reset too, so the next sample is recorded unconditionally.
pub async fn clear_history(
    State(state): State<SharedState>,
    Json(body): Json<TokenBody>,
) -> Result<String, ApiError> {
    let owner = state.db.resolve(&body.token).await?;
    let deleted = state.db.purge_readings_for_owner(&owner).await?;
    state.recorder.reset(&owner);
    Ok(format!("deleted {deleted} readings"))
}
