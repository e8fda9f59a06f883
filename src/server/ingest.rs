use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;

use crate::models::RawReading;
use crate::pipeline::{self, CredentialResolver};

use super::{ApiError, SharedState};

/// Body of `POST /api/sensor/token`: a bearer token plus the six sensor
/// fields under their legacy wire names.
#[derive(Deserialize)]
pub struct SensorPush {
    pub token: String,
    #[serde(flatten)]
    pub reading: RawReading,
}

/// Token-authenticated ingestion. The sample is validated, stamped, offered
/// to the owner's live channel and recorded subject to the owner's interval
/// policy. A throttled sample is still a success.
pub async fn sensor_push(
    State(state): State<SharedState>,
    Json(push): Json<SensorPush>,
) -> Result<&'static str, ApiError> {
    let sample = push.reading.into_sample(Utc::now())?;
    let owner = state.db.resolve(&push.token).await?;

    pipeline::ingest_sample(&state.recorder, &state.fanout, &owner, &sample).await?;
    Ok("readings accepted")
}
