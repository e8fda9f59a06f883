use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use log::info;
use serde::{Deserialize, Serialize};

use crate::acquisition::{AcquisitionStatus, SourceMode};
use crate::models::HistoryRecord;
use crate::server::ApiError;

use super::LocalApp;

type App = Arc<LocalApp>;

pub fn router(app: App) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/acquisition/start", post(start_acquisition))
        .route("/acquisition/stop", post(stop_acquisition))
        .route("/token", get(get_token).put(put_token))
        .route("/interval", get(get_interval).put(put_interval))
        .route("/filter", get(get_filter).put(put_filter))
        .route("/history", get(get_history).delete(delete_history))
        .route("/email", get(get_email))
        .route("/live", get(live_feed))
        .with_state(app)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    acquisition: AcquisitionStatus,
    mode: SourceMode,
    has_token: bool,
}

async fn status(State(app): State<App>) -> Json<StatusResponse> {
    Json(StatusResponse {
        acquisition: app.acquisition_status(),
        mode: app.source_mode(),
        has_token: !app.token().is_empty(),
    })
}

async fn start_acquisition(State(app): State<App>) -> Result<&'static str, ApiError> {
    app.start_acquisition().await?;
    Ok("acquisition started")
}

async fn stop_acquisition(State(app): State<App>) -> Result<&'static str, ApiError> {
    app.stop_acquisition().await?;
    Ok("acquisition stopped")
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    token: String,
}

async fn get_token(State(app): State<App>) -> Json<TokenPayload> {
    Json(TokenPayload { token: app.token() })
}

async fn put_token(
    State(app): State<App>,
    Json(payload): Json<TokenPayload>,
) -> Result<&'static str, ApiError> {
    app.set_token(&payload.token).await?;
    Ok("token stored")
}

#[derive(Serialize, Deserialize)]
struct IntervalPayload {
    minutes: i64,
}

async fn get_interval(State(app): State<App>) -> Result<Json<IntervalPayload>, ApiError> {
    Ok(Json(IntervalPayload {
        minutes: app.record_interval().await?,
    }))
}

async fn put_interval(
    State(app): State<App>,
    Json(payload): Json<IntervalPayload>,
) -> Result<Json<IntervalPayload>, ApiError> {
    Ok(Json(IntervalPayload {
        minutes: app.set_record_interval(payload.minutes).await?,
    }))
}

#[derive(Serialize, Deserialize)]
struct FilterPayload {
    filter: String,
}

async fn get_filter(State(app): State<App>) -> Result<Json<FilterPayload>, ApiError> {
    Ok(Json(FilterPayload {
        filter: app.history_filter().await?,
    }))
}

async fn put_filter(
    State(app): State<App>,
    Json(payload): Json<FilterPayload>,
) -> Result<&'static str, ApiError> {
    app.set_history_filter(&payload.filter).await?;
    Ok("filter stored")
}

async fn get_history(State(app): State<App>) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    Ok(Json(app.history().await?))
}

#[derive(Serialize)]
struct ClearedResponse {
    deleted: usize,
}

async fn delete_history(State(app): State<App>) -> Result<Json<ClearedResponse>, ApiError> {
    Ok(Json(ClearedResponse {
        deleted: app.clear_history().await?,
    }))
}

#[derive(Serialize)]
struct EmailResponse {
    partial: String,
}

async fn get_email(State(app): State<App>) -> Result<Json<EmailResponse>, ApiError> {
    Ok(Json(EmailResponse {
        partial: app.email_partial().await?,
    }))
}

/// Read-only live feed for the viewer UI: every accepted sample, whether or
/// not it was recorded.
async fn live_feed(State(app): State<App>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_viewer(app, socket))
}

async fn handle_viewer(app: App, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (channel_id, mut samples_rx) = app.open_live_channel();
    info!("live viewer {channel_id} connected");

    loop {
        tokio::select! {
            sample = samples_rx.recv() => {
                let Some(sample) = sample else { break };
                let Ok(text) = serde_json::to_string(&sample) else { continue };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // the local feed is one-way; anything inbound is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    app.close_live_channel(channel_id);
    info!("live viewer {channel_id} disconnected");
}
