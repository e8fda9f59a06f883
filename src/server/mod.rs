mod account;
mod ingest;
mod live;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use log::{error, info};
use tower_http::cors::CorsLayer;

use crate::config::ServerSettings;
use crate::db::Database;
use crate::error::PipelineError;
use crate::pipeline::{LiveFanout, RateLimitedRecorder, ServerPolicyStore};

/// Everything a request handler needs: the store, the per-owner throttled
/// recorder and the live delivery table.
pub struct ServerState {
    pub db: Database,
    pub recorder: RateLimitedRecorder<Database, ServerPolicyStore>,
    pub fanout: LiveFanout,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(db: Database) -> SharedState {
        let recorder = RateLimitedRecorder::new(db.clone(), ServerPolicyStore::new(db.clone()));
        Arc::new(Self {
            db,
            recorder,
            fanout: LiveFanout::default(),
        })
    }
}

/// Pipeline errors mapped onto HTTP. Storage details stay in the log; the
/// caller only learns the category.
#[derive(Debug)]
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(PipelineError::storage(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            PipelineError::UnknownToken => {
                (StatusCode::UNAUTHORIZED, "invalid token").into_response()
            }
            PipelineError::Rejected(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
            PipelineError::Storage(err) => {
                error!("storage failure: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
            PipelineError::Transport(err) => {
                error!("transport failure: {err:#}");
                (StatusCode::BAD_GATEWAY, "upstream failure").into_response()
            }
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/sensor/token", post(ingest::sensor_push))
        .route("/ws", get(live::ws_handler))
        .route("/api/user/email", get(account::email_partial))
        .route("/api/token/rotate", post(account::rotate_token))
        .route("/api/policy", post(account::set_policy))
        .route("/api/history", get(account::history))
        .route("/api/history/clear", post(account::clear_history))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(settings: ServerSettings) -> Result<()> {
    let db = Database::new(settings.db_path.clone())?;

    for email in &settings.seed_accounts {
        let token = db.ensure_user(email).await?;
        info!("account {email} ready; token {token}");
    }

    let state = ServerState::new(db);
    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    info!("remote service listening on {}", settings.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
