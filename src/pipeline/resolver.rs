use std::future::Future;

use anyhow::Context;
use chrono::Duration;

use crate::db::Database;
use crate::error::PipelineError;
use crate::models::OwnerIdentity;

/// Hard floor for owner-configured intervals on the remote service.
pub const SERVER_FLOOR_MINUTES: i64 = 5;
/// Default interval when an owner has no stored policy.
pub const SERVER_DEFAULT_MINUTES: i64 = 10;
/// Floor for the local app's interval setting.
pub const LOCAL_FLOOR_MINUTES: i64 = 1;

/// Maps an opaque bearer token to its current owner. Pure lookup against
/// current credential state, safe to call concurrently on the hot path;
/// rotation makes the previous token stop resolving immediately.
pub trait CredentialResolver: Send + Sync {
    fn resolve(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<OwnerIdentity, PipelineError>> + Send;
}

impl CredentialResolver for Database {
    async fn resolve(&self, token: &str) -> Result<OwnerIdentity, PipelineError> {
        self.resolve_token(token)
            .await
            .context("token lookup failed")
            .map_err(PipelineError::storage)?
            .ok_or(PipelineError::UnknownToken)
    }
}

/// Per-owner recording policy lookup. Mutations take effect on the next
/// evaluated sample; the recorder re-reads on every decision.
pub trait PolicyStore: Send + Sync {
    fn minimum_interval(
        &self,
        owner: &OwnerIdentity,
    ) -> impl Future<Output = Result<Duration, PipelineError>> + Send;
}

/// Remote-variant policies: per-owner overrides in the `policies` table,
/// 10-minute default otherwise. The 5-minute floor is enforced where the
/// policy is written, not here.
#[derive(Clone)]
pub struct ServerPolicyStore {
    db: Database,
}

impl ServerPolicyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PolicyStore for ServerPolicyStore {
    async fn minimum_interval(&self, owner: &OwnerIdentity) -> Result<Duration, PipelineError> {
        let stored = self
            .db
            .policy_interval_ms(owner)
            .await
            .context("policy lookup failed")
            .map_err(PipelineError::storage)?;
        Ok(stored
            .map(Duration::milliseconds)
            .unwrap_or_else(|| Duration::minutes(SERVER_DEFAULT_MINUTES)))
    }
}

/// Local-variant policy: the single configured interval, minutes
/// granularity, floored at one minute. The owner argument is ignored since
/// the local store records for exactly one identity at a time.
#[derive(Clone)]
pub struct LocalPolicyStore {
    db: Database,
}

impl LocalPolicyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PolicyStore for LocalPolicyStore {
    async fn minimum_interval(&self, _owner: &OwnerIdentity) -> Result<Duration, PipelineError> {
        let config = self
            .db
            .app_config()
            .await
            .context("app config lookup failed")
            .map_err(PipelineError::storage)?;
        Ok(Duration::minutes(
            config.record_interval_minutes.max(LOCAL_FLOOR_MINUTES),
        ))
    }
}
