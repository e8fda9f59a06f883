use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use crate::db::Database;
use crate::error::PipelineError;
use crate::models::{OwnerIdentity, Sample};

use super::resolver::PolicyStore;

/// Durable sink for accepted samples. Abstracted so the throttling logic can
/// be exercised against in-memory (and deliberately failing) stores.
pub trait HistoryStore: Send + Sync {
    fn append(
        &self,
        owner: &OwnerIdentity,
        sample: &Sample,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;
}

impl HistoryStore for Database {
    async fn append(&self, owner: &OwnerIdentity, sample: &Sample) -> Result<(), PipelineError> {
        self.insert_reading(owner, sample)
            .await
            .context("reading insert failed")
            .map_err(PipelineError::storage)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ThrottleState {
    last_recorded_at: Option<DateTime<Utc>>,
}

/// Decides, per owner, whether a sample is durably recorded: at most one
/// write per policy interval, measured from the previous accepted write
/// (sliding window). State is process-local and rebuilt empty on restart,
/// which at worst allows one early write after a restart.
pub struct RateLimitedRecorder<S, P> {
    store: S,
    policies: P,
    throttle: Mutex<HashMap<OwnerIdentity, Arc<AsyncMutex<ThrottleState>>>>,
}

impl<S, P> RateLimitedRecorder<S, P>
where
    S: HistoryStore,
    P: PolicyStore,
{
    pub fn new(store: S, policies: P) -> Self {
        Self {
            store,
            policies,
            throttle: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, owner: &OwnerIdentity) -> Arc<AsyncMutex<ThrottleState>> {
        let mut map = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(owner.clone()).or_default().clone()
    }

    /// Check-then-act is atomic per owner: the owner's entry lock is held
    /// across the durable write, so concurrent evaluations for the same
    /// owner serialize while distinct owners proceed independently. The
    /// throttle timestamp only advances on a successful write; a storage
    /// failure leaves the next sample eligible.
    pub async fn evaluate(
        &self,
        owner: &OwnerIdentity,
        sample: &Sample,
    ) -> Result<bool, PipelineError> {
        let entry = self.entry(owner);
        let mut state = entry.lock().await;

        if let Some(last) = state.last_recorded_at {
            let interval = self.policies.minimum_interval(owner).await?;
            if sample.captured_at - last < interval {
                return Ok(false);
            }
        }

        self.store.append(owner, sample).await?;
        state.last_recorded_at = Some(sample.captured_at);
        Ok(true)
    }

    /// Forgets the owner's throttle baseline; the next sample is recorded
    /// unconditionally. An evaluation already in flight keeps its detached
    /// state, exactly as after a process restart.
    pub fn reset(&self, owner: &OwnerIdentity) {
        let mut map = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(owner);
    }

    pub fn reset_all(&self) {
        let mut map = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }
}
