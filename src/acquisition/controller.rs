use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::models::Sample;

use super::simulator::SimulatedSource;
use super::source::{DeviceSource, SampleSource, SourceError};
use super::{SourceConfig, SourceMode};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Backoff between device discovery attempts and reconnects.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);
/// Bounded wait for an explicitly configured device path to materialize.
const MATERIALIZE_POLL: Duration = Duration::from_millis(150);
const MATERIALIZE_TIMEOUT: Duration = Duration::from_secs(5);
/// Graceful stop window before the worker is aborted outright.
const STOP_GRACE: Duration = Duration::from_secs(5);
const ABORT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AcquisitionStatus {
    Idle,
    Starting,
    Running,
}

#[derive(Default)]
struct WorkerSlot {
    generation: u64,
    cancel: Option<CancellationToken>,
    abort: Option<AbortHandle>,
}

/// Supervises exactly one sample source per session. Start and stop are
/// idempotent commands guarded by the current status, a worker crash or
/// exit is observed and releases the slot, and no failure path can leave
/// the Starting flag stuck.
pub struct AcquisitionController {
    status_tx: watch::Sender<AcquisitionStatus>,
    slot: Arc<Mutex<WorkerSlot>>,
    config_rx: watch::Receiver<SourceConfig>,
    samples_tx: mpsc::Sender<Sample>,
}

impl AcquisitionController {
    pub fn new(config_rx: watch::Receiver<SourceConfig>, samples_tx: mpsc::Sender<Sample>) -> Self {
        let (status_tx, _) = watch::channel(AcquisitionStatus::Idle);
        Self {
            status_tx,
            slot: Arc::new(Mutex::new(WorkerSlot::default())),
            config_rx,
            samples_tx,
        }
    }

    pub fn status(&self) -> AcquisitionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionStatus> {
        self.status_tx.subscribe()
    }

    /// Starts a source session. A no-op while one is already starting or
    /// running.
    pub async fn start(&self) -> Result<()> {
        if self.status() != AcquisitionStatus::Idle {
            log_info!("acquisition already active; start ignored");
            return Ok(());
        }

        let mut slot = self.slot.lock().await;
        if self.status() != AcquisitionStatus::Idle {
            return Ok(());
        }

        self.status_tx.send_replace(AcquisitionStatus::Starting);
        let config = self.config_rx.borrow().clone();

        // a freshly unpacked install can race the device node; wait a
        // bounded moment, then give up cleanly rather than hanging in
        // Starting
        if config.mode == SourceMode::Device {
            if let Some(path) = &config.device_path {
                if !wait_for_path(Path::new(path)).await {
                    self.status_tx.send_replace(AcquisitionStatus::Idle);
                    bail!(
                        "device path {path} did not appear within {}s",
                        MATERIALIZE_TIMEOUT.as_secs()
                    );
                }
            }
        }

        slot.generation += 1;
        let generation = slot.generation;
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(acquisition_loop(
            config,
            self.samples_tx.clone(),
            cancel.clone(),
            self.status_tx.clone(),
        ));
        slot.abort = Some(worker.abort_handle());
        slot.cancel = Some(cancel);

        // observe the worker's exit (normal, error or panic) and release
        // the slot so the next start is never blocked by stale state
        let slot_ref = self.slot.clone();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            match worker.await {
                Ok(()) => log_info!("acquisition worker exited"),
                Err(err) if err.is_cancelled() => log_warn!("acquisition worker aborted"),
                Err(err) => log_error!("acquisition worker crashed: {err}"),
            }

            let mut slot = slot_ref.lock().await;
            if slot.generation == generation {
                slot.cancel = None;
                slot.abort = None;
                status_tx.send_replace(AcquisitionStatus::Idle);
            }
        });

        Ok(())
    }

    /// Stops the current session: cancel first, abort if the worker does not
    /// wind down within the grace window. A no-op when nothing runs.
    pub async fn stop(&self) -> Result<()> {
        let (cancel, abort) = {
            let slot = self.slot.lock().await;
            (slot.cancel.clone(), slot.abort.clone())
        };

        let Some(cancel) = cancel else {
            return Ok(());
        };
        cancel.cancel();

        if self.await_idle(STOP_GRACE).await {
            return Ok(());
        }

        log_warn!("acquisition worker ignored cancellation; aborting");
        if let Some(abort) = abort {
            abort.abort();
        }

        if self.await_idle(ABORT_GRACE).await {
            Ok(())
        } else {
            bail!("acquisition worker failed to stop")
        }
    }

    async fn await_idle(&self, grace: Duration) -> bool {
        let mut status_rx = self.status_tx.subscribe();
        tokio::time::timeout(grace, async {
            while *status_rx.borrow_and_update() != AcquisitionStatus::Idle {
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }
}

async fn wait_for_path(path: &Path) -> bool {
    let deadline = tokio::time::Instant::now() + MATERIALIZE_TIMEOUT;
    loop {
        if path.exists() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(MATERIALIZE_POLL).await;
    }
}

/// One acquisition session: build the configured source, pump readings into
/// the pipeline, reconnect on session-fatal device errors, exit on stop or
/// when the consumer goes away.
async fn acquisition_loop(
    config: SourceConfig,
    samples_tx: mpsc::Sender<Sample>,
    cancel: CancellationToken,
    status_tx: watch::Sender<AcquisitionStatus>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let source: Box<dyn SampleSource> = match config.mode {
            SourceMode::Emulate => Box::new(SimulatedSource::default()),
            SourceMode::Device => {
                let path = config.device_path.clone();
                let connected =
                    tokio::task::spawn_blocking(move || DeviceSource::connect(path.as_deref()))
                        .await;
                match connected {
                    Ok(Ok(source)) => Box::new(source),
                    Ok(Err(SourceError::NotFound)) => {
                        log_warn!(
                            "sensor board not found; retrying in {}s",
                            RETRY_BACKOFF.as_secs()
                        );
                        if backoff_or_cancel(&cancel).await {
                            break;
                        }
                        continue;
                    }
                    Ok(Err(err)) => {
                        log_error!("failed to open sensor board: {err}; retrying");
                        if backoff_or_cancel(&cancel).await {
                            break;
                        }
                        continue;
                    }
                    Err(join_err) => {
                        log_error!("device connect worker crashed: {join_err}");
                        if backoff_or_cancel(&cancel).await {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        log_info!("acquisition running: {}", source.describe());
        status_tx.send_replace(AcquisitionStatus::Running);

        match run_source(source, samples_tx.clone(), cancel.clone()).await {
            Ok(()) => break,
            Err(err) => {
                log_error!("acquisition session ended: {err}; reconnecting");
                status_tx.send_replace(AcquisitionStatus::Starting);
                if backoff_or_cancel(&cancel).await {
                    break;
                }
            }
        }
    }
}

/// True when cancellation arrived during the backoff.
async fn backoff_or_cancel(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(RETRY_BACKOFF) => false,
    }
}

/// Drives the blocking source on a worker thread. Readings are stamped here,
/// at the pipeline boundary; out-of-range readings are dropped and logged,
/// never propagated.
async fn run_source(
    mut source: Box<dyn SampleSource>,
    samples_tx: mpsc::Sender<Sample>,
    cancel: CancellationToken,
) -> Result<(), SourceError> {
    let worker = tokio::task::spawn_blocking(move || {
        while !cancel.is_cancelled() {
            match source.next_reading(&cancel) {
                Ok(Some(raw)) => match raw.into_sample(Utc::now()) {
                    Ok(sample) => {
                        if samples_tx.blocking_send(sample).is_err() {
                            log_warn!("sample consumer gone; stopping source");
                            break;
                        }
                    }
                    Err(err) => {
                        log_warn!("dropping reading: {err}");
                    }
                },
                Ok(None) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    });

    worker.await.unwrap_or(Err(SourceError::Crashed))
}
