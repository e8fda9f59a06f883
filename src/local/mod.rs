mod commands;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::acquisition::{AcquisitionController, AcquisitionStatus, SourceConfig};
use crate::config::AppSettings;
use crate::db::Database;
use crate::models::{HistoryRecord, OwnerIdentity, Sample};
use crate::pipeline::{self, LiveChannel, LiveFanout, LocalPolicyStore, RateLimitedRecorder, LOCAL_FLOOR_MINUTES};
use crate::push::Pusher;

const DB_FILE: &str = "verdant.sqlite3";
const EMAIL_REFRESH_PERIOD: Duration = Duration::from_secs(10 * 60);
const SAMPLE_QUEUE: usize = 32;

/// The local variant: one acquisition supervisor, a local history store
/// scoped to the configured credential, a live feed for the viewer UI, and
/// a fire-and-forget relay to the remote service.
pub struct LocalApp {
    db: Database,
    recorder: RateLimitedRecorder<Database, LocalPolicyStore>,
    fanout: LiveFanout,
    controller: AcquisitionController,
    config_tx: watch::Sender<SourceConfig>,
    pusher: Pusher,
}

impl LocalApp {
    pub async fn new(settings: AppSettings) -> Result<Arc<Self>> {
        let db = Database::new(settings.data_dir.join(DB_FILE))?;
        let stored = db.app_config().await?;

        let mut source_config = SourceConfig::new(settings.mode, settings.endpoint_url.clone());
        source_config.token = stored.token;
        source_config.device_path = settings.device_path.clone();

        let (config_tx, config_rx) = watch::channel(source_config);
        let (samples_tx, samples_rx) = mpsc::channel(SAMPLE_QUEUE);

        let app = Arc::new(Self {
            recorder: RateLimitedRecorder::new(db.clone(), LocalPolicyStore::new(db.clone())),
            fanout: LiveFanout::default(),
            controller: AcquisitionController::new(config_rx.clone(), samples_tx),
            pusher: Pusher::new(config_rx),
            config_tx,
            db,
        });

        tokio::spawn(pipeline_loop(app.clone(), samples_rx));
        tokio::spawn(email_refresh_loop(app.clone()));

        Ok(app)
    }

    fn current_owner(&self) -> OwnerIdentity {
        OwnerIdentity::new(self.config_tx.borrow().token.clone())
    }

    /// Each accepted sample: relay upstream (no-op without a token), offer
    /// to the live feed, and record subject to the interval policy. Storage
    /// failures are logged and absorbed; the next sample stays eligible.
    async fn handle_sample(&self, sample: Sample) {
        self.pusher.push(&sample);

        let owner = self.current_owner();
        match pipeline::ingest_sample(&self.recorder, &self.fanout, &owner, &sample).await {
            Ok(true) => debug!("reading recorded to history"),
            Ok(false) => debug!("reading inside interval; history unchanged"),
            Err(err) => error!("reading not recorded: {err:#}"),
        }
    }

    // acquisition

    pub async fn start_acquisition(&self) -> Result<()> {
        self.controller.start().await
    }

    pub async fn stop_acquisition(&self) -> Result<()> {
        self.controller.stop().await
    }

    pub fn acquisition_status(&self) -> AcquisitionStatus {
        self.controller.status()
    }

    pub fn source_mode(&self) -> crate::acquisition::SourceMode {
        self.config_tx.borrow().mode
    }

    // credential

    pub fn token(&self) -> String {
        self.config_tx.borrow().token.clone()
    }

    /// Stores a new credential and restarts a running acquisition session so
    /// subsequent pushes carry it.
    pub async fn set_token(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            bail!("token must not be empty");
        }

        self.db.set_app_token(token).await?;
        self.config_tx.send_modify(|config| config.token = token.to_string());
        self.refresh_email_partial().await;

        if self.controller.status() != AcquisitionStatus::Idle {
            info!("credential changed; restarting acquisition");
            self.stop_acquisition().await?;
            self.start_acquisition().await?;
        }
        Ok(())
    }

    pub async fn email_partial(&self) -> Result<String> {
        Ok(self.db.app_config().await?.email_partial)
    }

    async fn refresh_email_partial(&self) {
        let Some(partial) = self.pusher.fetch_email_partial().await else {
            return;
        };
        match self.db.app_config().await {
            Ok(config) if config.email_partial == partial => {}
            Ok(_) => {
                if let Err(err) = self.db.set_email_partial(&partial).await {
                    warn!("failed to cache email partial: {err:#}");
                } else {
                    info!("account email updated: {partial}…");
                }
            }
            Err(err) => warn!("failed to read app config: {err:#}"),
        }
    }

    // recording policy

    pub async fn record_interval(&self) -> Result<i64> {
        Ok(self.db.app_config().await?.record_interval_minutes)
    }

    /// Minutes granularity, floored at one. Takes effect on the next sample.
    pub async fn set_record_interval(&self, minutes: i64) -> Result<i64> {
        let clamped = minutes.max(LOCAL_FLOOR_MINUTES);
        self.db.set_record_interval_minutes(clamped).await?;
        Ok(clamped)
    }

    // history

    pub async fn history_filter(&self) -> Result<String> {
        Ok(self.db.app_config().await?.filter_owner)
    }

    pub async fn set_history_filter(&self, filter: &str) -> Result<()> {
        self.db.set_filter_owner(filter.trim()).await
    }

    /// Recorded readings, newest first, honoring the configured owner
    /// filter when one is set.
    pub async fn history(&self) -> Result<Vec<HistoryRecord>> {
        let filter = self.db.app_config().await?.filter_owner;
        if filter.is_empty() {
            self.db.all_readings().await
        } else {
            self.db.readings_for_owner(&OwnerIdentity::new(filter)).await
        }
    }

    /// Clears all local records and the throttle baseline, so the next
    /// reading is recorded unconditionally.
    pub async fn clear_history(&self) -> Result<usize> {
        let deleted = self.db.purge_all_readings().await?;
        self.recorder.reset_all();
        Ok(deleted)
    }

    // live feed

    /// Registers a viewer under the current credential. Only one viewer is
    /// current at a time; a new one silently replaces the old.
    pub fn open_live_channel(&self) -> (Uuid, mpsc::Receiver<Sample>) {
        let (channel, rx) = LiveChannel::new(16);
        let id = channel.id();
        self.fanout.register(self.current_owner(), channel);
        (id, rx)
    }

    pub fn close_live_channel(&self, channel_id: Uuid) {
        self.fanout.unregister(channel_id);
    }
}

async fn pipeline_loop(app: Arc<LocalApp>, mut samples_rx: mpsc::Receiver<Sample>) {
    while let Some(sample) = samples_rx.recv().await {
        app.handle_sample(sample).await;
    }
    warn!("acquisition sample stream closed");
}

async fn email_refresh_loop(app: Arc<LocalApp>) {
    let mut ticker = tokio::time::interval(EMAIL_REFRESH_PERIOD);
    loop {
        ticker.tick().await;
        app.refresh_email_partial().await;
    }
}

/// Brings the local app up and serves the control surface until shutdown.
pub async fn run(settings: AppSettings) -> Result<()> {
    let app = LocalApp::new(settings.clone()).await?;

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", settings.control_port))
        .await
        .with_context(|| format!("failed to bind control port {}", settings.control_port))?;
    info!(
        "control surface on http://127.0.0.1:{}",
        settings.control_port
    );

    axum::serve(listener, commands::router(app)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::acquisition::SourceMode;
    use crate::models::RawReading;

    async fn test_app() -> (Arc<LocalApp>, TempDir) {
        let dir = TempDir::new().unwrap();
        let settings = AppSettings {
            data_dir: dir.path().to_path_buf(),
            control_port: 0,
            endpoint_url: String::new(),
            mode: SourceMode::Emulate,
            device_path: None,
        };
        (LocalApp::new(settings).await.unwrap(), dir)
    }

    fn sample_at(offset_secs: i64, temp: f64) -> Sample {
        RawReading {
            temp,
            humidity_air: 50.0,
            humidity_soil: 40.0,
            gas_flammable: 2.0,
            gas_toxic: 1.0,
            is_raining: false,
        }
        .into_sample(Utc::now() + ChronoDuration::seconds(offset_secs))
        .unwrap()
    }

    #[tokio::test]
    async fn interval_setting_is_floored_at_one_minute() {
        let (app, _dir) = test_app().await;
        assert_eq!(app.set_record_interval(0).await.unwrap(), 1);
        assert_eq!(app.set_record_interval(-5).await.unwrap(), 1);
        assert_eq!(app.set_record_interval(7).await.unwrap(), 7);
        assert_eq!(app.record_interval().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn samples_record_per_interval_and_feed_the_live_view() {
        let (app, _dir) = test_app().await;
        app.set_record_interval(1).await.unwrap();

        let (_id, mut live_rx) = app.open_live_channel();

        app.handle_sample(sample_at(0, 20.0)).await;
        app.handle_sample(sample_at(10, 21.0)).await;

        // one durable record, two live deliveries
        assert_eq!(app.history().await.unwrap().len(), 1);
        assert!(live_rx.try_recv().is_ok());
        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn clear_history_resets_the_throttle_baseline() {
        let (app, _dir) = test_app().await;
        app.handle_sample(sample_at(0, 20.0)).await;
        app.handle_sample(sample_at(5, 21.0)).await;
        assert_eq!(app.history().await.unwrap().len(), 1);

        assert_eq!(app.clear_history().await.unwrap(), 1);

        // still inside the old window, but the baseline is gone
        app.handle_sample(sample_at(10, 22.0)).await;
        assert_eq!(app.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_filter_scopes_the_listing() {
        let (app, _dir) = test_app().await;
        app.handle_sample(sample_at(0, 20.0)).await;

        // records so far belong to the empty (unconfigured) credential
        app.set_history_filter("someone-else").await.unwrap();
        assert!(app.history().await.unwrap().is_empty());

        app.set_history_filter("").await.unwrap();
        assert_eq!(app.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_token_rejects_blank_and_stores_trimmed() {
        let (app, _dir) = test_app().await;
        assert!(app.set_token("   ").await.is_err());

        app.set_token("  abc123  ").await.unwrap();
        assert_eq!(app.token(), "abc123");
        assert_eq!(app.db.app_config().await.unwrap().token, "abc123");
    }
}
