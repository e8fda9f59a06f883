use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::models::RawReading;

use super::source::{SampleSource, SourceError};

const DEFAULT_PERIOD: Duration = Duration::from_secs(5);
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Synthetic readings on a fixed period, for demo mode and tests. Values are
/// independent per tick, so stopping and restarting needs no carried state.
pub struct SimulatedSource {
    period: Duration,
}

impl SimulatedSource {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD)
    }
}

impl SampleSource for SimulatedSource {
    fn describe(&self) -> String {
        format!("simulator ({}ms period)", self.period.as_millis())
    }

    fn next_reading(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<RawReading>, SourceError> {
        // sleep in short slices so stop requests stay responsive
        let deadline = Instant::now() + self.period;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(CANCEL_POLL));
        }

        let mut rng = rand::thread_rng();
        Ok(Some(RawReading {
            temp: rng.gen_range(10..40) as f64,
            humidity_air: rng.gen_range(0..100) as f64,
            humidity_soil: rng.gen_range(0..100) as f64,
            gas_flammable: rng.gen_range(0..20) as f64,
            gas_toxic: rng.gen_range(0..10) as f64,
            is_raining: rng.gen_bool(0.5),
        }))
    }
}
