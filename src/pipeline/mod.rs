pub mod fanout;
pub mod recorder;
pub mod resolver;

pub use fanout::{LiveChannel, LiveFanout};
pub use recorder::{HistoryStore, RateLimitedRecorder};
pub use resolver::{
    CredentialResolver, LocalPolicyStore, PolicyStore, ServerPolicyStore, LOCAL_FLOOR_MINUTES,
    SERVER_FLOOR_MINUTES,
};

use crate::error::PipelineError;
use crate::models::{OwnerIdentity, Sample};

/// The ingestion boundary: every sample is offered to the owner's live
/// channel first and to the recorder second, so a throttled (or even
/// storage-failed) sample still reaches the live view. Returns whether the
/// sample was durably recorded.
pub async fn ingest_sample<S, P>(
    recorder: &RateLimitedRecorder<S, P>,
    fanout: &LiveFanout,
    owner: &OwnerIdentity,
    sample: &Sample,
) -> Result<bool, PipelineError>
where
    S: HistoryStore,
    P: PolicyStore,
{
    fanout.deliver(owner, sample);
    recorder.evaluate(owner, sample).await
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::fanout::{LiveChannel, LiveFanout};
    use super::recorder::test_fakes::{FixedPolicy, MemStore};
    use super::recorder::RateLimitedRecorder;
    use crate::models::{OwnerIdentity, RawReading};

    fn sample_at(offset_secs: i64) -> crate::models::Sample {
        RawReading {
            temp: 20.0,
            humidity_air: 50.0,
            humidity_soil: 40.0,
            gas_flammable: 2.0,
            gas_toxic: 1.0,
            is_raining: false,
        }
        .into_sample(Utc::now() + Duration::seconds(offset_secs))
        .unwrap()
    }

    #[tokio::test]
    async fn throttled_samples_still_reach_the_live_channel() {
        let recorder = RateLimitedRecorder::new(MemStore::default(), FixedPolicy::minutes(1));
        let fanout = LiveFanout::default();
        let owner = OwnerIdentity::from("u1");

        let (channel, mut rx) = LiveChannel::new(8);
        fanout.register(owner.clone(), channel);

        let first = super::ingest_sample(&recorder, &fanout, &owner, &sample_at(0))
            .await
            .unwrap();
        let second = super::ingest_sample(&recorder, &fanout, &owner, &sample_at(10))
            .await
            .unwrap();

        assert!(first);
        assert!(!second, "second sample is inside the interval");

        // both samples were delivered live regardless of the record decision
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }
}
