use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{OwnerIdentity, Sample};

/// One live viewer connection. The id distinguishes a channel from a later
/// one registered for the same identity, so a stale disconnect can never
/// tear down its successor.
#[derive(Clone)]
pub struct LiveChannel {
    id: Uuid,
    tx: mpsc::Sender<Sample>,
}

impl LiveChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Sample>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Identity-keyed live delivery table. One current channel per identity
/// (a new registration silently replaces the previous one); delivery is
/// best-effort and never blocks or queues.
#[derive(Default)]
pub struct LiveFanout {
    channels: Mutex<HashMap<OwnerIdentity, LiveChannel>>,
}

impl LiveFanout {
    pub fn register(&self, owner: OwnerIdentity, channel: LiveChannel) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = channels.insert(owner.clone(), channel) {
            debug!("live channel for {owner} replaced (was {})", previous.id);
        }
    }

    /// Sends the sample to the identity's current channel, if any. A missing,
    /// full or closed channel just drops the sample: the live view is a
    /// latest-state feed, not a delivery log.
    pub fn deliver(&self, owner: &OwnerIdentity, sample: &Sample) {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(channel) = channels.get(owner) else {
            return;
        };
        if let Err(err) = channel.tx.try_send(sample.clone()) {
            debug!("live delivery for {owner} dropped: {err}");
        }
    }

    /// Removes whatever identity the channel is registered under, but only
    /// if that registration still points at this exact channel. Safe to call
    /// repeatedly and for channels already superseded.
    pub fn unregister(&self, channel_id: Uuid) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.retain(|_, channel| channel.id != channel_id);
    }

    pub fn connected_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::RawReading;

    fn sample(temp: f64) -> Sample {
        RawReading {
            temp,
            humidity_air: 50.0,
            humidity_soil: 40.0,
            gas_flammable: 2.0,
            gas_toxic: 1.0,
            is_raining: false,
        }
        .into_sample(Utc::now())
        .unwrap()
    }

    #[test]
    fn delivers_only_to_the_matching_identity() {
        let fanout = LiveFanout::default();
        let (c1, mut rx1) = LiveChannel::new(4);
        let (c2, mut rx2) = LiveChannel::new(4);
        fanout.register(OwnerIdentity::from("a"), c1);
        fanout.register(OwnerIdentity::from("b"), c2);

        fanout.deliver(&OwnerIdentity::from("a"), &sample(20.0));

        assert_eq!(rx1.try_recv().unwrap().temp, 20.0);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn delivery_without_a_viewer_is_a_silent_drop() {
        let fanout = LiveFanout::default();
        fanout.deliver(&OwnerIdentity::from("nobody"), &sample(20.0));
    }

    #[test]
    fn registration_replaces_and_stale_close_keeps_successor() {
        let fanout = LiveFanout::default();
        let owner = OwnerIdentity::from("x");
        let (c1, mut rx1) = LiveChannel::new(4);
        let c1_id = c1.id();
        let (c2, mut rx2) = LiveChannel::new(4);

        fanout.register(owner.clone(), c1);
        fanout.register(owner.clone(), c2);

        fanout.deliver(&owner, &sample(21.0));
        assert!(rx1.try_recv().is_err(), "superseded channel gets nothing");
        assert_eq!(rx2.try_recv().unwrap().temp, 21.0);

        // closing the superseded channel must not tear down the mapping
        fanout.unregister(c1_id);
        fanout.deliver(&owner, &sample(22.0));
        assert_eq!(rx2.try_recv().unwrap().temp, 22.0);
    }

    #[test]
    fn unregister_is_idempotent_and_scoped_to_the_channel() {
        let fanout = LiveFanout::default();
        let owner = OwnerIdentity::from("x");
        let (c1, _rx1) = LiveChannel::new(4);
        let c1_id = c1.id();
        fanout.register(owner.clone(), c1);

        fanout.unregister(c1_id);
        fanout.unregister(c1_id);
        assert_eq!(fanout.connected_count(), 0);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let fanout = LiveFanout::default();
        let owner = OwnerIdentity::from("x");
        let (c1, mut rx) = LiveChannel::new(1);
        fanout.register(owner.clone(), c1);

        fanout.deliver(&owner, &sample(20.0));
        fanout.deliver(&owner, &sample(21.0));

        assert_eq!(rx.try_recv().unwrap().temp, 20.0);
        assert!(rx.try_recv().is_err(), "overflow sample was dropped");
    }
}
