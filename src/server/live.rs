use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::models::{OwnerIdentity, RawReading};
use crate::pipeline::{self, LiveChannel};

use super::SharedState;

/// Inbound live-channel message. The identity registers (or re-registers)
/// the connection; the sensor fields, when all present, are treated as a
/// push and go through the same throttled recording as the HTTP endpoint.
#[derive(Deserialize)]
struct LiveInbound {
    #[serde(alias = "identity")]
    email: Option<String>,
    temp: Option<f64>,
    #[serde(rename = "umidAr")]
    humidity_air: Option<f64>,
    #[serde(rename = "umidSolo")]
    humidity_soil: Option<f64>,
    #[serde(rename = "gasInflamavel")]
    gas_flammable: Option<f64>,
    #[serde(rename = "gasToxico")]
    gas_toxic: Option<f64>,
    #[serde(rename = "estaChovendo")]
    is_raining: Option<f64>,
}

impl LiveInbound {
    fn reading(&self) -> Option<RawReading> {
        let rain = self.is_raining?;
        if rain != 0.0 && rain != 1.0 {
            return None;
        }
        Some(RawReading {
            temp: self.temp?,
            humidity_air: self.humidity_air?,
            humidity_soil: self.humidity_soil?,
            gas_flammable: self.gas_flammable?,
            gas_toxic: self.gas_toxic?,
            is_raining: rain == 1.0,
        })
    }
}

pub async fn ws_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (channel, mut samples_rx) = LiveChannel::new(16);
    let channel_id = channel.id();

    // forward fanout deliveries to the socket until either side closes
    let writer = tokio::spawn(async move {
        while let Some(sample) = samples_rx.recv().await {
            let Ok(text) = serde_json::to_string(&sample) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut registered: Option<OwnerIdentity> = None;

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let inbound: LiveInbound = match serde_json::from_str(&text) {
            Ok(inbound) => inbound,
            Err(err) => {
                debug!("dropping malformed live message: {err}");
                continue;
            }
        };

        let Some(email) = inbound.email.clone() else {
            continue;
        };
        let owner = OwnerIdentity::new(email);

        // last registration wins; re-registering the same connection for
        // the same identity is a cheap no-op
        if registered.as_ref() != Some(&owner) {
            state.fanout.register(owner.clone(), channel.clone());
            info!("live channel {channel_id} registered for {owner}");
            registered = Some(owner.clone());
        }

        if let Some(reading) = inbound.reading() {
            match reading.into_sample(Utc::now()) {
                Ok(sample) => {
                    if let Err(err) =
                        pipeline::ingest_sample(&state.recorder, &state.fanout, &owner, &sample)
                            .await
                    {
                        // a failed write never tears down the live socket
                        warn!("live push for {owner} not recorded: {err}");
                    }
                }
                Err(err) => {
                    debug!("dropping invalid live push for {owner}: {err}");
                }
            }
        }
    }

    state.fanout.unregister(channel_id);
    writer.abort();
    info!("live channel {channel_id} closed");
}
