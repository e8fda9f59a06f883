mod controller;
mod simulator;
mod source;

use serde::{Deserialize, Serialize};

pub use controller::{AcquisitionController, AcquisitionStatus};
pub use simulator::SimulatedSource;
pub use source::{parse_wire_line, DeviceSource, SampleSource, SourceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceMode {
    /// Synthetic readings on a fixed period; no hardware required.
    Emulate,
    /// Line-delimited readings from a discovered serial device.
    Device,
}

/// Control inputs the owner injects before or during a source run. Mode and
/// device path are read when a session starts; token and endpoint are read
/// live by the outbound pusher, so a token that arrives late simply turns
/// pushing on from that point (never an error).
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub token: String,
    pub mode: SourceMode,
    pub device_path: Option<String>,
    pub endpoint_url: String,
}

impl SourceConfig {
    pub fn new(mode: SourceMode, endpoint_url: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            mode,
            device_path: None,
            endpoint_url: endpoint_url.into(),
        }
    }
}
