mod sample;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use sample::{RawReading, Sample, GAS_RANGE, HUMIDITY_RANGE, TEMP_RANGE};

/// Stable identifier for the party a reading belongs to: the account email
/// on the remote service, the configured credential token locally. Opaque to
/// the pipeline; only ever compared and used as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerIdentity(String);

impl OwnerIdentity {
    pub fn new(raw: impl Into<String>) -> Self {
        OwnerIdentity(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerIdentity {
    fn from(raw: &str) -> Self {
        OwnerIdentity(raw.to_string())
    }
}

/// One durably recorded sample, as returned by history queries.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub owner: OwnerIdentity,
    #[serde(flatten)]
    pub sample: Sample,
}
