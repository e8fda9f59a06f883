use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Engineering range policy. Readings outside these bounds are rejected at
/// the pipeline boundary, not clamped.
pub const TEMP_RANGE: RangeInclusive<f64> = 0.0..=50.0;
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const GAS_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// One instantaneous multi-sensor reading. `captured_at` is stamped where
/// the reading enters the pipeline, not at the device. Immutable once built;
/// construct via [`RawReading::into_sample`].
///
/// The JSON field names are the legacy wire names shared with the device
/// firmware and the existing viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub temp: f64,
    #[serde(rename = "umidAr")]
    pub humidity_air: f64,
    #[serde(rename = "umidSolo")]
    pub humidity_soil: f64,
    #[serde(rename = "gasInflamavel")]
    pub gas_flammable: f64,
    #[serde(rename = "gasToxico")]
    pub gas_toxic: f64,
    #[serde(rename = "estaChovendo", with = "rain_flag")]
    pub is_raining: bool,
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    /// The sensor values without the timestamp, as outbound pushes carry
    /// them (the receiving side stamps its own).
    pub fn raw(&self) -> RawReading {
        RawReading {
            temp: self.temp,
            humidity_air: self.humidity_air,
            humidity_soil: self.humidity_soil,
            gas_flammable: self.gas_flammable,
            gas_toxic: self.gas_toxic,
            is_raining: self.is_raining,
        }
    }
}

/// A reading as produced by a source or an inbound push: sensor values only,
/// no timestamp yet and not yet range-checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawReading {
    pub temp: f64,
    #[serde(rename = "umidAr")]
    pub humidity_air: f64,
    #[serde(rename = "umidSolo")]
    pub humidity_soil: f64,
    #[serde(rename = "gasInflamavel")]
    pub gas_flammable: f64,
    #[serde(rename = "gasToxico")]
    pub gas_toxic: f64,
    #[serde(rename = "estaChovendo", with = "rain_flag")]
    pub is_raining: bool,
}

impl RawReading {
    /// Validates the reading against the range policy and stamps it into an
    /// immutable [`Sample`]. The offending field is named in the rejection.
    pub fn into_sample(self, captured_at: DateTime<Utc>) -> Result<Sample, PipelineError> {
        check_range("temp", self.temp, &TEMP_RANGE)?;
        check_range("umidAr", self.humidity_air, &HUMIDITY_RANGE)?;
        check_range("umidSolo", self.humidity_soil, &HUMIDITY_RANGE)?;
        check_range("gasInflamavel", self.gas_flammable, &GAS_RANGE)?;
        check_range("gasToxico", self.gas_toxic, &GAS_RANGE)?;

        Ok(Sample {
            temp: self.temp,
            humidity_air: self.humidity_air,
            humidity_soil: self.humidity_soil,
            gas_flammable: self.gas_flammable,
            gas_toxic: self.gas_toxic,
            is_raining: self.is_raining,
            captured_at,
        })
    }
}

fn check_range(field: &str, value: f64, range: &RangeInclusive<f64>) -> Result<(), PipelineError> {
    if !value.is_finite() || !range.contains(&value) {
        return Err(PipelineError::rejected(format!(
            "{field} value {value} outside {:?}",
            range
        )));
    }
    Ok(())
}

/// The rain flag travels as numeric 0/1 on every wire (HTTP push, live
/// channel, device line), but older pushers send it as a JSON bool.
mod rain_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Number(f64),
            Bool(bool),
        }

        match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => Ok(b),
            Flag::Number(n) if n == 0.0 => Ok(false),
            Flag::Number(n) if n == 1.0 => Ok(true),
            Flag::Number(n) => Err(serde::de::Error::custom(format!(
                "rain flag must be 0 or 1, got {n}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temp: f64) -> RawReading {
        RawReading {
            temp,
            humidity_air: 55.0,
            humidity_soil: 40.0,
            gas_flammable: 3.0,
            gas_toxic: 1.0,
            is_raining: false,
        }
    }

    #[test]
    fn in_range_reading_becomes_sample() {
        let at = Utc::now();
        let sample = reading(21.5).into_sample(at).unwrap();
        assert_eq!(sample.temp, 21.5);
        assert_eq!(sample.captured_at, at);
    }

    #[test]
    fn out_of_range_reading_is_rejected() {
        let err = reading(77.0).into_sample(Utc::now()).unwrap_err();
        assert!(matches!(err, PipelineError::Rejected(_)));

        let mut bad = reading(20.0);
        bad.gas_toxic = 130.0;
        assert!(bad.into_sample(Utc::now()).is_err());

        let mut nan = reading(20.0);
        nan.humidity_air = f64::NAN;
        assert!(nan.into_sample(Utc::now()).is_err());
    }

    #[test]
    fn sample_serializes_with_wire_field_names() {
        let sample = reading(20.0).into_sample(Utc::now()).unwrap();
        let json = serde_json::to_value(&sample).unwrap();
        assert!(json.get("umidAr").is_some());
        assert!(json.get("gasInflamavel").is_some());
        assert_eq!(json.get("estaChovendo").unwrap(), 0);
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn rain_flag_accepts_numbers_and_bools() {
        let from_number: RawReading = serde_json::from_str(
            r#"{"temp":20,"umidAr":50,"umidSolo":40,"gasInflamavel":2,"gasToxico":1,"estaChovendo":1}"#,
        )
        .unwrap();
        assert!(from_number.is_raining);

        let from_bool: RawReading = serde_json::from_str(
            r#"{"temp":20,"umidAr":50,"umidSolo":40,"gasInflamavel":2,"gasToxico":1,"estaChovendo":false}"#,
        )
        .unwrap();
        assert!(!from_bool.is_raining);

        let bad: Result<RawReading, _> = serde_json::from_str(
            r#"{"temp":20,"umidAr":50,"umidSolo":40,"gasInflamavel":2,"gasToxico":1,"estaChovendo":3}"#,
        );
        assert!(bad.is_err());
    }
}
