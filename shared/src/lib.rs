//! OceanWatch Shared Protocol Types
//!
//! This crate provides the frame tokens, chunk codec and modem session state
//! shared between the field sensor unit (sender) and the ingestion service
//! (receiver).
//!
//! Every stored object body is exactly one of:
//! ```text
//! {Image Start,<lat>,<lon>,<clusters>,<label>,<temp>,<humidity>,<pressure>,<pitch>,<roll>,<yaw>}
//! {Image End}
//! <hex-encoded image chunk>
//! ```

pub mod codec;
pub mod state_machine;

use std::fmt;

use codec::CodecError;

/// Substring that identifies a start-of-frame object
pub const START_MARKER: &str = "Image Start";

/// Exact body of an end-of-frame object
pub const END_TOKEN: &str = "{Image End}";

/// Minimum number of metadata fields a start token must carry
pub const MIN_METADATA_FIELDS: usize = 10;

/// Default maximum chunk size in bytes, before hex encoding
pub const DEFAULT_CHUNK_SIZE: usize = 5120;

/// Prefix of the optional trailing sequence field
pub const SEQUENCE_FIELD_PREFIX: &str = "seq=";

/// Characters that would corrupt the comma-separated start token
const RESERVED_CHARS: [char; 5] = [',', '{', '}', '[', ']'];

/// Fixed modem timings (milliseconds) measured on the SIM7600X hat
pub mod timing {
    /// Default wait for a plain AT command
    pub const AT_DEFAULT_TIMEOUT_MS: u64 = 1000;

    /// Wait for the `>` prompt of a length-announcing command
    pub const PROMPT_TIMEOUT_MS: u64 = 2000;

    /// Pause after writing a prompted body
    pub const BODY_SETTLE_MS: u64 = 2000;

    /// Wait for `AT+CMQTTCONNECT`
    pub const CONNECT_TIMEOUT_MS: u64 = 4000;

    /// Wait for an SMS body to be accepted
    pub const SMS_SEND_TIMEOUT_MS: u64 = 5000;

    /// Extra wait once response bytes start arriving
    pub const RESPONSE_SETTLE_MS: u64 = 100;

    /// Power-key line setup delay before the press
    pub const POWER_KEY_SETUP_MS: u64 = 100;

    /// Power-key press duration when switching on
    pub const POWER_ON_PRESS_MS: u64 = 2000;

    /// Power-key press duration when switching off
    pub const POWER_DOWN_PRESS_MS: u64 = 3000;

    /// Wait after releasing the power key
    pub const POWER_RELEASE_MS: u64 = 1000;
}

/// Telemetry carried in the start token of every frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub latitude: f64,
    pub longitude: f64,
    /// Number of detected clusters in the image
    pub cluster_count: u32,
    /// Free-form capture label (the sensor unit sends its local capture time)
    pub capture_label: String,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    /// Optional monotonic frame counter, appended as `seq=<n>`
    pub sequence: Option<u64>,
}

impl FrameMetadata {
    /// Render the metadata as start-token fields
    pub fn to_fields(&self) -> Result<Vec<String>, CodecError> {
        if let Some(c) = self.capture_label.chars().find(|c| RESERVED_CHARS.contains(c)) {
            return Err(CodecError::ReservedCharacter {
                field: "capture_label",
                found: c,
            });
        }

        let mut fields = vec![
            self.latitude.to_string(),
            self.longitude.to_string(),
            self.cluster_count.to_string(),
            self.capture_label.clone(),
            self.temperature.to_string(),
            self.humidity.to_string(),
            self.pressure.to_string(),
            self.pitch.to_string(),
            self.roll.to_string(),
            self.yaw.to_string(),
        ];
        if let Some(seq) = self.sequence {
            fields.push(format!("{SEQUENCE_FIELD_PREFIX}{seq}"));
        }
        Ok(fields)
    }

    /// Parse metadata from the fields of a received start token
    ///
    /// Fields are trimmed and may carry stray quotes. Numeric fields must parse;
    /// extra trailing fields other than a sequence number are ignored.
    pub fn from_fields(fields: &[String]) -> Result<Self, CodecError> {
        if fields.len() < MIN_METADATA_FIELDS {
            return Err(CodecError::TooFewFields {
                found: fields.len(),
                required: MIN_METADATA_FIELDS,
            });
        }

        let sequence = fields[MIN_METADATA_FIELDS..]
            .iter()
            .find_map(|f| clean_field(f).strip_prefix(SEQUENCE_FIELD_PREFIX).map(str::to_owned))
            .map(|s| {
                s.parse::<u64>().map_err(|_| CodecError::InvalidField {
                    name: "sequence",
                    value: s.clone(),
                })
            })
            .transpose()?;

        Ok(Self {
            latitude: parse_number(&fields[0], "latitude")?,
            longitude: parse_number(&fields[1], "longitude")?,
            cluster_count: parse_count(&fields[2])?,
            capture_label: clean_field(&fields[3]).to_string(),
            temperature: parse_number(&fields[4], "temperature")?,
            humidity: parse_number(&fields[5], "humidity")?,
            pressure: parse_number(&fields[6], "pressure")?,
            pitch: parse_number(&fields[7], "pitch")?,
            roll: parse_number(&fields[8], "roll")?,
            yaw: parse_number(&fields[9], "yaw")?,
            sequence,
        })
    }
}

impl fmt::Display for FrameMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat={} lon={} clusters={} label={}",
            self.latitude, self.longitude, self.cluster_count, self.capture_label
        )
    }
}

fn clean_field(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '\'' || c == '"')
}

fn parse_number(raw: &str, name: &'static str) -> Result<f64, CodecError> {
    let value = clean_field(raw);
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CodecError::InvalidField {
            name,
            value: value.to_string(),
        })
}

/// Cluster counts arrive as integers, but older units sent them as floats
fn parse_count(raw: &str) -> Result<u32, CodecError> {
    let value = clean_field(raw);
    if let Ok(count) = value.parse::<u32>() {
        return Ok(count);
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => {
            Ok(v as u32)
        }
        _ => Err(CodecError::InvalidField {
            name: "cluster_count",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameMetadata {
        FrameMetadata {
            latitude: 54.2,
            longitude: -20.5,
            cluster_count: 3,
            capture_label: "10-11-12_01-02-21".into(),
            temperature: 21.5,
            humidity: 40.25,
            pressure: 1013.0,
            pitch: 1.5,
            roll: -2.0,
            yaw: 180.0,
            sequence: None,
        }
    }

    #[test]
    fn test_fields_roundtrip() {
        let meta = sample();
        let fields = meta.to_fields().expect("fields");
        assert_eq!(fields.len(), MIN_METADATA_FIELDS);
        assert_eq!(fields[2], "3");
        assert_eq!(FrameMetadata::from_fields(&fields).expect("parse"), meta);
    }

    #[test]
    fn test_sequence_field() {
        let meta = FrameMetadata {
            sequence: Some(42),
            ..sample()
        };
        let fields = meta.to_fields().expect("fields");
        assert_eq!(fields.last().map(String::as_str), Some("seq=42"));
        assert_eq!(FrameMetadata::from_fields(&fields).expect("parse").sequence, Some(42));
    }

    #[test]
    fn test_parses_legacy_list_fields() {
        // Older units sent the environment block as a stringified list
        let fields: Vec<String> = [
            "53.5", "-20.1", "2", "'10-11-12_01-02-21'", " 21.5", " 40.1", " 1013.2", " 1.0",
            " 2.0", " 3.0",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let meta = FrameMetadata::from_fields(&fields).expect("parse");
        assert_eq!(meta.capture_label, "10-11-12_01-02-21");
        assert_eq!(meta.temperature, 21.5);
        assert_eq!(meta.yaw, 3.0);
    }

    #[test]
    fn test_float_cluster_count() {
        let mut fields = sample().to_fields().expect("fields");
        fields[2] = "4.0".into();
        assert_eq!(FrameMetadata::from_fields(&fields).expect("parse").cluster_count, 4);
    }

    #[test]
    fn test_rejects_reserved_label() {
        let meta = FrameMetadata {
            capture_label: "a,b".into(),
            ..sample()
        };
        assert!(matches!(
            meta.to_fields(),
            Err(CodecError::ReservedCharacter { found: ',', .. })
        ));
    }

    #[test]
    fn test_rejects_bad_number() {
        let mut fields = sample().to_fields().expect("fields");
        fields[0] = "north".into();
        assert!(matches!(
            FrameMetadata::from_fields(&fields),
            Err(CodecError::InvalidField { name: "latitude", .. })
        ));
    }

    #[test]
    fn test_too_few_fields() {
        let fields = vec!["1".to_string(); 4];
        assert!(matches!(
            FrameMetadata::from_fields(&fields),
            Err(CodecError::TooFewFields { found: 4, required: 10 })
        ));
    }
}
