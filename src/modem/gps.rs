//! GNSS receiver on the SIM7600X

use super::at::{AtCommand, ModemError};
use super::power::PowerKey;
use super::session::ModemSession;
use crate::transport::ModemChannel;
use rand::Rng;
use tracing::{debug, info, warn};

/// Origin and span of the bench-test area off the west coast of Ireland
const SYNTHETIC_ORIGIN: (f64, f64) = (53.06, -24.27);
const SYNTHETIC_SPAN: (f64, f64) = (4.0, 11.0);

/// A decoded fix, in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above mean sea level
    pub altitude: Option<f64>,
}

/// A random position inside the bench-test area
pub fn synthetic_position<R: Rng + ?Sized>(rng: &mut R) -> Position {
    Position {
        latitude: SYNTHETIC_ORIGIN.0 + rng.gen_range(0.0..SYNTHETIC_SPAN.0),
        longitude: SYNTHETIC_ORIGIN.1 + rng.gen_range(0.0..SYNTHETIC_SPAN.1),
        altitude: None,
    }
}

/// Parse a `+CGPSINFO:` reply
///
/// Returns `None` while the receiver has no fix (all fields empty).
pub fn parse_gps_info(text: &str) -> Option<Position> {
    let rest = &text[text.find("+CGPSINFO:")? + "+CGPSINFO:".len()..];
    let line = rest.lines().next()?.trim();
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 || fields[0].is_empty() || fields[2].is_empty() {
        return None;
    }

    let latitude = hemisphere(degrees_minutes(fields[0], 2)?, fields[1], "S")?;
    let longitude = hemisphere(degrees_minutes(fields[2], 3)?, fields[3], "W")?;
    let altitude = fields.get(6).and_then(|f| f.parse().ok());

    Some(Position {
        latitude,
        longitude,
        altitude,
    })
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) to decimal degrees
fn degrees_minutes(field: &str, degree_digits: usize) -> Option<f64> {
    // Line noise can leave multi-byte replacement characters in the field
    let degrees: f64 = field.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = field.get(degree_digits..).filter(|m| !m.is_empty())?.parse().ok()?;
    Some(degrees + minutes / 60.0)
}

fn hemisphere(value: f64, indicator: &str, negative: &str) -> Option<f64> {
    match indicator {
        "N" | "E" => Some(value),
        i if i == negative => Some(-value),
        _ => None,
    }
}

impl<C: ModemChannel, P: PowerKey> ModemSession<C, P> {
    /// Start the GNSS receiver in standalone mode
    pub async fn gps_enable(&mut self) -> Result<bool, ModemError> {
        let outcome = self
            .engine_mut()
            .execute(&AtCommand::new("AT+CGPS=1,1", "OK"))
            .await?;
        if outcome.is_success() {
            info!("GPS started");
        }
        Ok(outcome.is_success())
    }

    /// Current fix, if the receiver has one
    pub async fn gps_position(&mut self) -> Result<Option<Position>, ModemError> {
        let outcome = self
            .engine_mut()
            .execute(&AtCommand::new("AT+CGPSINFO", "+CGPSINFO:"))
            .await?;

        let position = outcome.response().and_then(parse_gps_info);
        match &position {
            Some(p) => debug!("GPS fix {:.5},{:.5}", p.latitude, p.longitude),
            None => warn!("GPS has no fix"),
        }
        Ok(position)
    }

    /// Stop the GNSS receiver
    pub async fn gps_disable(&mut self) -> Result<bool, ModemError> {
        Ok(self
            .engine_mut()
            .execute(&AtCommand::new("AT+CGPS=0", "OK"))
            .await?
            .is_success())
    }
}
