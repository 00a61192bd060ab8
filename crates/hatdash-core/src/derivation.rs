//! Raw readings to engineering quantities.
//!
//! Everything in here is pure: no clocks, no I/O, no hidden state beyond the
//! calibration constants carried by [`DerivationConfig`].

use crate::error::{Error, Result};
use crate::sample::{Derived, RawReading};

/// Standard atmosphere sea-level pressure (hPa).
pub const DEFAULT_SEA_LEVEL_HPA: f64 = 1013.25;

// International barometric formula constants.
const BARO_SCALE_M: f64 = 44330.0;
const BARO_EXPONENT: f64 = 1.0 / 5.255;

pub const TILT_LIMIT_DEG: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivationConfig {
    /// Reference sea-level pressure P0 (hPa).
    sea_level_hpa: f64,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            sea_level_hpa: DEFAULT_SEA_LEVEL_HPA,
        }
    }
}

impl DerivationConfig {
    pub fn new(sea_level_hpa: f64) -> Result<Self> {
        if !sea_level_hpa.is_finite() || sea_level_hpa <= 0.0 {
            return Err(Error::Config(format!(
                "sea-level pressure must be a positive number of hPa, got {sea_level_hpa}"
            )));
        }
        Ok(Self { sea_level_hpa })
    }

    pub fn sea_level_hpa(&self) -> f64 {
        self.sea_level_hpa
    }
}

/// Pressure altitude in meters for `pressure_hpa` against the reference `sea_level_hpa`.
pub fn pressure_altitude(pressure_hpa: f64, sea_level_hpa: f64) -> Result<f64> {
    if !pressure_hpa.is_finite() || pressure_hpa <= 0.0 {
        return Err(Error::InvalidReading(format!(
            "pressure must be positive, got {pressure_hpa} hPa"
        )));
    }
    if !sea_level_hpa.is_finite() || sea_level_hpa <= 0.0 {
        return Err(Error::Config(format!(
            "reference pressure must be positive, got {sea_level_hpa} hPa"
        )));
    }
    let ratio = pressure_hpa / sea_level_hpa;
    Ok(BARO_SCALE_M * (1.0 - ratio.powf(BARO_EXPONENT)))
}

/// Wraps any angle into [-180, 180).
#[inline]
pub fn wrap_signed(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Wraps into [-180, 180) and then clamps to the tilt range [-90, 90].
#[inline]
pub fn clamp_tilt(deg: f64) -> f64 {
    wrap_signed(deg).clamp(-TILT_LIMIT_DEG, TILT_LIMIT_DEG)
}

/// Wraps a heading into [0, 360).
#[inline]
pub fn wrap_heading(deg: f64) -> f64 {
    let pos = deg.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if pos >= 360.0 {
        0.0
    } else {
        pos
    }
}

fn finite(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::InvalidReading(format!("{name} is not finite ({value})")))
    }
}

/// Computes altitude and bounded attitude angles from one reading.
pub fn derive(raw: &RawReading, config: &DerivationConfig) -> Result<Derived> {
    finite("temperature", raw.temperature)?;
    finite("humidity", raw.humidity)?;

    let altitude = pressure_altitude(raw.pressure, config.sea_level_hpa)?;
    let pitch = finite("pitch", raw.orientation.pitch)?;
    let roll = finite("roll", raw.orientation.roll)?;
    let yaw = finite("yaw", raw.orientation.yaw)?;

    Ok(Derived {
        altitude,
        pitch: clamp_tilt(pitch),
        roll: clamp_tilt(roll),
        yaw: wrap_heading(yaw),
    })
}
