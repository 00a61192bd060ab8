use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw readings
// ---------------------------------------------------------------------------

/// Fused orientation as reported by the sensor, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Three-axis vector, used for acceleration in g.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One poll worth of sensor values, exactly as the sensor produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub temperature: f64, // degC
    pub humidity: f64,    // %RH
    pub pressure: f64,    // hPa
    pub orientation: Orientation,
    pub acceleration: Axes,
}

// ---------------------------------------------------------------------------
// Derived values & samples
// ---------------------------------------------------------------------------

/// Engineering quantities computed from a [`RawReading`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Derived {
    /// Pressure altitude in meters.
    pub altitude: f64,
    /// Degrees, within [-90, 90].
    pub pitch: f64,
    /// Degrees, within [-90, 90].
    pub roll: f64,
    /// Degrees, within [0, 360).
    pub yaw: f64,
}

/// A timestamped, sequenced bundle of raw and derived values.
///
/// Samples are immutable once built and are handed to consumers behind an
/// `Arc`, so every subscriber sees the same allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub raw: RawReading,
    pub derived: Derived,
    /// Set when `raw`/`derived` were carried over from the last good reading.
    pub stale: bool,
}

impl Sample {
    /// Flattens the sample into the record pushed to viewers and written to logs.
    pub fn record(&self) -> SampleRecord {
        SampleRecord {
            sequence: self.sequence,
            timestamp: self.timestamp,
            temperature: self.raw.temperature,
            humidity: self.raw.humidity,
            pressure: self.raw.pressure,
            altitude: self.derived.altitude,
            pitch: self.derived.pitch,
            roll: self.derived.roll,
            yaw: self.derived.yaw,
            stale: self.stale,
        }
    }
}

/// Flat wire/log form of a [`Sample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub altitude: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub stale: bool,
}
