//! Board sensors read through the Linux IIO sysfs interface.
//!
//! The kernel drivers do the bus work; this module only reads the
//! `in_*_raw`, `in_*_offset` and `in_*_scale` attributes and converts them
//! into the units of [`RawReading`]. Channels are located by attribute, not
//! by driver name, so any humidity/pressure/accel/magn device will do.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hatdash_core::{Axes, Error, Orientation, RawReading, Result};
use nalgebra::{Rotation3, Vector3};
use tracing::debug;

use crate::sensor::{SensorKind, SensorSource};

const STANDARD_GRAVITY: f64 = 9.80665;

/// IIO device directories holding each kind of channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IioChannels {
    pub pressure: Option<PathBuf>,
    pub humidity: Option<PathBuf>,
    pub accel: Option<PathBuf>,
    pub magn: Option<PathBuf>,
}

impl IioChannels {
    /// Scans `devices_dir` (normally `/sys/bus/iio/devices`).
    pub fn scan(devices_dir: &Path) -> Self {
        let mut found = Self::default();
        let Ok(entries) = std::fs::read_dir(devices_dir) else {
            return found;
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("iio:device"))
            })
            .collect();
        dirs.sort();

        for dir in dirs {
            let has = |attr: &str| dir.join(attr).exists();
            if found.pressure.is_none() && has("in_pressure_raw") {
                found.pressure = Some(dir.clone());
            }
            if found.humidity.is_none() && has("in_humidityrelative_raw") {
                found.humidity = Some(dir.clone());
            }
            if found.accel.is_none() && has("in_accel_x_raw") {
                found.accel = Some(dir.clone());
            }
            if found.magn.is_none() && has("in_magn_x_raw") {
                found.magn = Some(dir.clone());
            }
        }
        debug!(?found, "scanned IIO devices");
        found
    }

    /// Pressure is the one channel the pipeline cannot do without.
    pub fn is_usable(&self) -> bool {
        self.pressure.is_some()
    }
}

async fn read_number(path: PathBuf) -> Result<f64> {
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| Error::SensorUnavailable(format!("{}: {e}", path.display())))?;
    text.trim()
        .parse::<f64>()
        .map_err(|e| Error::SensorUnavailable(format!("{}: {e}", path.display())))
}

async fn read_optional(path: PathBuf, default: f64) -> Result<f64> {
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        read_number(path).await
    } else {
        Ok(default)
    }
}

/// `(raw + offset) * scale` for one channel, falling back to the shared
/// `in_<kind>_scale` when the channel has no scale of its own.
async fn read_channel(dir: &Path, channel: &str, kind: &str) -> Result<f64> {
    let raw = read_number(dir.join(format!("in_{channel}_raw"))).await?;
    let offset = read_optional(dir.join(format!("in_{channel}_offset")), 0.0).await?;
    let own_scale = dir.join(format!("in_{channel}_scale"));
    let scale = if tokio::fs::try_exists(&own_scale).await.unwrap_or(false) {
        read_number(own_scale).await?
    } else {
        read_optional(dir.join(format!("in_{kind}_scale")), 1.0).await?
    };
    Ok((raw + offset) * scale)
}

async fn read_vector(dir: &Path, kind: &str) -> Result<Vector3<f64>> {
    Ok(Vector3::new(
        read_channel(dir, &format!("{kind}_x"), kind).await?,
        read_channel(dir, &format!("{kind}_y"), kind).await?,
        read_channel(dir, &format!("{kind}_z"), kind).await?,
    ))
}

/// Pitch/roll from the gravity vector and tilt-compensated magnetic heading,
/// all in degrees. Without a magnetometer the heading is 0.
pub fn attitude(accel: Vector3<f64>, magn: Option<Vector3<f64>>) -> Orientation {
    let Some(g) = accel.try_normalize(1e-9) else {
        return Orientation::default();
    };
    let roll = g.y.atan2(g.z);
    let pitch = (-g.x).atan2((g.y * g.y + g.z * g.z).sqrt());

    let yaw = magn
        .map(|m| {
            let level = Rotation3::from_euler_angles(roll, pitch, 0.0) * m;
            (-level.y).atan2(level.x).to_degrees().rem_euclid(360.0)
        })
        .unwrap_or(0.0);

    Orientation {
        pitch: pitch.to_degrees(),
        roll: roll.to_degrees(),
        yaw,
    }
}

pub struct IioSensor {
    channels: IioChannels,
}

impl IioSensor {
    pub fn new(channels: IioChannels) -> Result<Self> {
        if !channels.is_usable() {
            return Err(Error::SensorUnavailable(
                "no IIO pressure channel found".to_string(),
            ));
        }
        Ok(Self { channels })
    }

    pub fn channels(&self) -> &IioChannels {
        &self.channels
    }

    async fn read(&self) -> Result<RawReading> {
        let mut reading = RawReading::default();

        if let Some(dir) = &self.channels.pressure {
            // IIO reports kPa
            reading.pressure = read_channel(dir, "pressure", "pressure").await? * 10.0;
        }
        if let Some(dir) = &self.channels.humidity {
            // milli-percent and milli-degrees
            reading.humidity =
                read_channel(dir, "humidityrelative", "humidityrelative").await? / 1000.0;
            reading.temperature = read_channel(dir, "temp", "temp").await? / 1000.0;
        } else if let Some(dir) = &self.channels.pressure {
            reading.temperature = read_channel(dir, "temp", "temp").await? / 1000.0;
        }

        if let Some(dir) = &self.channels.accel {
            let accel = read_vector(dir, "accel").await? / STANDARD_GRAVITY;
            let magn = match &self.channels.magn {
                Some(dir) => Some(read_vector(dir, "magn").await?),
                None => None,
            };
            reading.orientation = attitude(accel, magn);
            reading.acceleration = Axes {
                x: accel.x,
                y: accel.y,
                z: accel.z,
            };
        }

        Ok(reading)
    }
}

#[async_trait]
impl SensorSource for IioSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Hardware
    }

    async fn poll(&mut self) -> Result<RawReading> {
        self.read().await
    }
}
