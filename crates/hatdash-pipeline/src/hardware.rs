//! One-shot discovery of the board's sensor, LED and joystick nodes.

use std::path::{Path, PathBuf};

use hatdash_core::{Error, Result};
use tracing::{info, warn};

use crate::config::{Config, SensorMode};
use crate::iio::{IioChannels, IioSensor};
use crate::sensor::{MockConfig, MockSensor, SensorSource};

pub const LED_FRAMEBUFFER_NAME: &str = "RPi-Sense FB";
pub const JOYSTICK_NAME: &str = "Raspberry Pi Sense HAT Joystick";

/// Where the probe looks; swapped out in tests.
#[derive(Debug, Clone)]
pub struct ProbeRoots {
    pub sys: PathBuf,
    pub dev: PathBuf,
}

impl Default for ProbeRoots {
    fn default() -> Self {
        Self {
            sys: PathBuf::from("/sys"),
            dev: PathBuf::from("/dev"),
        }
    }
}

/// What was found at startup.
#[derive(Debug, Clone, Default)]
pub struct HardwareProbe {
    pub iio: IioChannels,
    pub framebuffer: Option<PathBuf>,
    pub joystick: Option<PathBuf>,
}

fn read_name(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Finds `<class_dir>/<prefix>N` whose `name_file` matches, returning `N`'s node name.
fn find_named(class_dir: &Path, prefix: &str, name_file: &str, wanted: &str) -> Option<String> {
    let mut entries: Vec<_> = std::fs::read_dir(class_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with(prefix))
        .collect();
    entries.sort();
    entries
        .into_iter()
        .find(|n| read_name(&class_dir.join(n).join(name_file)).as_deref() == Some(wanted))
}

impl HardwareProbe {
    pub fn run(roots: &ProbeRoots) -> Self {
        let iio = IioChannels::scan(&roots.sys.join("bus/iio/devices"));
        let framebuffer = find_named(
            &roots.sys.join("class/graphics"),
            "fb",
            "name",
            LED_FRAMEBUFFER_NAME,
        )
        .map(|n| roots.dev.join(n));
        let joystick = find_named(
            &roots.sys.join("class/input"),
            "event",
            "device/name",
            JOYSTICK_NAME,
        )
        .map(|n| roots.dev.join("input").join(n));

        info!(
            sensor = iio.is_usable(),
            led = ?framebuffer,
            joystick = ?joystick,
            "hardware probe finished"
        );
        Self {
            iio,
            framebuffer,
            joystick,
        }
    }
}

/// Picks the sensor implementation once, at startup.
///
/// Fails only when hardware was demanded but is missing, or when even the
/// mock cannot be built.
pub fn select_sensor(config: &Config, probe: &HardwareProbe) -> Result<Box<dyn SensorSource>> {
    let mock = || -> Result<Box<dyn SensorSource>> {
        let cfg = MockConfig {
            seed: config.mock_seed,
            time_step_s: config.period.as_secs_f64(),
            ..Default::default()
        };
        Ok(Box::new(MockSensor::new(&cfg)?))
    };

    match config.sensor {
        SensorMode::Mock => {
            info!("using mock sensor (forced)");
            mock()
        }
        SensorMode::Hardware => {
            let sensor = IioSensor::new(probe.iio.clone()).map_err(|e| {
                Error::SensorUnavailable(format!("hardware sensor required: {e}"))
            })?;
            info!(channels = ?sensor.channels(), "using board sensors");
            Ok(Box::new(sensor))
        }
        SensorMode::Auto => match IioSensor::new(probe.iio.clone()) {
            Ok(sensor) => {
                info!(channels = ?sensor.channels(), "using board sensors");
                Ok(Box::new(sensor))
            }
            Err(e) => {
                warn!("{e}; falling back to mock sensor");
                mock()
            }
        },
    }
}
