use async_trait::async_trait;
use hatdash_core::{Axes, Error, Orientation, RawReading, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;

/// Which kind of sensor backs a [`SensorSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Mock,
    Hardware,
}

/// Capability interface over the environmental/attitude sensor.
///
/// Implementations are chosen once at startup and never swapped. `poll` may
/// fail with [`Error::SensorUnavailable`]; the caller bounds it with a timeout.
#[async_trait]
pub trait SensorSource: Send {
    fn kind(&self) -> SensorKind;

    async fn poll(&mut self) -> Result<RawReading>;
}

// ---------------------------------------------------------------------------
// Mock sensor
// ---------------------------------------------------------------------------

pub struct MockConfig {
    // Random-walk centres and per-poll step deviations
    pub temperature_c: f64,
    pub temperature_step: f64,
    pub humidity_pct: f64,
    pub humidity_step: f64,
    pub pressure_hpa: f64,
    pub pressure_step: f64,

    /// Maximum excursion of each walk from its centre, in step units.
    pub walk_bound_steps: f64,

    // Orientation oscillation
    pub pitch_amplitude_deg: f64,
    pub roll_amplitude_deg: f64,
    pub yaw_rate_deg_s: f64,

    /// Simulated time advanced per poll (s).
    pub time_step_s: f64,

    pub seed: Option<u64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            temperature_c: 22.0,
            temperature_step: 0.05,
            humidity_pct: 45.0,
            humidity_step: 0.2,
            pressure_hpa: 1013.25,
            pressure_step: 0.05,
            walk_bound_steps: 100.0,
            pitch_amplitude_deg: 15.0,
            roll_amplitude_deg: 20.0,
            yaw_rate_deg_s: 15.0,
            time_step_s: 1.0,
            seed: None,
        }
    }
}

/// A clamped Gaussian random walk around a fixed centre.
struct Walk {
    centre: f64,
    bound: f64,
    value: f64,
    step: Normal<f64>,
}

impl Walk {
    fn new(centre: f64, step_std: f64, bound_steps: f64) -> Result<Self> {
        let step = Normal::new(0.0, step_std)
            .map_err(|e| Error::Config(format!("mock step deviation {step_std}: {e}")))?;
        Ok(Self {
            centre,
            bound: step_std * bound_steps,
            value: centre,
            step,
        })
    }

    fn advance(&mut self, rng: &mut StdRng) -> f64 {
        let next = self.value + self.step.sample(rng);
        self.value = next.clamp(self.centre - self.bound, self.centre + self.bound);
        self.value
    }
}

/// Synthesizes plausible, slowly drifting readings when no board is present.
pub struct MockSensor {
    rng: StdRng,
    temperature: Walk,
    humidity: Walk,
    pressure: Walk,
    pitch_amplitude: f64,
    roll_amplitude: f64,
    yaw_rate: f64,
    time_step: f64,
    polls: u64,
}

impl MockSensor {
    pub fn new(cfg: &MockConfig) -> Result<Self> {
        if !(cfg.time_step_s.is_finite() && cfg.time_step_s > 0.0) {
            return Err(Error::Config(format!(
                "mock time step must be positive, got {}",
                cfg.time_step_s
            )));
        }
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            rng,
            temperature: Walk::new(cfg.temperature_c, cfg.temperature_step, cfg.walk_bound_steps)?,
            humidity: Walk::new(cfg.humidity_pct, cfg.humidity_step, cfg.walk_bound_steps)?,
            pressure: Walk::new(cfg.pressure_hpa, cfg.pressure_step, cfg.walk_bound_steps)?,
            pitch_amplitude: cfg.pitch_amplitude_deg,
            roll_amplitude: cfg.roll_amplitude_deg,
            yaw_rate: cfg.yaw_rate_deg_s,
            time_step: cfg.time_step_s,
            polls: 0,
        })
    }

    /// Produces the next reading synchronously.
    pub fn next_reading(&mut self) -> RawReading {
        let t = self.polls as f64 * self.time_step;
        self.polls += 1;

        let pitch = self.pitch_amplitude * (t * 0.8).sin();
        let roll = self.roll_amplitude * (t * 0.5).cos();
        let yaw = (t * self.yaw_rate).rem_euclid(360.0);

        // Gravity seen by a resting accelerometer at this attitude (g)
        let (sp, cp) = pitch.to_radians().sin_cos();
        let (sr, cr) = roll.to_radians().sin_cos();

        RawReading {
            temperature: self.temperature.advance(&mut self.rng),
            humidity: self.humidity.advance(&mut self.rng).clamp(0.0, 100.0),
            pressure: self.pressure.advance(&mut self.rng),
            orientation: Orientation { pitch, roll, yaw },
            acceleration: Axes {
                x: -sp,
                y: sr * cp,
                z: cr * cp,
            },
        }
    }
}

#[async_trait]
impl SensorSource for MockSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Mock
    }

    async fn poll(&mut self) -> Result<RawReading> {
        Ok(self.next_reading())
    }
}
