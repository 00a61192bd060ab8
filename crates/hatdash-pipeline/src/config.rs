//! Runtime configuration, read once at startup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use hatdash_core::{DerivationConfig, DisplayConfig, Error, Result, DEFAULT_SEA_LEVEL_HPA};
use serde::Serialize;

/// Which sensor implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SensorMode {
    /// Use the board sensors when they are found, otherwise the mock.
    Auto,
    /// Always synthesize data.
    Mock,
    /// Require the board sensors; fail at startup without them.
    Hardware,
}

/// Command-line surface of the pipeline, flattened into the binaries' parsers.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    // ── Acquisition ───────────────────────────────────────────
    /// Sampling period (ms)
    #[arg(long, default_value_t = 1000)]
    pub period_ms: u64,

    /// Upper bound on a single sensor poll (ms)
    #[arg(long, default_value_t = 500)]
    pub poll_timeout_ms: u64,

    /// Reference sea-level pressure P0 (hPa)
    #[arg(long, default_value_t = DEFAULT_SEA_LEVEL_HPA)]
    pub sea_level_hpa: f64,

    /// Sensor selection
    #[arg(long, value_enum, default_value = "auto")]
    pub sensor: SensorMode,

    /// Seed for the mock sensor (random when omitted)
    #[arg(long)]
    pub mock_seed: Option<u64>,

    // ── Display ───────────────────────────────────────────────
    /// LED refresh period (ms)
    #[arg(long, default_value_t = 100)]
    pub display_period_ms: u64,

    // ── Fan-out & recording ───────────────────────────────────
    /// Directory for recording files
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Samples buffered per live viewer before the oldest are dropped
    #[arg(long, default_value_t = 16)]
    pub viewer_buffer: usize,

    /// Rows buffered for the log writer before recording faults
    #[arg(long, default_value_t = 256)]
    pub log_buffer: usize,
}

impl Default for PipelineArgs {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            poll_timeout_ms: 500,
            sea_level_hpa: DEFAULT_SEA_LEVEL_HPA,
            sensor: SensorMode::Auto,
            mock_seed: None,
            display_period_ms: 100,
            log_dir: PathBuf::from("logs"),
            viewer_buffer: 16,
            log_buffer: 256,
        }
    }
}

impl PipelineArgs {
    pub fn into_config(self) -> Result<Config> {
        let config = Config {
            period: Duration::from_millis(self.period_ms),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            derivation: DerivationConfig::new(self.sea_level_hpa)?,
            sensor: self.sensor,
            mock_seed: self.mock_seed,
            display_period: Duration::from_millis(self.display_period_ms),
            display: DisplayConfig::default(),
            log_dir: self.log_dir,
            viewer_buffer: self.viewer_buffer,
            log_buffer: self.log_buffer,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Immutable pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub period: Duration,
    pub poll_timeout: Duration,
    pub derivation: DerivationConfig,
    pub sensor: SensorMode,
    pub mock_seed: Option<u64>,
    pub display_period: Duration,
    pub display: DisplayConfig,
    pub log_dir: PathBuf,
    pub viewer_buffer: usize,
    pub log_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(500),
            derivation: DerivationConfig::default(),
            sensor: SensorMode::Auto,
            mock_seed: None,
            display_period: Duration::from_millis(100),
            display: DisplayConfig::default(),
            log_dir: PathBuf::from("logs"),
            viewer_buffer: 16,
            log_buffer: 256,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let nonzero = |what: &str, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(Error::Config(format!("{what} must be greater than zero")))
            }
        };
        nonzero("sampling period", !self.period.is_zero())?;
        nonzero("poll timeout", !self.poll_timeout.is_zero())?;
        nonzero("display period", !self.display_period.is_zero())?;
        nonzero("viewer buffer", self.viewer_buffer > 0)?;
        nonzero("log buffer", self.log_buffer > 0)?;
        DerivationConfig::new(self.derivation.sea_level_hpa())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match() {
        let from_args = PipelineArgs::default().into_config().unwrap();
        let direct = Config::default();
        assert_eq!(from_args.period, direct.period);
        assert_eq!(from_args.poll_timeout, direct.poll_timeout);
        assert_eq!(from_args.derivation, direct.derivation);
        assert_eq!(from_args.sensor, direct.sensor);
        assert_eq!(from_args.log_dir, direct.log_dir);
        assert_eq!(from_args.viewer_buffer, direct.viewer_buffer);
        assert!(direct.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let args = PipelineArgs {
            period_ms: 0,
            ..Default::default()
        };
        assert!(matches!(args.into_config(), Err(Error::Config(_))));

        let args = PipelineArgs {
            sea_level_hpa: -3.0,
            ..Default::default()
        };
        assert!(matches!(args.into_config(), Err(Error::Config(_))));

        let args = PipelineArgs {
            log_buffer: 0,
            ..Default::default()
        };
        assert!(matches!(args.into_config(), Err(Error::Config(_))));
    }
}
