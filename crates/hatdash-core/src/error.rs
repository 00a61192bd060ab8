//! Fault taxonomy shared by every stage of the pipeline.

/// Faults raised by the acquisition, derivation, display and recording stages.
///
/// None of these is fatal on its own: the acquisition loop retries on its next
/// tick, the display skips a frame and a recording fault stops the recording.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The sensor could not be reached or did not answer in time.
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// A reading that cannot describe a physical state (e.g. pressure <= 0).
    #[error("invalid reading: {0}")]
    InvalidReading(String),

    /// The output device rejected a frame.
    #[error("display device fault: {0}")]
    DisplayDeviceFault(String),

    /// The durable sink could not keep up or failed to write.
    #[error("log write fault: {0}")]
    LogWriteFault(String),

    /// A configuration value outside its accepted range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Short machine-readable tag, used in status messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SensorUnavailable(_) => "sensor_unavailable",
            Self::InvalidReading(_) => "invalid_reading",
            Self::DisplayDeviceFault(_) => "display_device_fault",
            Self::LogWriteFault(_) => "log_write_fault",
            Self::Config(_) => "config",
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
