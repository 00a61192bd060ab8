//! Hatdash Pipeline Library
//!
//! Sensor sources, the acquisition loop, live fan-out, CSV recording and the
//! LED display task, plus the wiring that runs them together.

pub mod acquisition;
pub mod bus;
pub mod config;
pub mod display;
pub mod hardware;
pub mod iio;
pub mod joystick;
pub mod recorder;
pub mod runtime;
pub mod sensor;

#[cfg(test)]
mod testutil;

pub use acquisition::{AcquisitionLoop, Command, LatestSample, LoopStats};
pub use bus::{SampleBus, Subscription};
pub use config::{Config, PipelineArgs, SensorMode};
pub use display::{DisplayDevice, DisplayTask, HeadlessDisplay};
pub use hardware::{select_sensor, HardwareProbe, ProbeRoots};
pub use recorder::{PendingFlush, Recorder, RecordingStatus};
pub use runtime::{Controls, Pipeline, PipelineHandle, Running};
pub use sensor::{MockConfig, MockSensor, SensorKind, SensorSource};
