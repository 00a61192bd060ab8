//! # Hatdash Core
//!
//! Hardware-free building blocks of the sensor dashboard:
//! - Sample data model (raw readings, derived values, flat records)
//! - Derivation: pressure altitude and bounded attitude angles
//! - Display mode state machine and 8x8 frame renderers
//! - Fault taxonomy shared by the pipeline
//!
//! Nothing in this crate performs I/O or reads a clock.

pub mod derivation;
pub mod error;
pub mod frame;
pub mod sample;
pub mod state_machine;

// Re-export core types
pub use derivation::{derive, DerivationConfig, DEFAULT_SEA_LEVEL_HPA};
pub use error::{Error, Result};
pub use frame::{Frame, Rgb, GRID};
pub use sample::{Axes, Derived, Orientation, RawReading, Sample, SampleRecord};
pub use state_machine::{
    DisplayConfig, DisplayInput, DisplayMode, DisplayModeMachine, DisplayStatus, RenderCommand,
    NUM_MODES,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
