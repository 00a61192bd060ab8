use serde::Serialize;

use crate::frame::{self, Frame};
use crate::sample::Sample;

// ---------------------------------------------------------------------------
// Enums & Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DisplayMode {
    Monitor = 0,
    SpiritLevel = 1,
    Rainbow = 2,
    Fire = 3,
}

pub const NUM_MODES: usize = 4;

impl DisplayMode {
    pub const ALL: [DisplayMode; NUM_MODES] = [
        DisplayMode::Monitor,
        DisplayMode::SpiritLevel,
        DisplayMode::Rainbow,
        DisplayMode::Fire,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Monitor => "Monitor Mode",
            Self::SpiritLevel => "Spirit Level",
            Self::Rainbow => "Rainbow Wave",
            Self::Fire => "Fire Effect",
        }
    }

    /// Successor in the fixed cycle Monitor -> SpiritLevel -> Rainbow -> Fire -> Monitor.
    pub fn next(self) -> Self {
        match self {
            Self::Monitor => Self::SpiritLevel,
            Self::SpiritLevel => Self::Rainbow,
            Self::Rainbow => Self::Fire,
            Self::Fire => Self::Monitor,
        }
    }
}

/// Discrete inputs understood by the display.
///
/// Only [`DisplayInput::ModeNext`] changes the mode; the others act on power
/// and brightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayInput {
    ModeNext,
    TogglePower,
    SetLowLight(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct DisplayConfig {
    /// Tilt (degrees) that pushes the spirit-level pixel to the grid edge.
    pub level_full_scale_deg: f64,
    /// Brightness multiplier applied in low-light mode.
    pub low_light_scale: f32,
    pub fire_seed: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            level_full_scale_deg: 20.0,
            low_light_scale: 0.25,
            fire_seed: 0x5eed,
        }
    }
}

/// Renders one frame for `mode`. The mode and the latest sample are explicit
/// inputs; nothing is read from shared state.
pub fn render_mode(
    mode: DisplayMode,
    latest: Option<&Sample>,
    frame_no: u64,
    config: &DisplayConfig,
) -> Frame {
    match mode {
        DisplayMode::Monitor => frame::monitor(latest, frame_no),
        DisplayMode::SpiritLevel => frame::spirit_level(latest, config.level_full_scale_deg),
        DisplayMode::Rainbow => frame::rainbow(frame_no),
        DisplayMode::Fire => frame::fire(frame_no, config.fire_seed),
    }
}

/// What the output device should do for one refresh tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCommand {
    /// Clear the device before drawing (first frame after a mode change).
    pub clear_first: bool,
    pub frame: Frame,
}

/// Snapshot of the display state, as shown to viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayStatus {
    pub mode: DisplayMode,
    pub mode_name: &'static str,
    pub is_on: bool,
    pub low_light: bool,
    pub frame: Frame,
}

// ---------------------------------------------------------------------------
// State Machine
// ---------------------------------------------------------------------------

pub struct DisplayModeMachine {
    config: DisplayConfig,
    mode: DisplayMode,
    is_on: bool,
    low_light: bool,

    /// Advanced once per render tick; drives the animations.
    frame_no: u64,

    /// Set by a mode change, consumed by the next render.
    pending_clear: bool,

    /// How often each mode has been entered.
    entries: [u64; NUM_MODES],
}

impl Default for DisplayModeMachine {
    fn default() -> Self {
        Self::new(DisplayConfig::default())
    }
}

impl DisplayModeMachine {
    pub fn new(config: DisplayConfig) -> Self {
        let mut entries = [0; NUM_MODES];
        entries[DisplayMode::Monitor as usize] = 1;

        Self {
            config,
            mode: DisplayMode::Monitor,
            is_on: true,
            low_light: false,
            frame_no: 0,
            pending_clear: true,
            entries,
        }
    }

    pub fn handle(&mut self, input: DisplayInput) -> DisplayMode {
        match input {
            DisplayInput::ModeNext => self.transition_to(self.mode.next()),
            DisplayInput::TogglePower => {
                self.is_on = !self.is_on;
                self.pending_clear = true;
            }
            DisplayInput::SetLowLight(low) => self.low_light = low,
        }
        self.mode
    }

    /// Produces the frame for this tick and advances the frame counter.
    pub fn render(&mut self, latest: Option<&Sample>) -> RenderCommand {
        let clear_first = std::mem::take(&mut self.pending_clear);

        let frame = if self.is_on {
            let frame = render_mode(self.mode, latest, self.frame_no, &self.config);
            if self.low_light {
                frame.scaled(self.config.low_light_scale)
            } else {
                frame
            }
        } else {
            Frame::blank()
        };

        self.frame_no = self.frame_no.wrapping_add(1);
        RenderCommand { clear_first, frame }
    }

    fn transition_to(&mut self, mode: DisplayMode) {
        self.mode = mode;
        self.pending_clear = true;
        self.entries[mode as usize] += 1;
    }

    pub fn current_mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn low_light(&self) -> bool {
        self.low_light
    }

    pub fn frame_no(&self) -> u64 {
        self.frame_no
    }

    pub fn entries(&self, mode: DisplayMode) -> u64 {
        self.entries[mode as usize]
    }

    pub fn status(&self, frame: Frame) -> DisplayStatus {
        DisplayStatus {
            mode: self.mode,
            mode_name: self.mode.label(),
            is_on: self.is_on,
            low_light: self.low_light,
            frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgb;

    #[test]
    fn test_starts_in_monitor() {
        let m = DisplayModeMachine::default();
        assert_eq!(m.current_mode(), DisplayMode::Monitor);
        assert!(m.is_on());
    }

    #[test]
    fn test_four_clicks_close_the_cycle() {
        let mut m = DisplayModeMachine::default();
        let seen: Vec<_> = (0..4).map(|_| m.handle(DisplayInput::ModeNext)).collect();
        assert_eq!(
            seen,
            vec![
                DisplayMode::SpiritLevel,
                DisplayMode::Rainbow,
                DisplayMode::Fire,
                DisplayMode::Monitor
            ]
        );
        assert_eq!(m.entries(DisplayMode::Monitor), 2);
        assert_eq!(m.entries(DisplayMode::Fire), 1);
    }

    #[test]
    fn test_other_inputs_keep_mode() {
        let mut m = DisplayModeMachine::default();
        m.handle(DisplayInput::ModeNext);
        assert_eq!(m.handle(DisplayInput::TogglePower), DisplayMode::SpiritLevel);
        assert_eq!(m.handle(DisplayInput::SetLowLight(true)), DisplayMode::SpiritLevel);
        assert!(!m.is_on());
        assert!(m.low_light());
    }

    #[test]
    fn test_clear_only_after_mode_change() {
        let mut m = DisplayModeMachine::default();
        assert!(m.render(None).clear_first);
        assert!(!m.render(None).clear_first);
        m.handle(DisplayInput::ModeNext);
        assert!(m.render(None).clear_first);
        assert!(!m.render(None).clear_first);
    }

    #[test]
    fn test_power_off_blanks_output() {
        let mut m = DisplayModeMachine::default();
        m.handle(DisplayInput::ModeNext);
        m.handle(DisplayInput::ModeNext); // Rainbow
        assert!(m.render(None).frame.lit() > 0);
        m.handle(DisplayInput::TogglePower);
        assert_eq!(m.render(None).frame, Frame::blank());
    }

    #[test]
    fn test_frame_counter_drives_animation() {
        let mut m = DisplayModeMachine::default();
        m.handle(DisplayInput::ModeNext);
        m.handle(DisplayInput::ModeNext);
        let a = m.render(None).frame;
        let b = m.render(None).frame;
        assert_ne!(a, b);
        assert_eq!(m.frame_no(), 2);
    }

    #[test]
    fn test_low_light_dims() {
        let mut m = DisplayModeMachine::default();
        m.handle(DisplayInput::ModeNext);
        m.handle(DisplayInput::ModeNext);
        m.handle(DisplayInput::ModeNext); // Fire
        m.handle(DisplayInput::SetLowLight(true));
        let frame = m.render(None).frame;
        assert!(frame.iter().all(|Rgb(r, _, _)| r <= 64));
    }
}
