//! 8x8 RGB frames and the per-mode renderers.
//!
//! Renderers are plain functions of (mode inputs, frame counter). The LED
//! origin (0, 0) is the top-left pixel; `x` grows right, `y` grows down.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::sample::Sample;

pub const GRID: usize = 8;
const GRID_MAX: i64 = GRID as i64 - 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const OFF: Rgb = Rgb(0, 0, 0);
    pub const RED: Rgb = Rgb(255, 0, 0);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const AMBER: Rgb = Rgb(255, 140, 0);

    pub fn scaled(self, factor: f32) -> Rgb {
        let f = factor.clamp(0.0, 1.0);
        let s = |c: u8| (c as f32 * f).round() as u8;
        Rgb(s(self.0), s(self.1), s(self.2))
    }

    /// Packs into the 16-bit RGB565 layout used by LED framebuffers.
    pub fn to_rgb565(self) -> u16 {
        let r = (self.0 as u16 >> 3) & 0x1f;
        let g = (self.1 as u16 >> 2) & 0x3f;
        let b = (self.2 as u16 >> 3) & 0x1f;
        (r << 11) | (g << 5) | b
    }
}

/// One full image for the LED matrix, stored row-major (`pixels[y][x]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Frame {
    pixels: [[Rgb; GRID]; GRID],
}

impl Frame {
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Rgb> {
        self.pixels.get(y).and_then(|row| row.get(x)).copied()
    }

    /// Writes a pixel; coordinates outside the grid are ignored.
    pub fn set(&mut self, x: usize, y: usize, color: Rgb) {
        if let Some(px) = self.pixels.get_mut(y).and_then(|row| row.get_mut(x)) {
            *px = color;
        }
    }

    pub fn rows(&self) -> &[[Rgb; GRID]; GRID] {
        &self.pixels
    }

    /// Pixels in framebuffer order (row by row).
    pub fn iter(&self) -> impl Iterator<Item = Rgb> + '_ {
        self.pixels.iter().flat_map(|row| row.iter().copied())
    }

    pub fn lit(&self) -> usize {
        self.iter().filter(|&c| c != Rgb::OFF).count()
    }

    pub fn scaled(&self, factor: f32) -> Frame {
        let mut out = self.clone();
        for px in out.pixels.iter_mut().flatten() {
            *px = px.scaled(factor);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureBand {
    Cold,
    Comfortable,
    Hot,
}

impl TemperatureBand {
    pub fn of(celsius: f64) -> Self {
        if celsius < 18.0 {
            Self::Cold
        } else if celsius <= 27.0 {
            Self::Comfortable
        } else {
            Self::Hot
        }
    }

    fn color(self) -> Rgb {
        match self {
            Self::Cold => Rgb(0, 80, 255),
            Self::Comfortable => Rgb(0, 255, 0),
            Self::Hot => Rgb(255, 40, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumidityBand {
    Dry,
    Normal,
    Humid,
}

impl HumidityBand {
    pub fn of(percent: f64) -> Self {
        if percent < 30.0 {
            Self::Dry
        } else if percent <= 60.0 {
            Self::Normal
        } else {
            Self::Humid
        }
    }

    fn color(self) -> Rgb {
        match self {
            Self::Dry => Rgb(255, 200, 0),
            Self::Normal => Rgb(0, 200, 200),
            Self::Humid => Rgb(120, 0, 255),
        }
    }
}

/// Breathing centre square colored by temperature band, humidity bar on the
/// bottom row and an amber corner pixel while the data is stale.
pub fn monitor(sample: Option<&Sample>, frame_no: u64) -> Frame {
    let mut frame = Frame::blank();
    let breath = (150.0 + 100.0 * (frame_no as f64 * 0.15).sin()) / 255.0;

    let Some(sample) = sample else {
        let idle = Rgb(80, 80, 80).scaled(breath as f32);
        for (x, y) in [(3, 3), (4, 3), (3, 4), (4, 4)] {
            frame.set(x, y, idle);
        }
        return frame;
    };

    let centre = TemperatureBand::of(sample.raw.temperature)
        .color()
        .scaled(breath as f32);
    for (x, y) in [(3, 3), (4, 3), (3, 4), (4, 4)] {
        frame.set(x, y, centre);
    }

    let humidity = sample.raw.humidity.clamp(0.0, 100.0);
    let bar = ((humidity / 100.0) * GRID as f64).ceil() as usize;
    let bar_color = HumidityBand::of(humidity).color();
    for x in 0..bar.min(GRID) {
        frame.set(x, GRID - 1, bar_color);
    }

    if sample.stale {
        frame.set(GRID - 1, 0, Rgb::AMBER);
    }
    frame
}

// ---------------------------------------------------------------------------
// Spirit level
// ---------------------------------------------------------------------------

/// Grid cell lit for the given attitude; `full_scale_deg` of tilt reaches the edge.
pub fn level_position(pitch: f64, roll: f64, full_scale_deg: f64) -> (usize, usize) {
    let half = GRID as f64 / 2.0 - 0.5;
    let x = half + (-pitch / full_scale_deg) * half;
    let y = half + (roll / full_scale_deg) * half;
    let cell = |v: f64| (v.floor() as i64).clamp(0, GRID_MAX) as usize;
    (cell(x), cell(y))
}

pub fn spirit_level(sample: Option<&Sample>, full_scale_deg: f64) -> Frame {
    let mut frame = Frame::blank();
    if let Some(sample) = sample {
        let (x, y) = level_position(sample.derived.pitch, sample.derived.roll, full_scale_deg);
        let centred = (3..=4).contains(&x) && (3..=4).contains(&y);
        frame.set(x, y, if centred { Rgb::GREEN } else { Rgb::RED });
    }
    frame
}

// ---------------------------------------------------------------------------
// Animations
// ---------------------------------------------------------------------------

pub fn rainbow(frame_no: u64) -> Frame {
    let mut frame = Frame::blank();
    let t = frame_no as f64 * 0.1;
    let wave = |phase: f64| (128.0 + 127.0 * (phase + t).sin()) as u8;
    for y in 0..GRID {
        for x in 0..GRID {
            let (fx, fy) = (x as f64, y as f64);
            frame.set(x, y, Rgb(wave(fx / 2.0), wave(fy / 2.0), wave((fx + fy) / 2.0)));
        }
    }
    frame
}

/// Flickering embers; the same frame number always yields the same image.
pub fn fire(frame_no: u64, seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed ^ frame_no.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let mut frame = Frame::blank();
    for y in 0..GRID {
        for x in 0..GRID {
            frame.set(x, y, Rgb(rng.gen_range(150..=255), rng.gen_range(0..=100), 0));
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Derived, RawReading};
    use chrono::Utc;

    fn sample(temperature: f64, humidity: f64, pitch: f64, roll: f64) -> Sample {
        Sample {
            sequence: 0,
            timestamp: Utc::now(),
            raw: RawReading {
                temperature,
                humidity,
                pressure: 1013.25,
                ..Default::default()
            },
            derived: Derived {
                altitude: 0.0,
                pitch,
                roll,
                yaw: 0.0,
            },
            stale: false,
        }
    }

    #[test]
    fn test_level_centred_when_flat() {
        assert_eq!(level_position(0.0, 0.0, 20.0), (3, 3));
        let frame = spirit_level(Some(&sample(20.0, 40.0, 0.0, 0.0)), 20.0);
        assert_eq!(frame.get(3, 3), Some(Rgb::GREEN));
        assert_eq!(frame.lit(), 1);
    }

    #[test]
    fn test_level_clamped_to_grid() {
        assert_eq!(level_position(90.0, 90.0, 20.0), (0, 7));
        assert_eq!(level_position(-90.0, -90.0, 20.0), (7, 0));
        let frame = spirit_level(Some(&sample(20.0, 40.0, -90.0, 45.0)), 20.0);
        assert_eq!(frame.get(7, 7), Some(Rgb::RED));
    }

    #[test]
    fn test_monitor_bands() {
        let cold = monitor(Some(&sample(5.0, 10.0, 0.0, 0.0)), 0);
        let hot = monitor(Some(&sample(35.0, 90.0, 0.0, 0.0)), 0);
        let c = cold.get(3, 3).unwrap();
        let h = hot.get(3, 3).unwrap();
        assert!(c.2 > c.0, "cold should be blue-ish: {c:?}");
        assert!(h.0 > h.2, "hot should be red-ish: {h:?}");

        // 10% -> 1 pixel, 90% -> 8 pixels on the bottom row
        let bottom = |f: &Frame| (0..GRID).filter(|&x| f.get(x, 7) != Some(Rgb::OFF)).count();
        assert_eq!(bottom(&cold), 1);
        assert_eq!(bottom(&hot), 8);
    }

    #[test]
    fn test_monitor_marks_stale() {
        let mut s = sample(20.0, 40.0, 0.0, 0.0);
        assert_eq!(monitor(Some(&s), 3).get(7, 0), Some(Rgb::OFF));
        s.stale = true;
        assert_eq!(monitor(Some(&s), 3).get(7, 0), Some(Rgb::AMBER));
    }

    #[test]
    fn test_animations_advance_with_frame_counter() {
        assert_ne!(rainbow(0), rainbow(5));
        assert_eq!(rainbow(12), rainbow(12));
        assert_ne!(fire(1, 7), fire(2, 7));
        assert_eq!(fire(9, 7), fire(9, 7));
        assert_eq!(fire(0, 0).lit(), GRID * GRID);
    }

    #[test]
    fn test_rgb565_packing() {
        assert_eq!(Rgb(255, 255, 255).to_rgb565(), 0xffff);
        assert_eq!(Rgb(255, 0, 0).to_rgb565(), 0xf800);
        assert_eq!(Rgb(0, 255, 0).to_rgb565(), 0x07e0);
        assert_eq!(Rgb(0, 0, 255).to_rgb565(), 0x001f);
    }
}
