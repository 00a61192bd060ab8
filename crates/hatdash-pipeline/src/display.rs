//! Drives the LED matrix from the display mode machine.
//!
//! The render tick runs on its own cadence, independent of acquisition. Input
//! events are handled between frames; a device fault skips the frame and is
//! retried on the next tick.

use std::time::Duration;

use hatdash_core::{
    DisplayInput, DisplayModeMachine, DisplayStatus, Frame, RenderCommand, Result,
};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::acquisition::LatestSample;
use crate::config::Config;

/// Capability interface over the output device.
pub trait DisplayDevice: Send {
    fn name(&self) -> &str;

    fn clear(&mut self) -> Result<()>;

    fn render(&mut self, frame: &Frame) -> Result<()>;
}

/// Keeps the last frame in memory; used when no LED matrix is attached.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    last: Frame,
    frames: u64,
}

impl HeadlessDisplay {
    pub fn last_frame(&self) -> &Frame {
        &self.last
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl DisplayDevice for HeadlessDisplay {
    fn name(&self) -> &str {
        "headless"
    }

    fn clear(&mut self) -> Result<()> {
        self.last = Frame::blank();
        Ok(())
    }

    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.last = frame.clone();
        self.frames += 1;
        Ok(())
    }
}

#[cfg(unix)]
pub use framebuffer::FramebufferDisplay;

#[cfg(unix)]
mod framebuffer {
    use std::fs::{File, OpenOptions};
    use std::os::unix::fs::FileExt;
    use std::path::{Path, PathBuf};

    use hatdash_core::{Error, Frame, Result, GRID};
    use zerocopy::IntoBytes;

    use super::DisplayDevice;

    /// The 8x8 LED matrix exposed as an RGB565 framebuffer device.
    pub struct FramebufferDisplay {
        path: PathBuf,
        name: String,
        file: File,
    }

    impl FramebufferDisplay {
        pub fn open(path: &Path) -> Result<Self> {
            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| Error::DisplayDeviceFault(format!("{}: {e}", path.display())))?;
            Ok(Self {
                path: path.to_path_buf(),
                name: format!("framebuffer {}", path.display()),
                file,
            })
        }

        fn write(&mut self, pixels: &[u16; GRID * GRID]) -> Result<()> {
            self.file
                .write_all_at(pixels.as_bytes(), 0)
                .map_err(|e| Error::DisplayDeviceFault(format!("{}: {e}", self.path.display())))
        }
    }

    impl DisplayDevice for FramebufferDisplay {
        fn name(&self) -> &str {
            &self.name
        }

        fn clear(&mut self) -> Result<()> {
            self.write(&[0; GRID * GRID])
        }

        fn render(&mut self, frame: &Frame) -> Result<()> {
            let mut pixels = [0u16; GRID * GRID];
            for (slot, px) in pixels.iter_mut().zip(frame.iter()) {
                *slot = px.to_rgb565();
            }
            self.write(&pixels)
        }
    }
}

// ---------------------------------------------------------------------------
// Render task
// ---------------------------------------------------------------------------

pub struct DisplayTask {
    machine: DisplayModeMachine,
    device: Box<dyn DisplayDevice>,
    inputs: mpsc::UnboundedReceiver<DisplayInput>,
    latest: LatestSample,
    status: watch::Sender<DisplayStatus>,
    period: Duration,
    faults: u64,
}

impl DisplayTask {
    pub fn new(
        device: Box<dyn DisplayDevice>,
        config: &Config,
        latest: LatestSample,
    ) -> (
        Self,
        mpsc::UnboundedSender<DisplayInput>,
        watch::Receiver<DisplayStatus>,
    ) {
        let machine = DisplayModeMachine::new(config.display);
        let (input_tx, inputs) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(machine.status(Frame::blank()));
        let task = Self {
            machine,
            device,
            inputs,
            latest,
            status,
            period: config.display_period,
            faults: 0,
        };
        (task, input_tx, status_rx)
    }

    pub fn machine(&self) -> &DisplayModeMachine {
        &self.machine
    }

    pub fn faults(&self) -> u64 {
        self.faults
    }

    pub fn handle(&mut self, input: DisplayInput) {
        let before = self.machine.current_mode();
        let after = self.machine.handle(input);
        if before != after {
            info!(mode = after.label(), "display mode changed");
        } else {
            debug!(?input, "display input");
        }
    }

    /// Renders one frame from the latest sample and pushes it to the device.
    pub fn render_tick(&mut self) -> Result<()> {
        let latest = self.latest.borrow().clone();
        let RenderCommand { clear_first, frame } = self.machine.render(latest.as_deref());

        let pushed = self.push(clear_first, &frame);
        self.status.send_replace(self.machine.status(frame));

        match pushed {
            Ok(()) => {
                if self.faults > 0 {
                    info!(device = self.device.name(), "display recovered");
                    self.faults = 0;
                }
                Ok(())
            }
            Err(e) => {
                if self.faults == 0 {
                    warn!(device = self.device.name(), "{e}; skipping frames until it recovers");
                } else {
                    debug!("{e}");
                }
                self.faults += 1;
                Err(e)
            }
        }
    }

    fn push(&mut self, clear_first: bool, frame: &Frame) -> Result<()> {
        if clear_first {
            self.device.clear()?;
        }
        self.device.render(frame)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(device = self.device.name(), period = ?self.period, "display started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(input) = self.inputs.recv() => self.handle(input),
                _ = interval.tick() => {
                    // fault already logged; retried next tick
                    let _ = self.render_tick();
                }
            }
        }

        if let Err(e) = self.device.clear() {
            warn!("{e}");
        }
        info!("display stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hatdash_core::{DisplayMode, Error, Rgb, Sample};
    use std::sync::Arc;

    /// Rejects every frame, for exercising fault handling.
    struct BrokenDisplay;

    impl DisplayDevice for BrokenDisplay {
        fn name(&self) -> &str {
            "broken"
        }

        fn clear(&mut self) -> Result<()> {
            Err(Error::DisplayDeviceFault("unplugged".into()))
        }

        fn render(&mut self, _frame: &Frame) -> Result<()> {
            Err(Error::DisplayDeviceFault("unplugged".into()))
        }
    }

    fn task(device: Box<dyn DisplayDevice>) -> (
        DisplayTask,
        watch::Sender<Option<Arc<Sample>>>,
        mpsc::UnboundedSender<DisplayInput>,
        watch::Receiver<DisplayStatus>,
    ) {
        let (latest_tx, latest_rx) = watch::channel(None);
        let (task, inputs, status) = DisplayTask::new(device, &Config::default(), latest_rx);
        (task, latest_tx, inputs, status)
    }

    fn level_sample() -> Arc<Sample> {
        Arc::new(Sample {
            sequence: 1,
            timestamp: Utc::now(),
            raw: Default::default(),
            derived: Default::default(),
            stale: false,
        })
    }

    #[test]
    fn test_render_uses_latest_sample() {
        let (mut task, latest, _inputs, status) = task(Box::new(HeadlessDisplay::default()));
        task.handle(DisplayInput::ModeNext); // SpiritLevel

        task.render_tick().unwrap();
        assert_eq!(status.borrow().frame.lit(), 0);

        latest.send_replace(Some(level_sample()));
        task.render_tick().unwrap();
        let st = status.borrow();
        assert_eq!(st.mode, DisplayMode::SpiritLevel);
        assert_eq!(st.frame.get(3, 3), Some(Rgb::GREEN));
    }

    #[test]
    fn test_device_fault_is_not_fatal() {
        let (mut task, _latest, _inputs, status) = task(Box::new(BrokenDisplay));
        for _ in 0..3 {
            assert!(matches!(task.render_tick(), Err(Error::DisplayDeviceFault(_))));
        }
        assert_eq!(task.faults(), 3);
        // state keeps advancing even though nothing reached the device
        task.handle(DisplayInput::ModeNext);
        let _ = task.render_tick();
        assert_eq!(status.borrow().mode, DisplayMode::SpiritLevel);
        assert_eq!(task.machine().frame_no(), 4);
    }

    #[test]
    fn test_headless_keeps_last_frame() {
        let mut dev = HeadlessDisplay::default();
        let mut frame = Frame::blank();
        frame.set(1, 2, Rgb::RED);
        dev.render(&frame).unwrap();
        assert_eq!(dev.last_frame(), &frame);
        assert_eq!(dev.frames(), 1);
        dev.clear().unwrap();
        assert_eq!(dev.last_frame(), &Frame::blank());
    }

    #[cfg(unix)]
    #[test]
    fn test_framebuffer_writes_rgb565() {
        let dir = crate::testutil::scratch_dir("fb");
        let path = dir.join("fb1");
        std::fs::write(&path, vec![0xAAu8; 128]).unwrap();

        let mut fb = FramebufferDisplay::open(&path).unwrap();
        let mut frame = Frame::blank();
        frame.set(0, 0, Rgb::RED);
        frame.set(7, 7, Rgb(0, 0, 255));
        fb.render(&frame).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 128);
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]), 0xf800);
        assert_eq!(u16::from_ne_bytes([bytes[126], bytes[127]]), 0x001f);
        assert!(bytes[2..126].iter().all(|&b| b == 0));

        assert!(FramebufferDisplay::open(&dir.join("missing")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inputs_applied_while_running() {
        let (task, _latest, inputs, mut status) = task(Box::new(HeadlessDisplay::default()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(stop_rx));

        inputs.send(DisplayInput::ModeNext).unwrap();
        inputs.send(DisplayInput::ModeNext).unwrap();
        loop {
            status.changed().await.unwrap();
            if status.borrow().mode == DisplayMode::Rainbow {
                break;
            }
        }
        assert!(status.borrow().frame.lit() > 0);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
