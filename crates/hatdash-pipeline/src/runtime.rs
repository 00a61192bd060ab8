//! Wires the acquisition loop, display task and joystick reader together.

use std::path::PathBuf;

use hatdash_core::{DisplayInput, DisplayStatus, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::acquisition::{AcquisitionLoop, Command, LatestSample, LoopStats};
use crate::bus::SampleBus;
use crate::config::Config;
use crate::display::{DisplayDevice, DisplayTask, HeadlessDisplay};
use crate::hardware::{select_sensor, HardwareProbe};
use crate::joystick::run_joystick;
use crate::recorder::{Recorder, RecordingStatus};
use crate::sensor::{SensorKind, SensorSource};

/// Senders for everything a viewer or the joystick may ask of the pipeline.
#[derive(Clone)]
pub struct Controls {
    commands: mpsc::UnboundedSender<Command>,
    display: mpsc::UnboundedSender<DisplayInput>,
}

impl Controls {
    /// Queues a recording command for the next tick. False once the loop has stopped.
    pub fn command(&self, cmd: Command) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn display(&self, input: DisplayInput) -> bool {
        self.display.send(input).is_ok()
    }
}

/// Read side of a running pipeline, cheap to clone into each viewer.
#[derive(Clone)]
pub struct PipelineHandle {
    pub bus: SampleBus,
    pub latest: LatestSample,
    pub recording: watch::Receiver<RecordingStatus>,
    pub display: watch::Receiver<DisplayStatus>,
    pub sensor: SensorKind,
    pub controls: Controls,
}

pub struct Pipeline {
    acquisition: AcquisitionLoop,
    display: DisplayTask,
    joystick: Option<PathBuf>,
    handle: PipelineHandle,
}

impl Pipeline {
    /// Chooses sensor and display from what the probe found.
    pub fn build(config: &Config, probe: &HardwareProbe) -> Result<Self> {
        config.validate()?;
        let source = select_sensor(config, probe)?;
        let device = open_display(probe);
        let mut pipeline = Self::with_parts(source, device, config);
        pipeline.joystick = probe.joystick.clone();
        Ok(pipeline)
    }

    pub fn with_parts(
        source: Box<dyn SensorSource>,
        device: Box<dyn DisplayDevice>,
        config: &Config,
    ) -> Self {
        let sensor = source.kind();
        let bus = SampleBus::new(config.viewer_buffer);
        let recorder = Recorder::new(&config.log_dir, config.log_buffer);
        let recording = recorder.status();
        let (acquisition, commands, latest) =
            AcquisitionLoop::new(source, config, bus.clone(), recorder);
        let (display, display_tx, display_status) =
            DisplayTask::new(device, config, latest.clone());

        Self {
            acquisition,
            display,
            joystick: None,
            handle: PipelineHandle {
                bus,
                latest,
                recording,
                display: display_status,
                sensor,
                controls: Controls {
                    commands,
                    display: display_tx,
                },
            },
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Starts every task. They all stop once `shutdown` flips to true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Running {
        let joystick = self.joystick.map(|path| {
            let inputs = self.handle.controls.display.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = run_joystick(&path, inputs, shutdown).await {
                    warn!("{e}; continuing without joystick");
                }
            })
        });
        let display = tokio::spawn(self.display.run(shutdown.clone()));
        let acquisition = tokio::spawn(self.acquisition.run(shutdown));

        Running {
            acquisition,
            display,
            joystick,
        }
    }
}

fn open_display(probe: &HardwareProbe) -> Box<dyn DisplayDevice> {
    #[cfg(unix)]
    if let Some(path) = &probe.framebuffer {
        match crate::display::FramebufferDisplay::open(path) {
            Ok(fb) => return Box::new(fb),
            Err(e) => warn!("{e}; rendering headless"),
        }
    }
    #[cfg(not(unix))]
    let _ = probe;
    info!("no LED matrix, rendering headless");
    Box::new(HeadlessDisplay::default())
}

pub struct Running {
    acquisition: JoinHandle<LoopStats>,
    display: JoinHandle<()>,
    joystick: Option<JoinHandle<()>>,
}

impl Running {
    /// Waits for every task to finish; returns the loop's final counters.
    pub async fn join(self) -> LoopStats {
        let stats = match self.acquisition.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("acquisition task failed: {e}");
                LoopStats::default()
            }
        };
        if let Err(e) = self.display.await {
            warn!("display task failed: {e}");
        }
        if let Some(joystick) = self.joystick {
            if let Err(e) = joystick.await {
                warn!("joystick task failed: {e}");
            }
        }
        stats
    }
}
