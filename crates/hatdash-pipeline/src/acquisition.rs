//! The periodic sampling loop: poll, derive, stamp, publish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hatdash_core::{derive, DerivationConfig, Derived, Error, RawReading, Sample};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::SampleBus;
use crate::config::Config;
use crate::recorder::Recorder;
use crate::sensor::SensorSource;

/// Commands applied by the loop on the next tick boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartRecording,
    StopRecording,
    ToggleRecording,
}

/// Shared cell holding the most recently published sample.
pub type LatestSample = watch::Receiver<Option<Arc<Sample>>>;

/// Counters kept over the loop's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub published: u64,
    pub stale: u64,
    pub sensor_faults: u64,
    pub invalid_readings: u64,
    pub log_faults: u64,
}

pub struct AcquisitionLoop {
    source: Box<dyn SensorSource>,
    derivation: DerivationConfig,
    period: Duration,
    poll_timeout: Duration,
    bus: SampleBus,
    latest: watch::Sender<Option<Arc<Sample>>>,
    recorder: Recorder,
    commands: mpsc::UnboundedReceiver<Command>,

    /// Sequence number for the next sample. Only this loop writes it.
    next_sequence: u64,
    last_good: Option<(RawReading, Derived)>,
    stats: LoopStats,
}

impl AcquisitionLoop {
    /// Builds the loop and returns it with the command sender and latest-sample cell.
    pub fn new(
        source: Box<dyn SensorSource>,
        config: &Config,
        bus: SampleBus,
        recorder: Recorder,
    ) -> (Self, mpsc::UnboundedSender<Command>, LatestSample) {
        let (cmd_tx, commands) = mpsc::unbounded_channel();
        let (latest, latest_rx) = watch::channel(None);
        let acq = Self {
            source,
            derivation: config.derivation,
            period: config.period,
            poll_timeout: config.poll_timeout,
            bus,
            latest,
            recorder,
            commands,
            next_sequence: 1,
            last_good: None,
            stats: LoopStats::default(),
        };
        (acq, cmd_tx, latest_rx)
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn apply(&mut self, cmd: Command) {
        debug!(?cmd, "applying command");
        let start = match cmd {
            Command::StartRecording => true,
            Command::StopRecording => false,
            Command::ToggleRecording => !self.recorder.is_recording(),
        };

        if start {
            if let Err(e) = self.recorder.start() {
                warn!("could not start recording: {e}");
            }
        } else if let Some(flush) = self.recorder.stop() {
            tokio::spawn(async move {
                if let Err(e) = flush.wait().await {
                    warn!("{e}");
                }
            });
        }
    }

    /// Applies every command queued since the last tick.
    pub fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply(cmd);
        }
    }

    /// One acquisition step. Returns the published sample, or `None` when the
    /// poll failed before any good reading existed.
    pub async fn tick(&mut self) -> Option<Arc<Sample>> {
        self.stats.ticks += 1;

        let polled = match tokio::time::timeout(self.poll_timeout, self.source.poll()).await {
            Ok(result) => result,
            Err(_) => Err(Error::SensorUnavailable(format!(
                "poll timed out after {:?}",
                self.poll_timeout
            ))),
        };
        let fresh = polled.and_then(|raw| derive(&raw, &self.derivation).map(|d| (raw, d)));

        let (raw, derived, stale) = match fresh {
            Ok((raw, derived)) => {
                self.last_good = Some((raw, derived));
                (raw, derived, false)
            }
            Err(e) => {
                match e {
                    Error::InvalidReading(_) => self.stats.invalid_readings += 1,
                    _ => self.stats.sensor_faults += 1,
                }
                let Some((raw, derived)) = self.last_good else {
                    warn!("{e}; no previous reading, nothing published");
                    return None;
                };
                warn!("{e}; republishing last good values as stale");
                (raw, derived, true)
            }
        };

        let sample = Arc::new(Sample {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            raw,
            derived,
            stale,
        });
        self.next_sequence += 1;
        self.publish(sample.clone());
        Some(sample)
    }

    fn publish(&mut self, sample: Arc<Sample>) {
        self.latest.send_replace(Some(sample.clone()));
        let viewers = self.bus.publish(sample.clone());

        if sample.stale {
            self.stats.stale += 1;
        }
        self.stats.published += 1;

        if self.recorder.offer(&sample).is_err() {
            self.stats.log_faults += 1;
        }
        debug!(
            seq = sample.sequence,
            stale = sample.stale,
            altitude = sample.derived.altitude,
            viewers,
            "sample published"
        );
    }

    /// Runs until `shutdown` flips to true, then closes any open recording
    /// and waits for its rows to reach disk.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LoopStats {
        info!(period = ?self.period, sensor = ?self.source.kind(), "acquisition started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    self.drain_commands();
                    self.tick().await;
                }
            }
        }

        if let Some(flush) = self.recorder.stop() {
            if let Err(e) = flush.wait().await {
                warn!("{e}");
            }
        }
        info!(stats = ?self.stats, "acquisition stopped");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{MockConfig, MockSensor, SensorKind};
    use crate::testutil::scratch_dir;
    use async_trait::async_trait;
    use hatdash_core::{Result, SampleRecord};
    use std::collections::VecDeque;

    /// Replays a fixed script of poll outcomes, then repeats the last good reading.
    struct Scripted {
        script: VecDeque<Result<RawReading>>,
    }

    fn good(pressure: f64) -> Result<RawReading> {
        Ok(RawReading {
            temperature: 21.0,
            humidity: 40.0,
            pressure,
            ..Default::default()
        })
    }

    fn down() -> Result<RawReading> {
        Err(Error::SensorUnavailable("i2c bus fault".into()))
    }

    #[async_trait]
    impl SensorSource for Scripted {
        fn kind(&self) -> SensorKind {
            SensorKind::Hardware
        }

        async fn poll(&mut self) -> Result<RawReading> {
            self.script.pop_front().unwrap_or_else(|| good(1000.0))
        }
    }

    /// Never answers.
    struct Hung;

    #[async_trait]
    impl SensorSource for Hung {
        fn kind(&self) -> SensorKind {
            SensorKind::Hardware
        }

        async fn poll(&mut self) -> Result<RawReading> {
            std::future::pending().await
        }
    }

    type Harness = (
        AcquisitionLoop,
        SampleBus,
        mpsc::UnboundedSender<Command>,
        LatestSample,
    );

    fn build(source: Box<dyn SensorSource>, tag: &str) -> Harness {
        let config = Config {
            poll_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        let bus = SampleBus::new(64);
        let recorder = Recorder::new(scratch_dir(tag), 64);
        let (acq, tx, latest) = AcquisitionLoop::new(source, &config, bus.clone(), recorder);
        (acq, bus, tx, latest)
    }

    fn scripted(script: Vec<Result<RawReading>>) -> Box<dyn SensorSource> {
        Box::new(Scripted {
            script: script.into(),
        })
    }

    #[tokio::test]
    async fn test_sequence_strictly_increasing() {
        let mock = MockSensor::new(&MockConfig {
            seed: Some(1),
            ..Default::default()
        })
        .unwrap();
        let (mut acq, bus, _tx, latest) = build(Box::new(mock), "acq-seq");
        let mut sub = bus.subscribe();

        for _ in 0..20 {
            acq.tick().await.unwrap();
        }
        let seqs: Vec<_> = std::iter::from_fn(|| sub.try_recv()).map(|s| s.sequence).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
        assert_eq!(latest.borrow().as_ref().unwrap().sequence, 20);
        assert_eq!(acq.stats().stale, 0);
    }

    #[tokio::test]
    async fn test_three_faults_then_recovery() {
        let (mut acq, bus, _tx, _latest) = build(
            scripted(vec![good(1000.0), down(), down(), down(), good(990.0)]),
            "acq-faults",
        );
        let mut sub = bus.subscribe();
        for _ in 0..5 {
            acq.tick().await.unwrap();
        }

        let got: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        let seqs: Vec<_> = got.iter().map(|s| s.sequence).collect();
        let stale: Vec<_> = got.iter().map(|s| s.stale).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(stale, vec![false, true, true, true, false]);

        // stale samples carry the last good values
        for s in &got[1..4] {
            assert_eq!(s.raw, got[0].raw);
            assert_eq!(s.derived, got[0].derived);
        }
        assert_eq!(got[4].raw.pressure, 990.0);
        assert_eq!(acq.stats().sensor_faults, 3);
        assert_eq!(acq.stats().stale, 3);
    }

    #[tokio::test]
    async fn test_invalid_reading_reuses_previous_values() {
        let (mut acq, _bus, _tx, _latest) =
            build(scripted(vec![good(1013.25), good(0.0), good(-5.0)]), "acq-invalid");
        let first = acq.tick().await.unwrap();
        let second = acq.tick().await.unwrap();
        let third = acq.tick().await.unwrap();
        assert!(!first.stale);
        assert!(second.stale && third.stale);
        assert_eq!(second.derived, first.derived);
        assert!(third.derived.altitude.is_finite());
        assert_eq!(acq.stats().invalid_readings, 2);
    }

    #[tokio::test]
    async fn test_fault_before_first_reading_publishes_nothing() {
        let (mut acq, bus, _tx, latest) = build(scripted(vec![down(), good(1000.0)]), "acq-first");
        let mut sub = bus.subscribe();
        assert!(acq.tick().await.is_none());
        assert!(latest.borrow().is_none());
        assert!(sub.try_recv().is_none());

        let s = acq.tick().await.unwrap();
        assert_eq!(s.sequence, 1);
        assert!(!s.stale);
    }

    #[tokio::test]
    async fn test_poll_timeout_is_a_fault() {
        let (mut acq, _bus, _tx, _latest) = build(Box::new(Hung), "acq-hung");
        assert!(acq.tick().await.is_none());
        assert_eq!(acq.stats().sensor_faults, 1);
    }

    #[tokio::test]
    async fn test_recording_captures_exactly_what_was_published() {
        let (mut acq, bus, tx, _latest) = build(scripted(vec![]), "acq-rec");
        let mut sub = bus.subscribe();
        let mut status = acq.recorder().status();

        acq.tick().await.unwrap(); // before recording

        tx.send(Command::StartRecording).unwrap();
        acq.drain_commands();
        let path = status.borrow_and_update().file.clone().unwrap();
        for _ in 0..5 {
            acq.tick().await.unwrap();
        }
        tx.send(Command::StopRecording).unwrap();
        acq.drain_commands();
        acq.tick().await.unwrap(); // after recording

        // wait for the writer spawned by the stop command to finish
        let mut rows: Vec<SampleRecord> = Vec::new();
        for _ in 0..100 {
            if path.exists() {
                rows = csv::Reader::from_path(&path)
                    .unwrap()
                    .deserialize()
                    .collect::<std::result::Result<_, _>>()
                    .unwrap();
            }
            if rows.len() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let published: Vec<_> = std::iter::from_fn(|| sub.try_recv()).map(|s| s.record()).collect();
        assert_eq!(published.len(), 7);
        assert_eq!(rows, published[1..6].to_vec());
        assert!(!status.borrow().is_recording);
    }

    #[tokio::test]
    async fn test_stale_samples_not_recorded() {
        let (mut acq, _bus, tx, _latest) =
            build(scripted(vec![good(1000.0), down(), good(1001.0)]), "acq-rec-stale");
        let status = acq.recorder().status();
        tx.send(Command::ToggleRecording).unwrap();
        acq.drain_commands();
        let path = status.borrow().file.clone().unwrap();

        for _ in 0..3 {
            acq.tick().await.unwrap();
        }
        let flush = acq.recorder.stop().unwrap();
        assert_eq!(flush.wait().await.unwrap(), 2);

        let seqs: Vec<u64> = csv::Reader::from_path(&path)
            .unwrap()
            .deserialize::<SampleRecord>()
            .map(|r| r.unwrap().sequence)
            .collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    fn read_rows(path: &std::path::Path) -> Vec<SampleRecord> {
        csv::Reader::from_path(path)
            .unwrap()
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[tokio::test]
    async fn test_restart_within_one_drain_keeps_recording() {
        let (mut acq, _bus, tx, _latest) = build(scripted(vec![]), "acq-restart");
        let status = acq.recorder().status();

        for cmd in [
            Command::StartRecording,
            Command::StopRecording,
            Command::StartRecording,
        ] {
            tx.send(cmd).unwrap();
        }
        acq.drain_commands();
        let path = status.borrow().file.clone().unwrap();

        for _ in 0..3 {
            acq.tick().await.unwrap();
        }
        assert!(acq.recorder().is_recording());
        assert_eq!(acq.stats().log_faults, 0);
        assert!(status.borrow().error.is_none());

        assert_eq!(acq.recorder.stop().unwrap().wait().await.unwrap(), 3);
        let seqs: Vec<_> = read_rows(&path).iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        // the short-lived first session still leaves its (empty) file behind
        let dir = path.parent().unwrap();
        let mut files = 0;
        for _ in 0..100 {
            files = std::fs::read_dir(dir).unwrap().count();
            if files == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_toggle_after_writer_failure_starts_recording() {
        let logs = scratch_dir("acq-toggle").join("logs");
        std::fs::write(&logs, "x").unwrap();
        let bus = SampleBus::new(8);
        let (mut acq, tx, _latest) = AcquisitionLoop::new(
            scripted(vec![]),
            &Config::default(),
            bus,
            Recorder::new(&logs, 8),
        );
        let mut status = acq.recorder().status();

        tx.send(Command::StartRecording).unwrap();
        acq.drain_commands();
        status.wait_for(|s| s.error.is_some()).await.unwrap();
        assert!(!status.borrow().is_recording);
        assert!(!acq.recorder().is_recording());

        // viewer sees recording off and toggles it back on
        std::fs::remove_file(&logs).unwrap();
        tx.send(Command::ToggleRecording).unwrap();
        acq.drain_commands();
        assert!(acq.recorder().is_recording());
        let path = status.borrow().file.clone().unwrap();

        acq.tick().await.unwrap();
        assert_eq!(acq.recorder.stop().unwrap().wait().await.unwrap(), 1);
        assert_eq!(read_rows(&path).len(), 1);
        assert_eq!(acq.stats().log_faults, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (acq, bus, _tx, _latest) = build(scripted(vec![]), "acq-run");
        let mut sub = bus.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(acq.run(stop_rx));
        for expected in 1..=3 {
            assert_eq!(sub.recv().await.unwrap().sequence, expected);
        }
        stop_tx.send(true).unwrap();
        let stats = task.await.unwrap();
        assert!(stats.published >= 3);
        assert_eq!(stats.stale, 0);
    }
}
