//! Capture session lifecycle
//!
//! The controller owns the device. Starting a session moves the device into a
//! dedicated worker thread that configures it and runs the FIFO drain loop;
//! joining the worker hands it back. Only the stop flag is shared between the
//! worker and the caller.

use crate::device::{DeviceConfig, DeviceHandle};
use crate::error::{Mpu6050Error, Result};
use crate::fifo::{CaptureStats, DesyncPolicy, FifoCapture, DEFAULT_SAFETY_LIMIT};
use crate::sample::InstantReading;
use crate::sink::{CsvSink, SampleSink, SinkGuard};
use crate::transport::Transport;
use log::{error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const WORKER_NAME: &str = "mpu6050-capture";

/// Everything a capture session needs besides the sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub device: DeviceConfig,
    /// Elapsed units (seconds × 10) after which a session stops itself
    pub safety_limit: f64,
    pub desync_policy: DesyncPolicy,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            safety_limit: DEFAULT_SAFETY_LIMIT,
            desync_policy: DesyncPolicy::Resync,
        }
    }
}

/// Why a session ended
#[derive(Debug)]
pub enum EndReason {
    /// Stop was requested
    Stopped,
    /// Elapsed time passed the safety limit
    SafetyCutoff,
    /// Bus, sink or desync error
    Failed(Mpu6050Error),
}

/// Summary of a finished session
#[derive(Debug)]
pub struct CaptureReport {
    pub samples: u64,
    pub overflow_resets: u64,
    pub desync_events: u64,
    /// Elapsed value of the last emitted sample
    pub final_elapsed: f64,
    pub end_reason: EndReason,
}

impl CaptureReport {
    fn new(stats: CaptureStats, end_reason: EndReason) -> Self {
        Self {
            samples: stats.samples,
            overflow_resets: stats.overflow_resets,
            desync_events: stats.desync_events,
            final_elapsed: stats.last_elapsed,
            end_reason,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.end_reason, EndReason::Failed(_))
    }
}

struct Session<T> {
    stop_signal: Arc<AtomicBool>,
    worker: JoinHandle<(DeviceHandle<T>, CaptureReport)>,
}

/// Runs at most one capture session at a time on one device
pub struct CaptureController<T> {
    device: Option<DeviceHandle<T>>,
    session: Option<Session<T>>,
    settings: CaptureSettings,
    last_report: Option<CaptureReport>,
}

impl<T: Transport + 'static> CaptureController<T> {
    pub fn new(device: DeviceHandle<T>, settings: CaptureSettings) -> Self {
        Self {
            device: Some(device),
            session: None,
            settings,
            last_report: None,
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Store new settings and write the device part to the device.
    ///
    /// Sessions apply the stored settings again before draining, so calling
    /// this is only required to change them.
    ///
    /// # Returns
    /// * `Err(Mpu6050Error::DeviceBusy)` - A session is running; nothing changed
    pub fn configure(&mut self, settings: CaptureSettings) -> Result<()> {
        let device = self.idle_device()?;
        device.apply_config(&settings.device)?;
        self.settings = settings;
        Ok(())
    }

    /// Start a session writing into the sink returned by `open_sink`.
    ///
    /// A running session is stopped and joined first, so its sink is closed
    /// before `open_sink` is called.
    pub fn start<S, F>(&mut self, open_sink: F) -> Result<()>
    where
        S: SampleSink + 'static,
        F: FnOnce() -> Result<S>,
    {
        if self.session.is_some() {
            info!("Previous capture session exists, stopping it");
            self.wait()?;
        }
        self.idle_device()?;
        let sink = open_sink()?;
        let mut device = self.device.take().ok_or(Mpu6050Error::SessionPanicked)?;

        let stop_signal = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop_signal);
        let settings = self.settings;

        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let report = run_session(&mut device, sink, &settings, &worker_stop);
                (device, report)
            })?;

        self.session = Some(Session { stop_signal, worker });
        Ok(())
    }

    /// Start a session into a new timestamped CSV file inside `dir`
    pub fn start_csv<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref().to_path_buf();
        self.start(move || CsvSink::in_directory(dir))
    }

    /// Request the running session to stop. Returns immediately; a no-op
    /// when idle.
    pub fn stop(&self) {
        if let Some(session) = &self.session {
            session.stop_signal.store(true, Ordering::SeqCst);
        }
    }

    /// Stop flag of the running session, for signal handlers
    pub fn stop_handle(&self) -> Option<Arc<AtomicBool>> {
        self.session.as_ref().map(|s| Arc::clone(&s.stop_signal))
    }

    /// Whether a session has been started and its worker is still running
    pub fn is_capturing(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.worker.is_finished())
    }

    /// Stop and join the running session.
    ///
    /// # Returns
    /// * `Ok(Some(report))` - The session that just ended
    /// * `Ok(None)` - No session was running
    /// * `Err(Mpu6050Error::SessionPanicked)` - The worker died; the device is lost
    pub fn wait(&mut self) -> Result<Option<&CaptureReport>> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        session.stop_signal.store(true, Ordering::SeqCst);

        let (device, report) = session.worker.join().map_err(|_| {
            error!("Capture worker panicked");
            Mpu6050Error::SessionPanicked
        })?;
        self.device = Some(device);
        Ok(Some(self.last_report.insert(report)))
    }

    /// Join a session that has ended on its own (safety cutoff or error)
    /// without waiting for one that is still running.
    pub fn poll_finished(&mut self) -> Result<Option<&CaptureReport>> {
        if self.session.as_ref().is_some_and(|s| s.worker.is_finished()) {
            self.wait()
        } else {
            Ok(None)
        }
    }

    pub fn last_report(&self) -> Option<&CaptureReport> {
        self.last_report.as_ref()
    }

    /// One-shot read of accel, gyro and temperature
    ///
    /// Only available between sessions. While a session is draining, the
    /// worker thread owns the device and its bus, so this does not read
    /// alongside the capture; it returns `DeviceBusy` instead. A session that
    /// has already ended on its own is joined first, and its report is kept
    /// in [`CaptureController::last_report`].
    ///
    /// # Returns
    /// * `Err(Mpu6050Error::DeviceBusy)` - A session is still running
    pub fn read_instant(&mut self) -> Result<InstantReading> {
        self.idle_device()?.read_instant()
    }

    /// Access the device between sessions
    pub fn device(&mut self) -> Result<&mut DeviceHandle<T>> {
        self.idle_device()
    }

    /// Stop any session and give the device back
    pub fn into_device(mut self) -> Result<DeviceHandle<T>> {
        self.wait()?;
        self.device.take().ok_or(Mpu6050Error::SessionPanicked)
    }

    /// Device if no session is running. A finished worker is joined first.
    fn idle_device(&mut self) -> Result<&mut DeviceHandle<T>> {
        self.poll_finished()?;
        if self.session.is_some() {
            return Err(Mpu6050Error::DeviceBusy);
        }
        self.device.as_mut().ok_or(Mpu6050Error::SessionPanicked)
    }
}

impl<T> Drop for CaptureController<T> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop_signal.store(true, Ordering::SeqCst);
            if session.worker.join().is_err() {
                error!("Capture worker panicked during shutdown");
            }
        }
    }
}

/// Body of the worker thread. The sink is closed before this returns.
fn run_session<T: Transport, S: SampleSink>(
    device: &mut DeviceHandle<T>,
    sink: S,
    settings: &CaptureSettings,
    stop_signal: &AtomicBool,
) -> CaptureReport {
    let mut guard = SinkGuard::new(sink);
    let mut capture = FifoCapture::new(device, stop_signal)
        .with_safety_limit(settings.safety_limit)
        .with_desync_policy(settings.desync_policy);

    let result = configure_and_drain(&mut capture, &settings.device, guard.sink());
    let stats = capture.stats();
    let close_result = guard.close();

    let end_reason = match (result, close_result) {
        (Err(e), _) | (Ok(()), Err(e)) => {
            error!("Capture session failed: {}", e);
            EndReason::Failed(e)
        }
        (Ok(()), Ok(())) if stats.safety_cutoff => EndReason::SafetyCutoff,
        (Ok(()), Ok(())) => EndReason::Stopped,
    };

    if stats.overflow_resets > 0 || stats.desync_events > 0 {
        warn!(
            "Session had {} overflow resets and {} desync events",
            stats.overflow_resets, stats.desync_events
        );
    }
    info!(
        "Capture ended ({:?}): {} samples, final elapsed {:.3}",
        end_reason, stats.samples, stats.last_elapsed
    );
    CaptureReport::new(stats, end_reason)
}

fn configure_and_drain<T: Transport>(
    capture: &mut FifoCapture<'_, T>,
    config: &DeviceConfig,
    sink: &mut dyn SampleSink,
) -> Result<()> {
    capture.configure_device(config)?;
    capture.prepare()?;
    capture.run(sink).map(|_| ())
}
