//! FIFO drain loop: the streaming half of a capture session
//!
//! Each iteration reads the FIFO byte count and INT_STATUS, recovers from
//! overflow by resetting the FIFO, busy-polls until a packet is available,
//! then decodes whole 12-byte packets into the sink. The loop runs until the
//! shared stop signal is raised, by the controller or by the safety cutoff.

use crate::common::TimeKeeper;
use crate::device::{DeviceConfig, DeviceHandle};
use crate::error::{Mpu6050Error, Result};
use crate::registers::{FifoChannels, InterruptSources, FIFO_CAPACITY, FIFO_PACKET_SIZE, INT_FIFO_OFLOW};
use crate::sample::ELAPSED_SCALE;
use crate::sink::SampleSink;
use crate::transport::Transport;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

/// Default cutoff in elapsed units (six seconds of wall time)
pub const DEFAULT_SAFETY_LIMIT: f64 = 60.0;

/// Lifecycle of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Draining,
    Stopped,
}

/// What to do when the FIFO byte count is not a whole number of packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesyncPolicy {
    /// Discard the FIFO contents and keep capturing
    #[default]
    Resync,
    /// End the session with [`Mpu6050Error::FifoDesync`]
    Abort,
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// FIFO was reset; nothing decoded
    Overflow { count: u16, status: u8 },
    /// Misaligned count; FIFO was reset; nothing decoded
    Resynced { count: u16 },
    /// Whole packets decoded into the sink
    Drained { samples: usize },
}

/// Counters accumulated over a session
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CaptureStats {
    pub samples: u64,
    pub overflow_resets: u64,
    pub desync_events: u64,
    /// Elapsed value of the last emitted sample
    pub last_elapsed: f64,
    /// Whether the safety cutoff raised the stop signal
    pub safety_cutoff: bool,
}

/// Drain loop over a configured device
pub struct FifoCapture<'a, T> {
    device: &'a mut DeviceHandle<T>,
    stop_signal: &'a AtomicBool,
    clock: TimeKeeper,
    safety_limit: f64,
    desync_policy: DesyncPolicy,
    state: SessionState,
    stats: CaptureStats,
    configured: bool,
}

impl<'a, T: Transport> FifoCapture<'a, T> {
    pub fn new(device: &'a mut DeviceHandle<T>, stop_signal: &'a AtomicBool) -> Self {
        Self {
            device,
            stop_signal,
            clock: TimeKeeper::new(),
            safety_limit: DEFAULT_SAFETY_LIMIT,
            desync_policy: DesyncPolicy::default(),
            state: SessionState::Idle,
            stats: CaptureStats::default(),
            configured: false,
        }
    }

    /// Stop after the drain in which a sample's elapsed value exceeds `limit`
    pub fn with_safety_limit(mut self, limit: f64) -> Self {
        self.safety_limit = limit;
        self
    }

    pub fn with_desync_policy(mut self, policy: DesyncPolicy) -> Self {
        self.desync_policy = policy;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Write ranges, offsets, filter and divider before draining
    pub fn configure_device(&mut self, config: &DeviceConfig) -> Result<()> {
        self.state = SessionState::Configuring;
        self.device.apply_config(config)?;
        self.configured = true;
        Ok(())
    }

    /// Clear the FIFO, watch for overflow, route accel + gyro into the FIFO
    /// and enable it. Starts the session clock.
    ///
    /// # Returns
    /// * `Err(Mpu6050Error::InvalidConfiguration)` - [`FifoCapture::configure_device`]
    ///   has not succeeded yet; nothing is written
    pub fn prepare(&mut self) -> Result<()> {
        if !self.configured {
            return Err(Mpu6050Error::InvalidConfiguration(
                "device must be configured before the FIFO is enabled".to_string(),
            ));
        }
        self.state = SessionState::Configuring;
        debug!("Configuring FIFO");

        self.device.reset_fifo()?;
        self.device.set_interrupt_sources(InterruptSources::OVERFLOW_ONLY)?;
        self.device.configure_fifo_channels(FifoChannels::ALL)?;
        self.device.enable_fifo()?;

        self.clock = TimeKeeper::new();
        self.state = SessionState::Draining;
        Ok(())
    }

    fn recover_fifo(&mut self) -> Result<()> {
        self.device.reset_fifo()?;
        self.device.enable_fifo()
    }

    /// One loop iteration
    pub fn step(&mut self, sink: &mut dyn SampleSink) -> Result<StepOutcome> {
        let mut count = self.device.fifo_count()?;
        let status = self.device.interrupt_status()?;

        if count == FIFO_CAPACITY || status & INT_FIFO_OFLOW != 0 {
            self.recover_fifo()?;
            self.stats.overflow_resets += 1;
            warn!("OVERFLOW: FIFO count: {} Int: 0x{:02X}, FIFO reset", count, status);
            return Ok(StepOutcome::Overflow { count, status });
        }

        // Busy-poll: no sleep, so a packet is picked up as soon as it lands
        while count < FIFO_PACKET_SIZE {
            std::hint::spin_loop();
            count = self.device.fifo_count()?;
        }

        if count % FIFO_PACKET_SIZE != 0 {
            self.stats.desync_events += 1;
            match self.desync_policy {
                DesyncPolicy::Abort => return Err(Mpu6050Error::FifoDesync { count }),
                DesyncPolicy::Resync => {
                    warn!("FIFO count {} is not packet aligned, discarding FIFO contents", count);
                    self.recover_fifo()?;
                    return Ok(StepOutcome::Resynced { count });
                }
            }
        }

        let accel_range = self.device.accel_range();
        let gyro_range = self.device.gyro_range();
        let mut drained = 0;

        // One packet stays behind in the FIFO
        while count > FIFO_PACKET_SIZE {
            let packet = self.device.read_fifo_packet()?;
            let elapsed = self.clock.elapsed_scaled(ELAPSED_SCALE);
            let sample = packet.decode(elapsed, accel_range, gyro_range);
            debug!(
                "X: {:3.5} Y: {:3.5} Z: {:3.5}, GX: {:3.5}, GY: {:3.5}, GZ: {:3.5}",
                sample.accel.x, sample.accel.y, sample.accel.z, sample.gyro.x, sample.gyro.y, sample.gyro.z
            );

            sink.accept(&sample)?;
            self.stats.samples += 1;
            self.stats.last_elapsed = elapsed;
            drained += 1;
            count -= FIFO_PACKET_SIZE;

            if elapsed > self.safety_limit && !self.stop_signal.swap(true, Ordering::SeqCst) {
                self.stats.safety_cutoff = true;
                info!("Safety cutoff: elapsed {:.3} exceeds {}, stopping", elapsed, self.safety_limit);
            }
        }

        Ok(StepOutcome::Drained { samples: drained })
    }

    /// Loop until the stop signal is raised. Any error ends the session.
    ///
    /// Prepares the FIFO first if [`FifoCapture::prepare`] has not run.
    pub fn run(&mut self, sink: &mut dyn SampleSink) -> Result<CaptureStats> {
        if self.state != SessionState::Draining {
            self.prepare()?;
        }
        info!("Capture started");

        let result = self.drain_until_stopped(sink);
        self.state = SessionState::Stopped;
        result.map(|()| self.stats)
    }

    fn drain_until_stopped(&mut self, sink: &mut dyn SampleSink) -> Result<()> {
        while !self.stop_signal.load(Ordering::SeqCst) {
            self.step(sink)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::*;
    use crate::sim::SimulatedMpu6050;
    use crate::sink::MemorySink;
    use approx::assert_abs_diff_eq;

    fn configured() -> (SimulatedMpu6050, DeviceHandle<SimulatedMpu6050>) {
        let sim = SimulatedMpu6050::new();
        let mut device = DeviceHandle::open(sim.clone()).unwrap();
        device.set_accel_range(AccelRange::G2).unwrap();
        device.set_gyro_range(GyroRange::Dps250).unwrap();
        (sim, device)
    }

    #[test]
    fn test_prepare_routes_accel_and_gyro() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut capture = FifoCapture::new(&mut device, &stop);
        assert_eq!(capture.state(), SessionState::Idle);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();
        assert_eq!(capture.state(), SessionState::Draining);

        assert_eq!(sim.register(REG_FIFO_EN), 0x78);
        assert_eq!(sim.register(REG_INT_ENABLE), INT_FIFO_OFLOW);
        assert_ne!(sim.register(REG_USER_CTRL) & (1 << USER_CTRL_FIFO_EN_BIT), 0);
    }

    #[test]
    fn test_unconfigured_capture_never_enables_fifo() {
        let (sim, mut device) = configured();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop);

        assert!(matches!(capture.prepare(), Err(Mpu6050Error::InvalidConfiguration(_))));
        assert!(matches!(capture.run(&mut sink), Err(Mpu6050Error::InvalidConfiguration(_))));
        assert_ne!(capture.state(), SessionState::Draining);
        assert_eq!(sim.register(REG_USER_CTRL) & (1 << USER_CTRL_FIFO_EN_BIT), 0);
        assert_eq!(sim.register(REG_FIFO_EN), 0);
    }

    #[test]
    fn test_full_fifo_resets_without_decoding() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();

        sim.push_fifo_bytes(&[0x11; 1024]);
        let resets_before = sim.fifo_reset_count();
        let outcome = capture.step(&mut sink).unwrap();

        assert_eq!(outcome, StepOutcome::Overflow { count: 1024, status: 0 });
        assert_eq!(sim.fifo_reset_count(), resets_before + 1);
        assert!(sink.is_empty());
        assert_eq!(sim.fifo_len(), 0);
        assert_eq!(capture.stats().overflow_resets, 1);
    }

    #[test]
    fn test_overflow_status_bit_resets() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();

        sim.push_frame([1; 6]);
        sim.push_frame([1; 6]);
        sim.set_register(REG_INT_STATUS, INT_FIFO_OFLOW);
        let outcome = capture.step(&mut sink).unwrap();
        assert_eq!(outcome, StepOutcome::Overflow { count: 24, status: INT_FIFO_OFLOW });
        assert!(sink.is_empty());
    }

    #[test]
    fn test_drain_leaves_one_packet() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();

        sim.push_fifo_bytes(&[0x01, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0x00, 0x0A, 0x00, 0x00, 0x80, 0x00]);
        sim.push_frame([0, 0, 16384, 0, 0, 0]);
        sim.push_frame([0; 6]);

        let outcome = capture.step(&mut sink).unwrap();
        assert_eq!(outcome, StepOutcome::Drained { samples: 2 });
        assert_eq!(sim.fifo_len(), 12);

        let samples = sink.samples();
        assert_abs_diff_eq!(samples[0].accel.x, 256.0 / 16384.0 * 9.80665, epsilon = 1e-12);
        assert_abs_diff_eq!(samples[0].gyro.z, -32768.0 / 131.0, epsilon = 1e-9);
        assert_abs_diff_eq!(samples[1].accel.z, 9.80665, epsilon = 1e-12);
        assert!(samples[0].elapsed <= samples[1].elapsed);
    }

    #[test]
    fn test_decode_uses_configured_range() {
        let (sim, mut device) = configured();
        device.set_accel_range(AccelRange::G8).unwrap();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();

        sim.push_frame([4096, 0, 0, 0, 0, 0]);
        sim.push_frame([0; 6]);
        capture.step(&mut sink).unwrap();
        assert_abs_diff_eq!(sink.samples()[0].accel.x, 9.80665, epsilon = 1e-12);
    }

    #[test]
    fn test_busy_poll_waits_for_packet() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();

        // Nothing for the first few polls, then one frame per poll
        let mut polls = 0;
        sim.set_packet_source(move || {
            polls += 1;
            (polls > 3).then_some([0, 0, 100, 0, 0, 0])
        });

        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();
        // First poll that sees 12 bytes leaves the packet in place
        assert_eq!(capture.step(&mut sink).unwrap(), StepOutcome::Drained { samples: 0 });
        assert_eq!(capture.step(&mut sink).unwrap(), StepOutcome::Drained { samples: 1 });
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_misaligned_count_resyncs() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();

        sim.push_fifo_bytes(&[0u8; 30]);
        let outcome = capture.step(&mut sink).unwrap();
        assert_eq!(outcome, StepOutcome::Resynced { count: 30 });
        assert!(sink.is_empty());
        assert_eq!(sim.fifo_len(), 0);
        assert_eq!(capture.stats().desync_events, 1);
    }

    #[test]
    fn test_misaligned_count_aborts_under_abort_policy() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop).with_desync_policy(DesyncPolicy::Abort);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();

        sim.push_fifo_bytes(&[0u8; 13]);
        match capture.step(&mut sink) {
            Err(Mpu6050Error::FifoDesync { count: 13 }) => {}
            other => panic!("expected desync error, got {:?}", other),
        }
    }

    #[test]
    fn test_safety_cutoff_finishes_drain_then_stops() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        let mut capture = FifoCapture::new(&mut device, &stop).with_safety_limit(-1.0);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();

        for _ in 0..4 {
            sim.push_frame([0; 6]);
        }
        let stats = capture.run(&mut sink).unwrap();

        // The in-flight drain completes, nothing afterwards
        assert!(stats.safety_cutoff);
        assert_eq!(stats.samples, 3);
        assert_eq!(sink.len(), 3);
        assert!(stop.load(Ordering::SeqCst));
        assert_eq!(capture.state(), SessionState::Stopped);
    }

    #[test]
    fn test_raised_stop_signal_prevents_decoding() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(true);
        let mut sink = MemorySink::new();
        sim.push_frame([0; 6]);
        sim.push_frame([0; 6]);

        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        let stats = capture.run(&mut sink).unwrap();
        assert_eq!(stats.samples, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_bus_error_ends_run() {
        let (sim, mut device) = configured();
        let config = device.config();
        let stop = AtomicBool::new(false);
        let mut sink = MemorySink::new();
        sim.set_packet_source(|| Some([0; 6]));

        let mut capture = FifoCapture::new(&mut device, &stop);
        capture.configure_device(&config).unwrap();
        capture.prepare().unwrap();
        sim.fail_after(40);
        let err = capture.run(&mut sink).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(capture.state(), SessionState::Stopped);
    }
}
