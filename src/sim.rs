//! In-memory MPU6050 for tests and hardware-free runs
//!
//! Models the register file, the FIFO (enable and reset bits in USER_CTRL,
//! channel selection in FIFO_EN, 1024-byte capacity with the overflow bit in
//! INT_STATUS), the device-reset bit and read-to-clear interrupt status.
//! Clones share state, so a test can keep one handle while the driver owns
//! another.

use crate::error::{Mpu6050Error, Result};
use crate::registers::*;
use crate::transport::Transport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

type RawFrame = [i16; 6];

enum PacketSource {
    /// Called once per FIFO count poll; `None` adds nothing
    PerPoll(Box<dyn FnMut() -> Option<RawFrame> + Send>),
    /// Emits frames at a fixed rate of wall time
    Paced {
        rate_hz: f64,
        started: Option<Instant>,
        emitted: u64,
        next: Box<dyn FnMut(u64) -> RawFrame + Send>,
    },
}

struct SimState {
    registers: [u8; 128],
    fifo: VecDeque<u8>,
    latched_count: u16,
    source: Option<PacketSource>,
    operations: u64,
    fail_after: Option<u64>,
    fifo_resets: u32,
    writes: Vec<(u8, u8)>,
}

impl SimState {
    fn power_on_registers() -> [u8; 128] {
        let mut registers = [0u8; 128];
        registers[REG_WHO_AM_I as usize] = WHO_AM_I_VALUE;
        registers[REG_PWR_MGMT_1 as usize] = 1 << PWR_MGMT1_SLEEP_BIT;
        registers
    }

    fn fifo_enabled(&self) -> bool {
        self.registers[REG_USER_CTRL as usize] & (1 << USER_CTRL_FIFO_EN_BIT) != 0
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.fifo.len() >= FIFO_CAPACITY as usize {
                // Oldest data is overwritten once the FIFO is full
                self.fifo.pop_front();
                self.registers[REG_INT_STATUS as usize] |= INT_FIFO_OFLOW;
            }
            self.fifo.push_back(b);
        }
    }

    /// Append one frame using the channels selected in FIFO_EN
    fn push_frame(&mut self, frame: RawFrame) {
        let fifo_en = self.registers[REG_FIFO_EN as usize];
        let channels = FifoChannels::from_register(fifo_en);
        let temp_raw = i16::from_be_bytes([
            self.registers[REG_TEMP_OUT_H as usize],
            self.registers[REG_TEMP_OUT_H as usize + 1],
        ]);

        let mut bytes = Vec::with_capacity(14);
        if channels.accel {
            for v in &frame[0..3] {
                bytes.extend_from_slice(&v.to_be_bytes());
            }
        }
        if fifo_en & (1 << FIFO_EN_TEMP_BIT) != 0 {
            bytes.extend_from_slice(&temp_raw.to_be_bytes());
        }
        for (enabled, v) in [channels.gyro_x, channels.gyro_y, channels.gyro_z].into_iter().zip(&frame[3..6]) {
            if enabled {
                bytes.extend_from_slice(&v.to_be_bytes());
            }
        }
        self.push_bytes(&bytes);
    }

    fn poll_source(&mut self) {
        if !self.fifo_enabled() {
            return;
        }
        let frames: Vec<RawFrame> = match self.source.as_mut() {
            None => Vec::new(),
            Some(PacketSource::PerPoll(next)) => next().into_iter().collect(),
            Some(PacketSource::Paced { rate_hz, started, emitted, next }) => {
                let start = *started.get_or_insert_with(Instant::now);
                let due = (start.elapsed().as_secs_f64() * *rate_hz) as u64;
                let mut frames = Vec::new();
                while *emitted < due {
                    frames.push(next(*emitted));
                    *emitted += 1;
                }
                frames
            }
        };
        for frame in frames {
            self.push_frame(frame);
        }
    }

    fn check_fault(&mut self, what: &str, reg: u8) -> Result<()> {
        self.operations += 1;
        match self.fail_after {
            Some(limit) if self.operations > limit => Err(Mpu6050Error::Transport(format!(
                "simulated bus fault on {} of register 0x{:02X}",
                what, reg
            ))),
            _ => Ok(()),
        }
    }
}

/// Simulated MPU6050 behind the [`Transport`] interface
#[derive(Clone)]
pub struct SimulatedMpu6050 {
    state: Arc<Mutex<SimState>>,
    address: u8,
}

impl Default for SimulatedMpu6050 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMpu6050 {
    /// Device at the default address in its power-on state (asleep)
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                registers: SimState::power_on_registers(),
                fifo: VecDeque::new(),
                latched_count: 0,
                source: None,
                operations: 0,
                fail_after: None,
                fifo_resets: 0,
                writes: Vec::new(),
            })),
            address: MPU6050_ADDRESS,
        }
    }

    /// Device resting flat: 1 g on Z, no rotation, frames paced at `rate_hz`
    pub fn at_rest(rate_hz: f64) -> Self {
        let sim = Self::new();
        sim.set_paced_source(rate_hz, |_| [0, 0, 16384, 0, 0, 0]);
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.lock().registers[reg as usize & 0x7F]
    }

    /// Set a register directly, bypassing write side effects
    pub fn set_register(&self, reg: u8, value: u8) {
        self.lock().registers[reg as usize & 0x7F] = value;
    }

    /// Set a big-endian word across two registers
    pub fn set_word(&self, reg: u8, value: i16) {
        let [high, low] = value.to_be_bytes();
        self.set_register(reg, high);
        self.set_register(reg.wrapping_add(1), low);
    }

    /// Frame source consulted on each FIFO count poll
    pub fn set_packet_source<F>(&self, source: F)
    where
        F: FnMut() -> Option<RawFrame> + Send + 'static,
    {
        self.lock().source = Some(PacketSource::PerPoll(Box::new(source)));
    }

    /// Frame source producing `rate_hz` frames per second of wall time
    pub fn set_paced_source<F>(&self, rate_hz: f64, source: F)
    where
        F: FnMut(u64) -> RawFrame + Send + 'static,
    {
        self.lock().source = Some(PacketSource::Paced {
            rate_hz,
            started: None,
            emitted: 0,
            next: Box::new(source),
        });
    }

    /// Queue raw bytes in the FIFO regardless of enable state
    pub fn push_fifo_bytes(&self, bytes: &[u8]) {
        self.lock().push_bytes(bytes);
    }

    /// Queue one accel + gyro frame in the 12-byte packet layout
    pub fn push_frame(&self, frame: RawFrame) {
        let bytes: Vec<u8> = frame.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.push_fifo_bytes(&bytes);
    }

    pub fn fifo_len(&self) -> usize {
        self.lock().fifo.len()
    }

    /// Number of FIFO resets requested through USER_CTRL
    pub fn fifo_reset_count(&self) -> u32 {
        self.lock().fifo_resets
    }

    /// Every register write in order
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.lock().writes.clone()
    }

    /// Let `operations` more bus operations succeed, then fail every one
    pub fn fail_after(&self, operations: u64) {
        let mut state = self.lock();
        state.fail_after = Some(state.operations + operations);
    }

    /// Stop injecting faults
    pub fn clear_fault(&self) {
        self.lock().fail_after = None;
    }
}

impl Transport for SimulatedMpu6050 {
    fn read_register(&mut self, device_address: u8, reg: u8) -> Result<u8> {
        if device_address != self.address {
            return Err(Mpu6050Error::Transport(format!("no ACK from address 0x{:02X}", device_address)));
        }
        let mut state = self.lock();
        state.check_fault("read", reg)?;

        let value = match reg {
            REG_FIFO_COUNTH => {
                state.poll_source();
                state.latched_count = state.fifo.len().min(FIFO_CAPACITY as usize) as u16;
                state.latched_count.to_be_bytes()[0]
            }
            REG_FIFO_COUNTL => state.latched_count.to_be_bytes()[1],
            REG_FIFO_R_W => state.fifo.pop_front().unwrap_or(0),
            REG_INT_STATUS => {
                let status = state.registers[REG_INT_STATUS as usize];
                state.registers[REG_INT_STATUS as usize] = 0;
                status
            }
            _ => state.registers[reg as usize & 0x7F],
        };
        Ok(value)
    }

    fn write_register(&mut self, device_address: u8, reg: u8, value: u8) -> Result<()> {
        if device_address != self.address {
            return Err(Mpu6050Error::Transport(format!("no ACK from address 0x{:02X}", device_address)));
        }
        let mut state = self.lock();
        state.check_fault("write", reg)?;
        state.writes.push((reg, value));

        match reg {
            REG_PWR_MGMT_1 if value & (1 << PWR_MGMT1_DEVICE_RESET_BIT) != 0 => {
                state.registers = SimState::power_on_registers();
                state.fifo.clear();
            }
            REG_USER_CTRL => {
                if value & (1 << USER_CTRL_FIFO_RESET_BIT) != 0 {
                    state.fifo.clear();
                    state.fifo_resets += 1;
                }
                // Reset bit self-clears
                state.registers[REG_USER_CTRL as usize] = value & !(1 << USER_CTRL_FIFO_RESET_BIT);
            }
            REG_FIFO_R_W => state.push_bytes(&[value]),
            _ => state.registers[reg as usize & 0x7F] = value,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_state() {
        let sim = SimulatedMpu6050::new();
        assert_eq!(sim.register(REG_WHO_AM_I), 0x68);
        assert_ne!(sim.register(REG_PWR_MGMT_1) & 0x40, 0);
    }

    #[test]
    fn test_fifo_count_and_drain() {
        let mut sim = SimulatedMpu6050::new();
        sim.push_frame([1, 2, 3, 4, 5, 6]);
        assert_eq!(sim.read_register(0x68, REG_FIFO_COUNTH).unwrap(), 0);
        assert_eq!(sim.read_register(0x68, REG_FIFO_COUNTL).unwrap(), 12);
        assert_eq!(sim.read_register(0x68, REG_FIFO_R_W).unwrap(), 0x00);
        assert_eq!(sim.read_register(0x68, REG_FIFO_R_W).unwrap(), 0x01);
        assert_eq!(sim.fifo_len(), 10);
    }

    #[test]
    fn test_overflow_sets_status_and_saturates() {
        let mut sim = SimulatedMpu6050::new();
        sim.push_fifo_bytes(&[0u8; 1030]);
        assert_eq!(sim.fifo_len(), 1024);
        assert_eq!(sim.read_register(0x68, REG_FIFO_COUNTH).unwrap(), 0x04);
        assert_eq!(sim.read_register(0x68, REG_FIFO_COUNTL).unwrap(), 0x00);
        assert_eq!(sim.read_register(0x68, REG_INT_STATUS).unwrap(), INT_FIFO_OFLOW);
        // Read-to-clear
        assert_eq!(sim.read_register(0x68, REG_INT_STATUS).unwrap(), 0);
    }

    #[test]
    fn test_source_respects_enable_and_channels() {
        let mut sim = SimulatedMpu6050::new();
        sim.set_packet_source(|| Some([1, 1, 1, 1, 1, 1]));
        sim.read_register(0x68, REG_FIFO_COUNTH).unwrap();
        assert_eq!(sim.fifo_len(), 0);

        sim.write_register(0x68, REG_FIFO_EN, 0x08).unwrap(); // accel only
        sim.write_register(0x68, REG_USER_CTRL, 1 << USER_CTRL_FIFO_EN_BIT).unwrap();
        sim.read_register(0x68, REG_FIFO_COUNTH).unwrap();
        assert_eq!(sim.fifo_len(), 6);
    }

    #[test]
    fn test_fifo_reset_bit_clears() {
        let mut sim = SimulatedMpu6050::new();
        sim.push_frame([0; 6]);
        sim.write_register(0x68, REG_USER_CTRL, 0x44).unwrap();
        assert_eq!(sim.fifo_len(), 0);
        assert_eq!(sim.register(REG_USER_CTRL), 0x40);
        assert_eq!(sim.fifo_reset_count(), 1);
    }

    #[test]
    fn test_wrong_address_nacks() {
        let mut sim = SimulatedMpu6050::new();
        assert!(sim.read_register(0x69, REG_WHO_AM_I).unwrap_err().is_transport());
    }

    #[test]
    fn test_injected_fault_until_cleared() {
        let mut sim = SimulatedMpu6050::new();
        sim.fail_after(1);
        assert_eq!(sim.read_register(0x68, REG_WHO_AM_I).unwrap(), 0x68);
        assert!(sim.read_register(0x68, REG_WHO_AM_I).unwrap_err().is_transport());
        assert!(sim.write_register(0x68, REG_PWR_MGMT_1, 0x00).unwrap_err().is_transport());
        assert_ne!(sim.register(REG_PWR_MGMT_1) & 0x40, 0);

        sim.clear_fault();
        assert_eq!(sim.read_register(0x68, REG_WHO_AM_I).unwrap(), 0x68);
        sim.write_register(0x68, REG_PWR_MGMT_1, 0x00).unwrap();
        assert_eq!(sim.register(REG_PWR_MGMT_1), 0x00);
    }
}
