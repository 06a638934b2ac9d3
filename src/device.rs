//! Device handle and configuration operations
//!
//! A [`DeviceHandle`] owns the bus for one physical MPU6050 together with the
//! configuration last written to it. Decoding always uses the ranges cached
//! here, so they must be applied through the handle.

use crate::bus::RegisterBus;
use crate::error::{Mpu6050Error, Result};
use crate::registers::*;
use crate::sample::{
    accel_to_g, accel_to_ms2, gyro_to_dps, temperature_to_celsius, FifoPacket, InstantReading, Sample,
    Vector3,
};
use crate::transport::Transport;
use log::{debug, info};
use std::thread;
use std::time::Duration;

/// Settling time after a device reset
const RESET_SETTLE: Duration = Duration::from_millis(50);

/// Six signed 16-bit calibration offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisOffsets {
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
}

impl AxisOffsets {
    /// Calibration of the bench unit the capture rig shipped with
    pub const FACTORY: AxisOffsets = AxisOffsets {
        accel_x: 2354,
        accel_y: 640,
        accel_z: 1779,
        gyro_x: 15,
        gyro_y: 46,
        gyro_z: -25,
    };

    pub fn get(&self, axis: Axis) -> i16 {
        match axis {
            Axis::AccelX => self.accel_x,
            Axis::AccelY => self.accel_y,
            Axis::AccelZ => self.accel_z,
            Axis::GyroX => self.gyro_x,
            Axis::GyroY => self.gyro_y,
            Axis::GyroZ => self.gyro_z,
        }
    }

    pub fn set(&mut self, axis: Axis, value: i16) {
        match axis {
            Axis::AccelX => self.accel_x = value,
            Axis::AccelY => self.accel_y = value,
            Axis::AccelZ => self.accel_z = value,
            Axis::GyroX => self.gyro_x = value,
            Axis::GyroY => self.gyro_y = value,
            Axis::GyroZ => self.gyro_z = value,
        }
    }
}

/// Unit for one-shot accelerometer reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccelUnit {
    #[default]
    MetersPerSecond2,
    G,
}

/// Full configuration written before a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub offsets: AxisOffsets,
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    pub filter_mode: FilterMode,
    pub sample_rate_divider: u8,
}

impl Default for DeviceConfig {
    /// Factory offsets, most sensitive ranges, 44/42 Hz filter, divider 10 (~91 Hz)
    fn default() -> Self {
        Self {
            offsets: AxisOffsets::FACTORY,
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps250,
            filter_mode: FilterMode::BW_44,
            sample_rate_divider: 10,
        }
    }
}

/// One physical MPU6050 and its applied configuration
pub struct DeviceHandle<T> {
    bus: RegisterBus<T>,
    accel_range: AccelRange,
    gyro_range: GyroRange,
    offsets: AxisOffsets,
    filter_mode: FilterMode,
    sample_rate_divider: u8,
}

impl<T: Transport> DeviceHandle<T> {
    /// Wrap a transport without touching the device.
    ///
    /// The cached configuration starts at the power-on defaults.
    pub fn new(transport: T, address: u8) -> Self {
        Self {
            bus: RegisterBus::new(transport, address),
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps250,
            offsets: AxisOffsets::default(),
            filter_mode: FilterMode::BW_260,
            sample_rate_divider: 0,
        }
    }

    /// Open the device at the default address, verify it and wake it up
    ///
    /// # Returns
    /// * `Ok(DeviceHandle)` - Awake, verified device
    /// * `Err(Mpu6050Error::InvalidDeviceId)` - Something other than an MPU6050 answered
    pub fn open(transport: T) -> Result<Self> {
        let mut handle = Self::new(transport, MPU6050_ADDRESS);
        handle.wake()?;
        handle.verify_identity()?;
        Ok(handle)
    }

    pub fn address(&self) -> u8 {
        self.bus.address()
    }

    /// Raw register access
    pub fn bus(&mut self) -> &mut RegisterBus<T> {
        &mut self.bus
    }

    pub fn into_transport(self) -> T {
        self.bus.into_transport()
    }

    pub fn accel_range(&self) -> AccelRange {
        self.accel_range
    }

    pub fn gyro_range(&self) -> GyroRange {
        self.gyro_range
    }

    pub fn offsets(&self) -> AxisOffsets {
        self.offsets
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.filter_mode
    }

    pub fn sample_rate_divider(&self) -> u8 {
        self.sample_rate_divider
    }

    /// Check WHO_AM_I
    pub fn verify_identity(&mut self) -> Result<()> {
        let who_am_i = self.bus.read_byte(REG_WHO_AM_I)?;
        if who_am_i != WHO_AM_I_VALUE {
            return Err(Mpu6050Error::InvalidDeviceId(who_am_i));
        }
        info!("Device verified: MPU6050 (WHO_AM_I: 0x{:02X})", who_am_i);
        Ok(())
    }

    /// Clear the sleep bit; the device powers up asleep
    pub fn wake(&mut self) -> Result<()> {
        self.bus.write_bit(REG_PWR_MGMT_1, PWR_MGMT1_SLEEP_BIT, false)
    }

    /// Full device reset, then the mandatory 50 ms settle.
    ///
    /// Registers return to power-on values, so the cached configuration does too.
    pub fn reset(&mut self) -> Result<()> {
        self.bus.write_bit(REG_PWR_MGMT_1, PWR_MGMT1_DEVICE_RESET_BIT, true)?;
        thread::sleep(RESET_SETTLE);
        self.accel_range = AccelRange::G2;
        self.gyro_range = GyroRange::Dps250;
        self.offsets = AxisOffsets::default();
        self.filter_mode = FilterMode::BW_260;
        self.sample_rate_divider = 0;
        info!("Device reset");
        Ok(())
    }

    /// Sample Rate = Gyro Output Rate / (1 + divider)
    pub fn set_sample_rate_divider(&mut self, divider: u8) -> Result<()> {
        self.bus.write_byte(REG_SMPLRT_DIV, divider)?;
        self.sample_rate_divider = divider;
        debug!("Sample rate divider {} -> {:.1} Hz", divider, self.effective_sample_rate_hz());
        Ok(())
    }

    /// Output rate with the cached filter mode and divider
    pub fn effective_sample_rate_hz(&self) -> f64 {
        self.filter_mode.gyro_output_rate_hz() as f64 / (1.0 + self.sample_rate_divider as f64)
    }

    /// Digital low-pass filter bandwidth
    ///
    /// ```text
    /// mode | accel BW (Hz) | gyro BW (Hz)
    ///   0  |     260       |     256
    ///   1  |     184       |     188
    ///   2  |      94       |      98
    ///   3  |      44       |      42
    ///   4  |      21       |      20
    ///   5  |      10       |      10
    ///   6  |       5       |       5
    /// ```
    pub fn set_filter_mode(&mut self, mode: FilterMode) -> Result<()> {
        self.bus.write_field(DLPF_CFG_FIELD, mode.code())?;
        self.filter_mode = mode;
        let (accel_bw, gyro_bw) = mode.bandwidth_hz();
        debug!("DLPF mode {}: accel {} Hz, gyro {} Hz", mode.code(), accel_bw, gyro_bw);
        Ok(())
    }

    pub fn set_accel_range(&mut self, range: AccelRange) -> Result<()> {
        self.bus.write_field(ACCEL_FS_SEL_FIELD, range.code())?;
        self.accel_range = range;
        debug!("Accel range ±{}g", range.full_scale_g());
        Ok(())
    }

    pub fn set_gyro_range(&mut self, range: GyroRange) -> Result<()> {
        self.bus.write_field(GYRO_FS_SEL_FIELD, range.code())?;
        self.gyro_range = range;
        debug!("Gyro range ±{}°/s", range.full_scale_dps());
        Ok(())
    }

    /// Range currently held in ACCEL_CONFIG
    pub fn read_accel_range(&mut self) -> Result<AccelRange> {
        AccelRange::try_from(self.bus.read_field(ACCEL_FS_SEL_FIELD)?)
    }

    /// Range currently held in GYRO_CONFIG
    pub fn read_gyro_range(&mut self) -> Result<GyroRange> {
        GyroRange::try_from(self.bus.read_field(GYRO_FS_SEL_FIELD)?)
    }

    /// Write one calibration offset, high byte first.
    ///
    /// Each byte is the low 8 bits of the two's-complement value
    /// (`value >> 8`, then `value`).
    pub fn set_axis_offset(&mut self, axis: Axis, value: i16) -> Result<()> {
        let (high_reg, low_reg) = axis.offset_registers();
        let [high, low] = value.to_be_bytes();
        self.bus.write_byte(high_reg, high)?;
        self.bus.write_byte(low_reg, low)?;
        self.offsets.set(axis, value);
        Ok(())
    }

    pub fn set_offsets(&mut self, offsets: &AxisOffsets) -> Result<()> {
        for axis in Axis::ALL {
            self.set_axis_offset(axis, offsets.get(axis))?;
        }
        Ok(())
    }

    /// Reconstruct an offset from its two registers
    pub fn read_axis_offset(&mut self, axis: Axis) -> Result<i16> {
        let (high_reg, _) = axis.offset_registers();
        self.bus.read_word(high_reg)
    }

    /// Write offsets, ranges, filter and divider in one pass
    pub fn apply_config(&mut self, config: &DeviceConfig) -> Result<()> {
        self.set_offsets(&config.offsets)?;
        self.set_accel_range(config.accel_range)?;
        self.set_gyro_range(config.gyro_range)?;
        self.set_filter_mode(config.filter_mode)?;
        self.set_sample_rate_divider(config.sample_rate_divider)?;
        info!(
            "Configuration applied: ±{}g, ±{}°/s, DLPF {}, {:.1} Hz",
            config.accel_range.full_scale_g(),
            config.gyro_range.full_scale_dps(),
            config.filter_mode.code(),
            self.effective_sample_rate_hz()
        );
        Ok(())
    }

    /// Current configuration as cached by the handle
    pub fn config(&self) -> DeviceConfig {
        DeviceConfig {
            offsets: self.offsets,
            accel_range: self.accel_range,
            gyro_range: self.gyro_range,
            filter_mode: self.filter_mode,
            sample_rate_divider: self.sample_rate_divider,
        }
    }

    /// Route sensor outputs into the FIFO, one bit per channel
    pub fn configure_fifo_channels(&mut self, channels: FifoChannels) -> Result<()> {
        for (bit, enabled) in channels.bits() {
            self.bus.write_bit(REG_FIFO_EN, bit, enabled)?;
        }
        Ok(())
    }

    pub fn fifo_channels(&mut self) -> Result<FifoChannels> {
        Ok(FifoChannels::from_register(self.bus.read_byte(REG_FIFO_EN)?))
    }

    /// Set the FIFO reset bit (clears the buffer, self-clearing)
    pub fn reset_fifo(&mut self) -> Result<()> {
        self.bus.write_bit(REG_USER_CTRL, USER_CTRL_FIFO_RESET_BIT, true)
    }

    pub fn enable_fifo(&mut self) -> Result<()> {
        self.bus.write_bit(REG_USER_CTRL, USER_CTRL_FIFO_EN_BIT, true)
    }

    pub fn disable_fifo(&mut self) -> Result<()> {
        self.bus.write_bit(REG_USER_CTRL, USER_CTRL_FIFO_EN_BIT, false)
    }

    /// Enable interrupt sources. No interrupt pin is serviced; overflow is
    /// observed by polling INT_STATUS.
    pub fn set_interrupt_sources(&mut self, sources: InterruptSources) -> Result<()> {
        self.bus.write_byte(REG_INT_ENABLE, sources.mask())
    }

    pub fn interrupt_sources(&mut self) -> Result<InterruptSources> {
        Ok(InterruptSources::from_mask(self.bus.read_byte(REG_INT_ENABLE)?))
    }

    /// Read INT_STATUS; the device clears it on read
    pub fn interrupt_status(&mut self) -> Result<u8> {
        self.bus.read_byte(REG_INT_STATUS)
    }

    pub fn interrupt_pin_config(&mut self) -> Result<u8> {
        self.bus.read_byte(REG_INT_PIN_CFG)
    }

    pub fn set_interrupt_pin_config(&mut self, value: u8) -> Result<()> {
        self.bus.write_byte(REG_INT_PIN_CFG, value)
    }

    pub fn user_control(&mut self) -> Result<u8> {
        self.bus.read_byte(REG_USER_CTRL)
    }

    /// Bytes currently held in the FIFO
    pub fn fifo_count(&mut self) -> Result<u16> {
        self.bus.read_word_unsigned(REG_FIFO_COUNTH)
    }

    /// Pop one 12-byte packet, one register read per byte
    pub fn read_fifo_packet(&mut self) -> Result<FifoPacket> {
        let mut bytes = [0u8; FifoPacket::SIZE];
        for byte in bytes.iter_mut() {
            *byte = self.bus.read_byte(REG_FIFO_R_W)?;
        }
        Ok(FifoPacket::from_bytes(&bytes))
    }

    fn read_axes(&mut self, regs: [u8; 3]) -> Result<[i16; 3]> {
        Ok([
            self.bus.read_word(regs[0])?,
            self.bus.read_word(regs[1])?,
            self.bus.read_word(regs[2])?,
        ])
    }

    /// Accelerometer, scaled by the range read back from the device
    pub fn read_accel(&mut self, unit: AccelUnit) -> Result<Vector3> {
        let raw = self.read_axes([REG_ACCEL_XOUT_H, REG_ACCEL_YOUT_H, REG_ACCEL_ZOUT_H])?;
        let range = self.read_accel_range()?;
        let [x, y, z] = raw.map(|v| match unit {
            AccelUnit::MetersPerSecond2 => accel_to_ms2(v, range),
            AccelUnit::G => accel_to_g(v, range),
        });
        Ok(Vector3::new(x, y, z))
    }

    /// Gyroscope in degrees/second, scaled by the range read back from the device
    pub fn read_gyro(&mut self) -> Result<Vector3> {
        let raw = self.read_axes([REG_GYRO_XOUT_H, REG_GYRO_YOUT_H, REG_GYRO_ZOUT_H])?;
        let range = self.read_gyro_range()?;
        let [x, y, z] = raw.map(|v| gyro_to_dps(v, range));
        Ok(Vector3::new(x, y, z))
    }

    /// Die temperature in °C
    pub fn read_temperature(&mut self) -> Result<f64> {
        Ok(temperature_to_celsius(self.bus.read_word(REG_TEMP_OUT_H)?))
    }

    /// One-shot accel, gyro and temperature read.
    ///
    /// Uses the same range-to-scale mapping as FIFO decoding.
    pub fn read_instant(&mut self) -> Result<InstantReading> {
        let accel_range = self.read_accel_range()?;
        let gyro_range = self.read_gyro_range()?;
        let accel = self.read_axes([REG_ACCEL_XOUT_H, REG_ACCEL_YOUT_H, REG_ACCEL_ZOUT_H])?;
        let gyro = self.read_axes([REG_GYRO_XOUT_H, REG_GYRO_YOUT_H, REG_GYRO_ZOUT_H])?;
        let temperature_c = self.read_temperature()?;

        let sample: Sample = FifoPacket { accel, gyro }.decode(0.0, accel_range, gyro_range);
        Ok(InstantReading {
            sample,
            temperature_c,
            accel_range,
            gyro_range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMpu6050;
    use approx::assert_abs_diff_eq;

    fn handle() -> (SimulatedMpu6050, DeviceHandle<SimulatedMpu6050>) {
        let sim = SimulatedMpu6050::new();
        let handle = DeviceHandle::open(sim.clone()).unwrap();
        (sim, handle)
    }

    #[test]
    fn test_open_wakes_and_verifies() {
        let (sim, _handle) = handle();
        assert_eq!(sim.register(REG_PWR_MGMT_1) & (1 << PWR_MGMT1_SLEEP_BIT), 0);
    }

    #[test]
    fn test_open_rejects_wrong_device() {
        let sim = SimulatedMpu6050::new();
        sim.set_register(REG_WHO_AM_I, 0x70);
        match DeviceHandle::open(sim) {
            Err(Mpu6050Error::InvalidDeviceId(0x70)) => {}
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_range_roundtrip_all_codes() {
        let (_sim, mut handle) = handle();
        for range in AccelRange::ALL {
            handle.set_accel_range(range).unwrap();
            assert_eq!(handle.read_accel_range().unwrap(), range);
            assert_eq!(handle.accel_range().scale_modifier(), range.scale_modifier());
        }
        for range in GyroRange::ALL {
            handle.set_gyro_range(range).unwrap();
            assert_eq!(handle.read_gyro_range().unwrap(), range);
            assert_eq!(handle.bus().read_bits(REG_GYRO_CONFIG, 4, 2).unwrap(), range.code());
        }
    }

    #[test]
    fn test_range_write_preserves_self_test_bits() {
        let (sim, mut handle) = handle();
        sim.set_register(REG_ACCEL_CONFIG, 0b1110_0000);
        handle.set_accel_range(AccelRange::G8).unwrap();
        assert_eq!(sim.register(REG_ACCEL_CONFIG), 0b1111_0000);
    }

    #[test]
    fn test_offset_roundtrip_full_range() {
        let (sim, mut handle) = handle();
        for axis in Axis::ALL {
            let (high_reg, low_reg) = axis.offset_registers();
            for value in i16::MIN..=i16::MAX {
                handle.set_axis_offset(axis, value).unwrap();
                assert_eq!(sim.register(high_reg), ((value >> 8) & 0xFF) as u8, "{:?} {}", axis, value);
                assert_eq!(sim.register(low_reg), (value & 0xFF) as u8, "{:?} {}", axis, value);
                assert_eq!(handle.read_axis_offset(axis).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_offsets_write_high_then_low() {
        let (sim, mut handle) = handle();
        let before = sim.writes().len();
        handle.set_offsets(&AxisOffsets::FACTORY).unwrap();
        let writes = &sim.writes()[before..];
        assert_eq!(writes.len(), 12);
        assert_eq!(writes[0], (REG_XA_OFFS_H, 0x09));
        assert_eq!(writes[1], (REG_XA_OFFS_L_TC, 0x32));
        assert_eq!(writes[10], (REG_ZG_OFFS_USRH, 0xFF));
        assert_eq!(writes[11], (REG_ZG_OFFS_USRL, 0xE7));
        assert_eq!(handle.offsets(), AxisOffsets::FACTORY);
    }

    #[test]
    fn test_sample_rate_follows_filter() {
        let (sim, mut handle) = handle();
        handle.set_filter_mode(FilterMode::BW_44).unwrap();
        handle.set_sample_rate_divider(10).unwrap();
        assert_eq!(sim.register(REG_SMPLRT_DIV), 10);
        assert_eq!(sim.register(REG_CONFIG) & 0x07, 3);
        assert_abs_diff_eq!(handle.effective_sample_rate_hz(), 1000.0 / 11.0);

        handle.set_filter_mode(FilterMode::BW_260).unwrap();
        handle.set_sample_rate_divider(7).unwrap();
        assert_abs_diff_eq!(handle.effective_sample_rate_hz(), 1000.0);
    }

    #[test]
    fn test_fifo_channels_and_control() {
        let (sim, mut handle) = handle();
        sim.set_register(REG_FIFO_EN, 1 << FIFO_EN_TEMP_BIT);
        handle.configure_fifo_channels(FifoChannels::ALL).unwrap();
        assert_eq!(handle.fifo_channels().unwrap(), FifoChannels::ALL);

        handle.enable_fifo().unwrap();
        sim.push_frame([0; 6]);
        assert_eq!(handle.fifo_count().unwrap(), 12);
        handle.reset_fifo().unwrap();
        assert_eq!(handle.fifo_count().unwrap(), 0);
        assert_ne!(handle.user_control().unwrap() & (1 << USER_CTRL_FIFO_EN_BIT), 0);

        handle.disable_fifo().unwrap();
        assert_eq!(handle.user_control().unwrap() & (1 << USER_CTRL_FIFO_EN_BIT), 0);
    }

    #[test]
    fn test_interrupt_configuration() {
        let (_sim, mut handle) = handle();
        handle.set_interrupt_sources(InterruptSources::OVERFLOW_ONLY).unwrap();
        assert_eq!(handle.interrupt_sources().unwrap(), InterruptSources::OVERFLOW_ONLY);
        handle.set_interrupt_pin_config(0x02).unwrap();
        assert_eq!(handle.interrupt_pin_config().unwrap(), 0x02);
    }

    #[test]
    fn test_read_fifo_packet_byte_order() {
        let (sim, mut handle) = handle();
        sim.push_fifo_bytes(&[0x01, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0x00, 0x0A, 0x00, 0x00, 0x80, 0x00]);
        let packet = handle.read_fifo_packet().unwrap();
        assert_eq!(packet.accel, [256, 1, -1]);
        assert_eq!(packet.gyro, [10, 0, -32768]);
    }

    #[test]
    fn test_read_instant_uses_device_range() {
        let (sim, mut handle) = handle();
        handle.set_accel_range(AccelRange::G4).unwrap();
        handle.set_gyro_range(GyroRange::Dps500).unwrap();
        sim.set_word(REG_ACCEL_ZOUT_H, 8192);
        sim.set_word(REG_GYRO_XOUT_H, -131);
        sim.set_word(REG_TEMP_OUT_H, 340);

        let reading = handle.read_instant().unwrap();
        assert_eq!(reading.accel_range, AccelRange::G4);
        assert_abs_diff_eq!(reading.sample.accel.z, 9.80665, epsilon = 1e-12);
        assert_abs_diff_eq!(reading.sample.gyro.x, -131.0 / 65.5, epsilon = 1e-12);
        assert_abs_diff_eq!(reading.temperature_c, 37.53, epsilon = 1e-9);

        let g = handle.read_accel(AccelUnit::G).unwrap();
        assert_abs_diff_eq!(g.z, 1.0);
    }

    #[test]
    fn test_apply_default_config() {
        let (sim, mut handle) = handle();
        handle.set_accel_range(AccelRange::G16).unwrap();
        handle.apply_config(&DeviceConfig::default()).unwrap();
        assert_eq!(handle.config(), DeviceConfig::default());
        assert_eq!(sim.register(REG_ACCEL_CONFIG) & 0x18, 0);
        assert_eq!(sim.register(REG_CONFIG) & 0x07, 3);
        assert_eq!(sim.register(REG_SMPLRT_DIV), 10);
        assert_eq!(handle.read_axis_offset(Axis::AccelX).unwrap(), 2354);
        assert_eq!(handle.read_axis_offset(Axis::GyroZ).unwrap(), -25);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let (sim, mut handle) = handle();
        handle.set_accel_range(AccelRange::G16).unwrap();
        handle.reset().unwrap();
        assert_eq!(handle.accel_range(), AccelRange::G2);
        assert_eq!(sim.register(REG_ACCEL_CONFIG), 0);
    }
}
