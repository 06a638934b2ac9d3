//! Decoded samples and raw-to-physical conversion

use crate::registers::{AccelRange, GyroRange, FIFO_PACKET_SIZE};

/// Standard gravity in m/s²
pub const GRAVITY_MS2: f64 = 9.80665;

/// Sample timestamps are wall-clock seconds multiplied by this factor
pub const ELAPSED_SCALE: f64 = 10.0;

/// Three-axis value in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One decoded measurement.
///
/// `elapsed` is `(now - session_start) * 10`, so a value of 60 corresponds
/// to six seconds of wall time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub elapsed: f64,
    /// m/s²
    pub accel: Vector3,
    /// degrees/second
    pub gyro: Vector3,
}

/// Raw counts to m/s²
pub fn accel_to_ms2(raw: i16, range: AccelRange) -> f64 {
    raw as f64 / range.scale_modifier() * GRAVITY_MS2
}

/// Raw counts to g
pub fn accel_to_g(raw: i16, range: AccelRange) -> f64 {
    raw as f64 / range.scale_modifier()
}

/// Raw counts to degrees/second
pub fn gyro_to_dps(raw: i16, range: GyroRange) -> f64 {
    raw as f64 / range.scale_modifier()
}

/// Raw TEMP_OUT to degrees Celsius (register map rev 4.2, p.30)
pub fn temperature_to_celsius(raw: i16) -> f64 {
    raw as f64 / 340.0 + 36.53
}

/// One 12-byte FIFO frame: accel x/y/z then gyro x/y/z, big-endian i16
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoPacket {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
}

impl FifoPacket {
    pub const SIZE: usize = FIFO_PACKET_SIZE as usize;

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let word = |i: usize| i16::from_be_bytes([bytes[i], bytes[i + 1]]);
        Self {
            accel: [word(0), word(2), word(4)],
            gyro: [word(6), word(8), word(10)],
        }
    }

    /// Convert with the active ranges
    pub fn decode(&self, elapsed: f64, accel_range: AccelRange, gyro_range: GyroRange) -> Sample {
        let [ax, ay, az] = self.accel.map(|raw| accel_to_ms2(raw, accel_range));
        let [gx, gy, gz] = self.gyro.map(|raw| gyro_to_dps(raw, gyro_range));
        Sample {
            elapsed,
            accel: Vector3::new(ax, ay, az),
            gyro: Vector3::new(gx, gy, gz),
        }
    }
}

/// One-shot register reading, independent of any capture session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstantReading {
    /// Sample with `elapsed` set to zero
    pub sample: Sample,
    pub temperature_c: f64,
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
}
