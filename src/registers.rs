//! MPU6050 register map and typed configuration codes

use crate::error::{Mpu6050Error, Result};

/// Default I2C address (AD0 low)
pub const MPU6050_ADDRESS: u8 = 0x68;

/// Expected WHO_AM_I value
pub const WHO_AM_I_VALUE: u8 = 0x68;

// Calibration offset registers (high byte, low byte) per axis
pub const REG_XA_OFFS_H: u8 = 0x06;
pub const REG_XA_OFFS_L_TC: u8 = 0x07;
pub const REG_YA_OFFS_H: u8 = 0x08;
pub const REG_YA_OFFS_L_TC: u8 = 0x09;
pub const REG_ZA_OFFS_H: u8 = 0x0A;
pub const REG_ZA_OFFS_L_TC: u8 = 0x0B;
pub const REG_XG_OFFS_USRH: u8 = 0x13;
pub const REG_XG_OFFS_USRL: u8 = 0x14;
pub const REG_YG_OFFS_USRH: u8 = 0x15;
pub const REG_YG_OFFS_USRL: u8 = 0x16;
pub const REG_ZG_OFFS_USRH: u8 = 0x17;
pub const REG_ZG_OFFS_USRL: u8 = 0x18;

pub const REG_SMPLRT_DIV: u8 = 0x19; // Sample rate divider
pub const REG_CONFIG: u8 = 0x1A; // DLPF configuration
pub const REG_GYRO_CONFIG: u8 = 0x1B;
pub const REG_ACCEL_CONFIG: u8 = 0x1C;
pub const REG_FIFO_EN: u8 = 0x23; // Sensor outputs routed to FIFO
pub const REG_INT_PIN_CFG: u8 = 0x37;
pub const REG_INT_ENABLE: u8 = 0x38;
pub const REG_INT_STATUS: u8 = 0x3A;

pub const REG_ACCEL_XOUT_H: u8 = 0x3B;
pub const REG_ACCEL_YOUT_H: u8 = 0x3D;
pub const REG_ACCEL_ZOUT_H: u8 = 0x3F;
pub const REG_TEMP_OUT_H: u8 = 0x41;
pub const REG_GYRO_XOUT_H: u8 = 0x43;
pub const REG_GYRO_YOUT_H: u8 = 0x45;
pub const REG_GYRO_ZOUT_H: u8 = 0x47;

pub const REG_USER_CTRL: u8 = 0x6A; // FIFO enable/reset
pub const REG_PWR_MGMT_1: u8 = 0x6B;
pub const REG_FIFO_COUNTH: u8 = 0x72; // FIFO count high byte, low byte follows
pub const REG_FIFO_COUNTL: u8 = 0x73;
pub const REG_FIFO_R_W: u8 = 0x74;
pub const REG_WHO_AM_I: u8 = 0x75;

// PWR_MGMT_1 bits
pub const PWR_MGMT1_DEVICE_RESET_BIT: u8 = 7;
pub const PWR_MGMT1_SLEEP_BIT: u8 = 6;

// USER_CTRL bits
pub const USER_CTRL_FIFO_EN_BIT: u8 = 6;
pub const USER_CTRL_FIFO_RESET_BIT: u8 = 2;

// FIFO_EN bits
pub const FIFO_EN_TEMP_BIT: u8 = 7;
pub const FIFO_EN_XG_BIT: u8 = 6;
pub const FIFO_EN_YG_BIT: u8 = 5;
pub const FIFO_EN_ZG_BIT: u8 = 4;
pub const FIFO_EN_ACCEL_BIT: u8 = 3;

// INT_ENABLE / INT_STATUS bits
pub const INT_DATA_RDY: u8 = 0x01;
pub const INT_I2C_MST: u8 = 0x08;
pub const INT_FIFO_OFLOW: u8 = 0x10;

/// FIFO packet size in bytes (accel + gyro, no temperature)
pub const FIFO_PACKET_SIZE: u16 = 12;

/// FIFO capacity in bytes; a count at this value means data was lost
pub const FIFO_CAPACITY: u16 = 1024;

/// Sub-byte field inside a register.
///
/// `bit_start` is the most significant bit of the field, so a field with
/// `bit_start = 4, length = 2` covers bits 4 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub address: u8,
    pub bit_start: u8,
    pub length: u8,
}

impl RegisterField {
    pub const fn new(address: u8, bit_start: u8, length: u8) -> Self {
        Self { address, bit_start, length }
    }

    /// Position of the field's least significant bit
    pub fn shift(&self) -> u8 {
        self.bit_start + 1 - self.length
    }

    /// In-register mask: `((1 << length) - 1) << (bit_start - length + 1)`
    pub fn mask(&self) -> u8 {
        let width = ((1u16 << self.length) - 1) as u8;
        width << self.shift()
    }

    /// Reject fields that do not fit in one byte
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 || self.bit_start > 7 || self.length > self.bit_start + 1 {
            return Err(Mpu6050Error::InvalidConfiguration(format!(
                "field bit_start={} length={} does not fit in a byte",
                self.bit_start, self.length
            )));
        }
        Ok(())
    }
}

pub const DLPF_CFG_FIELD: RegisterField = RegisterField::new(REG_CONFIG, 2, 3);
pub const ACCEL_FS_SEL_FIELD: RegisterField = RegisterField::new(REG_ACCEL_CONFIG, 4, 2);
pub const GYRO_FS_SEL_FIELD: RegisterField = RegisterField::new(REG_GYRO_CONFIG, 4, 2);

/// Accelerometer full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccelRange {
    #[default]
    G2 = 0,
    G4 = 1,
    G8 = 2,
    G16 = 3,
}

impl AccelRange {
    pub const ALL: [AccelRange; 4] = [AccelRange::G2, AccelRange::G4, AccelRange::G8, AccelRange::G16];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// LSB per g
    pub fn scale_modifier(self) -> f64 {
        match self {
            AccelRange::G2 => 16384.0,
            AccelRange::G4 => 8192.0,
            AccelRange::G8 => 4096.0,
            AccelRange::G16 => 2048.0,
        }
    }

    /// Full-scale value in g
    pub fn full_scale_g(self) -> u16 {
        2 << self.code()
    }

    /// Range with the given full scale (2, 4, 8 or 16 g)
    pub fn from_full_scale_g(g: u16) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.full_scale_g() == g)
            .ok_or_else(|| Mpu6050Error::InvalidConfiguration(format!("accel range ±{}g", g)))
    }
}

impl TryFrom<u8> for AccelRange {
    type Error = Mpu6050Error;

    fn try_from(code: u8) -> Result<Self> {
        AccelRange::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| Mpu6050Error::InvalidConfiguration(format!("accel range code {}", code)))
    }
}

/// Gyroscope full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GyroRange {
    #[default]
    Dps250 = 0,
    Dps500 = 1,
    Dps1000 = 2,
    Dps2000 = 3,
}

impl GyroRange {
    pub const ALL: [GyroRange; 4] = [
        GyroRange::Dps250,
        GyroRange::Dps500,
        GyroRange::Dps1000,
        GyroRange::Dps2000,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// LSB per degree/second
    pub fn scale_modifier(self) -> f64 {
        match self {
            GyroRange::Dps250 => 131.0,
            GyroRange::Dps500 => 65.5,
            GyroRange::Dps1000 => 32.8,
            GyroRange::Dps2000 => 16.4,
        }
    }

    /// Full-scale value in degrees/second
    pub fn full_scale_dps(self) -> u16 {
        250 << self.code()
    }

    /// Range with the given full scale (250, 500, 1000 or 2000 °/s)
    pub fn from_full_scale_dps(dps: u16) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.full_scale_dps() == dps)
            .ok_or_else(|| Mpu6050Error::InvalidConfiguration(format!("gyro range ±{}°/s", dps)))
    }
}

impl TryFrom<u8> for GyroRange {
    type Error = Mpu6050Error;

    fn try_from(code: u8) -> Result<Self> {
        GyroRange::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| Mpu6050Error::InvalidConfiguration(format!("gyro range code {}", code)))
    }
}

/// Digital low-pass filter setting (DLPF_CFG 0..=6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterMode(u8);

impl FilterMode {
    /// 260 Hz accel / 256 Hz gyro, filter effectively off
    pub const BW_260: FilterMode = FilterMode(0);
    pub const BW_184: FilterMode = FilterMode(1);
    pub const BW_94: FilterMode = FilterMode(2);
    pub const BW_44: FilterMode = FilterMode(3);
    pub const BW_21: FilterMode = FilterMode(4);
    pub const BW_10: FilterMode = FilterMode(5);
    pub const BW_5: FilterMode = FilterMode(6);

    const ACCEL_BANDWIDTH_HZ: [u16; 7] = [260, 184, 94, 44, 21, 10, 5];
    const GYRO_BANDWIDTH_HZ: [u16; 7] = [256, 188, 98, 42, 20, 10, 5];

    pub fn code(self) -> u8 {
        self.0
    }

    /// (accelerometer, gyroscope) bandwidth in Hz
    pub fn bandwidth_hz(self) -> (u16, u16) {
        let i = self.0 as usize;
        (Self::ACCEL_BANDWIDTH_HZ[i], Self::GYRO_BANDWIDTH_HZ[i])
    }

    /// Gyroscope output rate feeding the sample rate divider
    pub fn gyro_output_rate_hz(self) -> u32 {
        if self.0 == 0 {
            8000
        } else {
            1000
        }
    }
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::BW_44
    }
}

impl TryFrom<u8> for FilterMode {
    type Error = Mpu6050Error;

    fn try_from(code: u8) -> Result<Self> {
        if code > 6 {
            return Err(Mpu6050Error::InvalidConfiguration(format!(
                "filter mode {} (expected 0-6)",
                code
            )));
        }
        Ok(FilterMode(code))
    }
}

/// Calibrated axis with a pair of offset registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    AccelX,
    AccelY,
    AccelZ,
    GyroX,
    GyroY,
    GyroZ,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::AccelX,
        Axis::AccelY,
        Axis::AccelZ,
        Axis::GyroX,
        Axis::GyroY,
        Axis::GyroZ,
    ];

    /// (high, low) offset register addresses
    pub fn offset_registers(self) -> (u8, u8) {
        match self {
            Axis::AccelX => (REG_XA_OFFS_H, REG_XA_OFFS_L_TC),
            Axis::AccelY => (REG_YA_OFFS_H, REG_YA_OFFS_L_TC),
            Axis::AccelZ => (REG_ZA_OFFS_H, REG_ZA_OFFS_L_TC),
            Axis::GyroX => (REG_XG_OFFS_USRH, REG_XG_OFFS_USRL),
            Axis::GyroY => (REG_YG_OFFS_USRH, REG_YG_OFFS_USRL),
            Axis::GyroZ => (REG_ZG_OFFS_USRH, REG_ZG_OFFS_USRL),
        }
    }
}

/// Sensor outputs written into the FIFO.
///
/// Temperature and self-test outputs are never routed to the FIFO for
/// streaming capture, so they have no field here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FifoChannels {
    pub accel: bool,
    pub gyro_x: bool,
    pub gyro_y: bool,
    pub gyro_z: bool,
}

impl FifoChannels {
    /// Accelerometer and all three gyro axes: the 12-byte packet layout
    pub const ALL: FifoChannels = FifoChannels {
        accel: true,
        gyro_x: true,
        gyro_y: true,
        gyro_z: true,
    };

    /// (FIFO_EN bit, enabled) pairs
    pub fn bits(&self) -> [(u8, bool); 4] {
        [
            (FIFO_EN_ACCEL_BIT, self.accel),
            (FIFO_EN_ZG_BIT, self.gyro_z),
            (FIFO_EN_YG_BIT, self.gyro_y),
            (FIFO_EN_XG_BIT, self.gyro_x),
        ]
    }

    pub fn from_register(value: u8) -> Self {
        let bit = |n: u8| value & (1 << n) != 0;
        Self {
            accel: bit(FIFO_EN_ACCEL_BIT),
            gyro_x: bit(FIFO_EN_XG_BIT),
            gyro_y: bit(FIFO_EN_YG_BIT),
            gyro_z: bit(FIFO_EN_ZG_BIT),
        }
    }

    /// Bytes each sample adds to the FIFO
    pub fn packet_size(&self) -> u16 {
        let gyro_axes = [self.gyro_x, self.gyro_y, self.gyro_z].iter().filter(|&&b| b).count() as u16;
        (if self.accel { 6 } else { 0 }) + 2 * gyro_axes
    }
}

/// Interrupt sources latched into INT_STATUS.
///
/// Only the overflow condition is consumed, by polling INT_STATUS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptSources {
    pub fifo_overflow: bool,
    pub i2c_master: bool,
    pub data_ready: bool,
}

impl InterruptSources {
    pub const OVERFLOW_ONLY: InterruptSources = InterruptSources {
        fifo_overflow: true,
        i2c_master: false,
        data_ready: false,
    };

    pub fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.fifo_overflow {
            mask |= INT_FIFO_OFLOW;
        }
        if self.i2c_master {
            mask |= INT_I2C_MST;
        }
        if self.data_ready {
            mask |= INT_DATA_RDY;
        }
        mask
    }

    pub fn from_mask(mask: u8) -> Self {
        Self {
            fifo_overflow: mask & INT_FIFO_OFLOW != 0,
            i2c_master: mask & INT_I2C_MST != 0,
            data_ready: mask & INT_DATA_RDY != 0,
        }
    }
}
