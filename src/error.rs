//! Error types for the MPU6050 capture driver

use thiserror::Error;

/// Error type for MPU6050 operations
#[derive(Error, Debug)]
pub enum Mpu6050Error {
    /// Bus read or write failure. Fatal to a running capture session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No I2C channels found on the USB bridge
    #[error("No I2C channels found")]
    NoChannelsFound,

    /// Invalid channel index
    #[error("Invalid channel index: {0}")]
    InvalidChannel(u32),

    /// Invalid WHO_AM_I response
    #[error("Invalid WHO_AM_I response: expected 0x68, got 0x{0:02X}")]
    InvalidDeviceId(u8),

    /// Unsupported range, filter or field code
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// FIFO byte count is not a whole number of packets
    #[error("FIFO desynchronized: byte count {count} is not a multiple of 12")]
    FifoDesync { count: u16 },

    /// The device is owned by a running capture session
    #[error("Device is busy with an active capture session")]
    DeviceBusy,

    /// Sample sink rejected a write
    #[error("Sink error: {0}")]
    Sink(String),

    /// File I/O error from a sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The capture worker thread panicked
    #[error("Capture session thread panicked")]
    SessionPanicked,
}

impl Mpu6050Error {
    /// Whether this error came from the register bus
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Mpu6050Error::Transport(_) | Mpu6050Error::NoChannelsFound | Mpu6050Error::InvalidChannel(_)
        )
    }
}

#[cfg(feature = "ft232h")]
impl From<crate::ffi::FT_STATUS> for Mpu6050Error {
    fn from(status: crate::ffi::FT_STATUS) -> Self {
        Mpu6050Error::Transport(format!(
            "FTDI status {} ({})",
            status,
            crate::ffi::status_to_string(status)
        ))
    }
}

/// Result type for MPU6050 operations
pub type Result<T> = std::result::Result<T, Mpu6050Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Mpu6050Error::Transport("nack".into()).is_transport());
        assert!(!Mpu6050Error::InvalidConfiguration("range 7".into()).is_transport());
        assert!(!Mpu6050Error::FifoDesync { count: 13 }.is_transport());
    }

    #[test]
    fn test_desync_message() {
        let msg = Mpu6050Error::FifoDesync { count: 30 }.to_string();
        assert!(msg.contains("30"));
    }
}
