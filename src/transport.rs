//! Register transports: the byte-level capability the driver runs on
//!
//! The driver only needs single-register reads and writes on an addressed
//! bus. Hardware backends are feature-gated; [`crate::sim::SimulatedMpu6050`]
//! is always available.

use crate::error::{Mpu6050Error, Result};

/// Single-byte register access over an addressed serial bus.
///
/// Implementations perform no retries: any failure is returned as
/// [`crate::Mpu6050Error::Transport`].
pub trait Transport: Send {
    fn read_register(&mut self, device_address: u8, reg: u8) -> Result<u8>;

    fn write_register(&mut self, device_address: u8, reg: u8, value: u8) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_register(&mut self, device_address: u8, reg: u8) -> Result<u8> {
        (**self).read_register(device_address, reg)
    }

    fn write_register(&mut self, device_address: u8, reg: u8, value: u8) -> Result<()> {
        (**self).write_register(device_address, reg, value)
    }
}

/// Which bus a binary should open, parsed from `sim`, `ft232h[:CHANNEL]`
/// or `rpi[:BUS]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSelection {
    /// In-memory device resting flat, producing frames at `rate_hz`
    Simulated { rate_hz: u32 },
    Ft232h { channel: u32 },
    Rpi { bus: u8 },
}

impl Default for BusSelection {
    fn default() -> Self {
        BusSelection::Simulated { rate_hz: 100 }
    }
}

impl std::str::FromStr for BusSelection {
    type Err = Mpu6050Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        let number = |default: u32| -> Result<u32> {
            arg.map_or(Ok(default), |a| {
                a.parse()
                    .map_err(|_| Mpu6050Error::InvalidConfiguration(format!("bad bus argument {:?}", a)))
            })
        };

        match kind {
            "sim" => Ok(BusSelection::Simulated { rate_hz: number(100)? }),
            "ft232h" => Ok(BusSelection::Ft232h { channel: number(0)? }),
            "rpi" => {
                let bus = u8::try_from(number(1)?)
                    .map_err(|_| Mpu6050Error::InvalidConfiguration("I2C bus out of range".to_string()))?;
                Ok(BusSelection::Rpi { bus })
            }
            other => Err(Mpu6050Error::InvalidConfiguration(format!(
                "unknown bus {:?} (expected sim, ft232h[:CHANNEL] or rpi[:BUS])",
                other
            ))),
        }
    }
}

impl BusSelection {
    /// Open the selected transport. Hardware buses need their cargo feature.
    pub fn open(self) -> Result<Box<dyn Transport>> {
        match self {
            BusSelection::Simulated { rate_hz } => {
                Ok(Box::new(crate::sim::SimulatedMpu6050::at_rest(rate_hz as f64)))
            }
            #[cfg(feature = "ft232h")]
            BusSelection::Ft232h { channel } => Ok(Box::new(Ft232hTransport::open(channel)?)),
            #[cfg(feature = "rpi")]
            BusSelection::Rpi { bus } => Ok(Box::new(RppalTransport::open(bus)?)),
            #[allow(unreachable_patterns)]
            other => Err(Mpu6050Error::InvalidConfiguration(format!(
                "{:?} requires building with the matching cargo feature",
                other
            ))),
        }
    }
}

#[cfg(feature = "ft232h")]
pub use self::ft232h::Ft232hTransport;

#[cfg(feature = "ft232h")]
mod ft232h {
    use super::Transport;
    use crate::error::{Mpu6050Error, Result};
    use crate::ffi::*;
    use std::ptr;

    /// FT232H USB-to-I2C bridge driven through libMPSSE
    pub struct Ft232hTransport {
        handle: FT_HANDLE,
    }

    // The channel handle is only touched through &mut self
    unsafe impl Send for Ft232hTransport {}

    impl Ft232hTransport {
        /// Open and initialise an I2C channel
        ///
        /// # Arguments
        /// * `channel_index` - Index of the I2C channel to use (usually 0)
        pub fn open(channel_index: u32) -> Result<Self> {
            let mut num_channels: DWORD = 0;
            let status = unsafe { I2C_GetNumChannels(&mut num_channels) };
            if status != FT_OK {
                return Err(status.into());
            }

            if num_channels == 0 {
                return Err(Mpu6050Error::NoChannelsFound);
            }

            if channel_index >= num_channels {
                return Err(Mpu6050Error::InvalidChannel(channel_index));
            }

            let mut handle: FT_HANDLE = ptr::null_mut();
            let status = unsafe { I2C_OpenChannel(channel_index, &mut handle) };
            if status != FT_OK {
                return Err(status.into());
            }

            let mut config = ChannelConfig {
                ClockRate: I2C_CLOCK_FAST_MODE_PLUS,
                LatencyTimer: 1, // 1ms, minimum stable value
                Options: 0,
                Pin: 0,
                currentPinState: 0,
            };

            let status = unsafe { I2C_InitChannel(handle, &mut config) };
            if status != FT_OK {
                unsafe { I2C_CloseChannel(handle) };
                return Err(status.into());
            }

            Ok(Self { handle })
        }
    }

    impl Transport for Ft232hTransport {
        fn read_register(&mut self, device_address: u8, reg: u8) -> Result<u8> {
            let reg_buf = [reg];
            let mut transferred: DWORD = 0;

            let options = I2C_TRANSFER_OPTIONS_START_BIT | I2C_TRANSFER_OPTIONS_BREAK_ON_NACK;
            let status = unsafe {
                I2C_DeviceWrite(self.handle, device_address, 1, reg_buf.as_ptr(), &mut transferred, options)
            };
            if status != FT_OK {
                return Err(status.into());
            }

            let mut data = [0u8];
            transferred = 0;
            let options = I2C_TRANSFER_OPTIONS_START_BIT
                | I2C_TRANSFER_OPTIONS_STOP_BIT
                | I2C_TRANSFER_OPTIONS_NACK_LAST_BYTE;
            let status = unsafe {
                I2C_DeviceRead(self.handle, device_address, 1, data.as_mut_ptr(), &mut transferred, options)
            };
            if status != FT_OK {
                return Err(status.into());
            }

            if transferred != 1 {
                return Err(Mpu6050Error::Transport(format!(
                    "register 0x{:02X}: expected 1 byte, transferred {}",
                    reg, transferred
                )));
            }

            Ok(data[0])
        }

        fn write_register(&mut self, device_address: u8, reg: u8, value: u8) -> Result<()> {
            let buffer = [reg, value];
            let mut transferred: DWORD = 0;

            let options = I2C_TRANSFER_OPTIONS_START_BIT
                | I2C_TRANSFER_OPTIONS_STOP_BIT
                | I2C_TRANSFER_OPTIONS_FAST_TRANSFER_BYTES;
            let status = unsafe {
                I2C_DeviceWrite(self.handle, device_address, 2, buffer.as_ptr(), &mut transferred, options)
            };

            // With FAST_TRANSFER_BYTES the transferred count is in bits; only status is checked
            if status != FT_OK {
                return Err(status.into());
            }
            Ok(())
        }
    }

    impl Drop for Ft232hTransport {
        fn drop(&mut self) {
            unsafe {
                I2C_CloseChannel(self.handle);
            }
        }
    }
}

#[cfg(feature = "rpi")]
pub use self::rpi::RppalTransport;

#[cfg(feature = "rpi")]
mod rpi {
    use super::Transport;
    use crate::error::{Mpu6050Error, Result};
    use rppal::i2c::I2c;

    /// Linux I2C bus (e.g. `/dev/i2c-1` on a Raspberry Pi) using SMBus byte commands
    pub struct RppalTransport {
        i2c: I2c,
        selected: Option<u8>,
    }

    impl RppalTransport {
        pub fn open(bus: u8) -> Result<Self> {
            let i2c = I2c::with_bus(bus)
                .map_err(|e| Mpu6050Error::Transport(format!("Failed to open I2C bus {}: {:?}", bus, e)))?;
            Ok(Self { i2c, selected: None })
        }

        fn select(&mut self, device_address: u8) -> Result<()> {
            if self.selected != Some(device_address) {
                self.i2c
                    .set_slave_address(device_address as u16)
                    .map_err(|e| Mpu6050Error::Transport(format!("Failed to set slave address: {:?}", e)))?;
                self.selected = Some(device_address);
            }
            Ok(())
        }
    }

    impl Transport for RppalTransport {
        fn read_register(&mut self, device_address: u8, reg: u8) -> Result<u8> {
            self.select(device_address)?;
            self.i2c
                .smbus_read_byte(reg)
                .map_err(|e| Mpu6050Error::Transport(format!("Failed to read register 0x{:02X}: {:?}", reg, e)))
        }

        fn write_register(&mut self, device_address: u8, reg: u8, value: u8) -> Result<()> {
            self.select(device_address)?;
            self.i2c
                .smbus_write_byte(reg, value)
                .map_err(|e| Mpu6050Error::Transport(format!("Failed to write register 0x{:02X}: {:?}", reg, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus_selection() {
        assert_eq!("sim".parse::<BusSelection>().unwrap(), BusSelection::Simulated { rate_hz: 100 });
        assert_eq!("sim:500".parse::<BusSelection>().unwrap(), BusSelection::Simulated { rate_hz: 500 });
        assert_eq!("ft232h:2".parse::<BusSelection>().unwrap(), BusSelection::Ft232h { channel: 2 });
        assert_eq!("rpi".parse::<BusSelection>().unwrap(), BusSelection::Rpi { bus: 1 });
        assert!("rpi:300".parse::<BusSelection>().is_err());
        assert!("spi".parse::<BusSelection>().is_err());
    }

    #[test]
    fn test_open_simulated_bus() {
        let mut transport = BusSelection::default().open().unwrap();
        assert_eq!(transport.read_register(0x68, 0x75).unwrap(), 0x68);
    }
}
