//! Byte, bit and word primitives over one addressed device

use crate::error::Result;
use crate::registers::RegisterField;
use crate::transport::Transport;
use log::trace;

/// Read-modify-write register access for a single device address.
///
/// Every bit and field write reads the register first and preserves the
/// bits outside the target. No operation retries.
pub struct RegisterBus<T> {
    transport: T,
    address: u8,
}

impl<T: Transport> RegisterBus<T> {
    pub fn new(transport: T, address: u8) -> Self {
        Self { transport, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Release the underlying transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn read_byte(&mut self, reg: u8) -> Result<u8> {
        let value = self.transport.read_register(self.address, reg)?;
        trace!("read  0x{:02X} -> 0x{:02X}", reg, value);
        Ok(value)
    }

    pub fn write_byte(&mut self, reg: u8, value: u8) -> Result<()> {
        trace!("write 0x{:02X} <- 0x{:02X}", reg, value);
        self.transport.write_register(self.address, reg, value)
    }

    pub fn read_bit(&mut self, reg: u8, bit: u8) -> Result<bool> {
        Ok(self.read_byte(reg)? & (1 << bit) != 0)
    }

    pub fn write_bit(&mut self, reg: u8, bit: u8, value: bool) -> Result<()> {
        let mut byte = self.read_byte(reg)?;
        if value {
            byte |= 1 << bit;
        } else {
            byte &= !(1 << bit);
        }
        self.write_byte(reg, byte)
    }

    /// Read `length` bits ending at `bit_start` (MSB of the field)
    pub fn read_bits(&mut self, reg: u8, bit_start: u8, length: u8) -> Result<u8> {
        let field = RegisterField::new(reg, bit_start, length);
        self.read_field(field)
    }

    pub fn write_bits(&mut self, reg: u8, bit_start: u8, length: u8, value: u8) -> Result<()> {
        let field = RegisterField::new(reg, bit_start, length);
        self.write_field(field, value)
    }

    pub fn read_field(&mut self, field: RegisterField) -> Result<u8> {
        field.validate()?;
        let byte = self.read_byte(field.address)?;
        Ok((byte & field.mask()) >> field.shift())
    }

    /// Value bits beyond the field width are discarded
    pub fn write_field(&mut self, field: RegisterField, value: u8) -> Result<()> {
        field.validate()?;
        let mask = field.mask();
        let byte = self.read_byte(field.address)?;
        let data = (value << field.shift()) & mask;
        self.write_byte(field.address, (byte & !mask) | data)
    }

    /// Two consecutive registers as a big-endian two's-complement word
    pub fn read_word(&mut self, reg: u8) -> Result<i16> {
        let high = self.read_byte(reg)?;
        let low = self.read_byte(reg.wrapping_add(1))?;
        Ok(i16::from_be_bytes([high, low]))
    }

    /// Two consecutive registers as an unsigned big-endian word
    pub fn read_word_unsigned(&mut self, reg: u8) -> Result<u16> {
        let high = self.read_byte(reg)?;
        let low = self.read_byte(reg.wrapping_add(1))?;
        Ok(u16::from_be_bytes([high, low]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMpu6050;
    use crate::Mpu6050Error;

    fn bus() -> (SimulatedMpu6050, RegisterBus<SimulatedMpu6050>) {
        let sim = SimulatedMpu6050::new();
        (sim.clone(), RegisterBus::new(sim, 0x68))
    }

    #[test]
    fn test_write_bit_preserves_neighbours() {
        let (sim, mut bus) = bus();
        sim.set_register(0x1A, 0b1010_0000);
        bus.write_bit(0x1A, 0, true).unwrap();
        assert_eq!(sim.register(0x1A), 0b1010_0001);
        bus.write_bit(0x1A, 7, false).unwrap();
        assert_eq!(sim.register(0x1A), 0b0010_0001);
        assert!(bus.read_bit(0x1A, 5).unwrap());
        assert!(!bus.read_bit(0x1A, 6).unwrap());
    }

    #[test]
    fn test_write_bits_uses_field_mask() {
        let (sim, mut bus) = bus();
        sim.set_register(0x1C, 0b1110_0111);
        bus.write_bits(0x1C, 4, 2, 0b10).unwrap();
        assert_eq!(sim.register(0x1C), 0b1111_0111);
        assert_eq!(bus.read_bits(0x1C, 4, 2).unwrap(), 0b10);

        // Extra value bits are masked off
        bus.write_bits(0x1C, 4, 2, 0xFF).unwrap();
        assert_eq!(sim.register(0x1C), 0b1111_1111);
    }

    #[test]
    fn test_read_word_twos_complement() {
        let (sim, mut bus) = bus();
        let cases: [(u8, u8, i16); 5] = [
            (0x00, 0x00, 0),
            (0x7F, 0xFF, 32767),
            (0x80, 0x00, -32768),
            (0xFF, 0xFF, -1),
            (0x01, 0x00, 256),
        ];
        for (high, low, expected) in cases {
            sim.set_register(0x3B, high);
            sim.set_register(0x3C, low);
            let unsigned = u16::from_be_bytes([high, low]) as i32;
            let reference = if unsigned >= 0x8000 { unsigned - 0x10000 } else { unsigned };
            assert_eq!(bus.read_word(0x3B).unwrap(), expected);
            assert_eq!(expected as i32, reference);
        }
    }

    #[test]
    fn test_invalid_field_rejected_before_io() {
        let (sim, mut bus) = bus();
        sim.fail_after(0);
        let err = bus.write_bits(0x1A, 1, 3, 1).unwrap_err();
        assert!(matches!(err, Mpu6050Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_transport_error_propagates() {
        let (sim, mut bus) = bus();
        sim.fail_after(1);
        assert!(bus.read_byte(0x75).is_ok());
        assert!(bus.read_byte(0x75).unwrap_err().is_transport());
    }
}
