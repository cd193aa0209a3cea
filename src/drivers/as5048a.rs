//! AS5048A magnetic angle sensor over SPI.
//!
//! The chip answers a command on the *following* frame, so every read is
//! two transfers: one to latch the angle-read command, one to clock the
//! result out.  The command word `0xFFFF` is read-bit + parity + address
//! 0x3FFF (angle register).

use embedded_hal::spi::{Operation, SpiDevice};

use crate::app::ports::AngleSensor;
use crate::error::EncoderError;

const READ_ANGLE: [u8; 2] = [0xFF, 0xFF];

/// Parity bit of the response frame; stripped before decoding.
const PARITY_BIT: u16 = 0x8000;

pub struct As5048a<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> As5048a<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    fn frame(&mut self) -> Result<u16, EncoderError> {
        let mut buf = READ_ANGLE;
        self.spi
            .transaction(&mut [Operation::TransferInPlace(&mut buf)])
            .map_err(|_| EncoderError::BusReadFailed)?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<SPI: SpiDevice> AngleSensor for As5048a<SPI> {
    fn read_angle_word(&mut self) -> Result<u16, EncoderError> {
        // Prime: the response belongs to whatever was sent last.
        self.frame()?;
        Ok(self.frame()? & !PARITY_BIT)
    }
}
