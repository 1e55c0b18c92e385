//! Single block writes.

use crate::card::SdCard;
use crate::command::{Command, Trailer, DATA_ACCEPTED, DATA_RESPONSE_MASK, DATA_START, FILLER};
use crate::error::answered;
use crate::status::{Faults, BLOCK_SIZE};
use crate::{BlockDevice, Error, Socket};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// The card holds MISO low while it programs the block.
const BUSY: u8 = 0x00;
const BUSY_POLLS: u16 = 0xFFFF;

impl<SPI, CS, S, D> SdCard<SPI, CS, S, D>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    S: Socket<SPI>,
    D: DelayMs<u16>,
{
    /// Sends the data token, the block and a dummy CRC, and returns the
    /// data response token.
    fn send_block(&mut self, block: &[u8; BLOCK_SIZE]) -> Result<u8, Error<SPI, CS>> {
        self.transceive(DATA_START)?;
        for byte in block.iter() {
            self.transceive(*byte)?;
        }
        // CRC, not checked
        self.transceive(FILLER)?;
        self.transceive(FILLER)?;
        self.transceive(FILLER)
    }

    /// Polls until the card stops signalling busy. Returns the number of
    /// polls left, or `None` if the card stayed busy.
    fn wait_programmed(&mut self) -> Result<Option<u16>, Error<SPI, CS>> {
        for remaining in (0..BUSY_POLLS).rev() {
            if self.transceive(FILLER)? != BUSY {
                return Ok(Some(remaining));
            }
        }
        Ok(None)
    }
}

impl<SPI, CS, S, D> BlockDevice<SPI, CS> for SdCard<SPI, CS, S, D>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    S: Socket<SPI>,
    D: DelayMs<u16>,
{
    /// Writes `block` to `sector`.
    ///
    /// Standard capacity cards are addressed in bytes, so `sector` is scaled
    /// by 512 for them. On failure the fault is recorded in the device status
    /// and the bus is released.
    fn write_block(
        &mut self,
        sector: u32,
        block: &[u8; BLOCK_SIZE],
    ) -> Result<u32, Error<SPI, CS>> {
        if !self.device.status.ready {
            return Err(Error::NotReady);
        }
        if sector > self.device.last_block {
            return Err(Error::OutOfBounds);
        }

        let address = match self.device.block_address(sector) {
            Some(address) => address,
            None => return Err(Error::OutOfBounds),
        };
        let response = answered(self.transmit_command(
            Command::WriteSingleBlock,
            address,
            Trailer::Hold,
        ))?;
        if !response.map_or(false, |r| r.is_ready()) {
            return Err(self.abort(Faults::WRITE_REJECTED));
        }

        let result = self.send_block(block);
        let token = self.release_on_err(result)?;
        if token & DATA_RESPONSE_MASK != DATA_ACCEPTED {
            debug!("write {}: data response {:02X}", sector, token);
            return Err(self.abort(Faults::DATA_REJECTED));
        }

        let result = self.wait_programmed();
        match self.release_on_err(result)? {
            Some(remaining) => self.device.status.timeout = remaining,
            None => {
                self.device.status.timeout = 0;
                return Err(self.abort(Faults::WRITE_TIMEOUT));
            }
        }

        let result = self.transceive(FILLER);
        self.release_on_err(result)?;
        self.release()?;
        Ok(sector.wrapping_add(1))
    }
}
