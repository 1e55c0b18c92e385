//! Bring-up: from power-on to a ready card with known capacity.

use crate::card::SdCard;
use crate::command::{Command, Ocr, Trailer, DATA_START, FILLER};
use crate::csd::{self, CSD_LEN};
use crate::error::answered;
use crate::status::{CapacityClass, Device, Faults, BLOCK_SIZE};
use crate::utils::HexSlice;
use crate::{BusClock, Error, Socket};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// Supply voltage 2.7-3.6V and the check pattern echoed by `SEND_IF_COND`.
const IF_COND_CHECK: u32 = 0x0000_01AA;
/// Host Capacity Support bit of `SEND_OP_COND`.
const HCS: u32 = 1 << 30;

const OP_COND_ATTEMPTS: u16 = 200;
const CSD_ATTEMPTS: u16 = 100;
const CSD_TOKEN_POLLS: u16 = 30;
/// 80 clocks with CS high put the card into native mode, ready for CMD0.
const WAKEUP_BYTES: usize = 10;

impl<SPI, CS, S, D> SdCard<SPI, CS, S, D>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    S: Socket<SPI>,
    D: DelayMs<u16>,
{
    /// Power-cycles the card and brings it into the ready state.
    ///
    /// Any earlier result is discarded. On failure the fault is recorded in
    /// [`device`](SdCard::device) and returned; the bus is always left
    /// released.
    pub fn negotiate(&mut self) -> Result<&Device, Error<SPI, CS>> {
        self.device = Device::default();
        self.power_cycle();

        if !self.socket.card_detected() {
            return Err(self.abort(Faults::NO_CARD));
        }
        if self.socket.write_protected() {
            return Err(self.abort(Faults::WRITE_PROTECTED));
        }

        self.wake_up()?;
        self.go_idle()?;
        if self.check_interface()? {
            self.activate_high_capacity()?;
        } else {
            self.activate(0)?;
            self.device.capacity = CapacityClass::Standard;
        }

        self.release()?;
        self.set_clock(BusClock::Medium);
        self.assert()?;

        let csd = self.read_csd()?;
        debug!("CSD: {:?}", HexSlice(&csd[..]));
        self.device.last_block = csd::last_block(&csd);

        self.configure()?;

        self.device.status.ready = true;
        self.release()?;
        info!(
            "SdCard::negotiate: {:?} card, {} blocks",
            self.device.capacity,
            self.device.block_count()
        );
        Ok(&self.device)
    }

    fn power_cycle(&mut self) {
        let settle = self.options.power_settle_ms;
        self.socket.set_power(false);
        self.delay.delay_ms(settle);
        self.socket.set_power(true);
        self.delay.delay_ms(settle);
    }

    fn wake_up(&mut self) -> Result<(), Error<SPI, CS>> {
        // Unconditionally, the line state is unknown after power-up.
        self.cs.set_high().map_err(Error::Gpio)?;
        self.asserted = false;
        self.set_clock(BusClock::Slow);
        self.delay.delay_ms(1);
        for _ in 0..WAKEUP_BYTES {
            self.transceive(FILLER)?;
        }
        self.assert()?;
        self.delay.delay_ms(1);
        Ok(())
    }

    fn go_idle(&mut self) -> Result<(), Error<SPI, CS>> {
        let response = answered(self.transmit_command(Command::GoIdleState, 0, Trailer::None))?;
        match response {
            Some(r) if r.entered_idle() => Ok(()),
            _ => Err(self.abort(Faults::NO_IDLE)),
        }
    }

    /// Sends `SEND_IF_COND`. Returns whether the card echoed the check
    /// pattern and accepted the supply voltage.
    fn check_interface(&mut self) -> Result<bool, Error<SPI, CS>> {
        let mut echo = [0; 4];
        let response = answered(self.transmit_command(
            Command::SendIfCond,
            IF_COND_CHECK,
            Trailer::Read(&mut echo),
        ))?;
        match response {
            Some(r) if r.is_idle() => {}
            other => {
                info!("SdCard::negotiate: SEND_IF_COND answered {:?}, legacy card", other);
                self.device.legacy = true;
                self.release()?;
                return Err(Error::LegacyCard);
            }
        }
        debug!("R7: {:?}", HexSlice(echo));
        Ok(echo[2] == 0x01 && echo[3] == 0xAA)
    }

    fn activate_high_capacity(&mut self) -> Result<(), Error<SPI, CS>> {
        self.activate(HCS)?;

        let mut ocr = [0; 4];
        let response =
            answered(self.transmit_command(Command::ReadOcr, 0, Trailer::Read(&mut ocr)))?;
        match response {
            Some(r) if r.is_ready() => {}
            _ => return Err(self.abort(Faults::OCR_TIMEOUT)),
        }
        debug!("OCR: {:?}", HexSlice(ocr));

        let flags = Ocr::from_bits_truncate(ocr[0]);
        if !flags.contains(Ocr::POWERED_UP) {
            return Err(self.abort(Faults::NOT_POWERED_UP));
        }
        self.device.capacity = if flags.contains(Ocr::HIGH_CAPACITY) {
            CapacityClass::High
        } else {
            CapacityClass::Standard
        };
        Ok(())
    }

    /// Repeats `SEND_OP_COND` until the card leaves the idle state.
    fn activate(&mut self, argument: u32) -> Result<(), Error<SPI, CS>> {
        for remaining in (0..OP_COND_ATTEMPTS).rev() {
            let response =
                answered(self.transmit_command(Command::SendOpCond, argument, Trailer::None))?;
            if response.map_or(false, |r| r.is_ready()) {
                debug!("SEND_OP_COND: ready, {} attempts left", remaining);
                self.device.status.timeout = remaining;
                return Ok(());
            }
        }
        self.device.status.timeout = 0;
        Err(self.abort(Faults::OP_COND_TIMEOUT))
    }

    /// Reads the 17 bytes following the data token of `SEND_CSD`. The bus
    /// stays asserted on success.
    fn read_csd(&mut self) -> Result<[u8; CSD_LEN], Error<SPI, CS>> {
        let mut accepted = false;
        for remaining in (0..CSD_ATTEMPTS).rev() {
            // A previous attempt may have left the card mid-command.
            self.release()?;
            let response = answered(self.transmit_command(Command::SendCsd, 0, Trailer::Hold))?;
            if response.map_or(false, |r| r.is_ready()) {
                self.device.status.timeout = remaining;
                accepted = true;
                break;
            }
        }
        if !accepted {
            self.device.status.timeout = 0;
            return Err(self.abort(Faults::CSD_TIMEOUT));
        }

        let result = self.wait_csd_token();
        if !self.release_on_err(result)? {
            return Err(self.abort(Faults::CSD_TOKEN_MISSING));
        }

        let mut csd = [0; CSD_LEN];
        let result = self.read_bytes(&mut csd);
        self.release_on_err(result)?;
        Ok(csd)
    }

    fn wait_csd_token(&mut self) -> Result<bool, Error<SPI, CS>> {
        for _ in 0..CSD_TOKEN_POLLS {
            if self.transceive(FILLER)? == DATA_START {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        for byte in buf.iter_mut() {
            *byte = self.transceive(FILLER)?;
        }
        Ok(())
    }

    /// Disables CRC checking and fixes the block length. Some cards reject
    /// `CRC_ON_OFF`, so neither command has to succeed.
    fn configure(&mut self) -> Result<(), Error<SPI, CS>> {
        let settings = [
            (Command::CrcOnOff, 0),
            (Command::SetBlocklen, BLOCK_SIZE as u32),
        ];
        for (command, argument) in settings.iter() {
            let response = answered(self.transmit_command(*command, *argument, Trailer::None))?;
            if !response.map_or(false, |r| r.is_ready()) {
                warn!("{:?} not accepted: {:?}", command, response);
            }
        }
        Ok(())
    }
}
