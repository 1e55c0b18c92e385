//! Driver state and command transmission.

use crate::command::{Command, Response, Trailer, FILLER, RESPONSE_POLLS};
use crate::status::{Device, Faults};
use crate::{BusClock, Error, Socket};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Log every exchanged byte at `trace` level.
    pub trace: bool,
    /// How long the card is kept unpowered, and then given to power up.
    pub power_settle_ms: u16,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            trace: false,
            power_settle_ms: 500,
        }
    }
}

/// Driver for SD cards in SPI mode.
///
/// # Type Parameters
///
/// * **`SPI`**: The SPI master to which the card is attached.
/// * **`CS`**: The **C**hip-**S**elect line attached to the `DAT3/CS` pin of
///   the card.
/// * **`S`**: The [`Socket`] providing power, switches and clock control.
/// * **`D`**: A millisecond delay.
#[derive(Debug)]
pub struct SdCard<SPI, CS, S, D> {
    pub(crate) spi: SPI,
    pub(crate) cs: CS,
    pub(crate) socket: S,
    pub(crate) delay: D,
    pub(crate) options: Options,
    pub(crate) asserted: bool,
    pub(crate) device: Device,
}

impl<SPI, CS, S, D> SdCard<SPI, CS, S, D>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    S: Socket<SPI>,
    D: DelayMs<u16>,
{
    /// Creates a driver with default [`Options`]. The card is not touched
    /// until [`negotiate`](SdCard::negotiate) is called.
    ///
    /// # Parameters
    ///
    /// * **`spi`**: An SPI master in mode 0.
    /// * **`cs`**: The **C**hip-**S**elect pin. Will be driven low while a
    ///   transaction is in progress.
    /// * **`socket`**: Board hooks for the card slot.
    /// * **`delay`**: Used for power sequencing.
    pub fn new(spi: SPI, cs: CS, socket: S, delay: D) -> Self {
        Self::with_options(spi, cs, socket, delay, Options::default())
    }

    pub fn with_options(spi: SPI, cs: CS, socket: S, delay: D, options: Options) -> Self {
        SdCard {
            spi,
            cs,
            socket,
            delay,
            options,
            asserted: false,
            device: Device::default(),
        }
    }

    /// The result of the last negotiation, including faults recorded since.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether chip select is currently driven low by this driver.
    pub fn bus_asserted(&self) -> bool {
        self.asserted
    }

    /// Changes the SPI clock rate. Must not be called during a transaction.
    pub fn set_clock(&mut self, clock: BusClock) {
        debug_assert!(!self.asserted, "clock changed mid-transaction");
        debug!("SdCard: clock {:?}", clock);
        self.socket.set_clock(&mut self.spi, clock);
    }

    /// Returns the SPI master, chip select, socket and delay so they can be
    /// used elsewhere.
    pub fn free(self) -> (SPI, CS, S, D) {
        (self.spi, self.cs, self.socket, self.delay)
    }

    /// Sends a command and collects its R1 response.
    ///
    /// The bus is asserted if it isn't already. What happens after the
    /// response is selected by `trailer`. If the card does not answer within
    /// 254 bytes, the bus is released and [`Error::NoResponse`] returned.
    pub fn transmit_command(
        &mut self,
        command: Command,
        argument: u32,
        trailer: Trailer<'_>,
    ) -> Result<Response, Error<SPI, CS>> {
        let hold = matches!(trailer, Trailer::Hold);
        self.assert()?;
        let result = self.exchange_command(command, argument, trailer);
        if result.is_err() || !hold {
            self.release()?;
        }
        result
    }

    fn exchange_command(
        &mut self,
        command: Command,
        argument: u32,
        trailer: Trailer<'_>,
    ) -> Result<Response, Error<SPI, CS>> {
        for byte in command.frame(argument).iter() {
            self.transceive(*byte)?;
        }

        let mut response = None;
        for _ in 0..RESPONSE_POLLS {
            let byte = self.transceive(FILLER)?;
            if byte != FILLER {
                response = Some(Response::new(byte));
                break;
            }
        }
        let response = match response {
            Some(response) => response,
            None => {
                debug!("{:?}({:#010x}): no response", command, argument);
                return Err(Error::NoResponse);
            }
        };

        if let Trailer::Read(buf) = trailer {
            for byte in buf.iter_mut() {
                *byte = self.transceive(FILLER)?;
            }
        }
        // 8 clocks to let the card finish the command
        self.transceive(FILLER)?;
        Ok(response)
    }

    /// Exchanges one byte.
    pub(crate) fn transceive(&mut self, out: u8) -> Result<u8, Error<SPI, CS>> {
        let mut buf = [out];
        let read = self.spi.transfer(&mut buf).map_err(Error::Spi)?[0];
        if self.options.trace {
            trace!("spi {:02X} -> {:02X}", out, read);
        }
        Ok(read)
    }

    pub(crate) fn assert(&mut self) -> Result<(), Error<SPI, CS>> {
        if !self.asserted {
            self.cs.set_low().map_err(Error::Gpio)?;
            self.asserted = true;
        }
        Ok(())
    }

    pub(crate) fn release(&mut self) -> Result<(), Error<SPI, CS>> {
        if self.asserted {
            self.cs.set_high().map_err(Error::Gpio)?;
            self.asserted = false;
        }
        Ok(())
    }

    /// Passes `result` through, releasing the bus first if it is an error.
    pub(crate) fn release_on_err<T>(
        &mut self,
        result: Result<T, Error<SPI, CS>>,
    ) -> Result<T, Error<SPI, CS>> {
        if result.is_err() {
            self.release()?;
        }
        result
    }

    /// Records `fault`, releases the bus and returns the matching error.
    pub(crate) fn abort(&mut self, fault: Faults) -> Error<SPI, CS> {
        warn!("SdCard: {:?}", fault);
        self.device.status.faults.insert(fault);
        match self.release() {
            Ok(()) => Error::Fault(fault),
            Err(e) => {
                error!("SdCard: bus stuck asserted after {:?}", fault);
                e
            }
        }
    }
}
