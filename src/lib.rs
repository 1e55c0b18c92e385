//! An [`embedded-hal`]-based driver for SD cards in SPI mode.
//!
//! The driver powers the card up, negotiates its operating conditions,
//! reads its capacity and then writes single 512-byte blocks. Board specific
//! functions (power switch, card detect and write protect switches, SPI clock
//! rate) are supplied through the [`Socket`] trait.
//!
//! Version 1 cards, reading, erasing and multi-block transfers are not
//! supported.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/

#![doc(html_root_url = "https://docs.rs/spi-sdcard/0.1.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
mod card;
pub mod command;
pub mod csd;
mod error;
mod init;
pub mod prelude;
mod status;
mod utils;
mod write;

#[cfg(test)]
mod sim;

pub use crate::card::{Options, SdCard};
pub use crate::error::Error;
pub use crate::status::{CapacityClass, Device, Faults, Status, BLOCK_SIZE};

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// SPI clock rates used during the life of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusClock {
    /// 100-400 kHz, required until the card left the idle state.
    Slow,
    /// Used for reading the CSD and the remaining bring-up commands.
    Medium,
    /// Full speed for data transfers, selected by the user after bring-up.
    Fast,
}

/// The board around the card.
///
/// Implementations are expected not to fail, the same way
/// [`DelayMs`](embedded_hal::blocking::delay::DelayMs) can not.
pub trait Socket<SPI> {
    /// Switches the card supply.
    fn set_power(&mut self, on: bool);

    /// Reads the card detect switch. Queried once per negotiation.
    fn card_detected(&mut self) -> bool;

    /// Reads the write protect switch. Queried once per negotiation.
    fn write_protected(&mut self) -> bool;

    /// Reconfigures the SPI master. Only called while the card is
    /// deselected.
    fn set_clock(&mut self, spi: &mut SPI, clock: BusClock);
}

/// A trait for writing operations on a memory card.
pub trait BlockDevice<SPI: Transfer<u8>, CS: OutputPin> {
    /// Writes one block.
    ///
    /// # Parameters
    /// * `sector`: Index of the 512-byte block to write.
    /// * `block`: The data to write.
    ///
    /// Returns the index of the block following `sector`.
    fn write_block(
        &mut self,
        sector: u32,
        block: &[u8; BLOCK_SIZE],
    ) -> Result<u32, Error<SPI, CS>>;
}
