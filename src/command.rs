//! SD command set and frame layout for SPI mode.

use bitflags::bitflags;

/// Byte clocked out when only clocks are wanted. An undriven MISO line
/// reads back as the same value.
pub const FILLER: u8 = 0xFF;

/// Token preceding a single data block, in either direction.
pub const DATA_START: u8 = 0xFE;

/// Data response token (low nibble) for an accepted block.
pub const DATA_ACCEPTED: u8 = 0x05;

/// Mask selecting the status part of the data response token.
pub const DATA_RESPONSE_MASK: u8 = 0x0F;

/// Number of bytes polled for the R1 response after a frame.
pub const RESPONSE_POLLS: usize = 254;

/// Commands used during bring-up and writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// CMD0: software reset, enters SPI mode when CS is asserted.
    GoIdleState = 0,
    /// CMD1: starts initialization.
    SendOpCond = 1,
    /// CMD8: supply voltage check, only understood by version 2 cards.
    SendIfCond = 8,
    /// CMD9: read the card specific data register.
    SendCsd = 9,
    /// CMD16: set the block length of byte addressed cards.
    SetBlocklen = 16,
    /// CMD24: write one block.
    WriteSingleBlock = 24,
    /// CMD58: read the operating conditions register.
    ReadOcr = 58,
    /// CMD59: turn CRC checking on or off.
    CrcOnOff = 59,
}

impl Command {
    /// The 6-bit command index.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Builds the wire frame for this command.
    ///
    /// ```text
    /// byte 0:    0 1 i5 i4 i3 i2 i1 i0   start bit, transmitter bit, index
    /// byte 1..4: argument, most significant byte first
    /// byte 5:    c6 .. c0 1              check value, stop bit
    /// ```
    pub fn frame(self, argument: u32) -> [u8; 6] {
        let index = self.index();
        let arg = argument.to_be_bytes();
        [
            0x40 | (index & 0x3F),
            arg[0],
            arg[1],
            arg[2],
            arg[3],
            ((check_value(index) & 0x7F) << 1) | 1,
        ]
    }
}

/// Looks up the check value sent with a command.
///
/// Once the card is in SPI mode it only verifies the CRC of `GO_IDLE_STATE`
/// and `SEND_IF_COND`, so a fixed table is enough. Only the low seven bits
/// reach the wire.
pub fn check_value(index: u8) -> u8 {
    match index {
        0 => 0x4A,
        1 => 0xF9,
        8 => 0x43,
        9 => 0xAF,
        16 => 0xFF,
        58 => 0x25,
        59 => 0x25,
        _ => 0x7F,
    }
}

/// What the framer does after the response byte.
#[derive(Debug)]
pub enum Trailer<'a> {
    /// Clock out the cleanup byte and release the bus.
    None,
    /// Read `buf.len()` bytes following the response, then clean up and
    /// release the bus.
    Read(&'a mut [u8]),
    /// Clock out the cleanup byte and keep the bus asserted, because a data
    /// block follows that the caller transfers itself.
    Hold,
}

bitflags! {
    /// Bits of the R1 response.
    pub struct R1: u8 {
        /// The card is in the idle state and running its initialization.
        const IDLE = 1 << 0;
        const ERASE_RESET = 1 << 1;
        const ILLEGAL_COMMAND = 1 << 2;
        const CRC_ERROR = 1 << 3;
        const ERASE_SEQUENCE_ERROR = 1 << 4;
        const ADDRESS_ERROR = 1 << 5;
        const PARAMETER_ERROR = 1 << 6;
    }
}

/// The R1 byte the card answered a command with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response(u8);

impl Response {
    pub fn new(byte: u8) -> Self {
        Response(byte)
    }

    pub fn byte(self) -> u8 {
        self.0
    }

    pub fn flags(self) -> R1 {
        R1::from_bits_truncate(self.0)
    }

    /// No error bits, initialization finished.
    pub fn is_ready(self) -> bool {
        self.0 == 0
    }

    /// Exactly the idle bit.
    pub fn is_idle(self) -> bool {
        self.0 == R1::IDLE.bits()
    }

    /// Idle after a reset. A CRC error is tolerated here since the card may
    /// have seen a stray frame before it switched to SPI mode.
    pub fn entered_idle(self) -> bool {
        (self.0 & !R1::CRC_ERROR.bits()) == R1::IDLE.bits()
    }
}

bitflags! {
    /// Bits of the first OCR byte.
    pub struct Ocr: u8 {
        /// Power-up routine finished; `HIGH_CAPACITY` is only valid if set.
        const POWERED_UP = 1 << 7;
        /// Card Capacity Status.
        const HIGH_CAPACITY = 1 << 6;
    }
}
