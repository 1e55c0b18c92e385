//! What negotiation found out about the card, and what went wrong.

use bitflags::bitflags;

/// Size of a data block in bytes. Negotiation forces every card to use it.
pub const BLOCK_SIZE: usize = 512;

bitflags! {
    /// Protocol faults observed while bringing up or writing to a card.
    pub struct Faults: u16 {
        /// The socket reported no card.
        const NO_CARD = 1 << 0;
        /// The card's write-protect switch is engaged.
        const WRITE_PROTECTED = 1 << 1;
        /// `GO_IDLE_STATE` was not answered with the idle status.
        const NO_IDLE = 1 << 2;
        /// `SEND_OP_COND` never reported the card as ready.
        const OP_COND_TIMEOUT = 1 << 3;
        /// `READ_OCR` was not accepted.
        const OCR_TIMEOUT = 1 << 4;
        /// The OCR did not confirm that power-up completed.
        const NOT_POWERED_UP = 1 << 5;
        /// `SEND_CSD` was never accepted.
        const CSD_TIMEOUT = 1 << 6;
        /// No data token preceded the CSD.
        const CSD_TOKEN_MISSING = 1 << 7;
        /// `WRITE_SINGLE_BLOCK` was not accepted.
        const WRITE_REJECTED = 1 << 8;
        /// The data response token did not report the block as accepted.
        const DATA_REJECTED = 1 << 9;
        /// The card stayed busy after the block was transferred.
        const WRITE_TIMEOUT = 1 << 10;
    }
}

/// Whether the card is addressed in bytes or in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityClass {
    /// SDSC: byte addressed, at most 2 GB.
    Standard,
    /// SDHC/SDXC: block addressed.
    High,
}

impl Default for CapacityClass {
    fn default() -> Self {
        CapacityClass::Standard
    }
}

/// Outcome flags of the last negotiation or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Negotiation completed and the card accepts writes.
    pub ready: bool,
    /// Faults recorded so far.
    pub faults: Faults,
    /// Remaining attempts of the last bounded wait. Diagnostic only.
    pub timeout: u16,
}

impl Default for Status {
    fn default() -> Self {
        Status {
            ready: false,
            faults: Faults::empty(),
            timeout: 0,
        }
    }
}

/// The card as discovered by [`SdCard::negotiate`](crate::SdCard::negotiate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Device {
    /// Addressing mode, from the CCS bit of the OCR.
    pub capacity: CapacityClass,
    /// The card rejected `SEND_IF_COND`.
    pub legacy: bool,
    /// Index of the highest addressable 512-byte block.
    pub last_block: u32,
    /// Outcome of negotiation and later writes.
    pub status: Status,
}

impl Device {
    /// Number of addressable 512-byte blocks, or 0 before negotiation.
    pub fn block_count(&self) -> u64 {
        if self.status.ready {
            u64::from(self.last_block) + 1
        } else {
            0
        }
    }

    /// Usable capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.block_count() * BLOCK_SIZE as u64
    }

    /// Translates a block index into the address `WRITE_SINGLE_BLOCK` expects.
    /// `None` if a byte address would not fit into 32 bits.
    pub fn block_address(&self, sector: u32) -> Option<u32> {
        match self.capacity {
            CapacityClass::Standard => sector.checked_mul(BLOCK_SIZE as u32),
            CapacityClass::High => Some(sector),
        }
    }
}
