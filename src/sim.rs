//! A simulated card and socket for tests.

use crate::command::DATA_START;
use crate::status::BLOCK_SIZE;
use crate::{BusClock, Socket};
use core::convert::Infallible;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use std::collections::VecDeque;
use std::mem;

/// A command frame as decoded by the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub index: u8,
    pub argument: u32,
    pub check: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Command,
    AwaitToken,
    Data,
}

/// Answers commands the way an SD card in SPI mode does, with one byte of
/// latency before every response.
#[derive(Debug)]
pub struct SimCard {
    /// Never drives the bus.
    pub silent: bool,
    pub idle_response: u8,
    pub if_cond_response: u8,
    pub if_cond_echo: [u8; 4],
    /// `SEND_OP_COND` attempt after reset that reports ready.
    pub ready_after: Option<usize>,
    pub ocr_response: u8,
    pub ocr: [u8; 4],
    pub csd_response: u8,
    pub csd_token: u8,
    pub csd: [u8; 17],
    pub crc_on_off_response: u8,
    pub write_response: u8,
    pub data_response: u8,
    pub busy_polls: usize,

    /// Every byte the host sent.
    pub received: Vec<u8>,
    pub commands: Vec<Received>,
    /// Payload of the last written block.
    pub written: Vec<u8>,

    phase: Phase,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    block: Vec<u8>,
    op_conds: usize,
    busy_left: usize,
}

impl SimCard {
    pub const SDHC_CSD: [u8; 17] = [
        0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1D, 0x69, 0x7F, 0x80, 0x0A, 0x40, 0x00,
        0x8B, 0x00,
    ];
    pub const SDSC_CSD: [u8; 17] = [
        0x00, 0x7F, 0x00, 0x32, 0x5B, 0x5A, 0x83, 0xAF, 0x7F, 0xFF, 0xCF, 0x80, 0x16, 0x80, 0x00,
        0x6F, 0x00,
    ];

    /// A well-behaved high capacity card that becomes ready on the third
    /// `SEND_OP_COND`.
    pub fn sdhc() -> Self {
        SimCard {
            silent: false,
            idle_response: 0x01,
            if_cond_response: 0x01,
            if_cond_echo: [0x00, 0x00, 0x01, 0xAA],
            ready_after: Some(3),
            ocr_response: 0x00,
            ocr: [0xC0, 0xFF, 0x80, 0x00],
            csd_response: 0x00,
            csd_token: DATA_START,
            csd: Self::SDHC_CSD,
            crc_on_off_response: 0x00,
            write_response: 0x00,
            data_response: 0xE5,
            busy_polls: 3,
            received: Vec::new(),
            commands: Vec::new(),
            written: Vec::new(),
            phase: Phase::Command,
            frame: Vec::new(),
            out: VecDeque::new(),
            block: Vec::new(),
            op_conds: 0,
            busy_left: 0,
        }
    }

    /// An empty socket: MISO floats high.
    pub fn silent() -> Self {
        SimCard {
            silent: true,
            ..Self::sdhc()
        }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        self.received.push(byte);
        if self.silent {
            return 0xFF;
        }

        match self.phase {
            Phase::AwaitToken if byte == DATA_START => {
                self.phase = Phase::Data;
                return 0xFF;
            }
            Phase::Data => {
                self.block.push(byte);
                if self.block.len() == BLOCK_SIZE + 2 {
                    self.block.truncate(BLOCK_SIZE);
                    self.written = mem::replace(&mut self.block, Vec::new());
                    self.phase = Phase::Command;
                    self.out.push_back(self.data_response);
                    self.busy_left = self.busy_polls;
                }
                return 0xFF;
            }
            _ => {}
        }

        if !self.frame.is_empty() || byte & 0xC0 == 0x40 {
            self.frame.push(byte);
            if self.frame.len() == 6 {
                self.execute();
            }
            return 0xFF;
        }

        if let Some(out) = self.out.pop_front() {
            out
        } else if self.busy_left > 0 {
            self.busy_left -= 1;
            0x00
        } else {
            0xFF
        }
    }

    fn execute(&mut self) {
        let frame = mem::replace(&mut self.frame, Vec::new());
        let command = Received {
            index: frame[0] & 0x3F,
            argument: u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]),
            check: frame[5],
        };
        self.commands.push(command);
        self.out.clear();
        self.busy_left = 0;
        self.phase = Phase::Command;
        self.out.push_back(0xFF);

        match command.index {
            0 => {
                self.op_conds = 0;
                self.out.push_back(self.idle_response);
            }
            1 => {
                self.op_conds += 1;
                let ready = self.ready_after.map_or(false, |n| self.op_conds >= n);
                self.out.push_back(if ready { 0x00 } else { 0x01 });
            }
            8 => {
                self.out.push_back(self.if_cond_response);
                if self.if_cond_response == 0x01 {
                    self.out.extend(self.if_cond_echo.iter());
                }
            }
            9 => {
                self.out.push_back(self.csd_response);
                if self.csd_response == 0x00 && self.csd_token == DATA_START {
                    self.out.extend([0xFF, 0xFF, DATA_START].iter());
                    self.out.extend(self.csd.iter());
                }
            }
            16 => self.out.push_back(0x00),
            24 => {
                self.out.push_back(self.write_response);
                if self.write_response == 0x00 {
                    self.phase = Phase::AwaitToken;
                }
            }
            58 => {
                self.out.push_back(self.ocr_response);
                if self.ocr_response == 0x00 {
                    self.out.extend(self.ocr.iter());
                }
            }
            59 => self.out.push_back(self.crc_on_off_response),
            _ => self.out.push_back(0x04),
        }
    }
}

impl Transfer<u8> for SimCard {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> {
        for word in words.iter_mut() {
            *word = self.exchange(*word);
        }
        Ok(words)
    }
}

/// Chip select recording every level it was driven to (`true` = high).
#[derive(Debug, Default)]
pub struct SimPin {
    pub levels: Vec<bool>,
}

impl OutputPin for SimPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.levels.push(true);
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimSocket {
    pub present: bool,
    pub protected: bool,
    pub power: Vec<bool>,
    pub clocks: Vec<BusClock>,
    pub detect_reads: usize,
    pub protect_reads: usize,
}

impl Default for SimSocket {
    fn default() -> Self {
        SimSocket {
            present: true,
            protected: false,
            power: Vec::new(),
            clocks: Vec::new(),
            detect_reads: 0,
            protect_reads: 0,
        }
    }
}

impl<SPI> Socket<SPI> for SimSocket {
    fn set_power(&mut self, on: bool) {
        self.power.push(on);
    }

    fn card_detected(&mut self) -> bool {
        self.detect_reads += 1;
        self.present
    }

    fn write_protected(&mut self) -> bool {
        self.protect_reads += 1;
        self.protected
    }

    fn set_clock(&mut self, _spi: &mut SPI, clock: BusClock) {
        self.clocks.push(clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn send(sim: &mut SimCard, bytes: &[u8]) -> Vec<u8> {
        let mut buf = bytes.to_vec();
        sim.transfer(&mut buf).unwrap();
        buf
    }

    #[test]
    fn frames_are_decoded() {
        let mut sim = SimCard::sdhc();
        send(&mut sim, &Command::SendIfCond.frame(0x1AA));
        assert_eq!(
            sim.commands,
            vec![Received {
                index: 8,
                argument: 0x1AA,
                check: 0x87
            }]
        );
        assert_eq!(
            send(&mut sim, &[0xFF; 7]),
            vec![0xFF, 0x01, 0x00, 0x00, 0x01, 0xAA, 0xFF]
        );
    }
}
