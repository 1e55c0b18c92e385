
use log::{info, error, warn};

use structopt::StructOpt;

pub use linux_embedded_hal::sysfs_gpio::{Direction, Error as PinError};
pub use linux_embedded_hal::{spidev, Delay, Pin as Pindev, Spidev, spidev::SpiModeFlags};

use simplelog::{TermLogger, LevelFilter, TerminalMode};

use spi_sdcard::{BlockDevice, BusClock, Options as CardOptions, SdCard, Socket, BLOCK_SIZE};

#[derive(Debug, PartialEq, StructOpt)]
struct Options {
    #[structopt(subcommand)]
    operation: Operations,

    /// SPI device
    #[structopt(long, default_value="/dev/spidev0.0", env = "SPI_DEV")]
    spi_dev: String,

    /// Chip Select (output) pin
    #[structopt(long, default_value = "8", env = "CS_PIN")]
    cs_pin: u64,

    /// Card power switch (output) pin, active high
    #[structopt(long, env = "POWER_PIN")]
    power_pin: Option<u64>,

    /// Card detect (input) pin, low when a card is inserted
    #[structopt(long, env = "DETECT_PIN")]
    detect_pin: Option<u64>,

    /// Write protect (input) pin, high when the card is locked
    #[structopt(long, env = "PROTECT_PIN")]
    protect_pin: Option<u64>,

    /// SPI baud rate during bring-up
    #[structopt(long, default_value = "250000", env = "SPI_SLOW_BAUD")]
    slow_baud: u32,

    /// SPI baud rate while reading the card registers
    #[structopt(long, default_value = "4000000", env = "SPI_MEDIUM_BAUD")]
    medium_baud: u32,

    /// SPI baud rate for data transfers
    #[structopt(long, default_value = "12000000", env = "SPI_FAST_BAUD")]
    fast_baud: u32,

    /// Time the card is kept unpowered, and then given to power up, in ms
    #[structopt(long, default_value = "500")]
    power_settle_ms: u16,

    /// Log every byte exchanged with the card
    #[structopt(long)]
    trace: bool,

    /// Configure log level
    #[structopt(long, default_value = "info", env="LOG_LEVEL")]
    log_level: LevelFilter,
}

#[derive(Debug, PartialEq, StructOpt)]
pub enum Operations {
    /// Bring up the card and show what it reports
    Info,
    /// Write one block
    Write {
        /// Block index in hex
        #[structopt(parse(try_from_str = parse_hex))]
        sector: u32,

        /// Data to write in hexadecimal, zero padded to a full block
        #[structopt(long)]
        data: HexData,
    },
    /// Write a file to consecutive blocks
    Load {
        /// Input file
        file: String,

        /// Block index to start at, in hex
        #[structopt(long, default_value="0", parse(try_from_str = parse_hex))]
        sector: u32,
    },
}

#[derive(Debug, PartialEq)]
pub struct HexData(Vec<u8>);

impl std::str::FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(HexData)
    }
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(s, 16)
}

/// Card slot wired to sysfs GPIOs. Missing pins mean an always powered,
/// always present, writable card.
struct Board {
    power: Option<Pindev>,
    detect: Option<Pindev>,
    protect: Option<Pindev>,
    slow_baud: u32,
    medium_baud: u32,
    fast_baud: u32,
}

fn open_pin(number: u64, direction: Direction) -> Result<Pindev, PinError> {
    let pin = Pindev::new(number);
    pin.export()?;
    pin.set_direction(direction)?;
    Ok(pin)
}

fn read_pin(pin: &Option<Pindev>, name: &str) -> Option<u8> {
    match pin.as_ref().map(|pin| pin.get_value()) {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            warn!("Reading {} pin failed: {:?}", name, e);
            None
        }
        None => None,
    }
}

impl Socket<Spidev> for Board {
    fn set_power(&mut self, on: bool) {
        if let Some(pin) = &self.power {
            if let Err(e) = pin.set_value(on as u8) {
                warn!("Switching card power failed: {:?}", e);
            }
        }
    }

    fn card_detected(&mut self) -> bool {
        read_pin(&self.detect, "detect").map_or(true, |value| value == 0)
    }

    fn write_protected(&mut self) -> bool {
        read_pin(&self.protect, "protect").map_or(false, |value| value != 0)
    }

    fn set_clock(&mut self, spi: &mut Spidev, clock: BusClock) {
        let hz = match clock {
            BusClock::Slow => self.slow_baud,
            BusClock::Medium => self.medium_baud,
            BusClock::Fast => self.fast_baud,
        };
        let mut spi_config = spidev::SpidevOptions::new();
        spi_config.max_speed_hz(hz);
        if let Err(e) = spi.0.configure(&spi_config) {
            warn!("Setting SPI clock to {} Hz failed: {:?}", hz, e);
        }
    }
}

fn to_block(data: &[u8]) -> Option<[u8; BLOCK_SIZE]> {
    if data.len() > BLOCK_SIZE {
        return None;
    }
    let mut block = [0u8; BLOCK_SIZE];
    block[..data.len()].copy_from_slice(data);
    Some(block)
}

fn main() -> Result<(), Box<dyn std::error::Error + 'static>>{
    // Load options
    let opts = Options::from_args();

    // Setup logging
    TermLogger::init(opts.log_level, simplelog::Config::default(), TerminalMode::Mixed).unwrap();

    // Connect and configure GPIO pins
    let cs_pin = open_pin(opts.cs_pin, Direction::High)?;
    let board = Board {
        power: opts.power_pin.map(|pin| open_pin(pin, Direction::Low)).transpose()?,
        detect: opts.detect_pin.map(|pin| open_pin(pin, Direction::In)).transpose()?,
        protect: opts.protect_pin.map(|pin| open_pin(pin, Direction::In)).transpose()?,
        slow_baud: opts.slow_baud,
        medium_baud: opts.medium_baud,
        fast_baud: opts.fast_baud,
    };

    // Connect and configure SPI device
    let mut spi = Spidev::open(&opts.spi_dev)?;

    let mut spi_config = spidev::SpidevOptions::new();
    spi_config.mode(SpiModeFlags::SPI_MODE_0 | SpiModeFlags::SPI_NO_CS);
    spi_config.max_speed_hz(opts.slow_baud);
    spi.configure(&spi_config)?;

    let card_options = CardOptions {
        trace: opts.trace,
        power_settle_ms: opts.power_settle_ms,
    };
    let mut card = SdCard::with_options(spi, cs_pin, board, Delay, card_options);

    // Bring up the card
    match card.negotiate().map(|device| *device) {
        Ok(device) => {
            info!(
                "Card: {:?}, {} blocks ({} MiB)",
                device.capacity,
                device.block_count(),
                device.capacity_bytes() / (1024 * 1024)
            );
        },
        Err(e) => {
            error!("Error initialising card: {:?} ({:?})", e, card.device().status);
            return Ok(())
        }
    };
    card.set_clock(BusClock::Fast);

    // Perform the requested operation
    match &opts.operation {
        Operations::Info => (),
        Operations::Write{sector, data} => {
            info!("Writing {} bytes to block 0x{:08x}", data.0.len(), sector);

            let block = match to_block(&data.0) {
                Some(block) => block,
                None => {
                    error!("At most {} bytes fit into a block", BLOCK_SIZE);
                    return Ok(())
                }
            };
            if let Err(e) = card.write_block(*sector, &block) {
                error!("Write failed: {:?} ({:?})", e, card.device().status);
                return Ok(())
            }

            info!("Write complete");
        },
        Operations::Load{file, sector} => {
            info!("Loading file {} to block 0x{:08x}", file, sector);

            let data = std::fs::read(&file)?;

            let mut next = *sector;
            for chunk in data.chunks(BLOCK_SIZE) {
                let block = to_block(chunk).expect("chunk larger than a block");
                next = match card.write_block(next, &block) {
                    Ok(next) => next,
                    Err(e) => {
                        error!("Write of block 0x{:08x} failed: {:?} ({:?})", next, e, card.device().status);
                        return Ok(())
                    }
                };
            }

            info!("Load complete, {} blocks written", next - *sector);
        },
    }

    Ok(())
}
