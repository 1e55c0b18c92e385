use crate::status::Faults;
use core::fmt::{self, Debug, Display};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

mod private {
    #[derive(Debug)]
    pub enum Private {}
}

/// The error type used by this library.
///
/// This can encapsulate an SPI or GPIO error, and adds the SD protocol
/// failures on top of that. Protocol faults are also recorded in the
/// [`Status`](crate::Status) of the card's [`Device`](crate::Device), so a
/// caller can inspect them after the fact.
pub enum Error<SPI: Transfer<u8>, CS: OutputPin> {
    /// An SPI transfer failed.
    Spi(SPI::Error),

    /// The chip select line could not be set.
    Gpio(CS::Error),

    /// The card never drove the bus while a command response was polled for.
    NoResponse,

    /// A negotiation or write step failed. Exactly one flag is set.
    Fault(Faults),

    /// The card did not understand `SEND_IF_COND`, which makes it a version
    /// 1 card. Bring-up of those cards is not supported.
    LegacyCard,

    /// A block write was attempted before negotiation succeeded.
    NotReady,

    /// A block write was addressed past the last block of the card.
    OutOfBounds,

    #[doc(hidden)]
    __NonExhaustive(private::Private),
}

impl<SPI: Transfer<u8>, CS: OutputPin> Debug for Error<SPI, CS>
where
    SPI::Error: Debug,
    CS::Error: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::Gpio(gpio) => write!(f, "Error::Gpio({:?})", gpio),
            Error::NoResponse => f.write_str("Error::NoResponse"),
            Error::Fault(faults) => write!(f, "Error::Fault({:?})", faults),
            Error::LegacyCard => f.write_str("Error::LegacyCard"),
            Error::NotReady => f.write_str("Error::NotReady"),
            Error::OutOfBounds => f.write_str("Error::OutOfBounds"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

impl<SPI: Transfer<u8>, CS: OutputPin> Display for Error<SPI, CS>
where
    SPI::Error: Display,
    CS::Error: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "SPI error: {}", spi),
            Error::Gpio(gpio) => write!(f, "GPIO error: {}", gpio),
            Error::NoResponse => f.write_str("card did not respond to command"),
            Error::Fault(faults) => write!(f, "card fault: {:?}", faults),
            Error::LegacyCard => f.write_str("version 1 cards are not supported"),
            Error::NotReady => f.write_str("card has not been initialized"),
            Error::OutOfBounds => f.write_str("block address beyond end of card"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

/// Turns a poll-budget exhaustion into `None`, so retry loops can treat it as
/// one more unanswered attempt. Bus errors still propagate.
pub(crate) fn answered<T, SPI: Transfer<u8>, CS: OutputPin>(
    result: Result<T, Error<SPI, CS>>,
) -> Result<Option<T>, Error<SPI, CS>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::NoResponse) => Ok(None),
        Err(e) => Err(e),
    }
}
