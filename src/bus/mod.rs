use crate::sd::command::Command;
use crate::sd::response::Response;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Error<BUS> {
    BUS(BUS),   // Host controller error
    NoResponse, // No response within the controller's command timeout
    Crc,        // Response or data CRC check failed
    Busy,       // Previous operation still in flight
    Timeout,    // Data phase did not complete within expected duration
    Generic,    // Unexpected error
}

/// Data bus width negotiated after identification.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BusWidth {
    One,
    Four,
}

/// Command/response transport to the host controller.
///
/// Each call is a blocking round-trip: it returns once the card has
/// responded, the data phase has completed, or the controller's timeout
/// elapsed. The engine never has two commands in flight for one card.
pub trait Bus {
    type Error;

    /// Issue a command and collect its response.
    ///
    /// `command.response_kind()` tells the controller what to wait for;
    /// an absent or CRC-failed response surfaces as `NoResponse`/`Crc`
    /// rather than a malformed `Response`.
    fn send_command(&mut self, command: Command) -> Result<Response, Error<Self::Error>>;

    /// Number of blocks the next data phase moves, without issuing a command.
    fn configure_block_count(&mut self, count: u16) -> Result<(), Error<Self::Error>>;

    /// Block length in bytes for subsequent data phases.
    fn configure_block_length(&mut self, length: u16) -> Result<(), Error<Self::Error>>;

    /// Receive one block of an open read stream into `buffer`.
    fn read_data(&mut self, buffer: &mut [u8]) -> Result<(), Error<Self::Error>>;

    /// Send one block of an open write stream from `buffer`.
    fn write_data(&mut self, buffer: &[u8]) -> Result<(), Error<Self::Error>>;

    /// Reconfigure the host-side data bus width.
    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), Error<Self::Error>>;
}

#[cfg(test)]
pub(crate) mod mock;
