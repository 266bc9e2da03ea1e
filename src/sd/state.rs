use crate::bus::{self, Bus};
use crate::delay::Delay;
use crate::sd::command::Command;
use crate::sd::response::CardStatus;
use crate::sd::Config;

/// Protocol-level card state, bits 12:9 of the card status register.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    StandBy,
    Transfer,
    SendingData,
    ReceivingData,
    Programming,
    Disconnected,
    Inactive,
}

impl CardState {
    pub fn from_status(status: CardStatus) -> Self {
        match status.current_state() {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::Identification,
            3 => Self::StandBy,
            4 => Self::Transfer,
            5 => Self::SendingData,
            6 => Self::ReceivingData,
            7 => Self::Programming,
            8 => Self::Disconnected,
            _ => Self::Inactive,
        }
    }

    /// Data commands are only legal from these two states.
    pub fn transfer_capable(self) -> bool {
        match self {
            Self::Transfer | Self::StandBy => true,
            _ => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StateError<BUS> {
    CardNotResponding, // Ready-for-data never reported within the poll budget
    Bus(bus::Error<BUS>),
}

impl<E> From<bus::Error<E>> for StateError<E> {
    fn from(error: bus::Error<E>) -> Self {
        Self::Bus(error)
    }
}

/// Sole owner of the card's protocol state.
///
/// Other components observe the state through [`current`](Self::current)
/// and request transitions; none of them writes it directly.
pub struct StateTracker {
    state: CardState,
    rca: u16,
}

impl StateTracker {
    pub fn new(rca: u16, state: CardState) -> Self {
        Self { state, rca }
    }

    pub fn current(&self) -> CardState {
        self.state
    }

    pub fn rca(&self) -> u16 {
        self.rca
    }

    pub(crate) fn set(&mut self, state: CardState) {
        self.state = state;
    }

    /// Bring the card to a state where data commands are legal.
    ///
    /// Idempotent: in `Transfer`/`StandBy` this issues no commands.
    /// Otherwise a stop-transmission forces the card out of any data
    /// state, and the ready-for-data poll re-verifies it.
    pub fn ensure_transfer_state<E>(
        &mut self,
        bus: &mut impl Bus<Error = E>,
        delay: &mut impl Delay,
        config: &Config,
    ) -> Result<(), StateError<E>> {
        if self.state.transfer_capable() {
            return Ok(());
        }
        debug!("card in {:?}, forcing stop-transmission", self.state);
        send_with_retry(bus, Command::StopTransmission, config.command_retries)?;
        self.state = CardState::StandBy;
        self.await_ready_for_data(bus, delay, config)
    }

    /// Poll CMD13 until the card reports ready-for-data, tracking the
    /// state it reports along the way.
    pub(crate) fn await_ready_for_data<E>(
        &mut self,
        bus: &mut impl Bus<Error = E>,
        delay: &mut impl Delay,
        config: &Config,
    ) -> Result<(), StateError<E>> {
        for _ in 0..config.ready_attempts {
            match bus.send_command(Command::SendStatus(self.rca)) {
                Ok(response) => {
                    let status = CardStatus(response.short().unwrap_or(0));
                    self.state = CardState::from_status(status);
                    if status.ready_for_data() {
                        return Ok(());
                    }
                }
                Err(bus::Error::NoResponse) | Err(bus::Error::Crc) => (),
                Err(e) => return Err(StateError::Bus(e)),
            }
            delay.delay_ms(config.ready_delay_ms);
        }
        warn!("card never reported ready-for-data");
        Err(StateError::CardNotResponding)
    }
}

/// Retry a command locally on recoverable transport faults.
pub(crate) fn send_with_retry<E>(
    bus: &mut impl Bus<Error = E>,
    command: Command,
    retries: u32,
) -> Result<crate::sd::response::Response, bus::Error<E>> {
    let mut result = bus.send_command(command);
    for _ in 1..retries {
        match result {
            Err(bus::Error::Crc) | Err(bus::Error::Busy) | Err(bus::Error::NoResponse) => {
                result = bus.send_command(command)
            }
            _ => break,
        }
    }
    result
}
