use crate::bus::{self, Bus};
use crate::delay::Delay;
use crate::sd::command::Command;
use crate::sd::state::{send_with_retry, CardState, StateError};
use crate::sd::BLOCK_SIZE;
use crate::MCI;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SessionError<BUS> {
    NoActiveSession, // continue_* without a begin_*
    SessionOpen,     // begin_* while another session is open
    NotContiguous,   // continuation does not start at the session's next block
    WrongDirection,  // continuation direction does not match the open session
    NotMemoryCard,   // data transfer against an SDIO or unresolved card
    State(StateError<BUS>),
    Bus(bus::Error<BUS>),
}

impl<E> From<bus::Error<E>> for SessionError<E> {
    fn from(error: bus::Error<E>) -> Self {
        Self::Bus(error)
    }
}

impl<E> From<StateError<E>> for SessionError<E> {
    fn from(error: StateError<E>) -> Self {
        Self::State(error)
    }
}

/// Bookkeeping for one streaming run.
///
/// Valid only while the card is in a transfer-capable lineage; owned by
/// the engine and discarded on [`close`](MCI::close) or error recovery.
#[derive(Copy, Clone, Debug)]
pub struct Session {
    direction: Direction,
    streaming_issued: bool,
    current_block: u32,
    block_count: u32,
}

impl Session {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// First block a contiguous continuation must start at.
    pub fn next_block(&self) -> u32 {
        self.current_block + self.block_count
    }
}

impl<E, BUS, D> MCI<BUS, D>
where
    BUS: Bus<Error = E>,
    D: Delay,
{
    /// Open a multi-block read session starting at `start_block`.
    pub fn begin_read(&mut self, start_block: u32, block_count: u16) -> Result<(), SessionError<E>> {
        self.begin(Direction::Read, start_block, block_count)
    }

    /// Open a multi-block write session starting at `start_block`.
    pub fn begin_write(&mut self, start_block: u32, block_count: u16) -> Result<(), SessionError<E>> {
        self.begin(Direction::Write, start_block, block_count)
    }

    fn begin(
        &mut self,
        direction: Direction,
        start_block: u32,
        block_count: u16,
    ) -> Result<(), SessionError<E>> {
        if !self.card.is_memory() {
            return Err(SessionError::NotMemoryCard);
        }
        if self.session.is_some() {
            return Err(SessionError::SessionOpen);
        }
        self.tracker.ensure_transfer_state(&mut self.bus, &mut self.delay, &self.config)?;
        self.bus.configure_block_length(BLOCK_SIZE as u16)?;
        self.bus.configure_block_count(block_count)?;

        let argument = self.card.block_argument(start_block);
        let (command, state) = match direction {
            Direction::Read => (Command::ReadMultipleBlock(argument), CardState::SendingData),
            Direction::Write => (Command::WriteMultipleBlock(argument), CardState::ReceivingData),
        };
        send_with_retry(&mut self.bus, command, self.config.command_retries)?;
        self.tracker.set(state);
        self.session = Some(Session {
            direction,
            streaming_issued: true,
            current_block: start_block,
            block_count: block_count as u32,
        });
        trace!("{:?} session open at block {}", direction, start_block);
        Ok(())
    }

    /// Extend the open read session by `block_count` contiguous blocks.
    ///
    /// Only the transport's block count is reconfigured; the streaming
    /// command is not re-issued.
    pub fn continue_read(&mut self, block_count: u16) -> Result<(), SessionError<E>> {
        let next = self.session.as_ref().ok_or(SessionError::NoActiveSession)?.next_block();
        self.continue_at(Direction::Read, next, block_count)
    }

    /// Extend the open write session by `block_count` contiguous blocks.
    pub fn continue_write(&mut self, block_count: u16) -> Result<(), SessionError<E>> {
        let next = self.session.as_ref().ok_or(SessionError::NoActiveSession)?.next_block();
        self.continue_at(Direction::Write, next, block_count)
    }

    /// Extend the open read session at an explicit block address.
    ///
    /// `start_block` must equal the session's next block; anything else
    /// fails with `NotContiguous` and leaves the session untouched.
    pub fn continue_read_at(
        &mut self,
        start_block: u32,
        block_count: u16,
    ) -> Result<(), SessionError<E>> {
        self.continue_at(Direction::Read, start_block, block_count)
    }

    /// Extend the open write session at an explicit block address.
    pub fn continue_write_at(
        &mut self,
        start_block: u32,
        block_count: u16,
    ) -> Result<(), SessionError<E>> {
        self.continue_at(Direction::Write, start_block, block_count)
    }

    fn continue_at(
        &mut self,
        direction: Direction,
        start_block: u32,
        block_count: u16,
    ) -> Result<(), SessionError<E>> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        if !session.streaming_issued {
            return Err(SessionError::NoActiveSession);
        }
        if session.direction != direction {
            return Err(SessionError::WrongDirection);
        }
        if start_block != session.next_block() {
            return Err(SessionError::NotContiguous);
        }
        self.bus.configure_block_count(block_count)?;
        session.current_block = start_block;
        session.block_count = block_count as u32;
        Ok(())
    }

    /// Stop the open streaming session and return the card to stand-by.
    ///
    /// Calling without an open session is a no-op.
    pub fn close(&mut self) -> Result<(), SessionError<E>> {
        if self.session.take().is_none() {
            return Ok(());
        }
        send_with_retry(&mut self.bus, Command::StopTransmission, self.config.command_retries)?;
        self.tracker.set(CardState::StandBy);
        self.tracker.await_ready_for_data(&mut self.bus, &mut self.delay, &self.config)?;
        Ok(())
    }

    /// Route a chunk through the open session when it is contiguous,
    /// re-opening otherwise.
    pub(crate) fn stream(
        &mut self,
        direction: Direction,
        start_block: u32,
        block_count: u16,
    ) -> Result<(), SessionError<E>> {
        if let Some(session) = &self.session {
            if session.direction == direction && session.next_block() == start_block {
                return self.continue_at(direction, start_block, block_count);
            }
            self.close()?;
        }
        self.begin(direction, start_block, block_count)
    }

    /// Best-effort resynchronization after a mid-stream fault: the card
    /// is stopped and polled back to stand-by so the next operation
    /// starts from a known state.
    pub(crate) fn recover(&mut self) {
        warn!("mid-stream fault, resynchronizing");
        self.session = None;
        if send_with_retry(&mut self.bus, Command::StopTransmission, self.config.command_retries)
            .is_ok()
        {
            self.tracker.set(CardState::StandBy);
            let _ = self.tracker.await_ready_for_data(&mut self.bus, &mut self.delay, &self.config);
        }
    }
}
