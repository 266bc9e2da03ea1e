//! # mci
//!
//! > SD/MMC/SDIO card identification and data-transfer engine for
//! > embedded hosts, `no_std` by default
//!
//! The engine drives a host controller through card reset, voltage and
//! capability negotiation, card-family discrimination, relative-address
//! assignment and optimized multi-block transfer. The controller itself
//! stays behind the [`bus::Bus`] trait.
//!
//! ## Using this crate
//!
//! Assuming `Controller` implements `mci::bus::Bus` for your hardware:
//!
//! ```ignore
//! let mut card = MCI::identify(controller, Delay).map_err(|e| format!("{:?}", e))?;
//! debug!("Card: {:?}", card.card_type());
//!
//! let mut buffer = [0u8; 512];
//! card.read(0, slice::from_mut(&mut buffer).iter_mut()).map_err(|e| format!("{:?}", e))?;
//! let mbr = MasterBootRecord::from_bytes(&buffer).map_err(|e| format!("{:?}", e))?;
//! for partition in mbr.partition_table_entries().iter() {
//!     println!("{:?}", partition);
//! }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;

pub mod bus;
pub mod delay;
pub mod sd;

use bus::Bus;
use delay::Delay;
use sd::ident::{self, IdentificationError};
use sd::registers::NumBlocks;
use sd::state::{CardState, StateError, StateTracker};
use sd::transfer::{Direction, Session, SessionError};
pub use sd::{CardIdentity, CardType, Config, BLOCK_SIZE};

/// One card: resolved identity, tracked protocol state, and at most one
/// open transfer session.
pub struct MCI<BUS, D> {
    pub(crate) bus: BUS,
    pub(crate) delay: D,
    pub(crate) card: CardType,
    pub(crate) identity: Option<CardIdentity>,
    pub(crate) tracker: StateTracker,
    pub(crate) session: Option<Session>,
    pub(crate) config: Config,
}

type LBA = u32;

impl<E, BUS, D> MCI<BUS, D>
where
    BUS: Bus<Error = E>,
    D: Delay,
{
    /// Identify the inserted card and bring it to transfer state.
    pub fn identify(bus: BUS, delay: D) -> Result<Self, IdentificationError<E>> {
        Self::identify_with_config(bus, delay, Config::default())
    }

    pub fn identify_with_config(
        mut bus: BUS,
        mut delay: D,
        config: Config,
    ) -> Result<Self, IdentificationError<E>> {
        let (card, identity) = ident::resolve(&mut bus, &mut delay, &config)?;
        let tracker = ident::setup(&mut bus, &mut delay, &config, card, identity.as_ref())?;
        Ok(Self { bus, delay, card, identity, tracker, session: None, config })
    }

    pub fn card_type(&self) -> CardType {
        self.card
    }

    /// Raw identity registers; `None` for an I/O-only card.
    pub fn identity(&self) -> Option<&CardIdentity> {
        self.identity.as_ref()
    }

    pub fn state(&self) -> CardState {
        self.tracker.current()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn num_blocks(&self) -> Option<NumBlocks> {
        self.identity.map(|identity| identity.csd.num_blocks())
    }

    pub fn block_size_shift(&self) -> Option<u8> {
        self.identity.map(|identity| identity.csd.block_size_shift())
    }

    pub fn bus<R>(&mut self, f: impl Fn(&mut BUS) -> R) -> R {
        f(&mut self.bus)
    }

    /// Bring the card to a state where data commands are legal; no-op
    /// when it already is.
    pub fn ensure_transfer_state(&mut self) -> Result<(), StateError<E>> {
        self.tracker.ensure_transfer_state(&mut self.bus, &mut self.delay, &self.config)
    }

    /// Read `blocks.len()` blocks starting at `address`.
    ///
    /// Contiguous back-to-back reads share one streaming command: the
    /// session stays open and only the block count is reconfigured.
    /// Call [`close`](Self::close) before the card is used elsewhere.
    pub fn read<'a, B>(&mut self, address: LBA, blocks: B) -> Result<(), SessionError<E>>
    where
        B: core::iter::ExactSizeIterator<Item = &'a mut [u8; BLOCK_SIZE]>,
    {
        if blocks.len() == 0 {
            return Ok(());
        }
        self.stream(Direction::Read, address, blocks.len() as u16)?;
        for block in blocks {
            if let Err(e) = self.bus.read_data(block) {
                self.recover();
                return Err(SessionError::Bus(e));
            }
        }
        Ok(())
    }

    /// Write `blocks.len()` blocks starting at `address`.
    ///
    /// Streaming behavior matches [`read`](Self::read).
    pub fn write<'a, B>(&mut self, address: LBA, blocks: B) -> Result<(), SessionError<E>>
    where
        B: core::iter::ExactSizeIterator<Item = &'a [u8; BLOCK_SIZE]>,
    {
        if blocks.len() == 0 {
            return Ok(());
        }
        self.stream(Direction::Write, address, blocks.len() as u16)?;
        for block in blocks {
            if let Err(e) = self.bus.write_data(block) {
                self.recover();
                return Err(SessionError::Bus(e));
            }
        }
        Ok(())
    }
}
