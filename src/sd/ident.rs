use crate::bus::{self, Bus, BusWidth};
use crate::delay::Delay;
use crate::sd::command::{
    AppCommand, Command, SendInterfaceCondition, MMC_HIGH_DENSITY_FLAG, VOLTAGE_WINDOW,
};
use crate::sd::registers::{CID, CSD};
use crate::sd::response::{R3, R4, R6, R7};
use crate::sd::state::{send_with_retry, CardState, StateError, StateTracker};
use crate::sd::{CardIdentity, CardType, Config, BLOCK_SIZE};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum IdentificationError<BUS> {
    Timeout,         // Retry budget exhausted against a timing-out card
    NoCardDetected,  // No branch produced any response
    VoltageMismatch, // Card answered CMD8 but never left busy
    Bus(bus::Error<BUS>),
}

impl<E> From<bus::Error<E>> for IdentificationError<E> {
    fn from(error: bus::Error<E>) -> Self {
        Self::Bus(error)
    }
}

impl<E> From<StateError<E>> for IdentificationError<E> {
    fn from(error: StateError<E>) -> Self {
        match error {
            StateError::CardNotResponding => Self::Timeout,
            StateError::Bus(e) => Self::Bus(e),
        }
    }
}

/// Everything learned while negotiating voltage and capabilities.
///
/// Scoped to the identification procedure; [`decide`] maps it to the
/// resolved card family without touching the bus.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VoltageNegotiation {
    pub supports_cmd8: bool,
    pub high_capacity_requested: bool,
    pub ccs: Option<bool>,
    pub sdio_functions: Option<u8>,
    pub mmc_access_mode: Option<u8>,
}

/// The branch table: negotiation outcome to card family.
pub fn decide(negotiation: &VoltageNegotiation) -> CardType {
    if let Some(ccs) = negotiation.ccs {
        return match (negotiation.supports_cmd8, ccs) {
            (true, true) => CardType::SDv2HighCapacity,
            (true, false) => CardType::SDv2Standard,
            (false, _) => CardType::SDv1,
        };
    }
    if let Some(mode) = negotiation.mmc_access_mode {
        // Bits 29 and 30 equal marks a high-density card.
        return match mode {
            0b00 | 0b11 => CardType::MMCHighDensity,
            _ => CardType::MMCStandard,
        };
    }
    if negotiation.sdio_functions.is_some() {
        return CardType::SDIO;
    }
    CardType::Unknown
}

enum OpCondFailure<BUS> {
    NoResponse, // Card ignored the command entirely
    NeverReady, // Card responded but stayed busy past the budget
    Timeout,    // Transport-level timeout on every attempt
    Bus(bus::Error<BUS>),
}

/// Poll an operation-condition exchange until the card reports ready.
///
/// `prefix` is issued before each attempt (the mandatory CMD55 for the
/// SD application command, none for the MMC CMD1).
fn op_cond_poll<E>(
    bus: &mut impl Bus<Error = E>,
    delay: &mut impl Delay,
    config: &Config,
    prefix: Option<Command>,
    command: Command,
) -> Result<R3, OpCondFailure<E>> {
    let mut saw_response = false;
    let mut timed_out = false;
    for attempt in 0..config.op_cond_attempts {
        let result = match prefix {
            Some(prefix) => bus.send_command(prefix).and_then(|_| bus.send_command(command)),
            None => bus.send_command(command),
        };
        match result {
            Ok(response) => {
                saw_response = true;
                let ocr = R3(response.short().unwrap_or(0));
                if ocr.ready() {
                    return Ok(ocr);
                }
            }
            Err(bus::Error::NoResponse) | Err(bus::Error::Crc) => (),
            Err(bus::Error::Timeout) => timed_out = true,
            Err(e) => return Err(OpCondFailure::Bus(e)),
        }
        // A card that never answers at all gets a much shorter budget.
        if !saw_response && attempt + 1 >= config.command_retries {
            break;
        }
        delay.delay_ms(config.op_cond_delay_ms);
    }
    Err(match (saw_response, timed_out) {
        (true, _) => OpCondFailure::NeverReady,
        (false, true) => OpCondFailure::Timeout,
        (false, false) => OpCondFailure::NoResponse,
    })
}

fn negotiate<E>(
    bus: &mut impl Bus<Error = E>,
    delay: &mut impl Delay,
    config: &Config,
) -> Result<VoltageNegotiation, IdentificationError<E>> {
    let mut negotiation = VoltageNegotiation::default();

    send_with_retry(bus, Command::GoIdleState, config.command_retries)?;

    // CMD8 probe. Any failure is a branch discriminator, not an error.
    let condition = SendInterfaceCondition::check();
    if let Ok(response) = bus.send_command(Command::SendIfCond(condition)) {
        let r7 = R7(response.short().unwrap_or(0));
        negotiation.supports_cmd8 =
            r7.voltage_accepted() && r7.echo_back_check_pattern() == condition.check_pattern;
    }

    // CMD5 probe for SDIO functions. A failing voltage re-issue rules
    // SDIO out but does not abort the probe.
    if let Ok(response) = bus.send_command(Command::IoSendOpCond(0)) {
        let functions = R4(response.short().unwrap_or(0)).function_count();
        if functions > 0 {
            match bus.send_command(Command::IoSendOpCond(VOLTAGE_WINDOW)) {
                Ok(response) if R4(response.short().unwrap_or(0)).ready() => {
                    debug!("SDIO interface with {} functions", functions);
                    negotiation.sdio_functions = Some(functions);
                }
                _ => debug!("SDIO voltage window rejected, ruling SDIO out"),
            }
        }
    }

    // SD memory branch: ACMD41 with HCS per the CMD8 outcome.
    negotiation.high_capacity_requested = negotiation.supports_cmd8;
    let acmd41 = Command::App(AppCommand::SDSendOpCond(negotiation.supports_cmd8));
    let mut voltage_mismatch = false;
    let mut sd_timed_out = false;
    match op_cond_poll(bus, delay, config, Some(Command::AppCommand(0)), acmd41) {
        Ok(ocr) => {
            negotiation.ccs = Some(ocr.card_capacity_status());
            return Ok(negotiation);
        }
        Err(OpCondFailure::Bus(e)) => return Err(e.into()),
        Err(OpCondFailure::NeverReady) => voltage_mismatch = negotiation.supports_cmd8,
        Err(OpCondFailure::Timeout) => sd_timed_out = true,
        Err(OpCondFailure::NoResponse) => (),
    }
    if negotiation.sdio_functions.is_some() {
        // SDIO confirmed and no SD memory present: no MMC discrimination.
        return Ok(negotiation);
    }

    // MMC fallback: reset again, then CMD1 with the high-density flag.
    send_with_retry(bus, Command::GoIdleState, config.command_retries)?;
    let cmd1 = Command::SendOpCond(MMC_HIGH_DENSITY_FLAG | VOLTAGE_WINDOW);
    match op_cond_poll(bus, delay, config, None, cmd1) {
        Ok(ocr) => {
            negotiation.mmc_access_mode = Some(ocr.access_mode());
            Ok(negotiation)
        }
        Err(OpCondFailure::Bus(e)) => Err(e.into()),
        Err(OpCondFailure::Timeout) => Err(IdentificationError::Timeout),
        Err(_) if sd_timed_out => Err(IdentificationError::Timeout),
        Err(_) if voltage_mismatch => Err(IdentificationError::VoltageMismatch),
        Err(_) => Err(IdentificationError::NoCardDetected),
    }
}

fn fetch_identity<E>(
    bus: &mut impl Bus<Error = E>,
    config: &Config,
) -> Result<CardIdentity, IdentificationError<E>> {
    let response = send_with_retry(bus, Command::AllSendCid, config.command_retries)?;
    let cid = CID(response.long().ok_or(bus::Error::Generic)?);

    let response = send_with_retry(bus, Command::SendRelativeAddress, config.command_retries)?;
    let rca = R6(response.short().ok_or(bus::Error::Generic)?).rca();

    let response = send_with_retry(bus, Command::SendCsd(rca), config.command_retries)?;
    let csd = CSD::try_from(response.long().ok_or(bus::Error::Generic)?)
        .ok_or(bus::Error::Generic)?;

    debug!("card {:?} at RCA {:#06x}", cid, rca);
    Ok(CardIdentity { cid, csd, rca })
}

/// Run the identification procedure: reset, capability negotiation,
/// family discrimination and, for memory cards, CID/RCA/CSD retrieval.
///
/// On return a memory card sits in stand-by; call [`setup`] to select
/// it for transfer. Failure leaves no identity resolved and the caller
/// decides whether to retry the whole procedure.
pub fn resolve<E>(
    bus: &mut impl Bus<Error = E>,
    delay: &mut impl Delay,
    config: &Config,
) -> Result<(CardType, Option<CardIdentity>), IdentificationError<E>> {
    let negotiation = negotiate(bus, delay, config)?;
    let card_type = decide(&negotiation);
    debug!("{:?} resolved as {:?}", negotiation, card_type);
    if !card_type.is_memory() {
        return Ok((card_type, None));
    }
    let identity = fetch_identity(bus, config)?;
    Ok((card_type, Some(identity)))
}

/// Post-identification bus setup: ready poll, select into transfer
/// state, fixed block length, and the 4-bit switch for SD cards.
pub(crate) fn setup<E>(
    bus: &mut impl Bus<Error = E>,
    delay: &mut impl Delay,
    config: &Config,
    card_type: CardType,
    identity: Option<&CardIdentity>,
) -> Result<StateTracker, IdentificationError<E>> {
    let rca = identity.map(|identity| identity.rca).unwrap_or(0);
    let mut tracker = StateTracker::new(rca, CardState::StandBy);
    if !card_type.is_memory() {
        return Ok(tracker);
    }

    tracker.await_ready_for_data(bus, delay, config)?;
    send_with_retry(bus, Command::SelectCard(rca), config.command_retries)?;
    tracker.set(CardState::Transfer);
    send_with_retry(bus, Command::SetBlockLength(BLOCK_SIZE as u32), config.command_retries)?;

    if card_type.is_sd() {
        send_with_retry(bus, Command::AppCommand(rca), config.command_retries)?;
        send_with_retry(
            bus,
            Command::App(AppCommand::SetBusWidth(BusWidth::Four)),
            config.command_retries,
        )?;
        bus.set_bus_width(BusWidth::Four)?;
        debug!("switched to 4-bit bus");
    }
    Ok(tracker)
}

#[cfg(test)]
mod test {
    use super::{decide, resolve, IdentificationError, VoltageNegotiation};
    use crate::bus::mock::CardSim;
    use crate::delay::std::Delay;
    use crate::sd::{CardType, Config};

    fn quick() -> Config {
        Config {
            command_retries: 4,
            op_cond_attempts: 8,
            op_cond_delay_ms: 1,
            ready_attempts: 8,
            ready_delay_ms: 1,
        }
    }

    #[test]
    fn test_resolve_sd_v1() {
        let mut sim = CardSim::sd_v1();
        let (card_type, identity) = resolve(&mut sim, &mut Delay, &quick()).unwrap();
        assert_eq!(card_type, CardType::SDv1);
        assert_eq!(identity.unwrap().rca, sim.rca);
    }

    #[test]
    fn test_resolve_sd_v2_standard() {
        let mut sim = CardSim::sd_v2(false);
        let (card_type, identity) = resolve(&mut sim, &mut Delay, &quick()).unwrap();
        assert_eq!(card_type, CardType::SDv2Standard);
        assert!(identity.is_some());
    }

    #[test]
    fn test_resolve_sd_v2_high_capacity() {
        let mut sim = CardSim::sd_v2(true);
        let (card_type, identity) = resolve(&mut sim, &mut Delay, &quick()).unwrap();
        assert_eq!(card_type, CardType::SDv2HighCapacity);
        let identity = identity.unwrap();
        assert_eq!(identity.cid.manufacturer_id(), 0x03);
        let blocks: u64 = identity.csd.num_blocks().into();
        assert_eq!(blocks, 0x3B38 * 1024);
    }

    #[test]
    fn test_resolve_mmc_standard() {
        let mut sim = CardSim::mmc(false);
        let (card_type, _) = resolve(&mut sim, &mut Delay, &quick()).unwrap();
        assert_eq!(card_type, CardType::MMCStandard);
        // Discrimination reset CMD0 before the CMD1 branch
        assert_eq!(sim.count_of(0), 2);
    }

    #[test]
    fn test_resolve_mmc_high_density() {
        let mut sim = CardSim::mmc(true);
        let (card_type, _) = resolve(&mut sim, &mut Delay, &quick()).unwrap();
        assert_eq!(card_type, CardType::MMCHighDensity);
    }

    #[test]
    fn test_resolve_sdio_only() {
        let mut sim = CardSim::sdio_only(2);
        let (card_type, identity) = resolve(&mut sim, &mut Delay, &quick()).unwrap();
        assert_eq!(card_type, CardType::SDIO);
        assert!(identity.is_none());
        // No identity fetch and no MMC discrimination for an I/O-only card
        assert_eq!(sim.count_of(2), 0);
        assert_eq!(sim.count_of(3), 0);
        assert_eq!(sim.count_of(9), 0);
        assert_eq!(sim.count_of(1), 0);
    }

    #[test]
    fn test_resolve_sdio_voltage_mismatch_rules_sdio_out() {
        let mut sim = CardSim::sdio_only(1);
        sim.sdio_voltage_ok = false;
        let error = resolve(&mut sim, &mut Delay, &quick()).unwrap_err();
        assert_eq!(error, IdentificationError::NoCardDetected);
    }

    #[test]
    fn test_resolve_dead_card_times_out() {
        let mut sim = CardSim::dead();
        let error = resolve(&mut sim, &mut Delay, &quick()).unwrap_err();
        assert_eq!(error, IdentificationError::Timeout);
    }

    #[test]
    fn test_decide_branch_table() {
        let negotiation = VoltageNegotiation {
            supports_cmd8: true,
            high_capacity_requested: true,
            ccs: Some(true),
            ..Default::default()
        };
        assert_eq!(decide(&negotiation), CardType::SDv2HighCapacity);

        let negotiation = VoltageNegotiation {
            supports_cmd8: true,
            ccs: Some(false),
            ..Default::default()
        };
        assert_eq!(decide(&negotiation), CardType::SDv2Standard);

        let negotiation =
            VoltageNegotiation { ccs: Some(false), ..Default::default() };
        assert_eq!(decide(&negotiation), CardType::SDv1);

        let negotiation =
            VoltageNegotiation { mmc_access_mode: Some(0b00), ..Default::default() };
        assert_eq!(decide(&negotiation), CardType::MMCHighDensity);
        let negotiation =
            VoltageNegotiation { mmc_access_mode: Some(0b11), ..Default::default() };
        assert_eq!(decide(&negotiation), CardType::MMCHighDensity);
        let negotiation =
            VoltageNegotiation { mmc_access_mode: Some(0b10), ..Default::default() };
        assert_eq!(decide(&negotiation), CardType::MMCStandard);

        let negotiation =
            VoltageNegotiation { sdio_functions: Some(1), ..Default::default() };
        assert_eq!(decide(&negotiation), CardType::SDIO);

        assert_eq!(decide(&VoltageNegotiation::default()), CardType::Unknown);
    }
}
