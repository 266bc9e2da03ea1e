use crate::bus::BusWidth;

/// Voltage window requested during operation-condition negotiation,
/// 2.7-3.6V.
pub const VOLTAGE_WINDOW: u32 = 0x00FF_8000;

/// High-density flag for the MMC operation-condition argument.
pub const MMC_HIGH_DENSITY_FLAG: u32 = 1 << 30;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SendInterfaceCondition {
    pub pcie_1_2v_suppport: bool, // PCIe 1.2V
    pub pcie_availability: bool,
    pub voltage_supplied: bool,
    pub check_pattern: u8,
}

impl SendInterfaceCondition {
    pub fn check() -> Self {
        Self { voltage_supplied: true, check_pattern: 0xAA, ..Default::default() }
    }
}

impl Into<u32> for SendInterfaceCondition {
    fn into(self) -> u32 {
        (self.pcie_1_2v_suppport as u32) << 15
            | (self.pcie_availability as u32) << 14
            | (self.voltage_supplied as u32) << 8
            | self.check_pattern as u32
    }
}

pub type RCA = u16;
pub type Address = u32;

/// What the transport should wait for after issuing a command.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ResponseKind {
    None,
    Short,     // 48-bit R1/R3/R4/R6/R7
    ShortBusy, // 48-bit with busy signalling on DAT0
    Long,      // 136-bit R2
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AppCommand {
    SetBusWidth(BusWidth),
    SDSendOpCond(bool), // host-capacity-support
}

impl AppCommand {
    pub fn index(self) -> u8 {
        match self {
            Self::SetBusWidth(_) => 6,
            Self::SDSendOpCond(_) => 41,
        }
    }

    pub fn argument(self) -> u32 {
        match self {
            Self::SetBusWidth(BusWidth::One) => 0b00,
            Self::SetBusWidth(BusWidth::Four) => 0b10,
            Self::SDSendOpCond(hcs) => (hcs as u32) << 30 | VOLTAGE_WINDOW,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    GoIdleState,
    SendOpCond(u32), // MMC only
    AllSendCid,
    SendRelativeAddress,
    IoSendOpCond(u32), // SDIO only
    SelectCard(RCA),
    SendIfCond(SendInterfaceCondition),
    SendCsd(RCA),
    StopTransmission,
    SendStatus(RCA),
    SetBlockLength(u32),
    ReadSingleBlock(Address),
    ReadMultipleBlock(Address),
    WriteBlock(Address),
    WriteMultipleBlock(Address),
    AppCommand(RCA),
    App(AppCommand),
}

impl Command {
    pub fn index(self) -> u8 {
        match self {
            Self::GoIdleState => 0,
            Self::SendOpCond(_) => 1,
            Self::AllSendCid => 2,
            Self::SendRelativeAddress => 3,
            Self::IoSendOpCond(_) => 5,
            Self::SelectCard(_) => 7,
            Self::SendIfCond(_) => 8,
            Self::SendCsd(_) => 9,
            Self::StopTransmission => 12,
            Self::SendStatus(_) => 13,
            Self::SetBlockLength(_) => 16,
            Self::ReadSingleBlock(_) => 17,
            Self::ReadMultipleBlock(_) => 18,
            Self::WriteBlock(_) => 24,
            Self::WriteMultipleBlock(_) => 25,
            Self::AppCommand(_) => 55,
            Self::App(command) => command.index(),
        }
    }

    pub fn argument(self) -> u32 {
        match self {
            Self::GoIdleState
            | Self::AllSendCid
            | Self::SendRelativeAddress
            | Self::StopTransmission => 0,
            Self::SendOpCond(ocr) | Self::IoSendOpCond(ocr) => ocr,
            Self::SendIfCond(cond) => cond.into(),
            Self::SelectCard(rca)
            | Self::SendCsd(rca)
            | Self::SendStatus(rca)
            | Self::AppCommand(rca) => (rca as u32) << 16,
            Self::SetBlockLength(length) => length,
            Self::ReadSingleBlock(address)
            | Self::ReadMultipleBlock(address)
            | Self::WriteBlock(address)
            | Self::WriteMultipleBlock(address) => address,
            Self::App(command) => command.argument(),
        }
    }

    pub fn response_kind(self) -> ResponseKind {
        match self {
            Self::GoIdleState => ResponseKind::None,
            Self::AllSendCid | Self::SendCsd(_) => ResponseKind::Long,
            Self::SelectCard(_) | Self::StopTransmission => ResponseKind::ShortBusy,
            _ => ResponseKind::Short,
        }
    }
}

mod test {
    #[test]
    fn test_command_encoding() {
        use super::{AppCommand, Command, SendInterfaceCondition};
        use crate::bus::BusWidth;

        let cmd = Command::SendIfCond(SendInterfaceCondition::check());
        assert_eq!(cmd.index(), 8);
        assert_eq!(cmd.argument(), 0x1AA);

        let cmd = Command::App(AppCommand::SDSendOpCond(true));
        assert_eq!(cmd.index(), 41);
        assert_eq!(cmd.argument(), 0x40FF_8000);

        let cmd = Command::App(AppCommand::SetBusWidth(BusWidth::Four));
        assert_eq!(cmd.index(), 6);
        assert_eq!(cmd.argument(), 2);

        let cmd = Command::SendCsd(0xAB12);
        assert_eq!(cmd.index(), 9);
        assert_eq!(cmd.argument(), 0xAB12_0000);

        let cmd = Command::ReadMultipleBlock(0x8000);
        assert_eq!(cmd.index(), 18);
        assert_eq!(cmd.argument(), 0x8000);
    }

    #[test]
    fn test_response_kinds() {
        use super::{Command, ResponseKind};

        assert_eq!(Command::GoIdleState.response_kind(), ResponseKind::None);
        assert_eq!(Command::AllSendCid.response_kind(), ResponseKind::Long);
        assert_eq!(Command::StopTransmission.response_kind(), ResponseKind::ShortBusy);
        assert_eq!(Command::SendStatus(1).response_kind(), ResponseKind::Short);
    }
}
