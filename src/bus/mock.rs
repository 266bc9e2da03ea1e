//! Scripted card simulator used by the engine's tests.

use crate::bus::{Bus, BusWidth, Error};
use crate::sd::command::Command;
use crate::sd::response::Response;

/// How the simulated card answers operation-condition negotiation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum OpCond {
    /// Report busy for `busy_polls` attempts, then ready with this OCR.
    Ready { ocr: u32, busy_polls: u32 },
    /// Never respond.
    Ignore,
}

pub(crate) struct CardSim {
    pub supports_cmd8: bool,
    pub sdio_functions: u8,
    pub sdio_voltage_ok: bool,
    pub acmd41: OpCond,
    pub cmd1: OpCond,
    pub rca: u16,
    pub cid: u128,
    pub csd: u128,
    /// Every command except CMD0 fails with a transport timeout.
    pub dead: bool,

    state: u8, // current-state field the card reports
    acmd_armed: bool,
    acmd41_polls: u32,
    cmd1_polls: u32,
    fail_data_after: Option<u32>,
    commands: Vec<(u8, u32)>,
    block_count_configs: Vec<u16>,
    block_length_configs: Vec<u16>,
    pub(crate) bus_width: BusWidth,
    pub(crate) data_ops: u32,
}

const STATE_IDLE: u8 = 0;
const STATE_IDENT: u8 = 2;
const STATE_STBY: u8 = 3;
const STATE_TRAN: u8 = 4;
const STATE_DATA: u8 = 5;
const STATE_RCV: u8 = 6;

impl CardSim {
    fn new() -> Self {
        Self {
            supports_cmd8: false,
            sdio_functions: 0,
            sdio_voltage_ok: true,
            acmd41: OpCond::Ignore,
            cmd1: OpCond::Ignore,
            rca: 0xB368,
            cid: 0x0353_4453_4438_4742_8012_3456_7801_59D5,
            csd: 0x400E_0032_5B59_0000_3B37_7F80_0A40_40C3,
            dead: false,
            state: STATE_IDLE,
            acmd_armed: false,
            acmd41_polls: 0,
            cmd1_polls: 0,
            fail_data_after: None,
            commands: Vec::new(),
            block_count_configs: Vec::new(),
            block_length_configs: Vec::new(),
            bus_width: BusWidth::One,
            data_ops: 0,
        }
    }

    pub fn sd_v1() -> Self {
        Self {
            acmd41: OpCond::Ready { ocr: 0x80FF_8000, busy_polls: 2 },
            csd: 0x0000_0000_0090_3A7A_3B80_0000_0000_0000, // CSD v1
            ..Self::new()
        }
    }

    pub fn sd_v2(high_capacity: bool) -> Self {
        let ccs = (high_capacity as u32) << 30;
        Self {
            supports_cmd8: true,
            acmd41: OpCond::Ready { ocr: 0x80FF_8000 | ccs, busy_polls: 2 },
            ..Self::new()
        }
    }

    pub fn mmc(high_density: bool) -> Self {
        // Access-mode bits 30:29 equal marks high density.
        let ocr = if high_density { 0x80FF_8000 } else { 0xC0FF_8000 };
        Self { cmd1: OpCond::Ready { ocr, busy_polls: 2 }, ..Self::new() }
    }

    pub fn sdio_only(functions: u8) -> Self {
        Self { sdio_functions: functions, ..Self::new() }
    }

    pub fn dead() -> Self {
        Self { dead: true, ..Self::new() }
    }

    /// Fail the data phase after `ops` successful block transfers.
    pub fn fail_data_after(&mut self, ops: u32) {
        self.fail_data_after = Some(ops);
    }

    pub fn commands(&self) -> &[(u8, u32)] {
        &self.commands
    }

    pub fn command_indices(&self) -> Vec<u8> {
        self.commands.iter().map(|&(index, _)| index).collect()
    }

    pub fn count_of(&self, index: u8) -> usize {
        self.commands.iter().filter(|&&(i, _)| i == index).count()
    }

    pub fn block_count_configs(&self) -> &[u16] {
        &self.block_count_configs
    }

    pub fn block_length_configs(&self) -> &[u16] {
        &self.block_length_configs
    }

    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.block_count_configs.clear();
        self.block_length_configs.clear();
    }

    fn status(&self) -> u32 {
        (self.state as u32) << 9 | 1 << 8
    }

    fn op_cond_response(behavior: OpCond, polls: &mut u32) -> Result<Response, Error<()>> {
        match behavior {
            OpCond::Ignore => Err(Error::NoResponse),
            OpCond::Ready { ocr, busy_polls } => {
                if *polls < busy_polls {
                    *polls += 1;
                    Ok(Response::Short(ocr & !(1 << 31)))
                } else {
                    Ok(Response::Short(ocr))
                }
            }
        }
    }
}

impl Bus for CardSim {
    type Error = ();

    fn send_command(&mut self, command: Command) -> Result<Response, Error<()>> {
        let index = command.index();
        let argument = command.argument();
        self.commands.push((index, argument));
        if self.dead && index != 0 {
            return Err(Error::Timeout);
        }

        let armed = self.acmd_armed;
        self.acmd_armed = false;
        match (index, armed) {
            (0, _) => {
                self.state = STATE_IDLE;
                Ok(Response::None)
            }
            (8, _) if self.supports_cmd8 => Ok(Response::Short(argument & 0xFFF)),
            (8, _) => Err(Error::NoResponse),
            (5, _) if self.sdio_functions > 0 => {
                if argument != 0 && !self.sdio_voltage_ok {
                    return Err(Error::NoResponse);
                }
                let r4 = 1 << 31 | (self.sdio_functions as u32) << 28 | 0x00FF_8000;
                Ok(Response::Short(r4))
            }
            (5, _) => Err(Error::NoResponse),
            (55, _) if self.acmd41 != OpCond::Ignore => {
                self.acmd_armed = true;
                Ok(Response::Short(self.status() | 1 << 5))
            }
            (55, _) => Err(Error::NoResponse),
            (41, true) => Self::op_cond_response(self.acmd41, &mut self.acmd41_polls),
            (1, _) => Self::op_cond_response(self.cmd1, &mut self.cmd1_polls),
            (2, _) => {
                self.state = STATE_IDENT;
                Ok(Response::Long(self.cid))
            }
            (3, _) => {
                self.state = STATE_STBY;
                Ok(Response::Short((self.rca as u32) << 16))
            }
            (9, _) => Ok(Response::Long(self.csd)),
            (13, _) => Ok(Response::Short(self.status())),
            (7, _) => {
                self.state = STATE_TRAN;
                Ok(Response::Short(self.status()))
            }
            (6, true) | (16, _) => Ok(Response::Short(self.status())),
            (17, _) | (18, _) => {
                self.state = STATE_DATA;
                Ok(Response::Short(self.status()))
            }
            (24, _) | (25, _) => {
                self.state = STATE_RCV;
                Ok(Response::Short(self.status()))
            }
            (12, _) => {
                self.state = STATE_TRAN;
                Ok(Response::Short(self.status()))
            }
            _ => Err(Error::NoResponse),
        }
    }

    fn configure_block_count(&mut self, count: u16) -> Result<(), Error<()>> {
        self.block_count_configs.push(count);
        Ok(())
    }

    fn configure_block_length(&mut self, length: u16) -> Result<(), Error<()>> {
        self.block_length_configs.push(length);
        Ok(())
    }

    fn read_data(&mut self, buffer: &mut [u8]) -> Result<(), Error<()>> {
        if self.fail_data_after == Some(self.data_ops) {
            self.fail_data_after = None;
            return Err(Error::Timeout);
        }
        for (offset, byte) in buffer.iter_mut().enumerate() {
            *byte = (self.data_ops as usize + offset) as u8;
        }
        self.data_ops += 1;
        Ok(())
    }

    fn write_data(&mut self, _buffer: &[u8]) -> Result<(), Error<()>> {
        if self.fail_data_after == Some(self.data_ops) {
            self.fail_data_after = None;
            return Err(Error::Timeout);
        }
        self.data_ops += 1;
        Ok(())
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), Error<()>> {
        self.bus_width = width;
        Ok(())
    }
}
