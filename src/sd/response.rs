use bitfield::Bit;

/// Raw response collected by the transport.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Response {
    None,
    Short(u32),
    Long(u128),
}

impl Response {
    pub fn short(self) -> Option<u32> {
        match self {
            Self::Short(value) => Some(value),
            _ => None,
        }
    }

    pub fn long(self) -> Option<u128> {
        match self {
            Self::Long(value) => Some(value),
            _ => None,
        }
    }
}

/// R1 card status, returned by most addressed commands.
#[derive(Copy, Clone, Debug, Default)]
#[repr(C)]
pub struct CardStatus(pub u32);

const STATUS_ERROR_MASK: u32 = 0xFDF9_8008;

impl CardStatus {
    pub fn out_of_range(self) -> bool {
        self.0.bit(31)
    }

    pub fn com_crc_error(self) -> bool {
        self.0.bit(23)
    }

    pub fn illegal_command(self) -> bool {
        self.0.bit(22)
    }

    /// Current-state field, bits 12:9.
    pub fn current_state(self) -> u8 {
        (self.0 >> 9) as u8 & 0xF
    }

    pub fn ready_for_data(self) -> bool {
        self.0.bit(8)
    }

    pub fn app_cmd(self) -> bool {
        self.0.bit(5)
    }

    pub fn any_error(self) -> bool {
        self.0 & STATUS_ERROR_MASK != 0
    }
}

/// R3, the OCR register. Shared by ACMD41 and the MMC CMD1.
#[derive(Copy, Clone, Default, Debug)]
#[repr(C)]
pub struct R3(pub u32);

impl R3 {
    /// Power-up done, negation of the card-busy indication.
    pub fn ready(self) -> bool {
        self.0.bit(31)
    }

    pub fn card_capacity_status(self) -> bool {
        self.0.bit(30)
    }

    /// MMC access-mode field, bits 30:29.
    pub fn access_mode(self) -> u8 {
        (self.0 >> 29) as u8 & 0b11
    }
}

/// R4, the SDIO operation-condition response.
#[derive(Copy, Clone, Default, Debug)]
#[repr(C)]
pub struct R4(pub u32);

impl R4 {
    pub fn ready(self) -> bool {
        self.0.bit(31)
    }

    pub fn function_count(self) -> u8 {
        (self.0 >> 28) as u8 & 0b111
    }

    pub fn memory_present(self) -> bool {
        self.0.bit(27)
    }
}

/// R6, published RCA response.
#[derive(Copy, Clone, Default, Debug)]
#[repr(C)]
pub struct R6(pub u32);

impl R6 {
    pub fn rca(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

#[derive(Copy, Clone, Default, Debug)]
pub struct R7(pub u32);

impl R7 {
    pub fn voltage_accepted(self) -> bool {
        self.0.bit(8) // only bit 8 meaningful, for now
    }

    pub fn echo_back_check_pattern(self) -> u8 {
        self.0 as u8
    }
}

mod test {
    #[test]
    fn test_card_status_fields() {
        use super::CardStatus;

        let status = CardStatus(0x0000_0920); // transfer state, ready, app-cmd
        assert_eq!(status.current_state(), 4);
        assert!(status.ready_for_data());
        assert!(status.app_cmd());
        assert!(!status.any_error());

        let status = CardStatus(0x0040_0000);
        assert!(status.illegal_command());
        assert!(status.any_error());
    }

    #[test]
    fn test_r4_fields() {
        use super::R4;

        let r4 = R4(0xA800_0000);
        assert!(r4.ready());
        assert_eq!(r4.function_count(), 2);
        assert!(r4.memory_present());
    }
}
