use bitfield::bitfield;

bitfield! {
    /// Card identification register, stored verbatim at identification.
    #[derive(Copy, Clone, PartialEq)]
    pub struct CID(u128);
    pub u8, manufacturer_id, _: 127, 120;
    pub u16, oem_id, _: 119, 104;
    pub u8, revision, _: 63, 56;
    pub u32, serial, _: 55, 24;
    pub u16, manufacturing_date, _: 19, 8;
}

impl core::fmt::Debug for CID {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("CID")
            .field("manufacturer_id", &self.manufacturer_id())
            .field("oem_id", &self.oem_id())
            .field("serial", &self.serial())
            .finish()
    }
}

bitfield! {
    #[derive(Copy, Clone)]
    pub struct CSDv1(u128);
    pub version, _: 127, 126;
    pub max_read_data_block_length, _: 83, 80;
    pub device_size, _: 73, 62;
    pub device_size_multiplier, _: 49, 47;
}

#[derive(Copy, Clone, Debug)]
pub struct NumBlocks {
    device_size: u32,
    multiplier: u16,
}

impl NumBlocks {
    pub fn device_size(&self) -> u32 {
        self.device_size
    }

    pub fn multiplier(&self) -> u16 {
        self.multiplier
    }
}

impl Into<u64> for NumBlocks {
    fn into(self) -> u64 {
        self.device_size as u64 * self.multiplier as u64
    }
}

impl CSDv1 {
    pub fn num_blocks(&self) -> NumBlocks {
        let multiplier = 1 << (self.device_size_multiplier() + 1);
        NumBlocks { device_size: self.device_size() as u32 + 1, multiplier }
    }

    pub fn read_block_size_shift(&self) -> u8 {
        self.max_read_data_block_length() as u8
    }
}

bitfield! {
    #[derive(Copy, Clone)]
    pub struct CSDv2(u128);
    pub device_size, _: 69, 48;
}

impl CSDv2 {
    pub fn num_blocks(&self) -> NumBlocks {
        NumBlocks { device_size: (self.device_size() as u32 + 1), multiplier: 1024 }
    }
}

bitfield! {
    #[derive(Copy, Clone)]
    pub struct CSDv3(u128);
    pub device_size, _: 75, 48;
}

impl CSDv3 {
    pub fn num_blocks(&self) -> NumBlocks {
        NumBlocks { device_size: (self.device_size() as u32 + 1), multiplier: 1024 }
    }
}

#[derive(Copy, Clone)]
pub enum CSD {
    V1(CSDv1),
    V2(CSDv2),
    V3(CSDv3),
}

impl CSD {
    pub fn try_from(value: u128) -> Option<CSD> {
        let csd = match CSDv1(value).version() {
            0 => Self::V1(CSDv1(value)),
            1 => Self::V2(CSDv2(value)),
            2 => Self::V3(CSDv3(value)),
            _ => return None,
        };
        Some(csd)
    }

    pub fn raw(&self) -> u128 {
        match self {
            Self::V1(csd) => csd.0,
            Self::V2(csd) => csd.0,
            Self::V3(csd) => csd.0,
        }
    }

    pub fn num_blocks(&self) -> NumBlocks {
        match self {
            Self::V1(csd) => csd.num_blocks(),
            Self::V2(csd) => csd.num_blocks(),
            Self::V3(csd) => csd.num_blocks(),
        }
    }

    pub fn block_size_shift(&self) -> u8 {
        match self {
            Self::V1(csd) => csd.read_block_size_shift(),
            _ => 9, // 512 bytes
        }
    }
}

impl core::fmt::Debug for CSD {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let version = match self {
            Self::V1(_) => 1u8,
            Self::V2(_) => 2,
            Self::V3(_) => 3,
        };
        f.debug_struct("CSD")
            .field("version", &version)
            .field("num_blocks", &self.num_blocks())
            .finish()
    }
}

mod test {
    #[test]
    fn test_csd_v2_capacity() {
        use super::CSD;
        use hex_literal::hex;

        // 8GB-class card: C_SIZE = 0x3B37
        let raw = u128::from_be_bytes(hex!("40 0E 00 32 5B 59 00 00 3B 37 7F 80 0A 40 40 C3"));
        let csd = CSD::try_from(raw).unwrap();
        let blocks: u64 = csd.num_blocks().into();
        assert_eq!(blocks, 0x3B38 * 1024);
        assert_eq!(csd.block_size_shift(), 9);
    }

    #[test]
    fn test_csd_v1_capacity() {
        use super::CSD;

        // C_SIZE = 0xE9E, C_SIZE_MULT = 7, READ_BL_LEN = 9
        let mut raw = 0u128;
        raw |= 9 << 80; // READ_BL_LEN
        raw |= 0xE9E << 62; // C_SIZE
        raw |= 7 << 47; // C_SIZE_MULT
        let csd = CSD::try_from(raw).unwrap();
        let blocks: u64 = csd.num_blocks().into();
        assert_eq!(blocks, 0xE9F * 256);
        assert_eq!(csd.block_size_shift(), 9);
    }

    #[test]
    fn test_cid_fields() {
        use super::CID;
        use hex_literal::hex;

        let cid = CID(u128::from_be_bytes(hex!("03 53 44 53 44 38 47 42 80 12 34 56 78 01 59 D5")));
        assert_eq!(cid.manufacturer_id(), 0x03);
        assert_eq!(cid.oem_id(), 0x5344);
        assert_eq!(cid.serial(), 0x1234_5678);
    }
}
