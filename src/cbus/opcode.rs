//! CBUS opcodes and CAN priorities.
//!
//! The top three bits of an opcode give the number of data bytes that follow
//! it, so a frame length is known from its first byte.

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $value:literal, )*) => {
        /// CBUS opcode.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        #[allow(missing_docs, clippy::upper_case_acronyms)]
        pub enum OpCode {
            $( $(#[$doc])* $name = $value, )*
        }

        impl OpCode {
            /// Look up an opcode byte. `None` for unassigned values.
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $( $value => Some(OpCode::$name), )*
                    _ => None,
                }
            }

            /// Mnemonic as used in the CBUS developer guide.
            pub const fn name(&self) -> &'static str {
                match self {
                    $( OpCode::$name => stringify!($name), )*
                }
            }
        }
    };
}

opcodes! {
    // 00-1F: no data
    ACK = 0x00,
    NAK = 0x01,
    HLT = 0x02,
    BON = 0x03,
    TOF = 0x04,
    TON = 0x05,
    ESTOP = 0x06,
    ARST = 0x07,
    RTOF = 0x08,
    RTON = 0x09,
    RESTP = 0x0A,
    RSTAT = 0x0C,
    QNN = 0x0D,
    RQNP = 0x10,
    RQMN = 0x11,
    // 20-3F: 1 data byte
    KLOC = 0x21,
    QLOC = 0x22,
    DKEEP = 0x23,
    DBG1 = 0x30,
    EXTC = 0x3F,
    // 40-5F: 2 data bytes
    RLOC = 0x40,
    QCON = 0x41,
    SNN = 0x42,
    ALOC = 0x43,
    STMOD = 0x44,
    PCON = 0x45,
    KCON = 0x46,
    DSPD = 0x47,
    DFLG = 0x48,
    DFNON = 0x49,
    DFNOF = 0x4A,
    SSTAT = 0x4C,
    NNRSM = 0x4F,
    RQNN = 0x50,
    NNREL = 0x51,
    NNACK = 0x52,
    NNLRN = 0x53,
    NNULN = 0x54,
    NNCLR = 0x55,
    NNEVN = 0x56,
    NERD = 0x57,
    RQEVN = 0x58,
    WRACK = 0x59,
    RQDAT = 0x5A,
    RQDDS = 0x5B,
    BOOTM = 0x5C,
    ENUM = 0x5D,
    NNRST = 0x5E,
    EXTC1 = 0x5F,
    // 60-7F: 3 data bytes
    DFUN = 0x60,
    GLOC = 0x61,
    ERR = 0x63,
    CMDERR = 0x6F,
    EVNLF = 0x70,
    NVRD = 0x71,
    NENRD = 0x72,
    RQNPN = 0x73,
    NUMEV = 0x74,
    CANID = 0x75,
    EXTC2 = 0x7F,
    // 80-9F: 4 data bytes
    RDCC3 = 0x80,
    WCVO = 0x82,
    WCVB = 0x83,
    QCVS = 0x84,
    PCVS = 0x85,
    ACON = 0x90,
    ACOF = 0x91,
    AREQ = 0x92,
    ARON = 0x93,
    AROF = 0x94,
    EVULN = 0x95,
    NVSET = 0x96,
    NVANS = 0x97,
    ASON = 0x98,
    ASOF = 0x99,
    ASRQ = 0x9A,
    PARAN = 0x9B,
    REVAL = 0x9C,
    ARSON = 0x9D,
    ARSOF = 0x9E,
    EXTC3 = 0x9F,
    // A0-BF: 5 data bytes
    RDCC4 = 0xA0,
    WCVS = 0xA2,
    ACON1 = 0xB0,
    ACOF1 = 0xB1,
    REQEV = 0xB2,
    ARON1 = 0xB3,
    AROF1 = 0xB4,
    NEVAL = 0xB5,
    PNN = 0xB6,
    ASON1 = 0xB8,
    ASOF1 = 0xB9,
    ARSON1 = 0xBD,
    ARSOF1 = 0xBE,
    EXTC4 = 0xBF,
    // C0-DF: 6 data bytes
    RDCC5 = 0xC0,
    WCVOA = 0xC1,
    CABDAT = 0xC2,
    FCLK = 0xCF,
    // E0-FF: 7 data bytes
    RDCC6 = 0xE0,
    PLOC = 0xE1,
    NAME = 0xE2,
    STAT = 0xE3,
    PARAMS = 0xEF,
    ACON3 = 0xF0,
    ACOF3 = 0xF1,
    ENRSP = 0xF2,
    ARON3 = 0xF3,
    AROF3 = 0xF4,
    EVLRNI = 0xF5,
    ACDAT = 0xF6,
    ARDAT = 0xF7,
    ASON3 = 0xF8,
    ASOF3 = 0xF9,
    DDES = 0xFA,
    DDRS = 0xFB,
    ARSON3 = 0xFD,
    ARSOF3 = 0xFE,
    EXTC6 = 0xFF,
}

/// Number of data bytes after an opcode byte.
#[inline]
pub const fn data_len(opcode: u8) -> usize {
    (opcode >> 5) as usize
}

impl OpCode {
    /// Opcode byte.
    #[inline]
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// Number of data bytes.
    #[inline]
    pub const fn data_len(&self) -> usize {
        data_len(self.code())
    }

    /// CAN minor priority for this opcode.
    pub const fn minor_priority(&self) -> MinorPriority {
        use OpCode::*;
        match self {
            HLT | ARST | RESTP => MinorPriority::High,
            BON | TOF | TON | ESTOP | RTOF | RTON => MinorPriority::AboveNormal,
            ACK | NAK | RSTAT | RQMN | KLOC | QLOC | DKEEP | DBG1 | RLOC | QCON | ALOC
            | STMOD | PCON | KCON | DSPD | DFLG | DFNON | DFNOF | DFUN | GLOC | ERR | RDCC3
            | WCVO | WCVB | QCVS | PCVS | RDCC4 | WCVS | RDCC5 | WCVOA | CABDAT | FCLK
            | RDCC6 | PLOC | STAT => MinorPriority::Normal,
            _ => MinorPriority::Low,
        }
    }
}

/// Major priority, the top two bits of the CAN standard identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MajorPriority {
    /// Reserved for bus arbitration recovery.
    Highest = 0b00,
    /// Raised after a lost arbitration.
    Next = 0b01,
    /// Normal traffic.
    Lowest = 0b10,
}

/// Minor priority, bits 12..13 of the CAN standard identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MinorPriority {
    /// Bus control and emergency stop.
    High = 0b00,
    /// Track power.
    AboveNormal = 0b01,
    /// Cab and command station traffic.
    Normal = 0b10,
    /// Layout events and configuration.
    Low = 0b11,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_len_comes_from_top_bits() {
        assert_eq!(OpCode::RSTAT.data_len(), 0);
        assert_eq!(OpCode::KLOC.data_len(), 1);
        assert_eq!(OpCode::DSPD.data_len(), 2);
        assert_eq!(OpCode::DFUN.data_len(), 3);
        assert_eq!(OpCode::RDCC3.data_len(), 4);
        assert_eq!(OpCode::RDCC4.data_len(), 5);
        assert_eq!(OpCode::RDCC5.data_len(), 6);
        assert_eq!(OpCode::PLOC.data_len(), 7);
    }

    #[test]
    fn lookup_round_trips_and_rejects_gaps() {
        assert_eq!(OpCode::from_u8(0xE3), Some(OpCode::STAT));
        assert_eq!(OpCode::STAT.code(), 0xE3);
        assert_eq!(OpCode::from_u8(0x0B), None);
        assert_eq!(OpCode::from_u8(0x81), None);
        assert_eq!(OpCode::RTON.name(), "RTON");
    }

    #[test]
    fn priorities() {
        assert_eq!(OpCode::RESTP.minor_priority(), MinorPriority::High);
        assert_eq!(OpCode::RTON.minor_priority(), MinorPriority::AboveNormal);
        assert_eq!(OpCode::RDCC4.minor_priority(), MinorPriority::Normal);
        assert_eq!(OpCode::QNN.minor_priority(), MinorPriority::Low);
        assert_eq!(OpCode::ACON.minor_priority(), MinorPriority::Low);
    }
}
