//! DNS type/class/opcode/rcode constants (RFC 1035 and assorted follow-ups).
//!
//! Kept as thin newtypes over the wire integers rather than closed enums:
//! a forwarder must round-trip record types it doesn't understand, so
//! `QType`/`QClass` carry an `Other(u16)` escape hatch instead of failing
//! to parse.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct QType(pub u16);

impl QType {
    pub const A: QType = QType(1);
    pub const NS: QType = QType(2);
    pub const CNAME: QType = QType(5);
    pub const SOA: QType = QType(6);
    pub const PTR: QType = QType(12);
    pub const MX: QType = QType(15);
    pub const TXT: QType = QType(16);
    pub const AAAA: QType = QType(28);
    pub const SRV: QType = QType(33);
    pub const NAPTR: QType = QType(35);
    pub const OPT: QType = QType(41);
    pub const DS: QType = QType(43);
    pub const RRSIG: QType = QType(46);
    pub const NSEC: QType = QType(47);
    pub const DNSKEY: QType = QType(48);
    pub const NSEC3: QType = QType(50);
    pub const CAA: QType = QType(257);
    pub const SVCB: QType = QType(64);
    pub const HTTPS: QType = QType(65);
    pub const AXFR: QType = QType(252);
    pub const ANY: QType = QType(255);

    pub fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::PTR => "PTR",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::SRV => "SRV",
            Self::NAPTR => "NAPTR",
            Self::OPT => "OPT",
            Self::DS => "DS",
            Self::RRSIG => "RRSIG",
            Self::NSEC => "NSEC",
            Self::DNSKEY => "DNSKEY",
            Self::NSEC3 => "NSEC3",
            Self::CAA => "CAA",
            Self::SVCB => "SVCB",
            Self::HTTPS => "HTTPS",
            Self::AXFR => "AXFR",
            Self::ANY => "ANY",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name() == "UNKNOWN" {
            write!(f, "TYPE{}", self.0)
        } else {
            write!(f, "{}", self.name())
        }
    }
}

impl From<u16> for QType {
    fn from(v: u16) -> Self {
        QType(v)
    }
}
impl From<QType> for u16 {
    fn from(v: QType) -> Self {
        v.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct QClass(pub u16);

impl QClass {
    pub const IN: QClass = QClass(1);
    pub const CH: QClass = QClass(3);
    pub const HS: QClass = QClass(4);
    pub const ANY: QClass = QClass(255);
}

impl From<u16> for QClass {
    fn from(v: u16) -> Self {
        QClass(v)
    }
}
impl From<QClass> for u16 {
    fn from(v: QClass) -> Self {
        v.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rcode(pub u8);

impl Rcode {
    pub const NOERROR: Rcode = Rcode(0);
    pub const FORMERR: Rcode = Rcode(1);
    pub const SERVFAIL: Rcode = Rcode(2);
    pub const NXDOMAIN: Rcode = Rcode(3);
    pub const NOTIMP: Rcode = Rcode(4);
    pub const REFUSED: Rcode = Rcode(5);
    pub const BADVERS: Rcode = Rcode(16);
}

impl From<u8> for Rcode {
    fn from(v: u8) -> Self {
        Rcode(v)
    }
}
impl From<Rcode> for u8 {
    fn from(v: Rcode) -> Self {
        v.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

impl Opcode {
    pub const QUERY: Opcode = Opcode(0);
    pub const IQUERY: Opcode = Opcode(1);
    pub const STATUS: Opcode = Opcode(2);
    pub const NOTIFY: Opcode = Opcode(4);
    pub const UPDATE: Opcode = Opcode(5);
}
