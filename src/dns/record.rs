//! Resource records. A forwarder needs to shuttle record types it has
//! never heard of without choking, so most types round-trip as opaque
//! bytes (`RData::Raw`); only the handful the pipeline actually inspects
//! (A/AAAA for answer shaping, SOA for negative-cache TTL, OPT for
//! EDNS0) get a structured representation.

use super::edns::Opt;
use super::enums::{QClass, QType};
use super::name::Name;
use super::wire::{Reader, Writer};
use crate::error::Result;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Mx { preference: u16, exchange: Name },
    Soa {
        mname: Name,
        rname: Name,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Txt(Vec<Vec<u8>>),
    Srv { priority: u16, weight: u16, port: u16, target: Name },
    Opt(Opt),
    /// Anything else: passed through byte-for-byte so unknown/ new RR
    /// types never fail a forward.
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub rtype: QType,
    pub rclass: QClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new_a(name: Name, ttl: u32, addr: Ipv4Addr) -> Self {
        Self { name, rtype: QType::A, rclass: QClass::IN, ttl, rdata: RData::A(addr) }
    }

    pub fn new_aaaa(name: Name, ttl: u32, addr: Ipv6Addr) -> Self {
        Self { name, rtype: QType::AAAA, rclass: QClass::IN, ttl, rdata: RData::Aaaa(addr) }
    }

    pub fn new_opt(udp_payload_size: u16, opt: Opt) -> Self {
        Self {
            name: Name::root(),
            rtype: QType::OPT,
            rclass: QClass(udp_payload_size),
            ttl: opt.ttl_field(),
            rdata: RData::Opt(opt),
        }
    }

    pub fn is_opt(&self) -> bool {
        self.rtype == QType::OPT
    }

    /// For an OPT record, returns the decoded `Opt` with `udp_payload_size`
    /// populated from the class field (RFC 6891 §6.1.2).
    pub fn as_opt(&self) -> Option<Opt> {
        match &self.rdata {
            RData::Opt(o) => {
                let mut o = o.clone();
                o.udp_payload_size = self.rclass.0;
                Some(o)
            }
            _ => None,
        }
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let name = Name::read(reader)?;
        let rtype = QType(reader.read_u16()?);
        let rclass = QClass(reader.read_u16()?);
        let ttl = reader.read_u32()?;
        let rdlength = reader.read_u16()?;
        let rdata_start = reader.pos;

        let rdata = if rtype == QType::OPT {
            RData::Opt(Opt::read_rdata(reader, rdlength, ttl)?)
        } else {
            match rtype {
                QType::A => {
                    let bytes = reader.read_bytes(4)?;
                    RData::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
                }
                QType::AAAA => {
                    let bytes = reader.read_bytes(16)?;
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(bytes);
                    RData::Aaaa(Ipv6Addr::from(octets))
                }
                QType::NS => RData::Ns(Name::read(reader)?),
                QType::CNAME => RData::Cname(Name::read(reader)?),
                QType::PTR => RData::Ptr(Name::read(reader)?),
                QType::MX => {
                    let preference = reader.read_u16()?;
                    let exchange = Name::read(reader)?;
                    RData::Mx { preference, exchange }
                }
                QType::SOA => {
                    let mname = Name::read(reader)?;
                    let rname = Name::read(reader)?;
                    let serial = reader.read_u32()?;
                    let refresh = reader.read_u32()?;
                    let retry = reader.read_u32()?;
                    let expire = reader.read_u32()?;
                    let minimum = reader.read_u32()?;
                    RData::Soa { mname, rname, serial, refresh, retry, expire, minimum }
                }
                QType::TXT => {
                    let end = rdata_start + rdlength as usize;
                    let mut segments = Vec::new();
                    while reader.pos < end {
                        let len = reader.read_u8()? as usize;
                        segments.push(reader.read_bytes(len)?.to_vec());
                    }
                    RData::Txt(segments)
                }
                QType::SRV => {
                    let priority = reader.read_u16()?;
                    let weight = reader.read_u16()?;
                    let port = reader.read_u16()?;
                    let target = Name::read(reader)?;
                    RData::Srv { priority, weight, port, target }
                }
                _ => RData::Raw(reader.read_bytes(rdlength as usize)?.to_vec()),
            }
        };

        // Defensive: some decoders (name compression inside rdata) may
        // leave the cursor short or long of rdlength; re-anchor so the
        // next record parses from the declared boundary rather than
        // drifting on a malformed or unusually-compressed record.
        reader.pos = rdata_start + rdlength as usize;

        Ok(Self { name, rtype, rclass, ttl, rdata })
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        self.name.write(writer)?;
        writer.write_u16(self.rtype.0);
        writer.write_u16(self.rclass.0);
        writer.write_u32(self.ttl);

        let rdata_len_pos = writer.len();
        writer.write_u16(0); // placeholder, patched below

        match &self.rdata {
            RData::A(addr) => writer.write_bytes(&addr.octets()),
            RData::Aaaa(addr) => writer.write_bytes(&addr.octets()),
            RData::Ns(n) | RData::Cname(n) | RData::Ptr(n) => n.write(writer)?,
            RData::Mx { preference, exchange } => {
                writer.write_u16(*preference);
                exchange.write(writer)?;
            }
            RData::Soa { mname, rname, serial, refresh, retry, expire, minimum } => {
                mname.write(writer)?;
                rname.write(writer)?;
                writer.write_u32(*serial);
                writer.write_u32(*refresh);
                writer.write_u32(*retry);
                writer.write_u32(*expire);
                writer.write_u32(*minimum);
            }
            RData::Txt(segments) => {
                for seg in segments {
                    writer.write_u8(seg.len().min(255) as u8);
                    writer.write_bytes(&seg[..seg.len().min(255)]);
                }
            }
            RData::Srv { priority, weight, port, target } => {
                writer.write_u16(*priority);
                writer.write_u16(*weight);
                writer.write_u16(*port);
                target.write(writer)?;
            }
            RData::Opt(opt) => opt.write_rdata(writer)?,
            RData::Raw(bytes) => writer.write_bytes(bytes),
        }

        let rdata_len = (writer.len() - rdata_len_pos - 2) as u16;
        let len_bytes = rdata_len.to_be_bytes();
        writer.buf[rdata_len_pos] = len_bytes[0];
        writer.buf[rdata_len_pos + 1] = len_bytes[1];
        Ok(())
    }
}
