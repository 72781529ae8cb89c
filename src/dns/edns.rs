//! EDNS0 OPT pseudo-record (RFC 6891) plus the sub-options the handler
//! needs to inspect or rewrite per spec.md §4.6: Client Subnet (RFC 7871),
//! Cookie (RFC 7873), Padding (RFC 7830), Extended DNS Error (RFC 8914),
//! NSID (RFC 5001), TCP Keepalive (RFC 7828).

use super::wire::{Reader, Writer};
use crate::error::Result;

pub const DO_BIT: u16 = 0x8000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptCode {
    Nsid,
    ClientSubnet,
    Cookie,
    TcpKeepalive,
    Padding,
    ExtendedError,
    Other(u16),
}

impl From<u16> for OptCode {
    fn from(v: u16) -> Self {
        match v {
            3 => OptCode::Nsid,
            8 => OptCode::ClientSubnet,
            10 => OptCode::Cookie,
            11 => OptCode::TcpKeepalive,
            12 => OptCode::Padding,
            15 => OptCode::ExtendedError,
            other => OptCode::Other(other),
        }
    }
}

impl From<OptCode> for u16 {
    fn from(c: OptCode) -> Self {
        match c {
            OptCode::Nsid => 3,
            OptCode::ClientSubnet => 8,
            OptCode::Cookie => 10,
            OptCode::TcpKeepalive => 11,
            OptCode::Padding => 12,
            OptCode::ExtendedError => 15,
            OptCode::Other(v) => v,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: OptCode,
    pub data: Vec<u8>,
}

/// The OPT pseudo-RR. `udp_payload_size`/`extended_rcode`/`version`/`flags`
/// live in the RR's class/TTL fields on the wire (see `record.rs`); this
/// struct is the decoded, ergonomic form used throughout the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Opt {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<EdnsOption>,
}

impl Opt {
    pub fn new(udp_payload_size: u16) -> Self {
        Self {
            udp_payload_size,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: Vec::new(),
        }
    }

    pub fn do_flag(&self) -> bool {
        self.flags & DO_BIT != 0
    }

    pub fn set_do_flag(&mut self, v: bool) {
        if v {
            self.flags |= DO_BIT;
        } else {
            self.flags &= !DO_BIT;
        }
    }

    pub fn get(&self, code: OptCode) -> Option<&EdnsOption> {
        self.options.iter().find(|o| o.code == code)
    }

    pub fn remove(&mut self, code: OptCode) {
        self.options.retain(|o| o.code != code);
    }

    pub fn set(&mut self, opt: EdnsOption) {
        self.remove(opt.code);
        self.options.push(opt);
    }

    /// Decodes the RDATA portion of an OPT record (after name/type/class/
    /// ttl/rdlength have already been consumed by the caller).
    pub fn read_rdata(reader: &mut Reader<'_>, rdlength: u16, ttl: u32) -> Result<Self> {
        let extended_rcode = ((ttl >> 24) & 0xFF) as u8;
        let version = ((ttl >> 16) & 0xFF) as u8;
        let flags = (ttl & 0xFFFF) as u16;
        let end = reader.pos + rdlength as usize;
        let mut options = Vec::new();
        while reader.pos + 4 <= end {
            let code = OptCode::from(reader.read_u16()?);
            let len = reader.read_u16()? as usize;
            let data = reader.read_bytes(len)?.to_vec();
            options.push(EdnsOption { code, data });
        }
        Ok(Self {
            udp_payload_size: 0, // filled by caller from the RR's class field
            extended_rcode,
            version,
            flags,
            options,
        })
    }

    pub fn write_rdata(&self, writer: &mut Writer) -> Result<()> {
        for opt in &self.options {
            writer.write_u16(opt.code.into());
            writer.write_u16(opt.data.len() as u16);
            writer.write_bytes(&opt.data);
        }
        Ok(())
    }

    /// The pseudo-TTL field combining extended rcode / version / flags,
    /// as it is stored on the wire.
    pub fn ttl_field(&self) -> u32 {
        ((self.extended_rcode as u32) << 24) | ((self.version as u32) << 16) | self.flags as u32
    }
}

/// Encodes an Extended DNS Error option (RFC 8914 §2): a 2-byte info
/// code followed by optional UTF-8 explanatory text.
pub fn encode_ede(info_code: u16, extra_text: &str) -> EdnsOption {
    let mut data = Vec::with_capacity(2 + extra_text.len());
    data.extend_from_slice(&info_code.to_be_bytes());
    data.extend_from_slice(extra_text.as_bytes());
    EdnsOption { code: OptCode::ExtendedError, data }
}

/// Encodes a client-subnet option (RFC 7871 §6).
pub fn encode_client_subnet(addr: std::net::IpAddr, prefix_len: u8) -> EdnsOption {
    let (family, addr_bytes): (u16, Vec<u8>) = match addr {
        std::net::IpAddr::V4(v4) => (1, v4.octets().to_vec()),
        std::net::IpAddr::V6(v6) => (2, v6.octets().to_vec()),
    };
    let needed_bytes = ((prefix_len as usize) + 7) / 8;
    let mut data = Vec::with_capacity(4 + needed_bytes);
    data.extend_from_slice(&family.to_be_bytes());
    data.push(prefix_len);
    data.push(0); // scope prefix-length, 0 in queries
    data.extend_from_slice(&addr_bytes[..needed_bytes.min(addr_bytes.len())]);
    EdnsOption {
        code: OptCode::ClientSubnet,
        data,
    }
}
