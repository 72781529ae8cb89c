//! DNS header (RFC 1035 §4.1.1). The flag byte-pair is genuinely bit
//! packed (1/4/1/1/1/1/3/4 bits), so it is read/written with
//! `bitstream-io` the way the teacher's `dns/header.rs` does it; the four
//! count fields either side of it are plain big-endian `u16`s.

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::enums::{Opcode, Rcode};
use super::wire::{Reader, Writer};
use crate::error::{CoreError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn opcode(&self) -> Opcode {
        Opcode(self.opcode)
    }

    pub fn rcode(&self) -> Rcode {
        Rcode(self.rcode)
    }

    pub fn set_rcode(&mut self, r: Rcode) {
        self.rcode = r.0;
    }
}

/// Parses a header from the start of a message: ID, flags, four counts,
/// in actual wire order.
pub fn parse_header(reader: &mut Reader<'_>) -> Result<Header> {
    let id = reader.read_u16()?;
    let flags = reader.read_bytes(2)?;
    let mut bitreader = BitReader::endian(flags, BigEndian);
    let qr: u8 = bitreader.read_var(1).map_err(|_| CoreError::InvalidHeader)?;
    let opcode: u8 = bitreader.read_var(4).map_err(|_| CoreError::InvalidHeader)?;
    let aa: u8 = bitreader.read_var(1).map_err(|_| CoreError::InvalidHeader)?;
    let tc: u8 = bitreader.read_var(1).map_err(|_| CoreError::InvalidHeader)?;
    let rd: u8 = bitreader.read_var(1).map_err(|_| CoreError::InvalidHeader)?;
    let ra: u8 = bitreader.read_var(1).map_err(|_| CoreError::InvalidHeader)?;
    let z: u8 = bitreader.read_var(3).map_err(|_| CoreError::InvalidHeader)?;
    let rcode: u8 = bitreader.read_var(4).map_err(|_| CoreError::InvalidHeader)?;

    let qdcount = reader.read_u16()?;
    let ancount = reader.read_u16()?;
    let nscount = reader.read_u16()?;
    let arcount = reader.read_u16()?;

    Ok(Header {
        id,
        qr: qr == 1,
        opcode,
        aa: aa == 1,
        tc: tc == 1,
        rd: rd == 1,
        ra: ra == 1,
        z,
        rcode,
        qdcount,
        ancount,
        nscount,
        arcount,
    })
}

pub fn write_header(writer: &mut Writer, h: &Header) -> Result<()> {
    writer.write_u16(h.id);

    let mut flags_buf: Vec<u8> = Vec::new();
    {
        let mut bitwriter = BitWriter::endian(&mut flags_buf, BigEndian);
        bitwriter
            .write_var(1, h.qr as u8)
            .map_err(|_| CoreError::InvalidHeader)?;
        bitwriter
            .write_var(4, h.opcode)
            .map_err(|_| CoreError::InvalidHeader)?;
        bitwriter
            .write_var(1, h.aa as u8)
            .map_err(|_| CoreError::InvalidHeader)?;
        bitwriter
            .write_var(1, h.tc as u8)
            .map_err(|_| CoreError::InvalidHeader)?;
        bitwriter
            .write_var(1, h.rd as u8)
            .map_err(|_| CoreError::InvalidHeader)?;
        bitwriter
            .write_var(1, h.ra as u8)
            .map_err(|_| CoreError::InvalidHeader)?;
        bitwriter
            .write_var(3, h.z)
            .map_err(|_| CoreError::InvalidHeader)?;
        bitwriter
            .write_var(4, h.rcode)
            .map_err(|_| CoreError::InvalidHeader)?;
    }
    writer.write_bytes(&flags_buf);

    writer.write_u16(h.qdcount);
    writer.write_u16(h.ancount);
    writer.write_u16(h.nscount);
    writer.write_u16(h.arcount);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flags() {
        let h = Header {
            id: 0xBEEF,
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode: 2,
            qdcount: 1,
            ancount: 2,
            nscount: 0,
            arcount: 1,
        };
        let mut w = Writer::new();
        write_header(&mut w, &h).unwrap();
        let mut r = Reader::new(&w.buf);
        let h2 = parse_header(&mut r).unwrap();
        assert_eq!(h, h2);
    }
}
