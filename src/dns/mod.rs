pub mod edns;
pub mod enums;
pub mod header;
pub mod message;
pub mod name;
pub mod question;
pub mod record;
pub mod wire;

pub use edns::{EdnsOption, Opt, OptCode};
pub use enums::{Opcode, QClass, QType, Rcode};
pub use message::Message;
pub use name::Name;
pub use question::Question;
pub use record::{RData, ResourceRecord};

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn round_trip_a_response() {
        let q = Question::new(Name::parse("example.com"), QType::A, QClass::IN);
        let mut msg = Message::new_query(42, q);
        msg.header.qr = true;
        msg.header.ra = true;
        msg.answers.push(ResourceRecord::new_a(
            Name::parse("example.com"),
            60,
            Ipv4Addr::new(192, 0, 2, 1),
        ));
        let wire = msg.to_wire().unwrap();
        let parsed = Message::parse(&wire).unwrap();
        assert_eq!(parsed.header.id, 42);
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.answers.len(), 1);
        match &parsed.answers[0].rdata {
            RData::A(addr) => assert_eq!(*addr, Ipv4Addr::new(192, 0, 2, 1)),
            _ => panic!("expected A record"),
        }
    }

    #[test]
    fn compression_pointer_is_followed() {
        // Hand-built message: question "a.example.com", then an answer
        // whose name is a pointer back to the question's name, and whose
        // rdata is a CNAME that is itself also a pointer.
        let q = Question::new(Name::parse("a.example.com"), QType::A, QClass::IN);
        let mut msg = Message::new_query(7, q);
        msg.header.qr = true;
        let mut wire = msg.to_wire().unwrap();

        // Append an answer RR manually: pointer(12) TYPE=CNAME CLASS=IN TTL=60 RDLENGTH RDATA=pointer(12)
        let ptr = 12u16; // question name starts right after the 12-byte header
        wire.extend_from_slice(&(0xC000u16 | ptr).to_be_bytes());
        wire.extend_from_slice(&5u16.to_be_bytes()); // CNAME
        wire.extend_from_slice(&1u16.to_be_bytes()); // IN
        wire.extend_from_slice(&60u32.to_be_bytes());
        wire.extend_from_slice(&2u16.to_be_bytes()); // rdlength
        wire.extend_from_slice(&(0xC000u16 | ptr).to_be_bytes());
        wire[7] = 1; // ancount = 1

        let parsed = Message::parse(&wire).unwrap();
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].name.normalized(), "a.example.com");
        match &parsed.answers[0].rdata {
            RData::Cname(n) => assert_eq!(n.normalized(), "a.example.com"),
            other => panic!("expected CNAME, got {other:?}"),
        }
    }
}
