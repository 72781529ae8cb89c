//! The full DNS message: header plus the four sections (RFC 1035 §4.1).

use super::edns::Opt;
use super::enums::Rcode;
use super::header::{Header, parse_header, write_header};
use super::question::Question;
use super::record::ResourceRecord;
use super::wire::{Reader, Writer};
use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    pub fn new_query(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                rd: true,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![question],
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
        }
    }

    fn sync_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = self.additional.len() as u16;
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let header = parse_header(&mut reader)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(Question::read(&mut reader)?);
        }
        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answers.push(ResourceRecord::read(&mut reader)?);
        }
        let mut authorities = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            authorities.push(ResourceRecord::read(&mut reader)?);
        }
        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            additional.push(ResourceRecord::read(&mut reader)?);
        }

        Ok(Self { header, questions, answers, authorities, additional })
    }

    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let mut m = self.clone();
        m.sync_counts();
        let mut writer = Writer::new();
        write_header(&mut writer, &m.header)?;
        for q in &m.questions {
            q.write(&mut writer)?;
        }
        for rr in &m.answers {
            rr.write(&mut writer)?;
        }
        for rr in &m.authorities {
            rr.write(&mut writer)?;
        }
        for rr in &m.additional {
            rr.write(&mut writer)?;
        }
        Ok(writer.buf)
    }

    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Finds the OPT record in `additional`, if any, decoded with its
    /// `udp_payload_size` populated from the RR class field.
    pub fn opt(&self) -> Option<Opt> {
        self.additional.iter().find(|rr| rr.is_opt()).and_then(|rr| rr.as_opt())
    }

    /// Removes the OPT record from `additional`, returning it decoded.
    pub fn take_opt(&mut self) -> Option<Opt> {
        let idx = self.additional.iter().position(|rr| rr.is_opt())?;
        let rr = self.additional.remove(idx);
        rr.as_opt()
    }

    pub fn set_opt(&mut self, opt: Opt) {
        self.additional.retain(|rr| !rr.is_opt());
        self.additional.push(ResourceRecord::new_opt(opt.udp_payload_size, opt));
    }

    /// Builds a bare response shell copying the query's id/question/rd,
    /// with `qr=1`, `ra` left for the caller to set.
    pub fn new_response_shell(query: &Message) -> Self {
        let mut header = Header {
            id: query.header.id,
            qr: true,
            opcode: query.header.opcode,
            rd: query.header.rd,
            ..Default::default()
        };
        header.set_rcode(Rcode::NOERROR);
        Self {
            header,
            questions: query.questions.clone(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn refused(query: &Message) -> Self {
        let mut m = Self::new_response_shell(query);
        m.header.set_rcode(Rcode::REFUSED);
        m
    }

    pub fn servfail(query: &Message) -> Self {
        let mut m = Self::new_response_shell(query);
        m.header.set_rcode(Rcode::SERVFAIL);
        m
    }

    pub fn formerr(query: &Message) -> Self {
        let mut m = Self::new_response_shell(query);
        m.header.set_rcode(Rcode::FORMERR);
        m
    }

    /// The minimum answer-section TTL, used by the cache to pick an
    /// expiration (spec.md §4.4 "miss" path).
    pub fn min_answer_ttl(&self) -> Option<u32> {
        self.answers.iter().map(|rr| rr.ttl).min()
    }

    /// Decrements every record's TTL by `elapsed` seconds, floored at 0,
    /// used when serving a cached entry (spec.md §4.4 "hit" path).
    pub fn decrement_ttls(&mut self, elapsed: u32) {
        for rr in self.answers.iter_mut().chain(self.authorities.iter_mut()).chain(self.additional.iter_mut()) {
            if rr.is_opt() {
                continue;
            }
            rr.ttl = rr.ttl.saturating_sub(elapsed);
        }
    }

    pub fn set_all_ttls(&mut self, ttl: u32) {
        for rr in self.answers.iter_mut().chain(self.authorities.iter_mut()).chain(self.additional.iter_mut()) {
            if rr.is_opt() {
                continue;
            }
            rr.ttl = ttl;
        }
    }

    /// Truncates a response to fit `max_len` bytes on UDP (RFC 1035 §4.2.1):
    /// drop whole records from the end of the answer/authority/additional
    /// sections (never split a record) and set the TC bit.
    pub fn truncate_to(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let wire = self.to_wire()?;
        if wire.len() <= max_len {
            return Ok(wire);
        }
        self.header.tc = true;
        loop {
            if !self.additional.is_empty() {
                let opt_kept: Vec<ResourceRecord> =
                    self.additional.iter().filter(|rr| rr.is_opt()).cloned().collect();
                self.additional.retain(|rr| rr.is_opt());
                if self.additional.len() == opt_kept.len() && !self.authorities.is_empty() {
                    self.authorities.pop();
                } else if !self.additional.is_empty() {
                    self.additional.pop();
                }
            } else if !self.authorities.is_empty() {
                self.authorities.pop();
            } else if !self.answers.is_empty() {
                self.answers.pop();
            } else {
                break;
            }
            let wire = self.to_wire()?;
            if wire.len() <= max_len {
                return Ok(wire);
            }
        }
        self.to_wire()
    }

    pub fn question_count_ok(&self) -> bool {
        self.questions.len() == 1
    }
}
