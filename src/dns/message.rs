//! The assembled DNS message: header + four record sections, plus the
//! handful of constructors the pipeline stages need (spec §3 "Response").

use super::edns::ClientSubnet;
use super::enums::{RecordType, ResponseCode};
use super::header::Header;
use super::question::Question;
use super::record::{RData, Record};
use crate::error::{ResolverError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answer: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
}

impl DnsMessage {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let header = Header::parse(buf, &mut pos)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(Question::parse(buf, &mut pos)?);
        }

        let mut answer = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answer.push(Record::parse(buf, &mut pos)?);
        }

        let mut authority = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            authority.push(Record::parse(buf, &mut pos)?);
        }

        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            additional.push(Record::parse(buf, &mut pos)?);
        }

        Ok(DnsMessage {
            header,
            questions,
            answer,
            authority,
            additional,
        })
    }

    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answer.len() as u16;
        header.nscount = self.authority.len() as u16;
        header.arcount = self.additional.len() as u16;
        header.write(&mut out);

        for q in &self.questions {
            q.write(&mut out);
        }
        for r in self.answer.iter().chain(&self.authority).chain(&self.additional) {
            r.write(&mut out);
        }

        if out.len() > u16::MAX as usize {
            return Err(ResolverError::Decode("message too large to encode".into()));
        }
        Ok(out)
    }

    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Build a skeleton reply that echoes this message's ID and question
    /// section — the invariant spec §3 requires of every answer the core
    /// returns to a client.
    pub fn new_reply(&self) -> DnsMessage {
        DnsMessage {
            header: Header {
                id: self.header.id,
                qr: true,
                opcode: self.header.opcode,
                authoritative: false,
                truncated: false,
                recursion_desired: self.header.recursion_desired,
                recursion_available: true,
                rcode: ResponseCode::NoError,
                qdcount: self.header.qdcount,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: self.questions.clone(),
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn servfail(&self) -> DnsMessage {
        let mut reply = self.new_reply();
        reply.header.rcode = ResponseCode::ServerFailure;
        reply
    }

    /// Rebind this message's id/question to match `query` — used when a
    /// cached or host-override reply is replayed for a new client query
    /// (spec §4.5 cache hit contract).
    pub fn rebind_to(&mut self, query: &DnsMessage) {
        self.header.id = query.header.id;
        self.header.recursion_desired = query.header.recursion_desired;
        self.questions = query.questions.clone();
    }

    pub fn has_answers(&self) -> bool {
        !self.answer.is_empty()
    }

    pub fn edns(&self) -> Option<&RData> {
        self.additional
            .iter()
            .find(|r| r.rtype == RecordType::OPT)
            .map(|r| &r.rdata)
    }

    pub fn client_subnet(&self) -> Option<ClientSubnet> {
        match self.edns()? {
            RData::Opt(opt) => opt.client_subnet(),
            _ => None,
        }
    }

    /// Minimum answer-record TTL, used by the cache's admission rule
    /// (spec §4.5 "Effective TTL").
    pub fn min_answer_ttl(&self) -> Option<u32> {
        self.answer.iter().map(|r| r.ttl).min()
    }

    /// Overwrite every record's TTL in place (used by serve-stale / cache
    /// hit replies which must present a remaining TTL, not the originally
    /// admitted one).
    pub fn set_all_ttls(&mut self, ttl: u32) {
        for r in self
            .answer
            .iter_mut()
            .chain(self.authority.iter_mut())
            .chain(self.additional.iter_mut())
        {
            r.ttl = ttl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_query() -> DnsMessage {
        DnsMessage {
            header: Header {
                id: 42,
                recursion_desired: true,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![Question {
                name: "example.com".into(),
                qtype: RecordType::A,
                qclass: Default::default(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn round_trips_a_record_message() {
        let query = sample_query();
        let mut reply = query.new_reply();
        reply
            .answer
            .push(Record::new_a("example.com", 300, Ipv4Addr::new(93, 184, 216, 34)));

        let wire = reply.to_wire().unwrap();
        let parsed = DnsMessage::parse(&wire).unwrap();
        assert_eq!(parsed.header.id, 42);
        assert_eq!(parsed.answer.len(), 1);
        assert_eq!(
            parsed.answer[0].ip_address(),
            Some(Ipv4Addr::new(93, 184, 216, 34).into())
        );
    }

    #[test]
    fn new_reply_echoes_id_and_question() {
        let query = sample_query();
        let reply = query.new_reply();
        assert_eq!(reply.header.id, query.header.id);
        assert_eq!(reply.questions, query.questions);
        assert!(reply.header.qr);
    }
}
