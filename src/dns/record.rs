//! Resource records: the answer/authority/additional record shape plus the
//! handful of RDATA variants this forwarder needs to understand (it never
//! needs to interpret DNSKEY/RRSIG/etc. — those belong to DNSSEC, a
//! Non-goal). Unknown types are kept as opaque bytes and still round-trip.

use super::edns::EdnsOpt;
use super::enums::{RecordClass, RecordType};
use super::header::{read_u16, read_u32};
use super::wire::{decode_name, encode_name};
use crate::error::{ResolverError, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ns(String),
    Ptr(String),
    Mx { preference: u16, exchange: String },
    Txt(Vec<Vec<u8>>),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Opt(EdnsOpt),
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl Record {
    pub fn new_a(name: impl Into<String>, ttl: u32, addr: Ipv4Addr) -> Self {
        Record {
            name: name.into(),
            rtype: RecordType::A,
            rclass: RecordClass::IN,
            ttl,
            rdata: RData::A(addr),
        }
    }

    pub fn new_aaaa(name: impl Into<String>, ttl: u32, addr: Ipv6Addr) -> Self {
        Record {
            name: name.into(),
            rtype: RecordType::AAAA,
            rclass: RecordClass::IN,
            ttl,
            rdata: RData::Aaaa(addr),
        }
    }

    /// IP address carried by this record, if it is an A/AAAA record
    /// (used by the mark post-processor, spec §4.3).
    pub fn ip_address(&self) -> Option<std::net::IpAddr> {
        match self.rdata {
            RData::A(v4) => Some(v4.into()),
            RData::Aaaa(v6) => Some(v6.into()),
            _ => None,
        }
    }

    pub(super) fn write(&self, out: &mut Vec<u8>) {
        encode_name(&self.name, out);
        out.extend_from_slice(&u16::from(self.rtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());

        let mut rdata_buf = Vec::new();
        match &self.rdata {
            RData::A(addr) => rdata_buf.extend_from_slice(&addr.octets()),
            RData::Aaaa(addr) => rdata_buf.extend_from_slice(&addr.octets()),
            RData::Cname(name) | RData::Ns(name) | RData::Ptr(name) => {
                encode_name(name, &mut rdata_buf)
            }
            RData::Mx {
                preference,
                exchange,
            } => {
                rdata_buf.extend_from_slice(&preference.to_be_bytes());
                encode_name(exchange, &mut rdata_buf);
            }
            RData::Txt(chunks) => {
                for chunk in chunks {
                    rdata_buf.push(chunk.len().min(255) as u8);
                    rdata_buf.extend_from_slice(&chunk[..chunk.len().min(255)]);
                }
            }
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                rdata_buf.extend_from_slice(&priority.to_be_bytes());
                rdata_buf.extend_from_slice(&weight.to_be_bytes());
                rdata_buf.extend_from_slice(&port.to_be_bytes());
                encode_name(target, &mut rdata_buf);
            }
            RData::Opt(opt) => {
                for option in &opt.options {
                    rdata_buf.extend_from_slice(&option.code.to_be_bytes());
                    rdata_buf.extend_from_slice(&(option.data.len() as u16).to_be_bytes());
                    rdata_buf.extend_from_slice(&option.data);
                }
            }
            RData::Raw(bytes) => rdata_buf.extend_from_slice(bytes),
        }
        out.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata_buf);
    }

    pub(super) fn parse(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let name = decode_name(buf, pos)?;
        let rtype = RecordType::from(read_u16(buf, pos)?);
        let raw_class = read_u16(buf, pos)?;
        let ttl = read_u32(buf, pos)?;
        let rdlength = read_u16(buf, pos)? as usize;
        let rdata_start = *pos;
        let rdata_end = rdata_start
            .checked_add(rdlength)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| ResolverError::Decode("rdata out of range".into()))?;
        let rdata_buf = &buf[rdata_start..rdata_end];

        let rdata = match rtype {
            RecordType::A => {
                if rdata_buf.len() != 4 {
                    return Err(ResolverError::Decode("bad A rdata length".into()));
                }
                RData::A(Ipv4Addr::new(
                    rdata_buf[0],
                    rdata_buf[1],
                    rdata_buf[2],
                    rdata_buf[3],
                ))
            }
            RecordType::AAAA => {
                if rdata_buf.len() != 16 {
                    return Err(ResolverError::Decode("bad AAAA rdata length".into()));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata_buf);
                RData::Aaaa(Ipv6Addr::from(octets))
            }
            RecordType::CNAME => {
                let mut p = rdata_start;
                RData::Cname(decode_name(buf, &mut p)?)
            }
            RecordType::NS => {
                let mut p = rdata_start;
                RData::Ns(decode_name(buf, &mut p)?)
            }
            RecordType::PTR => {
                let mut p = rdata_start;
                RData::Ptr(decode_name(buf, &mut p)?)
            }
            RecordType::MX => {
                let mut p = rdata_start;
                let preference = read_u16(buf, &mut p)?;
                let exchange = decode_name(buf, &mut p)?;
                RData::Mx {
                    preference,
                    exchange,
                }
            }
            RecordType::TXT => {
                let mut chunks = Vec::new();
                let mut p = 0usize;
                while p < rdata_buf.len() {
                    let len = rdata_buf[p] as usize;
                    p += 1;
                    let end = (p + len).min(rdata_buf.len());
                    chunks.push(rdata_buf[p..end].to_vec());
                    p = end;
                }
                RData::Txt(chunks)
            }
            RecordType::SRV => {
                let mut p = rdata_start;
                let priority = read_u16(buf, &mut p)?;
                let weight = read_u16(buf, &mut p)?;
                let port = read_u16(buf, &mut p)?;
                let target = decode_name(buf, &mut p)?;
                RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }
            }
            RecordType::OPT => {
                let mut options = Vec::new();
                let mut p = 0usize;
                while p + 4 <= rdata_buf.len() {
                    let code = u16::from_be_bytes([rdata_buf[p], rdata_buf[p + 1]]);
                    let len = u16::from_be_bytes([rdata_buf[p + 2], rdata_buf[p + 3]]) as usize;
                    p += 4;
                    let end = (p + len).min(rdata_buf.len());
                    options.push(super::edns::EdnsOption {
                        code,
                        data: rdata_buf[p..end].to_vec(),
                    });
                    p = end;
                }
                RData::Opt(EdnsOpt {
                    udp_payload_size: raw_class,
                    extended_rcode: ((ttl >> 24) & 0xff) as u8,
                    version: ((ttl >> 16) & 0xff) as u8,
                    flags: (ttl & 0xffff) as u16,
                    options,
                })
            }
            _ => RData::Raw(rdata_buf.to_vec()),
        };

        *pos = rdata_end;
        Ok(Record {
            name,
            rtype,
            rclass: RecordClass::from(raw_class),
            ttl,
            rdata,
        })
    }
}
