//! DNS message header (RFC 1035 §4.1.1).

use super::enums::ResponseCode;
use crate::error::{ResolverError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: ResponseCode,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub(super) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_be_bytes());

        let mut flags: u16 = 0;
        if self.qr {
            flags |= 0x8000;
        }
        flags |= (self.opcode as u16 & 0x0f) << 11;
        if self.authoritative {
            flags |= 0x0400;
        }
        if self.truncated {
            flags |= 0x0200;
        }
        if self.recursion_desired {
            flags |= 0x0100;
        }
        if self.recursion_available {
            flags |= 0x0080;
        }
        flags |= self.rcode.to_u8() as u16 & 0x0f;
        out.extend_from_slice(&flags.to_be_bytes());

        out.extend_from_slice(&self.qdcount.to_be_bytes());
        out.extend_from_slice(&self.ancount.to_be_bytes());
        out.extend_from_slice(&self.nscount.to_be_bytes());
        out.extend_from_slice(&self.arcount.to_be_bytes());
    }

    pub(super) fn parse(buf: &[u8], pos: &mut usize) -> Result<Self> {
        if buf.len() < *pos + 12 {
            return Err(ResolverError::Decode("header truncated".into()));
        }
        let id = read_u16(buf, pos)?;
        let flags = read_u16(buf, pos)?;
        let qdcount = read_u16(buf, pos)?;
        let ancount = read_u16(buf, pos)?;
        let nscount = read_u16(buf, pos)?;
        let arcount = read_u16(buf, pos)?;

        Ok(Header {
            id,
            qr: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0x0f) as u8,
            authoritative: flags & 0x0400 != 0,
            truncated: flags & 0x0200 != 0,
            recursion_desired: flags & 0x0100 != 0,
            recursion_available: flags & 0x0080 != 0,
            rcode: ResponseCode::from((flags & 0x0f) as u8),
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

pub(super) fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let end = pos
        .checked_add(2)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| ResolverError::Decode("unexpected end of message".into()))?;
    let v = u16::from_be_bytes([buf[*pos], buf[*pos + 1]]);
    *pos = end;
    Ok(v)
}

pub(super) fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let end = pos
        .checked_add(4)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| ResolverError::Decode("unexpected end of message".into()))?;
    let v = u32::from_be_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
    *pos = end;
    Ok(v)
}
