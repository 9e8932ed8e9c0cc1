use super::enums::{RecordClass, RecordType};
use super::header::read_u16;
use super::wire::{decode_name, encode_name};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub(super) fn write(&self, out: &mut Vec<u8>) {
        encode_name(&self.name, out);
        out.extend_from_slice(&u16::from(self.qtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
    }

    pub(super) fn parse(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let name = decode_name(buf, pos)?;
        let qtype = RecordType::from(read_u16(buf, pos)?);
        let qclass = RecordClass::from(read_u16(buf, pos)?);
        Ok(Question {
            name,
            qtype,
            qclass,
        })
    }
}
