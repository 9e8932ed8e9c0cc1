//! Minimal DNS wire-format support: just enough of RFC 1035/6891 to forward
//! and cache queries. No DNSSEC RR types, no zone transfer records — those
//! belong to modules this crate does not implement (see SPEC_FULL.md §9).

pub mod edns;
pub mod enums;
pub mod header;
pub mod message;
pub mod name;
pub mod question;
pub mod record;
mod wire;

pub use edns::{ClientSubnet, EdnsOpt, EdnsOption};
pub use enums::{RecordClass, RecordType, ResponseCode};
pub use header::Header;
pub use message::DnsMessage;
pub use question::Question;
pub use record::{RData, Record};
