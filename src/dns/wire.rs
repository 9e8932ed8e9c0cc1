//! Byte-level name encoding/decoding, grounded on the teacher's
//! `dns::util::{encode_domain_name, decode_domain_name}` but extended to
//! follow RFC 1035 §4.1.4 compression pointers correctly, since upstream
//! resolvers routinely compress names in their responses.

use crate::error::{ResolverError, Result};

const MAX_POINTER_HOPS: usize = 16;

/// Encode a dotted name into wire labels. Never emits compression pointers —
/// this is an accepted simplification (see SPEC_FULL.md §4.1); every
/// real-world resolver accepts uncompressed names.
pub fn encode_name(name: &str, out: &mut Vec<u8>) {
    let name = name.trim_end_matches('.');
    if name.is_empty() {
        out.push(0);
        return;
    }
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

/// Decode a (possibly compressed) name starting at `*pos`, advancing `*pos`
/// past the name as it appears at the call site (not past any jumped-to
/// pointer target).
pub fn decode_name(buf: &[u8], pos: &mut usize) -> Result<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = *pos;
    let mut jumped = false;
    let mut hops = 0;

    loop {
        let len = *buf
            .get(cursor)
            .ok_or_else(|| ResolverError::Decode("name truncated".into()))?;

        if len == 0 {
            cursor += 1;
            if !jumped {
                *pos = cursor;
            }
            break;
        }

        if len & 0xc0 == 0xc0 {
            if hops >= MAX_POINTER_HOPS {
                return Err(ResolverError::Decode("compression pointer loop".into()));
            }
            let b2 = *buf
                .get(cursor + 1)
                .ok_or_else(|| ResolverError::Decode("truncated pointer".into()))?;
            let offset = (((len & 0x3f) as usize) << 8) | b2 as usize;
            if offset >= buf.len() {
                return Err(ResolverError::Decode("pointer out of range".into()));
            }
            if !jumped {
                *pos = cursor + 2;
            }
            jumped = true;
            hops += 1;
            cursor = offset;
            continue;
        }

        if len > 63 {
            return Err(ResolverError::Decode("label too long".into()));
        }
        let start = cursor + 1;
        let end = start + len as usize;
        let label = buf
            .get(start..end)
            .ok_or_else(|| ResolverError::Decode("label truncated".into()))?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        cursor = end;
    }

    Ok(labels.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_uncompressed_name() {
        let mut buf = Vec::new();
        encode_name("www.example.com", &mut buf);
        let mut pos = 0;
        assert_eq!(decode_name(&buf, &mut pos).unwrap(), "www.example.com");
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn follows_compression_pointer() {
        let mut buf = Vec::new();
        encode_name("example.com", &mut buf); // offset 0
        let pointer_offset = buf.len();
        buf.extend_from_slice(&[3, b'w', b'w', b'w']);
        buf.extend_from_slice(&[0xc0, 0x00]); // pointer back to offset 0
        let mut pos = pointer_offset;
        assert_eq!(decode_name(&buf, &mut pos).unwrap(), "www.example.com");
        assert_eq!(pos, buf.len());
    }
}
