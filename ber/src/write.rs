//! DER encoding: definite, shortest-form lengths, written directly into a
//! caller-supplied buffer so the connection engine can report "won't fit"
//! without partially writing a message (see `Connection::send`).

use crate::structure::{StructureTag, PL};

fn encode_identifier(class_bits: u8, constructed: bool, id: u64, out: &mut Vec<u8>) {
    let constructed_bit = if constructed { 0x20 } else { 0x00 };
    if id < 31 {
        out.push(class_bits | constructed_bit | id as u8);
    } else {
        out.push(class_bits | constructed_bit | 0x1f);
        let mut octets = Vec::new();
        let mut n = id;
        loop {
            octets.push((n & 0x7f) as u8);
            n >>= 7;
            if n == 0 {
                break;
            }
        }
        for (i, &o) in octets.iter().rev().enumerate() {
            let cont = if i + 1 == octets.len() { 0 } else { 0x80 };
            out.push(o | cont);
        }
    }
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let mut octets = Vec::new();
        let mut n = len;
        while n > 0 {
            octets.push((n & 0xff) as u8);
            n >>= 8;
        }
        octets.reverse();
        out.push(0x80 | octets.len() as u8);
        out.extend(octets);
    }
}

/// Serialize a decoded/constructed tag tree as DER into `out`.
pub fn encode(tag: &StructureTag, out: &mut Vec<u8>) {
    match &tag.payload {
        PL::P(bytes) => {
            encode_identifier(tag.class.as_bits(), false, tag.id, out);
            encode_length(bytes.len(), out);
            out.extend_from_slice(bytes);
        }
        PL::C(children) => {
            let mut body = Vec::new();
            for child in children {
                encode(child, &mut body);
            }
            encode_identifier(tag.class.as_bits(), true, tag.id, out);
            encode_length(body.len(), out);
            out.extend(body);
        }
    }
}

/// Encode straight into a fresh `Vec`, for callers that don't hold a
/// reusable scratch buffer.
pub fn encode_into_vec(tag: &StructureTag) -> Vec<u8> {
    let mut out = Vec::new();
    encode(tag, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TagClass;
    use crate::parse::parse_tag;

    #[test]
    fn round_trips_octet_string() {
        let tag = StructureTag {
            class: TagClass::Universal,
            id: 4,
            payload: PL::P(b"hello".to_vec()),
        };
        let bytes = encode_into_vec(&tag);
        let (rest, decoded) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, tag);
    }

    #[test]
    fn round_trips_nested_sequence() {
        let tag = StructureTag {
            class: TagClass::Universal,
            id: 16,
            payload: PL::C(vec![StructureTag {
                class: TagClass::Universal,
                id: 2,
                payload: PL::P(vec![5]),
            }]),
        };
        let bytes = encode_into_vec(&tag);
        let (rest, decoded) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, tag);
    }

    #[test]
    fn long_form_length_round_trips() {
        let tag = StructureTag {
            class: TagClass::Universal,
            id: 4,
            payload: PL::P(vec![b'x'; 200]),
        };
        let bytes = encode_into_vec(&tag);
        assert_eq!(bytes[1] & 0x80, 0x80);
        let (rest, decoded) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, tag);
    }
}
