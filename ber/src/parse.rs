//! BER decoding.
//!
//! `parse_tag` recognizes one complete TLV (tag-length-value), recursing
//! into constructed content. It is written against `nom`'s streaming
//! combinators, so a buffer that holds a truncated TLV yields
//! `Err(nom::Err::Incomplete(_))` rather than a hard parse error; callers
//! that frame messages out of a growing byte buffer (see `Connection::recv`
//! in the main crate) rely on this to distinguish "not enough bytes yet"
//! from "this is not valid BER".

use nom::bytes::streaming::take;
use nom::number::streaming::u8 as take_u8;
use nom::IResult;

use crate::common::{TagClass, TagStructure};
use crate::structure::{StructureTag, PL};

/// Decode a big-endian unsigned integer from its minimal BER encoding.
pub fn parse_uint(i: &[u8]) -> u64 {
    i.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn parse_length(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, first) = take_u8(input)?;
    if first & 0x80 == 0 {
        Ok((input, (first & 0x7f) as u64))
    } else {
        let noctets = (first & 0x7f) as usize;
        if noctets == 0 {
            // Indefinite length is a BER feature this codec doesn't accept;
            // LDAP messages are always DER/definite-length on the wire.
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::LengthValue,
            )));
        }
        let (input, octets) = take(noctets)(input)?;
        Ok((input, parse_uint(octets)))
    }
}

/// Parse one complete BER tag (and, if constructed, all of its children).
pub fn parse_tag(input: &[u8]) -> IResult<&[u8], StructureTag> {
    let (input, first) = take_u8(input)?;
    let class = TagClass::from_leading_byte(first);
    let structure = TagStructure::from_leading_byte(first);
    let mut id = (first & 0x1f) as u64;
    let mut input = input;
    if id == 0x1f {
        loop {
            let (rest, b) = take_u8(input)?;
            input = rest;
            id = (id << 7) | (b & 0x7f) as u64;
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    let (input, len) = parse_length(input)?;
    let (input, content) = take(len)(input)?;

    let payload = match structure {
        TagStructure::Primitive => PL::P(content.to_vec()),
        TagStructure::Constructed => {
            let mut children = Vec::new();
            let mut rest = content;
            while !rest.is_empty() {
                let (r, child) = parse_tag(rest)?;
                children.push(child);
                rest = r;
            }
            PL::C(children)
        }
    };

    Ok((input, StructureTag { class, id, payload }))
}
