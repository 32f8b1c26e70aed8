//! Minimal BER decode / DER encode for the LDAPv3 ASN.1 module.
//!
//! This is deliberately narrow: just enough ASN.1 to frame and build the
//! handful of LDAP message types the server engine understands. It is not a
//! general-purpose ASN.1 library.

pub mod common;
pub mod error;
pub mod parse;
pub mod structure;
pub mod structures;
pub mod write;

pub use common::TagClass;
pub use error::Error;
pub use structure::{StructureTag, PL};
pub use structures::{ASNTag, Tag};

/// Try to decode one complete top-level TLV from `buf`.
///
/// Returns `Ok(None)` if `buf` doesn't yet hold a complete tag (the caller
/// should wait for more bytes), `Ok(Some((consumed, tag)))` on success, and
/// `Err` if the bytes present can never form valid BER.
pub fn decode_one(buf: &[u8]) -> Result<Option<(usize, StructureTag)>, Error> {
    match parse::parse_tag(buf) {
        Ok((rest, tag)) => Ok(Some((buf.len() - rest.len(), tag))),
        Err(nom::Err::Incomplete(_)) => Ok(None),
        Err(_) => Err(Error::Malformed),
    }
}
