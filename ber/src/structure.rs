//! The decoded form of a BER TLV: [`StructureTag`].
//!
//! This is what `parse::parse_tag` hands back, and what `write::encode`
//! consumes once a `structures::Tag` has been lowered into it with
//! `ASNTag::into_structure`.

use crate::common::TagClass;

/// Payload of a decoded tag: either raw octets (primitive) or a sequence
/// of nested tags (constructed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PL {
    P(Vec<u8>),
    C(Vec<StructureTag>),
}

/// A fully decoded BER tag: class, tag number, and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructureTag {
    pub class: TagClass,
    pub id: u64,
    pub payload: PL,
}

impl StructureTag {
    /// Keep this tag only if its class matches.
    pub fn match_class(self, class: TagClass) -> Option<StructureTag> {
        if self.class == class {
            Some(self)
        } else {
            None
        }
    }

    /// Keep this tag only if its tag number matches.
    pub fn match_id(self, id: u64) -> Option<StructureTag> {
        if self.id == id {
            Some(self)
        } else {
            None
        }
    }

    /// Unwrap the primitive payload, discarding the tag metadata.
    pub fn expect_primitive(self) -> Option<Vec<u8>> {
        match self.payload {
            PL::P(v) => Some(v),
            PL::C(_) => None,
        }
    }

    /// Unwrap the constructed payload, discarding the tag metadata.
    pub fn expect_constructed(self) -> Option<Vec<StructureTag>> {
        match self.payload {
            PL::C(v) => Some(v),
            PL::P(_) => None,
        }
    }

    pub fn is_constructed(&self) -> bool {
        matches!(self.payload, PL::C(_))
    }
}
