//! Builder-side tag types, for assembling a message before DER-encoding it.
//!
//! Mirrors the decoded [`StructureTag`](crate::structure::StructureTag)
//! shape but as small per-variant structs with a `class`/`id` that default
//! to the UNIVERSAL tag number for that ASN.1 type, so a caller need only
//! override them for APPLICATION/CONTEXT tags (as every LDAP protocolOp
//! choice does).

use crate::common::{universal, TagClass};
use crate::structure::{StructureTag, PL};

pub trait ASNTag {
    fn into_structure(self) -> StructureTag;
}

#[derive(Clone, Debug, Default)]
pub struct Boolean {
    pub class: TagClass,
    pub id: u64,
    pub inner: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Integer {
    pub class: TagClass,
    pub id: u64,
    pub inner: i64,
}

#[derive(Clone, Debug, Default)]
pub struct Enumerated {
    pub class: TagClass,
    pub id: u64,
    pub inner: i64,
}

#[derive(Clone, Debug, Default)]
pub struct OctetString {
    pub class: TagClass,
    pub id: u64,
    pub inner: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct Null {
    pub class: TagClass,
    pub id: u64,
}

#[derive(Clone, Debug, Default)]
pub struct Sequence {
    pub class: TagClass,
    pub id: u64,
    pub inner: Vec<Tag>,
}

#[derive(Clone, Debug, Default)]
pub struct Set {
    pub class: TagClass,
    pub id: u64,
    pub inner: Vec<Tag>,
}

#[derive(Clone, Debug)]
pub struct ExplicitTag {
    pub class: TagClass,
    pub id: u64,
    pub inner: Box<Tag>,
}

#[derive(Clone, Debug)]
pub enum Tag {
    Boolean(Boolean),
    Integer(Integer),
    Enumerated(Enumerated),
    OctetString(OctetString),
    Null(Null),
    Sequence(Sequence),
    Set(Set),
    ExplicitTag(ExplicitTag),
    StructureTag(StructureTag),
}

fn int_to_be_bytes(n: i64) -> Vec<u8> {
    if n == 0 {
        return vec![0];
    }
    let full = n.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let b = full[start];
        let next = full[start + 1];
        // Stop trimming once the sign bit of the remaining bytes would flip.
        if !((b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0)) {
            break;
        }
        start += 1;
    }
    full[start..].to_vec()
}

impl ASNTag for Tag {
    fn into_structure(self) -> StructureTag {
        match self {
            Tag::Boolean(b) => StructureTag {
                class: b.class,
                id: if b.id == 0 && matches!(b.class, TagClass::Universal) {
                    universal::BOOLEAN
                } else {
                    b.id
                },
                payload: PL::P(vec![if b.inner { 0xff } else { 0x00 }]),
            },
            Tag::Integer(i) => StructureTag {
                class: i.class,
                id: default_id(i.class, i.id, universal::INTEGER),
                payload: PL::P(int_to_be_bytes(i.inner)),
            },
            Tag::Enumerated(e) => StructureTag {
                class: e.class,
                id: default_id(e.class, e.id, universal::ENUMERATED),
                payload: PL::P(int_to_be_bytes(e.inner)),
            },
            Tag::OctetString(o) => StructureTag {
                class: o.class,
                id: default_id(o.class, o.id, universal::OCTET_STRING),
                payload: PL::P(o.inner),
            },
            Tag::Null(n) => StructureTag {
                class: n.class,
                id: default_id(n.class, n.id, universal::NULL),
                payload: PL::P(Vec::new()),
            },
            Tag::Sequence(s) => StructureTag {
                class: s.class,
                id: default_id(s.class, s.id, universal::SEQUENCE),
                payload: PL::C(s.inner.into_iter().map(ASNTag::into_structure).collect()),
            },
            Tag::Set(s) => StructureTag {
                class: s.class,
                id: default_id(s.class, s.id, universal::SET),
                payload: PL::C(s.inner.into_iter().map(ASNTag::into_structure).collect()),
            },
            Tag::ExplicitTag(e) => StructureTag {
                class: e.class,
                id: e.id,
                payload: PL::C(vec![e.inner.into_structure()]),
            },
            Tag::StructureTag(t) => t,
        }
    }
}

/// `Tag` variants built with `..Default::default()` carry `id: 0`, which
/// collides with BOOLEAN's universal number; only substitute the universal
/// default when the class was also left at its default (Universal).
fn default_id(class: TagClass, id: u64, universal_id: u64) -> u64 {
    if id == 0 && matches!(class, TagClass::Universal) {
        universal_id
    } else {
        id
    }
}

impl Tag {
    pub fn match_id(&self, id: u64) -> bool {
        match self {
            Tag::StructureTag(t) => t.id == id,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_uint;

    #[test]
    fn integer_encodes_minimal_two_complement() {
        let tag = Tag::Integer(Integer { inner: 5, ..Default::default() });
        let st = tag.into_structure();
        assert_eq!(st.id, universal::INTEGER);
        let bytes = st.expect_primitive().unwrap();
        assert_eq!(bytes, vec![5]);
        assert_eq!(parse_uint(&bytes), 5);
    }

    #[test]
    fn integer_zero_is_one_byte() {
        let tag = Tag::Integer(Integer { inner: 0, ..Default::default() });
        let st = tag.into_structure();
        assert_eq!(st.expect_primitive().unwrap(), vec![0]);
    }

    #[test]
    fn sequence_nests_children() {
        let tag = Tag::Sequence(Sequence {
            inner: vec![
                Tag::OctetString(OctetString { inner: b"uid".to_vec(), ..Default::default() }),
            ],
            ..Default::default()
        });
        let st = tag.into_structure();
        assert_eq!(st.id, universal::SEQUENCE);
        let children = st.expect_constructed().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, universal::OCTET_STRING);
    }
}
