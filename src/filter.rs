//! Search filter decode and evaluation (spec §4.5 "Filter evaluation").
//!
//! Only `and`/`or`/`not`/`equalityMatch`/`present` are recognized; any other
//! `Filter` CHOICE element is a filter-level rejection, not a per-entry
//! false, so [`decode_filter`] returns an error rather than silently
//! excluding entries.

use nssldapd_ber::common::TagClass;
use nssldapd_ber::structure::{StructureTag, PL};

use crate::directory::Entry;

/// Tag numbers of the `Filter` CHOICE, RFC 4511 §4.5.1.
mod filt_tag {
    pub const AND: u64 = 0;
    pub const OR: u64 = 1;
    pub const NOT: u64 = 2;
    pub const EQUALITY_MATCH: u64 = 3;
    pub const PRESENT: u64 = 7;
}

#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality { attr: String, value: Vec<u8> },
    Present { attr: String },
}

/// The only failure mode: an element outside the supported subset appeared
/// somewhere in the filter tree.
#[derive(Debug)]
pub struct UnsupportedFilter;

fn octet_string(tag: StructureTag) -> Result<Vec<u8>, UnsupportedFilter> {
    tag.expect_primitive().ok_or(UnsupportedFilter)
}

fn utf8(bytes: Vec<u8>) -> Result<String, UnsupportedFilter> {
    String::from_utf8(bytes).map_err(|_| UnsupportedFilter)
}

pub fn decode_filter(tag: StructureTag) -> Result<Filter, UnsupportedFilter> {
    if tag.class != TagClass::Context {
        return Err(UnsupportedFilter);
    }
    match tag.id {
        filt_tag::AND => Ok(Filter::And(decode_set(tag)?)),
        filt_tag::OR => Ok(Filter::Or(decode_set(tag)?)),
        filt_tag::NOT => {
            let mut children = tag.expect_constructed().ok_or(UnsupportedFilter)?;
            if children.len() != 1 {
                return Err(UnsupportedFilter);
            }
            Ok(Filter::Not(Box::new(decode_filter(children.remove(0))?)))
        }
        filt_tag::EQUALITY_MATCH => {
            let mut children = tag.expect_constructed().ok_or(UnsupportedFilter)?.into_iter();
            let attr = utf8(octet_string(children.next().ok_or(UnsupportedFilter)?)?)?;
            let value = octet_string(children.next().ok_or(UnsupportedFilter)?)?;
            Ok(Filter::Equality { attr, value })
        }
        filt_tag::PRESENT => Ok(Filter::Present { attr: utf8(octet_string(tag)?)? }),
        _ => Err(UnsupportedFilter),
    }
}

fn decode_set(tag: StructureTag) -> Result<Vec<Filter>, UnsupportedFilter> {
    match tag.payload {
        PL::C(children) => children.into_iter().map(decode_filter).collect(),
        PL::P(_) => Err(UnsupportedFilter),
    }
}

impl Filter {
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.matches(entry)),
            Filter::Or(children) => children.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Equality { attr, value } => entry
                .values(attr)
                .map(|values| values.iter().any(|v| v == value))
                .unwrap_or(false),
            Filter::Present { attr } => entry.has_attribute(attr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Attribute;
    use nssldapd_ber::structures::{ASNTag, OctetString as BOctetString, Sequence, Tag};
    use pretty_assertions::assert_eq;

    fn entry() -> Entry {
        Entry {
            dn: "uid=alice,ou=people,dc=ex,dc=com".into(),
            attributes: vec![
                Attribute { name: "uid".into(), values: vec![b"alice".to_vec()] },
                Attribute { name: "uidNumber".into(), values: vec![b"1001".to_vec()] },
            ],
        }
    }

    fn present(attr: &str) -> StructureTag {
        Tag::OctetString(BOctetString {
            class: TagClass::Context,
            id: filt_tag::PRESENT,
            inner: attr.as_bytes().to_vec(),
        })
        .into_structure()
    }

    fn equality(attr: &str, value: &[u8]) -> StructureTag {
        Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: filt_tag::EQUALITY_MATCH,
            inner: vec![
                Tag::OctetString(BOctetString { inner: attr.as_bytes().to_vec(), ..Default::default() }),
                Tag::OctetString(BOctetString { inner: value.to_vec(), ..Default::default() }),
            ],
        })
        .into_structure()
    }

    #[test]
    fn equality_match_is_exact() {
        let f = decode_filter(equality("uid", b"alice")).unwrap();
        assert!(f.matches(&entry()));
        let f = decode_filter(equality("uid", b"bob")).unwrap();
        assert!(!f.matches(&entry()));
    }

    #[test]
    fn present_checks_attribute_existence() {
        let f = decode_filter(present("uidNumber")).unwrap();
        assert!(f.matches(&entry()));
        let f = decode_filter(present("gecos")).unwrap();
        assert!(!f.matches(&entry()));
    }

    #[test]
    fn and_or_not_combine_recursively() {
        // `and`/`or` are SET OF Filter; an empty AND is vacuously true.
        let and_tag = Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: filt_tag::AND,
            inner: vec![],
        })
        .into_structure();
        let f = decode_filter(and_tag).unwrap();
        assert!(f.matches(&entry()));

        let not_tag = Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: filt_tag::NOT,
            inner: vec![Tag::StructureTag(equality("uid", b"bob"))],
        })
        .into_structure();
        let f = decode_filter(not_tag).unwrap();
        assert!(f.matches(&entry()));
    }

    #[test]
    fn unsupported_element_is_rejected() {
        let substrings = Tag::OctetString(BOctetString {
            class: TagClass::Context,
            id: 4,
            inner: b"ali".to_vec(),
        })
        .into_structure();
        assert!(decode_filter(substrings).is_err());
    }
}
