//! Building outbound LDAP messages: bindResponse, searchResEntry,
//! searchResDone, extendedResp (spec §6, "Emitted").
//!
//! Result codes follow the numeric table in RFC 4511 §A.1, the same
//! convention the teacher's `result.rs` documents for the client side of
//! this protocol.

use nssldapd_ber::common::TagClass;
use nssldapd_ber::structures::{ASNTag, Enumerated, Integer, OctetString, Sequence, Tag};
use nssldapd_ber::structure::StructureTag;

use crate::protocol::app_tag;

/// Result codes this server ever emits.
pub mod rc {
    pub const SUCCESS: i64 = 0;
    pub const PROTOCOL_ERROR: i64 = 2;
    pub const AUTH_METHOD_NOT_SUPPORTED: i64 = 7;
    pub const INVALID_DN_SYNTAX: i64 = 34;
    pub const INVALID_CREDENTIALS: i64 = 49;
    pub const OTHER: i64 = 80;
}

/// The three fields every `LDAPResult` shares, which bindResponse,
/// searchResDone, and extendedResp all embed as their first components.
#[derive(Debug, Clone)]
pub struct LdapResultFields {
    pub result_code: i64,
    pub matched_dn: String,
    pub diagnostic_message: String,
}

impl LdapResultFields {
    pub fn success(matched_dn: impl Into<String>) -> Self {
        LdapResultFields {
            result_code: rc::SUCCESS,
            matched_dn: matched_dn.into(),
            diagnostic_message: String::new(),
        }
    }

    pub fn error(result_code: i64, diagnostic_message: impl Into<String>) -> Self {
        LdapResultFields {
            result_code,
            matched_dn: String::new(),
            diagnostic_message: diagnostic_message.into(),
        }
    }

    /// Success with a diagnostic message attached (StartTLS's acknowledging
    /// ExtendedResponse, spec §4.3).
    pub fn ok(diagnostic_message: impl Into<String>) -> Self {
        LdapResultFields {
            result_code: rc::SUCCESS,
            matched_dn: String::new(),
            diagnostic_message: diagnostic_message.into(),
        }
    }

    fn components(&self) -> Vec<Tag> {
        vec![
            Tag::Enumerated(Enumerated { inner: self.result_code, ..Default::default() }),
            Tag::OctetString(OctetString { inner: self.matched_dn.clone().into_bytes(), ..Default::default() }),
            Tag::OctetString(OctetString { inner: self.diagnostic_message.clone().into_bytes(), ..Default::default() }),
        ]
    }
}

fn wrap_message(message_id: i64, op: Tag) -> StructureTag {
    Tag::Sequence(Sequence {
        inner: vec![Tag::Integer(Integer { inner: message_id, ..Default::default() }), op],
        ..Default::default()
    })
    .into_structure()
}

pub fn bind_response(message_id: i64, fields: LdapResultFields) -> StructureTag {
    let op = Tag::Sequence(Sequence {
        class: TagClass::Application,
        id: app_tag::BIND_RESPONSE,
        inner: fields.components(),
    });
    wrap_message(message_id, op)
}

pub fn extended_response(
    message_id: i64,
    fields: LdapResultFields,
    response_name: Option<&str>,
) -> StructureTag {
    let mut inner = fields.components();
    if let Some(name) = response_name {
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id: 10,
            inner: name.as_bytes().to_vec(),
        }));
    }
    let op = Tag::Sequence(Sequence {
        class: TagClass::Application,
        id: app_tag::EXTENDED_RESPONSE,
        inner,
    });
    wrap_message(message_id, op)
}

pub fn search_result_done(message_id: i64, fields: LdapResultFields) -> StructureTag {
    let op = Tag::Sequence(Sequence {
        class: TagClass::Application,
        id: app_tag::SEARCH_RES_DONE,
        inner: fields.components(),
    });
    wrap_message(message_id, op)
}

/// One entry's attributes, in emission order. Values are raw octets (spec
/// §3, "Directory Entry (transient)").
pub struct AttributeList(pub Vec<(String, Vec<Vec<u8>>)>);

pub fn search_result_entry(message_id: i64, dn: &str, attrs: &AttributeList) -> StructureTag {
    let attribute_tags = attrs
        .0
        .iter()
        .map(|(name, values)| {
            Tag::Sequence(Sequence {
                inner: vec![
                    Tag::OctetString(OctetString { inner: name.clone().into_bytes(), ..Default::default() }),
                    Tag::Set(nssldapd_ber::structures::Set {
                        inner: values
                            .iter()
                            .map(|v| {
                                Tag::OctetString(OctetString { inner: v.clone(), ..Default::default() })
                            })
                            .collect(),
                        ..Default::default()
                    }),
                ],
                ..Default::default()
            })
        })
        .collect();
    let op = Tag::Sequence(Sequence {
        class: TagClass::Application,
        id: app_tag::SEARCH_RES_ENTRY,
        inner: vec![
            Tag::OctetString(OctetString { inner: dn.as_bytes().to_vec(), ..Default::default() }),
            Tag::Sequence(Sequence { inner: attribute_tags, ..Default::default() }),
        ],
    });
    wrap_message(message_id, op)
}
