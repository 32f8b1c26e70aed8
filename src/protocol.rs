//! LDAPv3 message shapes this engine understands, and the BER→typed and
//! typed→BER conversions between them and [`nssldapd_ber`] tags.
//!
//! Only the protocolOp choices named in spec §6 are recognized on decode
//! (bindRequest, searchRequest, abandonRequest, unbindRequest, extendedReq);
//! anything else is `ProtocolOp::Unsupported`, which the connection engine
//! turns into a protocol-fatal close.

use nssldapd_ber::common::TagClass;
use nssldapd_ber::parse::parse_uint;
use nssldapd_ber::structure::{StructureTag, PL};

use crate::error::ConnError;

pub mod app_tag {
    pub const BIND_REQUEST: u64 = 0;
    pub const BIND_RESPONSE: u64 = 1;
    pub const UNBIND_REQUEST: u64 = 2;
    pub const SEARCH_REQUEST: u64 = 3;
    pub const SEARCH_RES_ENTRY: u64 = 4;
    pub const SEARCH_RES_DONE: u64 = 5;
    pub const ABANDON_REQUEST: u64 = 16;
    pub const EXTENDED_REQUEST: u64 = 23;
    pub const EXTENDED_RESPONSE: u64 = 24;
}

/// The single extended operation this server recognizes (spec §4.3, §6).
pub const STARTTLS_OID: &str = "1.3.6.1.4.1.1466.20037";

#[derive(Debug, Clone)]
pub enum AuthChoice {
    Simple(Vec<u8>),
    /// SASL or any other authentication choice this server doesn't support.
    Other,
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub name: String,
    pub auth: AuthChoice,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_object: String,
    pub size_limit: i64,
    pub filter: StructureTag,
}

#[derive(Debug, Clone)]
pub struct ExtendedRequest {
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum ProtocolOp {
    Bind(BindRequest),
    Search(SearchRequest),
    Abandon(i64),
    Unbind,
    Extended(ExtendedRequest),
    Unsupported,
}

/// A fully decoded `LDAPMessage`: its `messageID` and the `protocolOp`
/// choice it wraps. Response controls are never emitted and request
/// controls, if present, are ignored (no control this server implements is
/// in scope).
#[derive(Debug, Clone)]
pub struct LdapMessage {
    pub message_id: i64,
    pub op: ProtocolOp,
}

fn octet_string(tag: &StructureTag) -> Result<Vec<u8>, ConnError> {
    match &tag.payload {
        PL::P(bytes) => Ok(bytes.clone()),
        PL::C(_) => Err(ConnError::UnsupportedOp),
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String, ConnError> {
    String::from_utf8(bytes).map_err(|_| ConnError::UnsupportedOp)
}

fn int_value(tag: &StructureTag) -> Result<i64, ConnError> {
    match &tag.payload {
        PL::P(bytes) => {
            if bytes.is_empty() {
                return Ok(0);
            }
            let negative = bytes[0] & 0x80 != 0;
            if negative {
                let magnitude = parse_uint(
                    &bytes
                        .iter()
                        .map(|b| !b)
                        .collect::<Vec<u8>>(),
                );
                Ok(-(magnitude as i64) - 1)
            } else {
                Ok(parse_uint(bytes) as i64)
            }
        }
        PL::C(_) => Err(ConnError::UnsupportedOp),
    }
}

fn children(tag: StructureTag) -> Result<Vec<StructureTag>, ConnError> {
    tag.expect_constructed().ok_or(ConnError::UnsupportedOp)
}

fn decode_bind(tag: StructureTag) -> Result<BindRequest, ConnError> {
    let mut parts = children(tag)?.into_iter();
    let _version = parts.next().ok_or(ConnError::UnsupportedOp)?;
    let name = utf8(octet_string(&parts.next().ok_or(ConnError::UnsupportedOp)?)?)?;
    let auth_tag = parts.next().ok_or(ConnError::UnsupportedOp)?;
    let auth = match (auth_tag.class, auth_tag.id) {
        (TagClass::Context, 0) => AuthChoice::Simple(octet_string(&auth_tag)?),
        _ => AuthChoice::Other,
    };
    Ok(BindRequest { name, auth })
}

fn decode_search(tag: StructureTag) -> Result<SearchRequest, ConnError> {
    let mut parts = children(tag)?.into_iter();
    let base_object = utf8(octet_string(&parts.next().ok_or(ConnError::UnsupportedOp)?)?)?;
    let _scope = parts.next().ok_or(ConnError::UnsupportedOp)?;
    let _deref_aliases = parts.next().ok_or(ConnError::UnsupportedOp)?;
    let size_limit = int_value(&parts.next().ok_or(ConnError::UnsupportedOp)?)?;
    let _time_limit = parts.next().ok_or(ConnError::UnsupportedOp)?;
    let _types_only = parts.next().ok_or(ConnError::UnsupportedOp)?;
    let filter = parts.next().ok_or(ConnError::UnsupportedOp)?;
    // Remaining element, if present, is the requested attribute selection;
    // this server always returns the full synthesized attribute set.
    Ok(SearchRequest {
        base_object,
        size_limit,
        filter,
    })
}

fn decode_extended(tag: StructureTag) -> Result<ExtendedRequest, ConnError> {
    let parts = children(tag)?;
    let name_tag = parts
        .into_iter()
        .find(|t| t.class == TagClass::Context && t.id == 0)
        .ok_or(ConnError::UnsupportedOp)?;
    Ok(ExtendedRequest {
        name: utf8(octet_string(&name_tag)?)?,
    })
}

/// Decode a top-level `LDAPMessage` SEQUENCE into a [`LdapMessage`].
pub fn decode_message(tag: StructureTag) -> Result<LdapMessage, ConnError> {
    let mut parts = children(tag)?.into_iter();
    let message_id = int_value(&parts.next().ok_or(ConnError::UnsupportedOp)?)?;
    let proto_op = parts.next().ok_or(ConnError::UnsupportedOp)?;
    // A trailing element, if present, is the optional `controls [0]`
    // sequence; this server doesn't implement any control, so it's dropped.

    let op = if proto_op.class == TagClass::Application {
        match proto_op.id {
            app_tag::BIND_REQUEST => ProtocolOp::Bind(decode_bind(proto_op)?),
            app_tag::SEARCH_REQUEST => ProtocolOp::Search(decode_search(proto_op)?),
            app_tag::ABANDON_REQUEST => {
                ProtocolOp::Abandon(int_value(&proto_op)?)
            }
            app_tag::UNBIND_REQUEST => ProtocolOp::Unbind,
            app_tag::EXTENDED_REQUEST => ProtocolOp::Extended(decode_extended(proto_op)?),
            _ => ProtocolOp::Unsupported,
        }
    } else {
        ProtocolOp::Unsupported
    };

    Ok(LdapMessage { message_id, op })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nssldapd_ber::structures::{ASNTag, Integer, OctetString as BOctetString, Sequence, Tag};
    use pretty_assertions::assert_eq;

    fn wrap_message(id: i64, op: Tag) -> StructureTag {
        Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer { inner: id, ..Default::default() }),
                op,
            ],
            ..Default::default()
        })
        .into_structure()
    }

    #[test]
    fn decodes_simple_bind() {
        // Simple auth is primitive context [0], holding the password octets.
        let auth_primitive = Tag::OctetString(BOctetString {
            class: TagClass::Context,
            id: 0,
            inner: b"secret".to_vec(),
        });
        let bind = Tag::StructureTag(
            Tag::Sequence(Sequence {
                class: TagClass::Application,
                id: app_tag::BIND_REQUEST,
                inner: vec![
                    Tag::Integer(Integer { inner: 3, ..Default::default() }),
                    Tag::OctetString(BOctetString {
                        inner: b"uid=alice,ou=people,dc=ex,dc=com".to_vec(),
                        ..Default::default()
                    }),
                    auth_primitive,
                ],
            })
            .into_structure(),
        );
        let msg = wrap_message(1, bind);
        let decoded = decode_message(msg).unwrap();
        assert_eq!(decoded.message_id, 1);
        match decoded.op {
            ProtocolOp::Bind(b) => {
                assert_eq!(b.name, "uid=alice,ou=people,dc=ex,dc=com");
                match b.auth {
                    AuthChoice::Simple(pw) => assert_eq!(pw, b"secret"),
                    AuthChoice::Other => panic!("expected simple auth"),
                }
            }
            _ => panic!("expected bind"),
        }
    }

    #[test]
    fn negative_integer_decodes_correctly() {
        let tag = Tag::Integer(Integer { inner: -5, ..Default::default() }).into_structure();
        assert_eq!(int_value(&tag).unwrap(), -5);
    }
}
