//! Connection engine (spec §4.2, §4.3, §4.4): per-client state, framing,
//! pipelined request list, delay gate, StartTLS upgrade.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::debug;
use mio::net::TcpStream;

use nssldapd_ber::structure::StructureTag;

use crate::auth::{AuthOutcome, Authenticator};
use crate::buffer::{ByteBuffer, DEFAULT_CAPACITY};
use crate::directory::{self, Entry, IdRange};
use crate::error::ConnError;
use crate::filter;
use crate::protocol::{self, AuthChoice, BindRequest, ExtendedRequest, LdapMessage, ProtocolOp, SearchRequest};
use crate::reply::{self, LdapResultFields};
use crate::request::{Outcome, Request};
use crate::source::AccountSource;
use crate::tls::{self, Step, TlsContext};

/// Compile-time cap on emitted `searchResEntry` replies (spec §4.4).
const RESPONSE_MAX: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundIdentity {
    None,
    Root,
    User(u32),
}

/// Collaborators and configuration every Connection on this Server shares
/// (spec §3 "Server"). Single-threaded cooperative scheduling means
/// interior mutability through `Rc`/`RefCell` is enough, the same pattern
/// the teacher uses for its own reactor handle (`Rc<RefCell<Core>>`).
pub struct ServerContext {
    pub basedn: String,
    pub root_user: String,
    pub anon_ok: bool,
    pub uid_ranges: Vec<IdRange>,
    pub gid_ranges: Vec<IdRange>,
    pub tls: Option<Rc<TlsContext>>,
    pub accounts: Rc<dyn AccountSource>,
    pub authenticator: Rc<RefCell<dyn Authenticator>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Normal,
    Handshake,
    Closing,
}

pub struct Connection {
    pub id: u64,
    pub peer_ip: String,
    pub socket: TcpStream,
    tls: Option<rustls::ServerConnection>,
    phase: Phase,
    recv_buf: ByteBuffer,
    send_buf: ByteBuffer,
    pipeline: VecDeque<Request>,
    delay_until: Option<Instant>,
    bound: BoundIdentity,
    closed: bool,
}

fn try_send(send_buf: &mut ByteBuffer, tag: &StructureTag) -> Outcome {
    let mut bytes = Vec::new();
    nssldapd_ber::write::encode(tag, &mut bytes);
    if send_buf.try_append(&bytes) {
        Outcome::Ok
    } else {
        Outcome::WantMore
    }
}

impl Connection {
    pub fn open(id: u64, socket: TcpStream, peer_ip: String) -> Self {
        Connection {
            id,
            peer_ip,
            socket,
            tls: None,
            phase: Phase::Normal,
            recv_buf: ByteBuffer::with_capacity(DEFAULT_CAPACITY),
            send_buf: ByteBuffer::with_capacity(DEFAULT_CAPACITY),
            pipeline: VecDeque::new(),
            delay_until: None,
            bound: BoundIdentity::None,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn bound(&self) -> BoundIdentity {
        self.bound
    }

    /// Spec §8 invariant 1: `read interest ⇔ delay == 0 ∧ ¬recv_buf.full`.
    pub fn read_interest(&self) -> bool {
        !matches!(self.phase, Phase::Closing) && self.delay_until.is_none() && !self.recv_buf.full()
    }

    /// Spec §8 invariant 2, with the handshake/goodbye exception from §4.3.
    pub fn write_interest(&self) -> bool {
        if !self.send_buf.is_empty() {
            return true;
        }
        match (&self.phase, &self.tls) {
            (Phase::Handshake, Some(session)) | (Phase::Closing, Some(session)) => session.wants_write(),
            _ => false,
        }
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closing;
    }

    fn delay_expired(&self) -> bool {
        match self.delay_until {
            Some(t) => Instant::now() >= t,
            None => false,
        }
    }

    /// The central driver: called whenever bytes, writability, or the delay
    /// timer change state (spec §4.2 "respond contract and ordering").
    pub fn respond(&mut self, ctx: &ServerContext) {
        match self.phase {
            Phase::Closing => return self.drive_goodbye(),
            Phase::Handshake => return self.drive_handshake(),
            Phase::Normal => {}
        }

        if self.delay_expired() {
            self.delay_until = None;
        }

        if self.delay_until.is_none() {
            if let Err(e) = self.transport_read() {
                debug!("connection {}: read error: {e}", self.id);
                self.close();
                return;
            }

            loop {
                match self.decode_one() {
                    Ok(Some(msg)) => {
                        if self.dispatch(ctx, msg) {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("connection {}: decode error: {e}", self.id);
                        self.close();
                        return;
                    }
                }
            }
        }

        // A Bind handled above may have just armed the delay gate; don't
        // send its reply (or anything else) until it clears.
        if self.delay_until.is_some() {
            return;
        }

        loop {
            let outcome = match self.pipeline.front_mut() {
                None => break,
                Some(front) => front.respond(|tag| try_send(&mut self.send_buf, tag)),
            };
            match outcome {
                Outcome::Ok => match self.pipeline.front() {
                    Some(front) if front.is_exhausted() => {
                        self.pipeline.pop_front();
                    }
                    _ => self.pipeline.rotate_left(1),
                },
                Outcome::WantMore => break,
                Outcome::Fail => {
                    self.close();
                    return;
                }
            }
        }

        if let Err(e) = self.transport_write() {
            debug!("connection {}: write error: {e}", self.id);
            self.close();
        }
    }

    fn decode_one(&mut self) -> Result<Option<LdapMessage>, ConnError> {
        match nssldapd_ber::decode_one(self.recv_buf.read_region())? {
            None => {
                if self.recv_buf.full() {
                    return Err(ConnError::BufferFull);
                }
                Ok(None)
            }
            Some((consumed, tag)) => {
                self.recv_buf.mark_consumed(consumed);
                Ok(Some(protocol::decode_message(tag)?))
            }
        }
    }

    /// Returns `true` if the caller should stop processing this connection
    /// for the remainder of this `respond` call (Unbind or an unrecognized
    /// protocolOp, both of which initiate close, spec §4.2 step 1).
    fn dispatch(&mut self, ctx: &ServerContext, msg: LdapMessage) -> bool {
        match msg.op {
            ProtocolOp::Bind(bind) => {
                let outcome = handle_bind(ctx, msg.message_id, bind);
                if let Some(bound) = outcome.bound {
                    self.bound = bound;
                }
                if let Some(delay) = outcome.delay {
                    self.delay_until = Some(Instant::now() + delay);
                }
                self.pipeline.push_back(Request::new(msg.message_id, vec![outcome.reply]));
                false
            }
            ProtocolOp::Search(search) => {
                let replies = handle_search(ctx, msg.message_id, search);
                self.pipeline.push_back(Request::new(msg.message_id, replies));
                false
            }
            ProtocolOp::Abandon(target_id) => {
                self.pipeline.retain(|r| r.message_id != target_id);
                false
            }
            ProtocolOp::Unbind => {
                self.close();
                true
            }
            ProtocolOp::Extended(extended) => {
                let outcome = handle_extended(ctx, msg.message_id, extended);
                if !outcome.start_handshake {
                    self.pipeline.push_back(Request::new(msg.message_id, vec![outcome.reply]));
                    return false;
                }
                // The acknowledging ExtendedResponse has to reach the client in
                // cleartext before the handshake starts (spec §4.3): encode and
                // flush it directly instead of queuing it in the pipeline, where
                // it would otherwise be written through the new TLS session as
                // encrypted application data.
                if try_send(&mut self.send_buf, &outcome.reply) != Outcome::Ok {
                    debug!("connection {}: StartTLS ack did not fit in send_buf", self.id);
                    self.close();
                    return true;
                }
                if self.plain_write().is_err() {
                    self.close();
                    return true;
                }
                match ctx.tls.as_ref().expect("tls checked by handle_extended").new_session() {
                    Ok(session) => {
                        self.tls = Some(session);
                        self.phase = Phase::Handshake;
                    }
                    Err(e) => {
                        debug!("connection {}: TLS session setup failed: {e}", self.id);
                        self.close();
                    }
                }
                true
            }
            ProtocolOp::Unsupported => {
                self.close();
                true
            }
        }
    }

    /// Step 3 of the handshake procedure and the symmetric part of the
    /// goodbye procedure: flush whatever's already buffered over the raw
    /// socket, since it was queued before (or is not subject to) TLS.
    fn plain_write(&mut self) -> io::Result<()> {
        while !self.send_buf.is_empty() {
            let region = self.send_buf.read_region();
            match self.socket.write(region) {
                Ok(0) => break,
                Ok(n) => self.send_buf.mark_consumed(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn drive_handshake(&mut self) {
        if !self.send_buf.is_empty() {
            if self.plain_write().is_err() {
                self.close();
                return;
            }
            if !self.send_buf.is_empty() {
                return;
            }
        }
        let Some(session) = self.tls.as_mut() else {
            self.phase = Phase::Normal;
            return;
        };
        match tls::drive(session, &mut self.socket) {
            Step::Done => self.phase = Phase::Normal,
            Step::WantsRead | Step::WantsWrite => {}
            // Leave the connection live in cleartext rather than tearing it
            // down (spec §9, open question (b)).
            Step::Fatal => {
                self.tls = None;
                self.phase = Phase::Normal;
            }
        }
    }

    fn drive_goodbye(&mut self) {
        if self.transport_write().is_err() {
            self.closed = true;
            return;
        }
        if !self.send_buf.is_empty() {
            return;
        }
        match self.tls.as_mut() {
            Some(session) => {
                session.send_close_notify();
                match tls::drive(session, &mut self.socket) {
                    Step::WantsRead | Step::WantsWrite => {}
                    Step::Done | Step::Fatal => self.closed = true,
                }
            }
            None => self.closed = true,
        }
    }

    fn transport_read(&mut self) -> io::Result<usize> {
        if let Some(session) = &mut self.tls {
            loop {
                match session.read_tls(&mut self.socket) {
                    Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed")),
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            session
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            let mut total = 0;
            loop {
                let region = self.recv_buf.write_region();
                if region.is_empty() {
                    break;
                }
                match session.reader().read(region) {
                    Ok(0) => break,
                    Ok(n) => {
                        self.recv_buf.mark_written(n);
                        total += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(total)
        } else {
            let mut total = 0;
            loop {
                let region = self.recv_buf.write_region();
                if region.is_empty() {
                    break;
                }
                match self.socket.read(region) {
                    Ok(0) => {
                        if total == 0 {
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
                        }
                        break;
                    }
                    Ok(n) => {
                        self.recv_buf.mark_written(n);
                        total += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(total)
        }
    }

    fn transport_write(&mut self) -> io::Result<()> {
        if let Some(session) = &mut self.tls {
            while !self.send_buf.is_empty() {
                let region = self.send_buf.read_region();
                match session.writer().write(region) {
                    Ok(0) => break,
                    Ok(n) => self.send_buf.mark_consumed(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            while session.wants_write() {
                match session.write_tls(&mut self.socket) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        } else {
            self.plain_write()
        }
    }
}

struct BindOutcome {
    reply: StructureTag,
    bound: Option<BoundIdentity>,
    delay: Option<Duration>,
}

fn handle_bind(ctx: &ServerContext, message_id: i64, bind: BindRequest) -> BindOutcome {
    if bind.name.is_empty() {
        return if ctx.anon_ok {
            BindOutcome {
                reply: reply::bind_response(message_id, LdapResultFields::success("")),
                bound: Some(BoundIdentity::None),
                delay: None,
            }
        } else {
            BindOutcome {
                reply: reply::bind_response(
                    message_id,
                    LdapResultFields::error(reply::rc::INVALID_CREDENTIALS, "anonymous bind not allowed"),
                ),
                bound: None,
                delay: None,
            }
        };
    }

    match bind.auth {
        AuthChoice::Simple(password) => {
            let Some(name) = directory::dn_to_user_name(&ctx.basedn, &bind.name) else {
                return BindOutcome {
                    reply: reply::bind_response(
                        message_id,
                        LdapResultFields::error(reply::rc::INVALID_DN_SYNTAX, "malformed bind DN"),
                    ),
                    bound: None,
                    delay: None,
                };
            };
            let password = String::from_utf8_lossy(&password).into_owned();
            let result = ctx.authenticator.borrow_mut().authenticate(&name, &password);
            match result.outcome {
                AuthOutcome::Success => {
                    let bound = if name == ctx.root_user {
                        BoundIdentity::Root
                    } else {
                        ctx.accounts.name_to_uid(&name).map(BoundIdentity::User).unwrap_or(BoundIdentity::None)
                    };
                    BindOutcome {
                        reply: reply::bind_response(message_id, LdapResultFields::success(bind.name.clone())),
                        bound: Some(bound),
                        delay: None,
                    }
                }
                AuthOutcome::Failure => BindOutcome {
                    reply: reply::bind_response(
                        message_id,
                        LdapResultFields::error(reply::rc::INVALID_CREDENTIALS, result.diagnostic),
                    ),
                    bound: None,
                    delay: Some(result.delay),
                },
            }
        }
        AuthChoice::Other => BindOutcome {
            reply: reply::bind_response(
                message_id,
                LdapResultFields::error(reply::rc::AUTH_METHOD_NOT_SUPPORTED, "only simple authentication is supported"),
            ),
            bound: None,
            delay: None,
        },
    }
}

fn attribute_list(entry: &Entry) -> reply::AttributeList {
    reply::AttributeList(entry.attributes.iter().map(|a| (a.name.clone(), a.values.clone())).collect())
}

fn handle_search(ctx: &ServerContext, message_id: i64, req: SearchRequest) -> Vec<StructureTag> {
    if !(req.base_object.is_empty() || req.base_object == ctx.basedn) {
        return vec![reply::search_result_done(
            message_id,
            LdapResultFields::error(reply::rc::OTHER, "baseobject is invalid"),
        )];
    }

    let filter = match filter::decode_filter(req.filter) {
        Ok(f) => f,
        Err(_) => {
            return vec![reply::search_result_done(
                message_id,
                LdapResultFields::error(reply::rc::OTHER, "filter not supported"),
            )]
        }
    };

    let limit = if req.size_limit > 0 {
        (req.size_limit as usize).min(RESPONSE_MAX)
    } else {
        RESPONSE_MAX
    };

    let mut out = Vec::new();
    for user in ctx.accounts.users() {
        if out.len() >= limit {
            break;
        }
        if !directory::id_allowed(&ctx.uid_ranges, user.uid) {
            continue;
        }
        let entry = directory::synthesize_user_entry(&ctx.basedn, &user);
        if filter.matches(&entry) {
            out.push(reply::search_result_entry(message_id, &entry.dn, &attribute_list(&entry)));
        }
    }
    if out.len() < limit {
        for group in ctx.accounts.groups() {
            if out.len() >= limit {
                break;
            }
            if !directory::id_allowed(&ctx.gid_ranges, group.gid) {
                continue;
            }
            let entry = directory::synthesize_group_entry(&ctx.basedn, &group);
            if filter.matches(&entry) {
                out.push(reply::search_result_entry(message_id, &entry.dn, &attribute_list(&entry)));
            }
        }
    }

    out.push(reply::search_result_done(message_id, LdapResultFields::success(ctx.basedn.clone())));
    out
}

struct ExtendedOutcome {
    reply: StructureTag,
    start_handshake: bool,
}

fn handle_extended(ctx: &ServerContext, message_id: i64, req: ExtendedRequest) -> ExtendedOutcome {
    if req.name != protocol::STARTTLS_OID {
        return ExtendedOutcome {
            reply: reply::extended_response(
                message_id,
                LdapResultFields::error(reply::rc::PROTOCOL_ERROR, "Unknown extended operation."),
                None,
            ),
            start_handshake: false,
        };
    }
    if ctx.tls.is_some() {
        ExtendedOutcome {
            reply: reply::extended_response(
                message_id,
                LdapResultFields::ok("Starting TLS handshake..."),
                Some(protocol::STARTTLS_OID),
            ),
            start_handshake: true,
        }
    } else {
        ExtendedOutcome {
            reply: reply::extended_response(
                message_id,
                LdapResultFields::error(reply::rc::PROTOCOL_ERROR, "TLS not enabled"),
                None,
            ),
            start_handshake: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthResult;
    use crate::directory::{AccountRecord, GroupRecord};
    use nssldapd_ber::common::TagClass;
    use nssldapd_ber::structures::{ASNTag, OctetString as BOctetString, Sequence, Tag};
    use pretty_assertions::assert_eq;

    struct FixedAccounts {
        users: Vec<AccountRecord>,
        groups: Vec<GroupRecord>,
    }

    impl AccountSource for FixedAccounts {
        fn users(&self) -> Vec<AccountRecord> {
            self.users.clone()
        }
        fn groups(&self) -> Vec<GroupRecord> {
            self.groups.clone()
        }
        fn name_to_uid(&self, name: &str) -> Option<u32> {
            self.users.iter().find(|u| u.name == name).map(|u| u.uid)
        }
    }

    struct ScriptedAuthenticator {
        outcome: AuthOutcome,
        delay: Duration,
    }

    impl Authenticator for ScriptedAuthenticator {
        fn authenticate(&mut self, _user: &str, _password: &str) -> AuthResult {
            AuthResult {
                outcome: self.outcome,
                diagnostic: "bad password".into(),
                delay: self.delay,
            }
        }
    }

    fn ctx(auth_outcome: AuthOutcome, delay: Duration) -> ServerContext {
        ServerContext {
            basedn: "dc=ex,dc=com".into(),
            root_user: "root".into(),
            anon_ok: true,
            uid_ranges: vec![],
            gid_ranges: vec![],
            tls: None,
            accounts: Rc::new(FixedAccounts {
                users: vec![AccountRecord {
                    name: "alice".into(),
                    passwd: "x".into(),
                    uid: 1001,
                    gid: 1001,
                    gecos: "Alice A,,,".into(),
                    dir: "/home/alice".into(),
                    shell: "/bin/sh".into(),
                }],
                groups: vec![],
            }),
            authenticator: Rc::new(RefCell::new(ScriptedAuthenticator { outcome: auth_outcome, delay })),
        }
    }

    #[test]
    fn anonymous_bind_succeeds_when_allowed() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let outcome = handle_bind(&c, 1, BindRequest { name: String::new(), auth: AuthChoice::Simple(vec![]) });
        assert_eq!(outcome.bound, Some(BoundIdentity::None));
        assert_eq!(outcome.delay, None);
    }

    #[test]
    fn bad_password_applies_delay_and_invalid_credentials() {
        let c = ctx(AuthOutcome::Failure, Duration::from_millis(500));
        let outcome = handle_bind(
            &c,
            2,
            BindRequest {
                name: "uid=alice,ou=people,dc=ex,dc=com".into(),
                auth: AuthChoice::Simple(b"wrong".to_vec()),
            },
        );
        assert_eq!(outcome.bound, None);
        assert_eq!(outcome.delay, Some(Duration::from_millis(500)));
    }

    #[test]
    fn malformed_bind_dn_is_invalid_dn_syntax() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let outcome = handle_bind(
            &c,
            3,
            BindRequest { name: "not a dn".into(), auth: AuthChoice::Simple(b"x".to_vec()) },
        );
        assert!(outcome.bound.is_none());
    }

    #[test]
    fn sasl_auth_is_not_supported() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let outcome = handle_bind(&c, 4, BindRequest { name: "uid=alice,ou=people,dc=ex,dc=com".into(), auth: AuthChoice::Other });
        assert!(outcome.bound.is_none());
    }

    fn present_filter_tag(attr: &str) -> StructureTag {
        Tag::OctetString(BOctetString { class: TagClass::Context, id: 7, inner: attr.as_bytes().to_vec() })
            .into_structure()
    }

    #[test]
    fn search_with_valid_basedn_and_filter_returns_entry_then_done() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let replies = handle_search(
            &c,
            5,
            SearchRequest { base_object: "dc=ex,dc=com".into(), size_limit: 0, filter: present_filter_tag("uid") },
        );
        assert_eq!(replies.len(), 2);
    }

    #[test]
    fn search_with_wrong_basedn_returns_only_done_with_other() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let replies = handle_search(
            &c,
            6,
            SearchRequest { base_object: "dc=wrong,dc=com".into(), size_limit: 0, filter: present_filter_tag("uid") },
        );
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn search_with_unsupported_filter_returns_only_done_with_other() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let substrings = Tag::OctetString(BOctetString { class: TagClass::Context, id: 4, inner: b"al".to_vec() })
            .into_structure();
        let replies = handle_search(&c, 7, SearchRequest { base_object: "dc=ex,dc=com".into(), size_limit: 0, filter: substrings });
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn extended_unknown_oid_is_protocol_error() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let outcome = handle_extended(&c, 8, ExtendedRequest { name: "1.2.3.4".into() });
        assert!(!outcome.start_handshake);
    }

    #[test]
    fn extended_starttls_without_tls_context_is_protocol_error() {
        let c = ctx(AuthOutcome::Success, Duration::ZERO);
        let outcome = handle_extended(&c, 9, ExtendedRequest { name: protocol::STARTTLS_OID.into() });
        assert!(!outcome.start_handshake);
    }
}
