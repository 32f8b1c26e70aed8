//! Request/Reply (spec §3 "Request"/"Reply", §4.2 pipelining).
//!
//! Directory enumeration is in-memory and bounded by `RESPONSE_MAX`, so a
//! Request's replies are materialized eagerly at construction rather than
//! generated lazily; what's modeled here is purely the drain-one-at-a-time
//! send discipline pipelining depends on.

use std::collections::VecDeque;

use nssldapd_ber::structure::StructureTag;

/// Outcome of a single send/recv/respond step (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    WantMore,
    Fail,
}

/// A received LDAP message awaiting reply production (spec §3, "Request").
pub struct Request {
    pub message_id: i64,
    replies: VecDeque<StructureTag>,
}

impl Request {
    pub fn new(message_id: i64, replies: Vec<StructureTag>) -> Self {
        Request { message_id, replies: replies.into() }
    }

    pub fn is_exhausted(&self) -> bool {
        self.replies.is_empty()
    }

    /// Try to hand the next queued reply to `send`. A reply stays queued on
    /// `WantMore` so the same bytes are retried next time (spec §8,
    /// boundary: "send buffer cannot fit a reply... next write-readiness
    /// retries with identical result bytes").
    pub fn respond(&mut self, mut send: impl FnMut(&StructureTag) -> Outcome) -> Outcome {
        match self.replies.front() {
            None => Outcome::Ok,
            Some(reply) => match send(reply) {
                Outcome::Ok => {
                    self.replies.pop_front();
                    Outcome::Ok
                }
                other => other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nssldapd_ber::common::TagClass;
    use nssldapd_ber::structure::PL;
    use pretty_assertions::assert_eq;

    fn dummy_tag(n: u64) -> StructureTag {
        StructureTag { class: TagClass::Universal, id: n, payload: PL::P(vec![]) }
    }

    #[test]
    fn drains_replies_in_order_on_ok() {
        let mut req = Request::new(1, vec![dummy_tag(1), dummy_tag(2)]);
        let mut seen = Vec::new();
        assert_eq!(
            req.respond(|tag| {
                seen.push(tag.id);
                Outcome::Ok
            }),
            Outcome::Ok
        );
        assert_eq!(seen, vec![1]);
        assert!(!req.is_exhausted());
        req.respond(|tag| {
            seen.push(tag.id);
            Outcome::Ok
        });
        assert_eq!(seen, vec![1, 2]);
        assert!(req.is_exhausted());
    }

    #[test]
    fn want_more_leaves_reply_queued() {
        let mut req = Request::new(1, vec![dummy_tag(1)]);
        assert_eq!(req.respond(|_| Outcome::WantMore), Outcome::WantMore);
        assert!(!req.is_exhausted());
        assert_eq!(req.respond(|_| Outcome::Ok), Outcome::Ok);
        assert!(req.is_exhausted());
    }

    #[test]
    fn exhausted_request_reports_ok_without_sending() {
        let mut req = Request::new(1, vec![]);
        assert!(req.is_exhausted());
        assert_eq!(req.respond(|_| panic!("should not be called")), Outcome::Ok);
    }
}
