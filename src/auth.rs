//! Authenticator (spec §6, "Authenticator interface (consumed)").
//!
//! `ldap_server.c` authenticates through `auth_pam(user, pw, status, &delay)`.
//! [`PamAuthenticator`] does the same through `pam-client`, using a
//! configurable service name instead of a name baked into the binary.

use std::collections::HashMap;
use std::time::Duration;

use pam_client::conv_simple::PasswordConv;
use pam_client::{Context, Flag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    Failure,
}

pub struct AuthResult {
    pub outcome: AuthOutcome,
    pub diagnostic: String,
    /// Suggested delay before the connection's next read/send, spec §4.4.
    pub delay: Duration,
}

pub trait Authenticator {
    fn authenticate(&mut self, user: &str, password: &str) -> AuthResult;
}

/// Delay policy is an Open Question the source leaves to its PAM module's
/// tally; this implementation backs off per username instead, doubling up
/// to a cap rather than trusting a specific module's semantics.
const BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(4);

pub struct PamAuthenticator {
    service: String,
    failures: HashMap<String, u32>,
}

impl PamAuthenticator {
    pub fn new(service: impl Into<String>) -> Self {
        PamAuthenticator { service: service.into(), failures: HashMap::new() }
    }

    fn backoff_for(&mut self, user: &str) -> Duration {
        let count = self.failures.entry(user.to_string()).or_insert(0);
        *count += 1;
        let shift = (*count - 1).min(6);
        (BASE_DELAY * 2u32.pow(shift)).min(MAX_DELAY)
    }

    fn clear_failures(&mut self, user: &str) {
        self.failures.remove(user);
    }
}

impl Authenticator for PamAuthenticator {
    fn authenticate(&mut self, user: &str, password: &str) -> AuthResult {
        let conv = PasswordConv::new();
        let mut context = match Context::new(&self.service, Some(user), conv) {
            Ok(ctx) => ctx,
            Err(e) => {
                return AuthResult {
                    outcome: AuthOutcome::Failure,
                    diagnostic: format!("PAM context error: {e}"),
                    delay: self.backoff_for(user),
                }
            }
        };
        context.conversation_mut().set_credentials(user, password);

        let result = context
            .authenticate(Flag::NONE)
            .and_then(|_| context.acct_mgmt(Flag::NONE));

        match result {
            Ok(()) => {
                self.clear_failures(user);
                AuthResult {
                    outcome: AuthOutcome::Success,
                    diagnostic: String::new(),
                    delay: Duration::ZERO,
                }
            }
            Err(e) => AuthResult {
                outcome: AuthOutcome::Failure,
                diagnostic: format!("{e}"),
                delay: self.backoff_for(user),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut auth = PamAuthenticator::new("nssldapd");
        let d1 = auth.backoff_for("alice");
        let d2 = auth.backoff_for("alice");
        let d3 = auth.backoff_for("alice");
        assert_eq!(d1, BASE_DELAY);
        assert_eq!(d2, BASE_DELAY * 2);
        assert_eq!(d3, BASE_DELAY * 4);
        for _ in 0..20 {
            auth.backoff_for("alice");
        }
        assert_eq!(auth.backoff_for("alice"), MAX_DELAY);
    }

    #[test]
    fn clearing_resets_the_counter() {
        let mut auth = PamAuthenticator::new("nssldapd");
        auth.backoff_for("bob");
        auth.backoff_for("bob");
        auth.clear_failures("bob");
        assert_eq!(auth.backoff_for("bob"), BASE_DELAY);
    }
}
