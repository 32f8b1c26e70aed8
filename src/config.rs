//! Command-line configuration (spec §11.3 — out of scope for the core per
//! §1, but required for a runnable binary).

use clap::Parser;

use crate::directory::IdRange;

fn parse_id_range(s: &str) -> Result<IdRange, String> {
    let (low, high) = s
        .split_once('-')
        .ok_or_else(|| format!("expected LOW-HIGH, got {s:?}"))?;
    let low: u32 = low.parse().map_err(|_| format!("invalid low bound: {low:?}"))?;
    let high: u32 = high.parse().map_err(|_| format!("invalid high bound: {high:?}"))?;
    if low > high {
        return Err(format!("low bound {low} exceeds high bound {high}"));
    }
    Ok(IdRange { low, high })
}

/// Read-only LDAPv3 server projecting the host's account and group
/// databases. Expects to already be running as an unprivileged user with
/// the target namespace (chroot, if any) active; this binary does not
/// daemonize, chroot, or drop privileges itself.
#[derive(Parser, Debug)]
#[command(name = "nssldapd", version, about)]
pub struct Config {
    /// Base DN under which all synthesized entries are rooted, e.g. dc=example,dc=com.
    #[arg(long)]
    pub basedn: String,

    /// Account name that is granted unrestricted directory visibility.
    #[arg(long, default_value = "root")]
    pub root_user: String,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:389")]
    pub bind: String,

    /// Allow anonymous (empty-DN) Bind.
    #[arg(long)]
    pub allow_anonymous: bool,

    /// PEM certificate chain for StartTLS. Requires --tls-key.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<String>,

    /// PEM private key for StartTLS. Requires --tls-cert.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<String>,

    /// PEM CA bundle; when present, client certificates are required.
    #[arg(long)]
    pub tls_ca: Option<String>,

    /// Restrict visible accounts to these inclusive uid ranges (repeatable, LOW-HIGH).
    #[arg(long = "uid-range", value_parser = parse_id_range)]
    pub uid_ranges: Vec<IdRange>,

    /// Restrict visible groups to these inclusive gid ranges (repeatable, LOW-HIGH).
    #[arg(long = "gid-range", value_parser = parse_id_range)]
    pub gid_ranges: Vec<IdRange>,

    /// PAM service name used for authentication.
    #[arg(long, default_value = "nssldapd")]
    pub pam_service: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn id_range_parses_low_high() {
        let r = parse_id_range("1000-60000").unwrap();
        assert_eq!(r.low, 1000);
        assert_eq!(r.high, 60000);
    }

    #[test]
    fn id_range_rejects_inverted_bounds() {
        assert!(parse_id_range("60000-1000").is_err());
    }

    #[test]
    fn id_range_rejects_malformed_input() {
        assert!(parse_id_range("not-a-range").is_err());
    }
}
