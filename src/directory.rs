//! Directory projection: account/group records to synthesized LDAP entries,
//! and the DN shape both directions (spec §3 "DN shape", §4.5).

/// A password-database record, the fields `nss2ldap.c` reads out of
/// `struct passwd`.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub name: String,
    pub passwd: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub dir: String,
    pub shell: String,
}

/// A group-database record, the fields read out of `struct group`.
#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub name: String,
    pub passwd: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// One attribute on a synthesized entry: a type name and its ordered values.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

/// A synthesized `SearchResultEntry`, before DER encoding.
#[derive(Debug, Clone)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

impl Entry {
    /// Values of the named attribute, compared case-sensitively (spec §3).
    pub fn values(&self, attr: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .iter()
            .find(|a| a.name == attr)
            .map(|a| a.values.as_slice())
    }

    pub fn has_attribute(&self, attr: &str) -> bool {
        self.attributes.iter().any(|a| a.name == attr)
    }
}

/// An inclusive numeric id range, e.g. `--uid-range 1000-60000`.
#[derive(Debug, Clone, Copy)]
pub struct IdRange {
    pub low: u32,
    pub high: u32,
}

impl IdRange {
    pub fn contains(&self, id: u32) -> bool {
        id >= self.low && id <= self.high
    }
}

/// Is `id` inside at least one of `ranges`? An empty slice means unrestricted
/// (no range configured), matching the default of "no operator-supplied
/// restriction excludes anything".
pub fn id_allowed(ranges: &[IdRange], id: u32) -> bool {
    ranges.is_empty() || ranges.iter().any(|r| r.contains(id))
}

pub fn dn_for_user(basedn: &str, name: &str) -> String {
    format!("uid={name},ou=people,{basedn}")
}

pub fn dn_for_group(basedn: &str, name: &str) -> String {
    format!("cn={name},ou=groups,{basedn}")
}

/// Parse a bind DN of the accepted shape, returning the account name.
/// No escaping or alternative attribute ordering is recognized (spec §6).
pub fn dn_to_user_name(basedn: &str, dn: &str) -> Option<String> {
    let suffix = format!(",ou=people,{basedn}");
    let name = dn.strip_suffix(&suffix)?.strip_prefix("uid=")?;
    if name.is_empty() || name.contains(',') {
        None
    } else {
        Some(name.to_string())
    }
}

fn cn_from_gecos(gecos: &str) -> &str {
    gecos.split(',').next().unwrap_or("")
}

pub fn synthesize_user_entry(basedn: &str, rec: &AccountRecord) -> Entry {
    Entry {
        dn: dn_for_user(basedn, &rec.name),
        attributes: vec![
            Attribute {
                name: "objectClass".into(),
                values: vec![b"top".to_vec(), b"account".to_vec(), b"posixAccount".to_vec()],
            },
            Attribute { name: "uid".into(), values: vec![rec.name.clone().into_bytes()] },
            Attribute { name: "cn".into(), values: vec![cn_from_gecos(&rec.gecos).as_bytes().to_vec()] },
            Attribute {
                name: "userPassword".into(),
                values: vec![format!("{{crypt}}{}", rec.passwd).into_bytes()],
            },
            Attribute { name: "uidNumber".into(), values: vec![rec.uid.to_string().into_bytes()] },
            Attribute { name: "gidNumber".into(), values: vec![rec.gid.to_string().into_bytes()] },
            Attribute { name: "gecos".into(), values: vec![rec.gecos.clone().into_bytes()] },
            Attribute { name: "homeDirectory".into(), values: vec![rec.dir.clone().into_bytes()] },
            Attribute { name: "loginShell".into(), values: vec![rec.shell.clone().into_bytes()] },
        ],
    }
}

pub fn synthesize_group_entry(basedn: &str, rec: &GroupRecord) -> Entry {
    Entry {
        dn: dn_for_group(basedn, &rec.name),
        attributes: vec![
            Attribute {
                name: "objectClass".into(),
                values: vec![b"top".to_vec(), b"posixGroup".to_vec()],
            },
            Attribute { name: "cn".into(), values: vec![rec.name.clone().into_bytes()] },
            Attribute {
                name: "userPassword".into(),
                values: vec![format!("{{crypt}}{}", rec.passwd).into_bytes()],
            },
            Attribute { name: "gidNumber".into(), values: vec![rec.gid.to_string().into_bytes()] },
            Attribute {
                name: "memberUid".into(),
                values: rec.members.iter().map(|m| m.clone().into_bytes()).collect(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn alice() -> AccountRecord {
        AccountRecord {
            name: "alice".into(),
            passwd: "x".into(),
            uid: 1001,
            gid: 1001,
            gecos: "Alice A,,,".into(),
            dir: "/home/alice".into(),
            shell: "/bin/sh".into(),
        }
    }

    #[test]
    fn user_entry_matches_attribute_table() {
        let entry = synthesize_user_entry("dc=ex,dc=com", &alice());
        assert_eq!(entry.dn, "uid=alice,ou=people,dc=ex,dc=com");
        assert_eq!(entry.values("uid").unwrap(), &[b"alice".to_vec()]);
        assert_eq!(entry.values("cn").unwrap(), &[b"Alice A".to_vec()]);
        assert_eq!(entry.values("uidNumber").unwrap(), &[b"1001".to_vec()]);
        assert_eq!(entry.values("userPassword").unwrap(), &[b"{crypt}x".to_vec()]);
        assert!(entry.has_attribute("homeDirectory"));
    }

    #[test]
    fn group_entry_lists_members() {
        let rec = GroupRecord {
            name: "wheel".into(),
            passwd: "x".into(),
            gid: 10,
            members: vec!["alice".into(), "bob".into()],
        };
        let entry = synthesize_group_entry("dc=ex,dc=com", &rec);
        assert_eq!(entry.dn, "cn=wheel,ou=groups,dc=ex,dc=com");
        assert_eq!(
            entry.values("memberUid").unwrap(),
            &[b"alice".to_vec(), b"bob".to_vec()]
        );
    }

    #[test]
    fn dn_round_trips_through_user_name() {
        let dn = dn_for_user("dc=ex,dc=com", "alice");
        assert_eq!(dn_to_user_name("dc=ex,dc=com", &dn).unwrap(), "alice");
    }

    #[test]
    fn dn_with_wrong_basedn_does_not_parse() {
        let dn = dn_for_user("dc=ex,dc=com", "alice");
        assert!(dn_to_user_name("dc=other,dc=com", &dn).is_none());
    }

    #[test]
    fn dn_with_embedded_comma_in_name_does_not_parse() {
        let dn = "uid=a,b,ou=people,dc=ex,dc=com";
        assert!(dn_to_user_name("dc=ex,dc=com", dn).is_none());
    }

    #[test]
    fn id_range_restricts_membership() {
        let ranges = vec![IdRange { low: 1000, high: 2000 }];
        assert!(id_allowed(&ranges, 1500));
        assert!(!id_allowed(&ranges, 500));
        assert!(id_allowed(&[], 500));
    }
}
