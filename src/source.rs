//! Account source (spec §6, "Account source interface (consumed)").
//!
//! `nss2ldap.c` walks `getpwent()`/`getgrent()` directly against the host's
//! NSS configuration; [`SystemAccountSource`] does the same thing through
//! `libc`, restartable the same way (`setpwent`/`setgrent` rewind,
//! `endpwent`/`endgrent` close).

use std::ffi::CStr;
use std::os::raw::c_char;

use crate::directory::{AccountRecord, GroupRecord};

pub trait AccountSource {
    /// Enumerate all user records exactly once per call, in whatever order
    /// NSS yields them.
    fn users(&self) -> Vec<AccountRecord>;
    /// Enumerate all group records exactly once per call.
    fn groups(&self) -> Vec<GroupRecord>;
    /// Resolve an account name to its numeric uid, or `None` if it doesn't
    /// resolve.
    fn name_to_uid(&self, name: &str) -> Option<u32>;
}

pub struct SystemAccountSource;

unsafe fn cstr_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

impl AccountSource for SystemAccountSource {
    fn users(&self) -> Vec<AccountRecord> {
        let mut out = Vec::new();
        unsafe {
            libc::setpwent();
            loop {
                let entry = libc::getpwent();
                if entry.is_null() {
                    break;
                }
                let pw = &*entry;
                out.push(AccountRecord {
                    name: cstr_to_string(pw.pw_name),
                    passwd: cstr_to_string(pw.pw_passwd),
                    uid: pw.pw_uid,
                    gid: pw.pw_gid,
                    gecos: cstr_to_string(pw.pw_gecos),
                    dir: cstr_to_string(pw.pw_dir),
                    shell: cstr_to_string(pw.pw_shell),
                });
            }
            libc::endpwent();
        }
        out
    }

    fn groups(&self) -> Vec<GroupRecord> {
        let mut out = Vec::new();
        unsafe {
            libc::setgrent();
            loop {
                let entry = libc::getgrent();
                if entry.is_null() {
                    break;
                }
                let gr = &*entry;
                let mut members = Vec::new();
                if !gr.gr_mem.is_null() {
                    let mut i = 0isize;
                    loop {
                        let member_ptr = *gr.gr_mem.offset(i);
                        if member_ptr.is_null() {
                            break;
                        }
                        members.push(cstr_to_string(member_ptr));
                        i += 1;
                    }
                }
                out.push(GroupRecord {
                    name: cstr_to_string(gr.gr_name),
                    passwd: cstr_to_string(gr.gr_passwd),
                    gid: gr.gr_gid,
                    members,
                });
            }
            libc::endgrent();
        }
        out
    }

    fn name_to_uid(&self, name: &str) -> Option<u32> {
        self.users().into_iter().find(|u| u.name == name).map(|u| u.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// An in-memory stand-in so directory/request logic can be tested
    /// without depending on the host's actual account database.
    struct FixedAccountSource {
        users: Vec<AccountRecord>,
        groups: Vec<GroupRecord>,
    }

    impl AccountSource for FixedAccountSource {
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

    #[test]
    fn fixed_source_resolves_names() {
        let src = FixedAccountSource {
            users: vec![AccountRecord {
                name: "alice".into(),
                passwd: "x".into(),
                uid: 1001,
                gid: 1001,
                gecos: "Alice A".into(),
                dir: "/home/alice".into(),
                shell: "/bin/sh".into(),
            }],
            groups: vec![],
        };
        assert_eq!(src.name_to_uid("alice"), Some(1001));
        assert_eq!(src.name_to_uid("bob"), None);
    }
}
