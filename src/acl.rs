// src/acl.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Access-control values: portable tokens plus backend-native passthrough.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{ACL_PRIVATE, ACL_PUBLIC_READ, ACL_PUBLIC_READ_WRITE};

/// An ACL as requested by the caller.
///
/// The three portable variants are understood by every ACL-capable backend.
/// `Native` carries a backend-specific value that only adapters listing it in
/// [`crate::StorageBackend::native_acls`] will accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Acl {
    Private,
    PublicRead,
    PublicReadWrite,
    Native(String),
}

impl Acl {
    pub fn as_str(&self) -> &str {
        match self {
            Acl::Private => ACL_PRIVATE,
            Acl::PublicRead => ACL_PUBLIC_READ,
            Acl::PublicReadWrite => ACL_PUBLIC_READ_WRITE,
            Acl::Native(v) => v.as_str(),
        }
    }

    /// A blank native value, treated as "use the backend default".
    pub fn is_blank(&self) -> bool {
        matches!(self, Acl::Native(v) if v.trim().is_empty())
    }
}

impl FromStr for Acl {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let acl = if t.eq_ignore_ascii_case(ACL_PRIVATE) {
            Acl::Private
        } else if t.eq_ignore_ascii_case(ACL_PUBLIC_READ) {
            Acl::PublicRead
        } else if t.eq_ignore_ascii_case(ACL_PUBLIC_READ_WRITE) {
            Acl::PublicReadWrite
        } else {
            Acl::Native(t.to_string())
        };
        Ok(acl)
    }
}

impl From<&str> for Acl {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(acl) => acl,
            Err(never) => match never {},
        }
    }
}

impl From<String> for Acl {
    fn from(s: String) -> Self {
        Acl::from(s.as_str())
    }
}

impl From<Acl> for String {
    fn from(acl: Acl) -> Self {
        acl.as_str().to_string()
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translate an ACL into the value sent to the backend.
///
/// Portable tokens map to their canonical spelling. A native value must match
/// (case-insensitively) one of `native`; the canonical spelling from that list
/// is returned. Anything else yields `None`.
pub fn translate(acl: &Acl, native: &[&str]) -> Option<String> {
    match acl {
        Acl::Native(v) => native
            .iter()
            .find(|n| n.eq_ignore_ascii_case(v.trim()))
            .map(|n| n.to_string()),
        portable => Some(portable.as_str().to_string()),
    }
}
