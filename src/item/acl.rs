//! Access control entries
//!
//! Entries use the POSIX short form also used by ADLS Gen2:
//! `[default:]<kind>:<id>:<perm>`, e.g. `user::rwx` or `default:group:g1:r-x`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of principal an entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclKind {
    User,
    Group,
    Mask,
    Other,
}

impl fmt::Display for AclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclKind::User => write!(f, "user"),
            AclKind::Group => write!(f, "group"),
            AclKind::Mask => write!(f, "mask"),
            AclKind::Other => write!(f, "other"),
        }
    }
}

impl FromStr for AclKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(AclKind::User),
            "group" => Ok(AclKind::Group),
            "mask" => Ok(AclKind::Mask),
            "other" => Ok(AclKind::Other),
            other => Err(format!("unknown ACL entry kind '{}'", other)),
        }
    }
}

/// A single access control entry, copied verbatim into results
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclEntry {
    /// Entry is a default (inherited) entry rather than an access entry
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default_scope: bool,
    pub kind: AclKind,
    /// Principal id; empty for the owning user/group, mask and other
    #[serde(default)]
    pub id: String,
    pub perm: String,
}

impl AclEntry {
    /// Access entry for a named user
    pub fn user(id: &str, perm: &str) -> Self {
        Self::new(AclKind::User, id, perm)
    }

    /// Access entry for a named group
    pub fn group(id: &str, perm: &str) -> Self {
        Self::new(AclKind::Group, id, perm)
    }

    /// Access entry for everyone else
    pub fn other(perm: &str) -> Self {
        Self::new(AclKind::Other, "", perm)
    }

    pub fn new(kind: AclKind, id: &str, perm: &str) -> Self {
        Self {
            default_scope: false,
            kind,
            id: id.to_string(),
            perm: perm.to_string(),
        }
    }

    /// Mark as a default-scope entry
    pub fn as_default(mut self) -> Self {
        self.default_scope = true;
        self
    }

    /// Parse the short form `[default:]<kind>:<id>:<perm>`
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let (default_scope, rest) = match s.strip_prefix("default:") {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let mut parts = rest.splitn(3, ':');
        let kind = parts
            .next()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| format!("missing kind in ACL entry '{}'", s))?
            .parse::<AclKind>()?;
        let id = parts
            .next()
            .ok_or_else(|| format!("missing id in ACL entry '{}'", s))?;
        let perm = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("missing permissions in ACL entry '{}'", s))?;

        Ok(Self {
            default_scope,
            kind,
            id: id.to_string(),
            perm: perm.to_string(),
        })
    }

    /// Parse a comma-separated ACL list
    pub fn parse_list(s: &str) -> Result<Vec<Self>, String> {
        s.split(',')
            .filter(|e| !e.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.default_scope {
            write!(f, "default:")?;
        }
        write!(f, "{}:{}:{}", self.kind, self.id, self.perm)
    }
}

impl FromStr for AclEntry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_form() {
        let entry = AclEntry::parse("user::rwx").unwrap();
        assert_eq!(entry.kind, AclKind::User);
        assert_eq!(entry.id, "");
        assert_eq!(entry.perm, "rwx");
        assert!(!entry.default_scope);

        let entry = AclEntry::parse("default:group:g-42:r-x").unwrap();
        assert!(entry.default_scope);
        assert_eq!(entry.kind, AclKind::Group);
        assert_eq!(entry.id, "g-42");
        assert_eq!(entry.to_string(), "default:group:g-42:r-x");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AclEntry::parse("").is_err());
        assert!(AclEntry::parse("owner:x:rwx").is_err());
        assert!(AclEntry::parse("user:u1").is_err());
        assert!(AclEntry::parse("user:u1:").is_err());
    }

    #[test]
    fn test_parse_list() {
        let acls = AclEntry::parse_list("user::rwx,group::r-x, other::---").unwrap();
        assert_eq!(acls.len(), 3);
        assert_eq!(acls[2], AclEntry::other("---"));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(AclEntry::user("u1", "r")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "user", "id": "u1", "perm": "r" })
        );

        let json = serde_json::to_value(AclEntry::other("r--").as_default()).unwrap();
        assert_eq!(json["defaultScope"], true);
    }
}
