use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission code.
///
/// Codes are opaque strings (e.g. "movies:read"). Nothing is implied by a code
/// that is not literally present in an account's set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

pub const MOVIES_READ: Permission = Permission::from_static("movies:read");
pub const MOVIES_WRITE: Permission = Permission::from_static("movies:write");

/// Every code the permission table is seeded with.
pub const KNOWN_PERMISSIONS: [Permission; 2] = [MOVIES_READ, MOVIES_WRITE];

/// The set of codes granted to one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeSet<Permission>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(&self, code: &str) -> bool {
        self.0.iter().any(|p| p.as_str() == code)
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Permissions {
    type Item = &'a Permission;
    type IntoIter = std::collections::btree_set::Iter<'a, Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_is_exact_membership() {
        let perms: Permissions = [MOVIES_READ].into_iter().collect();

        assert!(perms.include("movies:read"));
        assert!(!perms.include("movies:write"));
        assert!(!perms.include("movies"));
        assert!(!perms.include("*"));
    }

    #[test]
    fn duplicates_collapse() {
        let mut perms = Permissions::new();
        assert!(perms.insert(Permission::new("movies:read")));
        assert!(!perms.insert(MOVIES_READ));
        assert_eq!(perms.len(), 1);
    }

    #[test]
    fn serializes_as_a_sorted_list() {
        let perms: Permissions = [MOVIES_WRITE, MOVIES_READ].into_iter().collect();
        let json = serde_json::to_string(&perms).unwrap();
        assert_eq!(json, r#"["movies:read","movies:write"]"#);
    }
}
