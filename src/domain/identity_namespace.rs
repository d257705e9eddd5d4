// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;

use crate::domain::trust_domain::TrustDomain;
use crate::error::{Error, Result};

const MAX_URI_LEN: usize = 2048;
const MAX_PATH_LEN: usize = 1792;

/// A SPIFFE identity: a trust domain plus an absolute path, rendering as
/// `spiffe://<trust-domain><path>`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityNamespace {
    trust_domain: TrustDomain,
    path: String,
}

impl IdentityNamespace {
    /// Construct a namespace from a trust domain and an already-validated
    /// path.
    pub fn new(trust_domain: TrustDomain, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        let ns = Self { trust_domain, path };
        if ns.render().len() > MAX_URI_LEN {
            return Err(Error::validation(format!(
                "spiffe URI exceeds {MAX_URI_LEN} characters"
            )));
        }
        Ok(ns)
    }

    /// Parse a full `spiffe://<trust-domain><path>` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("spiffe://")
            .ok_or_else(|| Error::validation("spiffe URI must start with spiffe://"))?;
        let (domain, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let trust_domain = TrustDomain::new(domain)?;
        Self::new(trust_domain, path)
    }

    /// Render the canonical `spiffe://<trust-domain><path>` string.
    #[must_use]
    pub fn render(&self) -> String {
        format!("spiffe://{}{}", self.trust_domain, self.path)
    }

    /// The trust domain component.
    #[must_use]
    pub const fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// The path component, always starting with `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `true` if `self` is a (possibly equal) descendant of `ancestor`'s
    /// path, within the same trust domain, along segment boundaries.
    #[must_use]
    pub fn child_of(&self, ancestor: &Self) -> bool {
        if self.trust_domain != ancestor.trust_domain {
            return false;
        }
        if ancestor.path == "/" {
            return true;
        }
        self.path == ancestor.path
            || self
                .path
                .strip_prefix(ancestor.path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The final non-empty path segment, or `None` for the root path `/`.
    #[must_use]
    pub fn last_segment(&self) -> Option<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).next_back()
    }

    /// Return a copy with a different path.
    pub fn with_path(&self, path: impl Into<String>) -> Result<Self> {
        Self::new(self.trust_domain.clone(), path)
    }

    /// Return a copy with a different trust domain, same path.
    pub fn with_trust_domain(&self, trust_domain: TrustDomain) -> Result<Self> {
        Self::new(trust_domain, self.path.clone())
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::validation("identity path must start with /"));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(Error::validation(format!(
            "identity path exceeds {MAX_PATH_LEN} characters"
        )));
    }
    if path == "/" {
        return Ok(());
    }
    for segment in path.split('/').skip(1) {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::validation(
                "identity path must not contain empty, '.', or '..' segments",
            ));
        }
        if !segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(Error::validation(
                "identity path segments may only contain [a-zA-Z0-9._-]",
            ));
        }
    }
    Ok(())
}

impl fmt::Display for IdentityNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::str::FromStr for IdentityNamespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for IdentityNamespace {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<IdentityNamespace> for String {
    fn from(value: IdentityNamespace) -> Self {
        value.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn td(s: &str) -> TrustDomain {
        TrustDomain::new(s).unwrap()
    }

    #[test]
    fn round_trip_parse_render() {
        for uri in [
            "spiffe://example.org/api",
            "spiffe://example.org/ns/default/sa/web",
            "spiffe://example.org/",
        ] {
            let ns = IdentityNamespace::parse(uri).unwrap();
            assert_eq!(ns.render(), uri);
            let reparsed = IdentityNamespace::parse(&ns.render()).unwrap();
            assert_eq!(ns, reparsed);
        }
    }

    #[test]
    fn root_path_round_trips_exactly() {
        let ns = IdentityNamespace::parse("spiffe://example.org/").unwrap();
        assert_eq!(ns.render(), "spiffe://example.org/");
        assert_eq!(ns.last_segment(), None);
    }

    #[test]
    fn last_segment_is_final_component() {
        let ns = IdentityNamespace::parse("spiffe://example.org/ns/default/sa/web").unwrap();
        assert_eq!(ns.last_segment(), Some("web"));
    }

    #[test]
    fn rejects_bad_paths() {
        for path in ["no-leading-slash", "/a//b", "/a/./b", "/a/../b", "/a/b!"] {
            assert!(
                IdentityNamespace::new(td("example.org"), path).is_err(),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn child_of_respects_segment_boundaries() {
        let parent = IdentityNamespace::parse("spiffe://example.org/ns").unwrap();
        let child = IdentityNamespace::parse("spiffe://example.org/ns/default").unwrap();
        let sibling = IdentityNamespace::parse("spiffe://example.org/nsx/default").unwrap();
        assert!(child.child_of(&parent));
        assert!(!sibling.child_of(&parent));
        assert!(parent.child_of(&parent));
    }

    #[test]
    fn child_of_requires_same_trust_domain() {
        let a = IdentityNamespace::parse("spiffe://a.org/ns").unwrap();
        let b = IdentityNamespace::parse("spiffe://b.org/ns/sub").unwrap();
        assert!(!b.child_of(&a));
    }

    #[test]
    fn with_path_and_with_trust_domain_are_immutable_updates() {
        let ns = IdentityNamespace::parse("spiffe://example.org/api").unwrap();
        let other = ns.with_path("/other").unwrap();
        assert_eq!(ns.path(), "/api");
        assert_eq!(other.path(), "/other");

        let retagged = ns.with_trust_domain(td("other.org")).unwrap();
        assert_eq!(retagged.render(), "spiffe://other.org/api");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(IdentityNamespace::parse("example.org/api").is_err());
    }
}
