//! `MsgEP` — the `physical://` / `logical://` endpoint naming scheme.
//!
//! A physical endpoint names a single router instance (`physical://root/hub/leaf`,
//! up to three path segments). A logical endpoint names a service
//! (`logical://path/.../*?`, any number of segments, optional trailing `*`
//! wildcard matching one or more segments). Equality is case-insensitive;
//! `logical://*` matches every logical endpoint.

use std::{fmt, net::SocketAddr, str::FromStr};

/// Channel-endpoint overlay on a physical endpoint: the concrete transport
/// address a router is reachable at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelEp {
    pub udp: Option<SocketAddr>,
    pub tcp: Option<SocketAddr>,
}

/// A physical endpoint: up to three path segments (`root[/hub[/leaf]]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalEp {
    segments: Vec<String>,
}

impl PhysicalEp {
    pub const DETACHED: &'static str = "DETACHED";

    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let segments: Vec<String> = segments.into_iter().map(|s| s.into().to_lowercase()).collect();
        Self { segments }
    }

    pub fn root(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    pub fn hub(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    pub fn leaf(&self) -> Option<&str> {
        self.segments.get(2).map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when this endpoint's root is the `DETACHED` sentinel, meaning
    /// "no uplink" (root-tier router with no parent).
    pub fn is_detached(&self) -> bool {
        self.root().eq_ignore_ascii_case(Self::DETACHED)
    }

    /// Whether `other` shares this endpoint's hub parent (used for Subnet
    /// route-distance computation).
    pub fn same_hub(&self, other: &PhysicalEp) -> bool {
        self.root() == other.root() && self.hub() == other.hub()
    }
}

impl fmt::Display for PhysicalEp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "physical://{}", self.segments.join("/"))
    }
}

impl FromStr for PhysicalEp {
    type Err = super::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("physical://").ok_or(super::Error::FrameFormat)?;
        let segments: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();

        if segments.is_empty() || segments.len() > 3 {
            return Err(super::Error::FrameFormat);
        }

        Ok(Self { segments })
    }
}

/// A logical endpoint pattern: any number of segments, optionally ending in
/// a `*` wildcard that matches one or more trailing segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalEp {
    segments: Vec<String>,
    wildcard: bool,
}

impl LogicalEp {
    pub fn new(path: &str) -> Self {
        let mut segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();

        let wildcard = segments.last().map(|s| s == "*").unwrap_or(false);
        if wildcard {
            segments.pop();
        }

        Self { segments, wildcard }
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this pattern matches `other`, honoring wildcards on either
    /// side — used both for message delivery and for internal enumeration
    /// (a query may itself be a wildcard pattern).
    pub fn matches(&self, other: &LogicalEp) -> bool {
        // `logical://*` matches every logical endpoint.
        if self.segments.is_empty() && self.wildcard {
            return true;
        }
        if other.segments.is_empty() && other.wildcard {
            return true;
        }

        let min_len = self.segments.len().min(other.segments.len());
        if self.segments[..min_len] != other.segments[..min_len] {
            return false;
        }

        match (self.segments.len().cmp(&other.segments.len()), self.wildcard, other.wildcard) {
            (std::cmp::Ordering::Equal, _, _) => true,
            (std::cmp::Ordering::Less, true, _) => true,
            (std::cmp::Ordering::Greater, _, true) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LogicalEp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "logical://{}", self.segments.join("/"))?;
        if self.wildcard {
            write!(f, "{}*", if self.segments.is_empty() { "" } else { "/" })?;
        }
        Ok(())
    }
}

impl FromStr for LogicalEp {
    type Err = super::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("logical://").ok_or(super::Error::FrameFormat)?;
        Ok(Self::new(rest))
    }
}

/// Either a physical or logical endpoint — the `toEP`/`fromEP` header fields
/// on a `Message`. Immutable; equality is case-insensitive (segments are
/// lower-cased on construction).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MsgEp {
    Physical(PhysicalEp),
    Logical(LogicalEp),
}

impl MsgEp {
    pub fn is_physical(&self) -> bool {
        matches!(self, Self::Physical(_))
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Self::Logical(_))
    }

    pub fn as_physical(&self) -> Option<&PhysicalEp> {
        match self {
            Self::Physical(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_logical(&self) -> Option<&LogicalEp> {
        match self {
            Self::Logical(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for MsgEp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical(p) => write!(f, "{p}"),
            Self::Logical(l) => write!(f, "{l}"),
        }
    }
}

impl FromStr for MsgEp {
    type Err = super::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("physical://") {
            Ok(Self::Physical(s.parse()?))
        } else if s.starts_with("logical://") {
            Ok(Self::Logical(s.parse()?))
        } else {
            Err(super::Error::FrameFormat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_everything() {
        let wild: LogicalEp = "logical://*".parse().unwrap();
        let foo: LogicalEp = "logical://foo/bar".parse().unwrap();
        assert!(wild.matches(&foo));
        assert!(foo.matches(&wild));
    }

    #[test]
    fn prefix_wildcard_matches_suffixes() {
        let pattern: LogicalEp = "logical://foo/*".parse().unwrap();
        let exact: LogicalEp = "logical://foo/bar/baz".parse().unwrap();
        assert!(pattern.matches(&exact));

        let unrelated: LogicalEp = "logical://quux".parse().unwrap();
        assert!(!pattern.matches(&unrelated));
    }

    #[test]
    fn physical_segments_case_insensitive() {
        let a: PhysicalEp = "physical://ROOT/Hub/leaf-1".parse().unwrap();
        let b: PhysicalEp = "physical://root/hub/LEAF-1".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn same_hub_distance_helper() {
        let a: PhysicalEp = "physical://root/hub/leaf-1".parse().unwrap();
        let b: PhysicalEp = "physical://root/hub/leaf-2".parse().unwrap();
        let c: PhysicalEp = "physical://root/hub2/leaf-3".parse().unwrap();
        assert!(a.same_hub(&b));
        assert!(!a.same_hub(&c));
    }
}
