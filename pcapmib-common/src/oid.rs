//! Object identifiers
//!
//! An [`Oid`] is a sequence of unsigned sub-identifiers. Ordering is
//! lexicographic over the sub-identifiers, with a proper prefix sorting
//! before any of its extensions (`.1.3` < `.1.3.0` < `.1.4`), which is the
//! order table walks visit objects in.

use core::fmt;
use core::str::FromStr;

/// Object identifier, e.g. `.1.3.6.1.4.1.12325.1.1112`
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(subs: Vec<u32>) -> Self {
        Self(subs)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `prefix` is a (not necessarily proper) prefix of `self`
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Sub-identifiers following `prefix`, if `prefix` is a prefix of `self`
    pub fn strip_prefix(&self, prefix: &Oid) -> Option<&[u32]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// New OID with `subs` appended
    pub fn join(&self, subs: &[u32]) -> Oid {
        let mut out = Vec::with_capacity(self.0.len() + subs.len());
        out.extend_from_slice(&self.0);
        out.extend_from_slice(subs);
        Oid(out)
    }

    pub fn into_inner(self) -> Vec<u32> {
        self.0
    }
}

impl From<Vec<u32>> for Oid {
    fn from(subs: Vec<u32>) -> Self {
        Self(subs)
    }
}

impl From<&[u32]> for Oid {
    fn from(subs: &[u32]) -> Self {
        Self(subs.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        for sub in &self.0 {
            write!(f, ".{}", sub)?;
        }
        Ok(())
    }
}

/// Error returned when a dotted OID string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOidError {
    input: String,
}

impl fmt::Display for ParseOidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid object identifier '{}'", self.input)
    }
}

impl std::error::Error for ParseOidError {}

impl FromStr for Oid {
    type Err = ParseOidError;

    /// Accepts `.1.3.6`, `1.3.6` and the empty root `.`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseOidError {
            input: s.to_string(),
        };

        let trimmed = s.trim();
        let body = trimmed.strip_prefix('.').unwrap_or(trimmed);
        if body.is_empty() {
            return if trimmed == "." { Ok(Oid::default()) } else { Err(err()) };
        }

        body.split('.')
            .map(|part| part.parse::<u32>().map_err(|_| err()))
            .collect::<Result<Vec<_>, _>>()
            .map(Oid)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Oid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let oid: Oid = ".1.3.6.1.4.1.12325.1.1112".parse().unwrap();
        assert_eq!(oid.len(), 9);
        assert_eq!(oid.to_string(), ".1.3.6.1.4.1.12325.1.1112");

        let bare: Oid = "1.3.6".parse().unwrap();
        assert_eq!(bare.as_slice(), &[1, 3, 6]);

        assert!(".".parse::<Oid>().unwrap().is_empty());
        assert!("".parse::<Oid>().is_err());
        assert!(".1..3".parse::<Oid>().is_err());
        assert!(".1.x".parse::<Oid>().is_err());
    }

    #[test]
    fn test_lexicographic_order() {
        let a: Oid = ".1.3".parse().unwrap();
        let b: Oid = ".1.3.0".parse().unwrap();
        let c: Oid = ".1.4".parse().unwrap();
        let d: Oid = ".1.3.10".parse().unwrap();
        let e: Oid = ".1.3.9.99".parse().unwrap();

        assert!(a < b);
        assert!(b < c);
        assert!(e < d);
        assert!(d < c);
    }

    #[test]
    fn test_prefix_helpers() {
        let base: Oid = ".1.3.6".parse().unwrap();
        let child = base.join(&[2, 1, 5, 7]);

        assert!(child.starts_with(&base));
        assert_eq!(child.strip_prefix(&base), Some(&[2, 1, 5, 7][..]));
        assert_eq!(base.strip_prefix(&child), None);
    }
}
