use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub full: String,
    pub epoch: Option<u32>,
    pub pkgver: String,
    pub pkgrel: String,
}

impl Version {
    pub fn new(version_str: &str) -> Self {
        let (epoch, rest) = if let Some(idx) = version_str.find(':') {
            let epoch = version_str[..idx].parse().ok();
            (epoch, &version_str[idx + 1..])
        } else {
            (None, version_str)
        };

        let (pkgver, pkgrel) = if let Some(idx) = rest.rfind('-') {
            (rest[..idx].to_string(), rest[idx + 1..].to_string())
        } else {
            (rest.to_string(), String::new())
        };

        Self {
            full: version_str.to_string(),
            epoch,
            pkgver,
            pkgrel,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full)
    }
}

/// Which query produced a pending package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateSource {
    Official,
    Helper,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSource::Official => write!(f, "official"),
            UpdateSource::Helper => write!(f, "AUR"),
        }
    }
}

/// A package reported as updatable by a query tool.
///
/// `name` is the first whitespace-delimited token of the raw listing line.
/// Lines shaped like `name old -> new` also carry both versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub current_version: Option<Version>,
    pub new_version: Option<Version>,
    pub line: String,
}

impl PackageRef {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?.to_string();
        let rest: Vec<&str> = tokens.collect();

        let (current_version, new_version) = match rest.as_slice() {
            [old, "->", new, ..] => (Some(Version::new(old)), Some(Version::new(new))),
            [only] => (None, Some(Version::new(only))),
            _ => (None, None),
        };

        Some(Self {
            name,
            current_version,
            new_version,
            line: line.to_string(),
        })
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)
    }
}

/// Turns a tool's listing output into package refs, keeping order and duplicates.
pub fn parse_listing(text: &str) -> Vec<PackageRef> {
    text.lines().filter_map(PackageRef::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = Version::new("1:2.3.4-5");
        assert_eq!(v.epoch, Some(1));
        assert_eq!(v.pkgver, "2.3.4");
        assert_eq!(v.pkgrel, "5");
        assert_eq!(v.to_string(), "1:2.3.4-5");

        let v = Version::new("r1234.abcdef");
        assert_eq!(v.epoch, None);
        assert_eq!(v.pkgver, "r1234.abcdef");
        assert_eq!(v.pkgrel, "");
    }

    #[test]
    fn test_package_ref_from_checkupdates_line() {
        let pkg = PackageRef::parse("linux 6.6.1.arch1-1 -> 6.6.2.arch1-1").unwrap();
        assert_eq!(pkg.name, "linux");
        assert_eq!(pkg.current_version.unwrap().pkgver, "6.6.1.arch1");
        assert_eq!(pkg.new_version.unwrap().pkgrel, "1");
    }

    #[test]
    fn test_package_ref_short_line() {
        let pkg = PackageRef::parse("a 1.0-1").unwrap();
        assert_eq!(pkg.name, "a");
        assert!(pkg.current_version.is_none());
        assert_eq!(pkg.new_version.unwrap().full, "1.0-1");
        assert!(PackageRef::parse("   ").is_none());
    }

    #[test]
    fn test_parse_listing_keeps_order_and_duplicates() {
        let text = "foo 1-1 -> 2-1\n\nbar 1-1 -> 1-2\nfoo 1-1 -> 2-1\n";
        let names: Vec<String> = parse_listing(text).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["foo", "bar", "foo"]);
    }
}
