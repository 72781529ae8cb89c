//! Domain name representation: a dot-joined, trailing-dot-normalized,
//! lower-cased string backed by its label vector, the way spec.md's
//! matcher policy expects names to already be normalized at lookup time.

use super::wire::{Reader, Writer};
use crate::error::Result;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parses `example.com.` / `example.com` into labels. Empty input or a
    /// bare dot is the root name.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim_end_matches('.');
        if trimmed.is_empty() {
            return Self::root();
        }
        Self {
            labels: trimmed.split('.').map(|l| l.to_string()).collect(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Lower-cased, trailing-dot-stripped dotted form. This is the
    /// canonical form matchers compare against.
    pub fn normalized(&self) -> String {
        self.labels
            .iter()
            .map(|l| l.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Number of labels, used for longest-suffix comparisons.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// True if `self` is `other` or a strict subdomain of `other`
    /// (suffix match on normalized labels, label-boundary aware).
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        let a = self.normalized();
        let b = other.normalized();
        if b.is_empty() {
            return true; // everything is under the root
        }
        if a == b {
            return true;
        }
        a.ends_with(&b) && a.len() > b.len() && a.as_bytes()[a.len() - b.len() - 1] == b'.'
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let labels = reader.read_name()?;
        Ok(Self { labels })
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_name(&self.labels)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.normalized())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_trailing_dot_and_lowercases() {
        let n = Name::parse("Example.COM.");
        assert_eq!(n.normalized(), "example.com");
    }

    #[test]
    fn subdomain_matching_is_label_boundary_aware() {
        let parent = Name::parse("example.com");
        assert!(Name::parse("www.example.com").is_subdomain_of(&parent));
        assert!(Name::parse("example.com").is_subdomain_of(&parent));
        assert!(!Name::parse("notexample.com").is_subdomain_of(&parent));
    }

    #[test]
    fn root_is_suffix_of_everything() {
        let root = Name::root();
        assert!(Name::parse("anything.test").is_subdomain_of(&root));
    }
}
