//! Affiliation model - dot-separated organizational hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between affiliation segments.
pub const SEGMENT_SEPARATOR: char = '.';

/// Rejected affiliation text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid affiliation '{input}': {reason}")]
pub struct InvalidAffiliation {
    pub input: String,
    pub reason: &'static str,
}

/// Hierarchical affiliation name such as `org2.dept1.team2`.
///
/// The empty path is the root: it carries no segments and places no
/// affiliation restriction on whoever holds it. Every other path is a
/// non-empty sequence of non-empty, case-sensitive segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AffiliationPath {
    segments: Vec<String>,
}

impl AffiliationPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-separated affiliation. The empty string is the root.
    pub fn parse(text: &str) -> Result<Self, InvalidAffiliation> {
        if text.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in text.split(SEGMENT_SEPARATOR) {
            if segment.is_empty() {
                return Err(InvalidAffiliation {
                    input: text.to_string(),
                    reason: "affiliation segments must not be empty",
                });
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Drop the last segment. `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True iff `self`'s segments are a prefix of `other`'s.
    pub fn is_ancestor_or_equal(&self, other: &Self) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// True iff `self` is an ancestor of `other` and not equal to it.
    pub fn is_strict_ancestor(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len() && self.is_ancestor_or_equal(other)
    }

    /// True when one path contains the other.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_ancestor_or_equal(other) || other.is_ancestor_or_equal(self)
    }

    /// Non-root proper ancestors, shallowest first.
    ///
    /// `a.b.c` yields `[a, a.b]`.
    pub fn ancestors(&self) -> Vec<Self> {
        (1..self.segments.len())
            .map(|len| Self {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }

    /// Replace the `from` prefix with `to`, keeping the remaining suffix.
    ///
    /// Returns `None` when `from` is not an ancestor-or-equal of `self`.
    pub fn rebase(&self, from: &Self, to: &Self) -> Option<Self> {
        if !from.is_ancestor_or_equal(self) {
            return None;
        }
        let mut segments = to.segments.clone();
        segments.extend_from_slice(&self.segments[from.segments.len()..]);
        Some(Self { segments })
    }
}

impl fmt::Display for AffiliationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, "{}", SEGMENT_SEPARATOR)?;
            }
            write!(f, "{}", segment)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for AffiliationPath {
    type Err = InvalidAffiliation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AffiliationPath {
    type Error = InvalidAffiliation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AffiliationPath> for String {
    fn from(path: AffiliationPath) -> Self {
        path.to_string()
    }
}

/// Affiliation node entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationNode {
    pub path: AffiliationPath,
    pub created_utc: DateTime<Utc>,
}

impl AffiliationNode {
    /// Create a new affiliation node.
    pub fn new(path: AffiliationPath) -> Self {
        Self {
            path,
            created_utc: Utc::now(),
        }
    }

    pub fn name(&self) -> String {
        self.path.to_string()
    }

    /// Parent affiliation, `None` for top-level nodes.
    pub fn parent(&self) -> Option<AffiliationPath> {
        self.path.parent().filter(|parent| !parent.is_root())
    }
}

/// Nested affiliation view: a node and everything beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationTree {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<AffiliationTree>,
}

impl AffiliationTree {
    /// Build trees from a flat list of nodes.
    ///
    /// Nodes whose parent is not in the list become roots of their own tree.
    pub fn build(nodes: &[AffiliationNode]) -> Vec<AffiliationTree> {
        let present: std::collections::BTreeSet<&AffiliationPath> =
            nodes.iter().map(|n| &n.path).collect();

        let mut children_map: BTreeMap<AffiliationPath, Vec<&AffiliationPath>> = BTreeMap::new();
        let mut roots: Vec<&AffiliationPath> = Vec::new();

        for node in nodes {
            match node.path.parent() {
                Some(parent) if present.contains(&parent) => {
                    children_map.entry(parent).or_default().push(&node.path);
                }
                _ => roots.push(&node.path),
            }
        }

        fn build_subtree(
            path: &AffiliationPath,
            children_map: &BTreeMap<AffiliationPath, Vec<&AffiliationPath>>,
        ) -> AffiliationTree {
            let mut children: Vec<AffiliationTree> = children_map
                .get(path)
                .map(|children| {
                    children
                        .iter()
                        .map(|child| build_subtree(child, children_map))
                        .collect()
                })
                .unwrap_or_default();
            children.sort_by(|a, b| a.name.cmp(&b.name));

            AffiliationTree {
                name: path.to_string(),
                affiliations: children,
            }
        }

        roots.sort();
        roots
            .into_iter()
            .map(|path| build_subtree(path, &children_map))
            .collect()
    }
}
