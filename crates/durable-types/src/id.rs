use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies an operation within one execution using Dewey notation.
///
/// Root operations are sequential positive integers assigned in call order
/// (`"1"`, `"2"`, ...). A child-context operation's id becomes the prefix
/// for every operation minted inside it (`"1-1"`, `"1-2"`, `"1-2-3"`).
///
/// Unlike a content-addressed id, this one carries no hash: root ids are
/// sequential integers assigned in call order, so there is nothing to
/// derive them from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(String);

/// Maximum nesting depth for child contexts, mirroring the corpus's own
/// call-depth guard. Segments beyond this are rejected rather than
/// silently truncated.
pub const MAX_CALL_DEPTH: usize = 64;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("max call depth of {max} exceeded")]
    MaxDepthExceeded { max: usize },
    #[error("operation id segment must be a positive integer, got {0:?}")]
    InvalidSegment(String),
    #[error("operation id must not be empty")]
    Empty,
}

impl OperationId {
    /// A root-level operation id from its sequential position (1-based).
    pub fn root(seq: u64) -> Self {
        Self(seq.to_string())
    }

    /// Build an id from an already-composed dot-free dash string, validating shape.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        if raw.is_empty() {
            return Err(IdError::Empty);
        }
        let segments: Vec<&str> = raw.split('-').collect();
        if segments.len() > MAX_CALL_DEPTH {
            return Err(IdError::MaxDepthExceeded {
                max: MAX_CALL_DEPTH,
            });
        }
        for seg in &segments {
            if seg.is_empty() || !seg.chars().all(|c| c.is_ascii_digit()) {
                return Err(IdError::InvalidSegment(raw.to_string()));
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// Derive a child id by appending `seq` (the parent context's local
    /// operation counter) to this id's path.
    pub fn child(&self, seq: u64) -> Result<Self, IdError> {
        if self.depth() >= MAX_CALL_DEPTH {
            return Err(IdError::MaxDepthExceeded {
                max: MAX_CALL_DEPTH,
            });
        }
        Ok(Self(format!("{}-{}", self.0, seq)))
    }

    /// The parent id one level up, or `None` if this is a root id.
    pub fn parent(&self) -> Option<Self> {
        let (head, _) = self.0.rsplit_once('-')?;
        Some(Self(head.to_string()))
    }

    /// True when this id has no parent (a single numeric segment).
    pub fn is_root(&self) -> bool {
        !self.0.contains('-')
    }

    /// Number of `-` separated segments minus one (0 for a root id).
    pub fn depth(&self) -> usize {
        self.0.matches('-').count()
    }

    /// True when `self` is `other` or a descendant of `other`, i.e. `other`
    /// is a strict prefix of `self`'s dash-separated path.
    pub fn is_descendant_of(&self, other: &OperationId) -> bool {
        self.0 == other.0 || self.0.starts_with(&format!("{}-", other.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_ids_are_sequential() {
        assert_eq!(OperationId::root(1).as_str(), "1");
        assert_eq!(OperationId::root(42).as_str(), "42");
    }

    #[test]
    fn child_extends_parent_prefix() {
        let root = OperationId::root(1);
        let child = root.child(2).unwrap();
        assert_eq!(child.as_str(), "1-2");
        let grandchild = child.child(3).unwrap();
        assert_eq!(grandchild.as_str(), "1-2-3");
        assert_eq!(grandchild.parent(), Some(child.clone()));
        assert!(grandchild.is_descendant_of(&root));
        assert!(!root.is_descendant_of(&grandchild));
    }

    #[test]
    fn root_has_no_parent_and_zero_depth() {
        let root = OperationId::root(1);
        assert_eq!(root.parent(), None);
        assert_eq!(root.depth(), 0);
        assert!(root.is_root());
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(OperationId::parse("").is_err());
        assert!(OperationId::parse("1-").is_err());
        assert!(OperationId::parse("1-a").is_err());
        assert!(OperationId::parse("-1").is_err());
        assert!(OperationId::parse("1-2-3").is_ok());
    }

    #[test]
    fn max_depth_is_enforced() {
        let mut id = OperationId::root(1);
        for i in 0..MAX_CALL_DEPTH - 1 {
            id = id.child(i as u64).unwrap();
        }
        assert!(id.child(999).is_err());
    }
}
