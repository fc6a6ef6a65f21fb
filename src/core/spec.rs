//! Layer 1: Hierarchical naming
//!
//! TagSpec pairs a TagId with the canonical dotted name that produced it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::tag::TagId;

/// Token delimiters accepted by [`TagSpec::with`], beyond whitespace.
const DELIMITERS: [char; 6] = ['.', '/', '\\', ':', '+', '~'];

/// A named hierarchical identity.
///
/// The ID is the commutative fold of every token's content-derived ID, so
/// two specs built from the same multiset of tokens in any call order are
/// identical. Token case matters; token order does not.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    id: TagId,
    canonic: String,
}

impl TagSpec {
    /// The empty root spec: nil ID, empty canonical name.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn canonic(&self) -> &str {
        &self.canonic
    }

    /// Append one or more tokens, splitting `expr` on `. / \ : + ~` and
    /// whitespace. Each token's content ID folds into the running identifier;
    /// an expression with no tokens is a no-op.
    #[must_use]
    pub fn with(&self, expr: &str) -> TagSpec {
        let mut next = self.clone();
        for token in expr.split(|c: char| c.is_whitespace() || DELIMITERS.contains(&c)) {
            if token.is_empty() {
                continue;
            }
            next.id = next.id.combine(&TagId::from_literal(token));
            if !next.canonic.is_empty() {
                next.canonic.push('.');
            }
            next.canonic.push_str(token);
        }
        next
    }

    /// Leaf token of the canonical name, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.canonic.rsplit('.').next().filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for TagSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagSpec({:?} {})", self.canonic, self.id)
    }
}

impl fmt::Display for TagSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_order_does_not_change_id() {
        let abc = TagSpec::root().with("a").with("b").with("c");
        let cab = TagSpec::root().with("c").with("a").with("b");
        assert_eq!(abc.id(), cab.id());
        assert_ne!(abc.canonic(), cab.canonic());
    }

    #[test]
    fn joined_and_split_forms_agree() {
        let joined = TagSpec::root().with("a.b.c");
        let split = TagSpec::root().with("a").with("b").with("c");
        assert_eq!(joined.id(), split.id());
        assert_eq!(joined.canonic(), "a.b.c");
    }

    #[test]
    fn all_delimiters_split() {
        let spec = TagSpec::root().with("a/b\\c:d+e~f g");
        assert_eq!(spec.canonic(), "a.b.c.d.e.f.g");
        assert_eq!(
            spec.id(),
            TagSpec::root().with("g.f.e.d.c.b.a").id(),
        );
    }

    #[test]
    fn case_changes_the_id() {
        assert_ne!(
            TagSpec::root().with("attr.Name").id(),
            TagSpec::root().with("attr.name").id(),
        );
    }

    #[test]
    fn empty_expr_is_a_noop() {
        let base = TagSpec::root().with("x");
        assert_eq!(base.with("").id(), base.id());
        assert_eq!(base.with("  ").canonic(), base.canonic());
    }

    #[test]
    fn leaf_is_last_token() {
        assert_eq!(TagSpec::root().with("sys.attrs.pos").leaf(), Some("pos"));
        assert_eq!(TagSpec::root().leaf(), None);
    }
}
