use std::fmt;

use crate::tag_id::{depth_of, is_descendant_id, parent_id, path_id, TagId};

/// Interned handle for a dotted tag path such as `Combat.Damage.Fire`.
///
/// Copyable and hashable. A handle is normally the hash of its path, so
/// handles can be declared as constants with
/// [`message_tags!`](crate::message_tags) and compared against tags interned
/// at runtime. A runtime tag whose hash is already taken by a sibling gets
/// another slot from its registry. The path string and the ancestor chain
/// live in the [`TagRegistry`](crate::TagRegistry).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(TagId);

impl Tag {
    /// Wrap a precomputed id.
    #[inline]
    pub const fn from_id(id: TagId) -> Self {
        Self(id)
    }

    /// Tag for the given path segments. Usable in const contexts.
    #[inline]
    pub const fn from_segments(segments: &[&[u8]]) -> Self {
        Self(path_id(segments))
    }

    #[inline]
    pub const fn id(self) -> TagId {
        self.0
    }

    /// Zero-based depth (0 for `Combat`, 2 for `Combat.Damage.Fire`).
    #[inline]
    pub const fn depth(self) -> u8 {
        depth_of(self.0)
    }

    /// Handle of the parent path, or `None` for a root tag.
    #[inline]
    pub const fn parent(self) -> Option<Tag> {
        match parent_id(self.0) {
            Some(id) => Some(Tag(id)),
            None => None,
        }
    }

    /// `true` when `self` equals `ancestor` or lies in its subtree.
    ///
    /// A single mask comparison; no registry lookup.
    #[inline]
    pub const fn is_descendant_of(self, ancestor: Tag) -> bool {
        is_descendant_id(self.0, ancestor.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:#034x})", self.0)
    }
}

impl fmt::LowerHex for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<Tag> for TagId {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMBAT: Tag = Tag::from_segments(&[b"Combat"]);
    const FIRE: Tag = Tag::from_segments(&[b"Combat", b"Damage", b"Fire"]);

    #[test]
    fn const_construction_matches_id() {
        assert_eq!(COMBAT.id(), path_id(&[b"Combat"]));
        assert_eq!(Tag::from_id(FIRE.id()), FIRE);
    }

    #[test]
    fn parent_chain_reaches_root() {
        let damage = FIRE.parent().unwrap();
        assert_eq!(damage, Tag::from_segments(&[b"Combat", b"Damage"]));
        assert_eq!(damage.parent(), Some(COMBAT));
        assert_eq!(COMBAT.parent(), None);
        assert_eq!(FIRE.depth(), 2);
    }

    #[test]
    fn subtree_membership() {
        assert!(FIRE.is_descendant_of(COMBAT));
        assert!(COMBAT.is_descendant_of(COMBAT));
        assert!(!COMBAT.is_descendant_of(FIRE));
    }

    #[test]
    fn debug_shows_hex_id() {
        let text = format!("{:?}", COMBAT);
        assert!(text.starts_with("Tag(0x"));
    }
}
