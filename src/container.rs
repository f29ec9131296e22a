//! Tag sets with hierarchical matching.

use std::collections::HashSet;
use std::collections::hash_set;

#[cfg(feature = "bevy")]
use bevy::prelude::Component;

use crate::tag::Tag;

/// A set of tags attached to an entity or a message.
///
/// Hierarchical checks use the packed tag ids, so no registry is consulted.
/// Iteration order is unspecified; equality is set equality.
///
/// ```ignore
/// let state = TagContainer::new()
///     .with(Tags::Combat::Damage::Fire::TAG)
///     .with(Tags::Movement::Jump::TAG);
///
/// assert!(state.matches(Tags::Combat::TAG, true));
/// assert!(!state.matches(Tags::Combat::TAG, false));
/// ```
#[cfg_attr(feature = "bevy", derive(Component))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagContainer {
    tags: HashSet<Tag>,
}

impl TagContainer {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Container holding one tag.
    #[inline]
    pub fn single(tag: Tag) -> Self {
        Self {
            tags: HashSet::from([tag]),
        }
    }

    /// Builder method: add a tag and return self.
    #[inline]
    pub fn with(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Returns `true` if the tag was newly added.
    #[inline]
    pub fn add(&mut self, tag: Tag) -> bool {
        self.tags.insert(tag)
    }

    /// Returns `true` if the tag was present.
    #[inline]
    pub fn remove(&mut self, tag: Tag) -> bool {
        self.tags.remove(&tag)
    }

    /// Exact membership.
    #[inline]
    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.contains(&tag)
    }

    /// `true` if some contained tag equals `requirement`, or, when
    /// `include_descendants` is set, lies in its subtree.
    pub fn matches(&self, requirement: Tag, include_descendants: bool) -> bool {
        if self.tags.contains(&requirement) {
            return true;
        }
        include_descendants && self.tags.iter().any(|t| t.is_descendant_of(requirement))
    }

    /// Every tag of `other` is matched, descendants counting. Empty `other` is `true`.
    pub fn has_all(&self, other: &TagContainer) -> bool {
        other.tags.iter().all(|&req| self.matches(req, true))
    }

    /// Every tag of `other` is present as-is. Empty `other` is `true`.
    pub fn has_all_exact(&self, other: &TagContainer) -> bool {
        other.tags.is_subset(&self.tags)
    }

    /// Some tag of `other` is matched, descendants counting. Empty `other` is `false`.
    pub fn has_any(&self, other: &TagContainer) -> bool {
        other.tags.iter().any(|&req| self.matches(req, true))
    }

    /// Some tag of `other` is present as-is. Empty `other` is `false`.
    pub fn has_any_exact(&self, other: &TagContainer) -> bool {
        !self.tags.is_disjoint(&other.tags)
    }

    pub fn union(&self, other: &TagContainer) -> TagContainer {
        self.tags.union(&other.tags).copied().collect()
    }

    pub fn intersection(&self, other: &TagContainer) -> TagContainer {
        self.tags.intersection(&other.tags).copied().collect()
    }

    /// Tags that equal or descend from any tag in `requirements`.
    pub fn filter(&self, requirements: &TagContainer) -> TagContainer {
        self.tags
            .iter()
            .copied()
            .filter(|t| requirements.tags.iter().any(|&req| t.is_descendant_of(req)))
            .collect()
    }

    /// Contained tags in the subtree of `ancestor`.
    pub fn descendants_of(&self, ancestor: Tag) -> impl Iterator<Item = Tag> + '_ {
        self.tags
            .iter()
            .copied()
            .filter(move |t| t.is_descendant_of(ancestor))
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        self.tags.iter().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.tags.clear();
    }
}

impl FromIterator<Tag> for TagContainer {
    fn from_iter<T: IntoIterator<Item = Tag>>(iter: T) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

impl Extend<Tag> for TagContainer {
    fn extend<T: IntoIterator<Item = Tag>>(&mut self, iter: T) {
        self.tags.extend(iter);
    }
}

impl<'a> IntoIterator for &'a TagContainer {
    type Item = Tag;
    type IntoIter = std::iter::Copied<hash_set::Iter<'a, Tag>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMBAT: Tag = Tag::from_segments(&[b"Combat"]);
    const DAMAGE: Tag = Tag::from_segments(&[b"Combat", b"Damage"]);
    const FIRE: Tag = Tag::from_segments(&[b"Combat", b"Damage", b"Fire"]);
    const ICE: Tag = Tag::from_segments(&[b"Combat", b"Damage", b"Ice"]);
    const MOVEMENT: Tag = Tag::from_segments(&[b"Movement"]);
    const JUMP: Tag = Tag::from_segments(&[b"Movement", b"Jump"]);

    #[test]
    fn add_remove() {
        let mut container = TagContainer::new();

        assert!(container.add(FIRE));
        assert!(!container.add(FIRE));
        assert_eq!(container.len(), 1);

        assert!(container.remove(FIRE));
        assert!(!container.remove(FIRE));
        assert!(container.is_empty());
    }

    #[test]
    fn matches_with_and_without_descendants() {
        let container = TagContainer::single(FIRE);

        assert!(container.matches(COMBAT, true));
        assert!(container.matches(DAMAGE, true));
        assert!(!container.matches(COMBAT, false));
        assert!(container.matches(FIRE, false));
        assert!(!container.matches(MOVEMENT, true));
        assert!(!container.matches(ICE, true));
    }

    #[test]
    fn has_all_and_any() {
        let container = TagContainer::new().with(FIRE).with(JUMP);

        let broad = TagContainer::new().with(COMBAT).with(MOVEMENT);
        assert!(container.has_all(&broad));
        assert!(!container.has_all_exact(&broad));

        let mixed = TagContainer::new().with(ICE).with(JUMP);
        assert!(!container.has_all(&mixed));
        assert!(container.has_any(&mixed));
        assert!(container.has_any_exact(&mixed));

        let parents_only = TagContainer::single(DAMAGE);
        assert!(container.has_any(&parents_only));
        assert!(!container.has_any_exact(&parents_only));
    }

    #[test]
    fn empty_requirements() {
        let container = TagContainer::single(FIRE);
        let empty = TagContainer::new();

        assert!(container.has_all(&empty));
        assert!(container.has_all_exact(&empty));
        assert!(!container.has_any(&empty));
        assert!(!container.has_any_exact(&empty));
    }

    #[test]
    fn set_operations() {
        let a = TagContainer::new().with(FIRE).with(ICE);
        let b = TagContainer::new().with(ICE).with(JUMP);

        assert_eq!(a.union(&b), [FIRE, ICE, JUMP].into_iter().collect());
        assert_eq!(a.intersection(&b), TagContainer::single(ICE));
    }

    #[test]
    fn filter_keeps_matching_subtrees() {
        let container: TagContainer = [FIRE, ICE, JUMP].into_iter().collect();

        let filtered = container.filter(&TagContainer::single(DAMAGE));
        assert_eq!(filtered, TagContainer::new().with(FIRE).with(ICE));

        let mut under_combat: Vec<_> = container.descendants_of(COMBAT).collect();
        under_combat.sort();
        let mut expected = vec![FIRE, ICE];
        expected.sort();
        assert_eq!(under_combat, expected);
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = TagContainer::new().with(FIRE).with(JUMP);
        let b = TagContainer::new().with(JUMP).with(FIRE);
        assert_eq!(a, b);
    }

    #[test]
    fn extend_and_iterate() {
        let mut container = TagContainer::single(FIRE);
        container.extend([ICE, JUMP]);
        assert_eq!(container.len(), 3);
        assert_eq!((&container).into_iter().count(), 3);

        container.clear();
        assert!(container.is_empty());
    }
}
