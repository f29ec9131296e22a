//! Tag registry: path interning, ancestry lookup and redirects.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tag_bus_config::BusConfig;
use tracing::debug;

use crate::error::{Error, Result};
use crate::tag::Tag;
use crate::tag_id::{advance_slot, child_id, slot_capacity, MAX_DEPTH};

/// Maximum length of a redirect chain.
const MAX_REDIRECT_HOPS: usize = MAX_DEPTH;

/// Definition of a declared tag (generated by `message_tags!`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagDef {
    pub path: &'static str,
    pub parent: Option<&'static str>,
}

impl TagDef {
    pub const fn new(path: &'static str, parent: Option<&'static str>) -> Self {
        Self { path, parent }
    }
}

/// A retired path and the path it now resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedirectDef {
    pub from: &'static str,
    pub to: &'static str,
}

impl RedirectDef {
    pub const fn new(from: &'static str, to: &'static str) -> Self {
        Self { from, to }
    }
}

/// Whether a tag counts as its own ancestor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Inclusivity {
    #[default]
    Inclusive,
    Strict,
}

/// Runtime record for an interned tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagNode {
    pub tag: Tag,
    pub path: Arc<str>,
    pub parent: Option<Tag>,
    /// Direct children, sorted by path.
    pub children: Vec<Tag>,
    /// Root first, this tag last. Fixed at creation.
    pub ancestors: Arc<[Tag]>,
    /// Declared up front (config file or `message_tags!`) rather than interned on demand.
    pub native: bool,
}

#[derive(Clone, Debug, Default)]
struct Inner {
    nodes: Vec<TagNode>,
    by_path: HashMap<Arc<str>, usize>,
    by_tag: HashMap<Tag, usize>,
    redirects: HashMap<Arc<str>, Arc<str>>,
    /// Number of levels in use (0 = empty).
    max_depth: usize,
}

impl Inner {
    fn follow_redirects<'a>(&'a self, path: &'a str) -> &'a str {
        let mut current = path;
        for _ in 0..MAX_REDIRECT_HOPS {
            match self.redirects.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    fn lookup(&self, path: &str) -> Option<Tag> {
        let path = self.follow_redirects(path);
        self.by_path.get(path).map(|&idx| self.nodes[idx].tag)
    }

    fn node(&self, tag: Tag) -> Option<&TagNode> {
        self.by_tag.get(&tag).map(|&idx| &self.nodes[idx])
    }

    /// Insert `segments` and every missing ancestor.
    ///
    /// All checks run before the first node is created, so a failure leaves the
    /// table untouched. Native paths must land on their hashed id so they
    /// match `message_tags!` constants. Other paths take the next free slot
    /// when a sibling already owns theirs.
    fn insert(&mut self, segments: &[&str], native: bool) -> Result<Tag> {
        let mut planned: Vec<(String, Tag)> = Vec::new();
        let mut parent: Option<Tag> = None;

        for end in 1..=segments.len() {
            let prefix = segments[..end].join(".");
            if let Some(&idx) = self.by_path.get(prefix.as_str()) {
                let tag = self.nodes[idx].tag;
                if native {
                    self.check_declared(&prefix, &segments[..end], tag)?;
                }
                parent = Some(tag);
                continue;
            }
            if self.redirects.contains_key(prefix.as_str()) {
                return Err(Error::InvalidTagPath {
                    path: segments.join("."),
                    reason: format!("'{}' is a redirected tag and cannot have children", prefix),
                });
            }

            let segment = segments[end - 1].as_bytes();
            let hashed = Tag::from_id(child_id(parent.map(Tag::id), segment));
            let tag = if native {
                self.check_declared(&prefix, &segments[..end], hashed)?;
                if self.by_tag.contains_key(&hashed) {
                    return Err(self.collision(prefix, hashed));
                }
                hashed
            } else {
                self.free_slot(hashed).ok_or_else(|| Error::InvalidTagPath {
                    path: segments.join("."),
                    reason: format!("no free id left among the siblings of '{}'", prefix),
                })?
            };
            planned.push((prefix, tag));
            parent = Some(tag);
        }

        for (path, tag) in planned {
            self.commit(path, tag);
        }

        let leaf = self.lookup_exact(&segments.join("."));
        if let Some(idx) = leaf
            && native
        {
            self.nodes[idx].native = true;
        }
        leaf.map(|idx| self.nodes[idx].tag).ok_or_else(|| Error::InvalidTagPath {
            path: segments.join("."),
            reason: "node vanished during insertion".into(),
        })
    }

    /// First unused id at or after `hashed` in its level slot.
    fn free_slot(&self, hashed: Tag) -> Option<Tag> {
        let capacity = slot_capacity(hashed.depth());
        (0..capacity)
            .map(|step| Tag::from_id(advance_slot(hashed.id(), step)))
            .find(|tag| !self.by_tag.contains_key(tag))
    }

    fn check_declared(&self, path: &str, segments: &[&str], tag: Tag) -> Result<()> {
        let seg_bytes: Vec<&[u8]> = segments.iter().map(|s| s.as_bytes()).collect();
        let declared = Tag::from_segments(&seg_bytes);
        if tag == declared {
            return Ok(());
        }
        Err(self.collision(path.to_string(), declared))
    }

    fn collision(&self, path: String, id: Tag) -> Error {
        let existing = match self.node(id) {
            Some(node) => node.path.to_string(),
            None => "a sibling interned first".to_string(),
        };
        Error::TagCollision {
            path,
            existing,
            id: id.id(),
        }
    }

    fn lookup_exact(&self, path: &str) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    fn commit(&mut self, path: String, tag: Tag) {
        let parent = tag.parent();
        let parent_idx = parent.and_then(|p| self.by_tag.get(&p).copied());

        let ancestors: Arc<[Tag]> = match parent_idx {
            Some(pidx) => self.nodes[pidx]
                .ancestors
                .iter()
                .copied()
                .chain(std::iter::once(tag))
                .collect(),
            None => Arc::from([tag]),
        };

        let path: Arc<str> = Arc::from(path);
        let idx = self.nodes.len();

        if let Some(pidx) = parent_idx {
            let siblings = &self.nodes[pidx].children;
            let pos = siblings
                .binary_search_by(|sib| {
                    let sib_path = self.node(*sib).map(|n| &*n.path).unwrap_or_default();
                    sib_path.cmp(&*path)
                })
                .unwrap_or_else(|pos| pos);
            self.nodes[pidx].children.insert(pos, tag);
        }

        debug!(path = %path, depth = tag.depth(), "interned tag");

        self.max_depth = self.max_depth.max(tag.depth() as usize + 1);
        self.nodes.push(TagNode {
            tag,
            path: path.clone(),
            parent: parent_idx.and(parent),
            children: Vec::new(),
            ancestors,
            native: false,
        });
        self.by_path.insert(path, idx);
        self.by_tag.insert(tag, idx);
    }

    fn add_redirect(&mut self, from: &str, to: &str) -> Result<Tag> {
        let invalid = |reason: String| Error::InvalidRedirect {
            from: from.to_string(),
            to: to.to_string(),
            reason,
        };

        if from == to {
            return Err(invalid("redirect points at itself".into()));
        }
        if self.by_path.contains_key(from) {
            return Err(invalid(format!("'{}' is already a registered tag", from)));
        }
        if let Some(existing) = self.redirects.get(from) {
            if &**existing == to {
                return self.lookup(to).ok_or_else(|| invalid("dangling redirect".into()));
            }
            return Err(invalid(format!("'{}' already redirects to '{}'", from, existing)));
        }

        let mut hop = to;
        let mut hops = 0;
        while let Some(next) = self.redirects.get(hop) {
            if &**next == from {
                return Err(invalid("redirect chain loops back".into()));
            }
            hops += 1;
            if hops >= MAX_REDIRECT_HOPS {
                return Err(invalid(format!(
                    "redirect chain longer than {} hops",
                    MAX_REDIRECT_HOPS
                )));
            }
            hop = next;
        }

        let final_path = hop.to_string();
        let target = match self.lookup_exact(&final_path) {
            Some(idx) => self.nodes[idx].tag,
            None => self.insert(&split_path(&final_path)?, false)?,
        };

        self.redirects.insert(Arc::from(from), Arc::from(to));
        debug!(from, to, "added tag redirect");
        Ok(target)
    }
}

/// Thread-safe registry of interned tags.
///
/// Nodes are append-only: once interned, a tag keeps its path, parent and
/// ancestor chain for the life of the registry. Reads take a shared lock.
///
/// ```
/// use tag_bus::{Inclusivity, TagRegistry};
///
/// let registry = TagRegistry::new();
/// let fire = registry.intern("Combat.Damage.Fire").unwrap();
/// let combat = registry.resolve("Combat").unwrap();
///
/// assert!(registry.is_ancestor_of(combat, fire, Inclusivity::Strict));
/// assert_eq!(registry.intern("Combat.Damage.Fire").unwrap(), fire);
/// ```
#[derive(Debug, Default)]
pub struct TagRegistry {
    inner: RwLock<Inner>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, created on first use.
    pub fn global() -> Arc<TagRegistry> {
        static GLOBAL: OnceLock<Arc<TagRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(TagRegistry::new())).clone()
    }

    /// Intern `path`, creating it and any missing ancestors.
    ///
    /// Idempotent. Redirected paths return their target's tag.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTagPath`] for an empty path, an empty segment, or a
    ///   segment with characters other than alphanumerics, `_` and `-`; also
    ///   when a parent has used up every id slot of its children's level
    /// - [`Error::TagTooDeep`] for more than [`MAX_DEPTH`] segments
    pub fn intern(&self, path: &str) -> Result<Tag> {
        if let Some(tag) = self.inner.read().lookup(path) {
            return Ok(tag);
        }

        let segments = split_path(path)?;
        let mut inner = self.inner.write();
        // Another thread may have won the race.
        if let Some(tag) = inner.lookup(path) {
            return Ok(tag);
        }
        inner.insert(&segments, false)
    }

    /// Look up `path` without creating it.
    pub fn resolve(&self, path: &str) -> Option<Tag> {
        self.inner.read().lookup(path)
    }

    /// `true` if `ancestor` is in `tag`'s ancestor chain.
    ///
    /// With [`Inclusivity::Inclusive`] a tag is its own ancestor. Tags not
    /// interned here are never related.
    pub fn is_ancestor_of(&self, ancestor: Tag, tag: Tag, inclusivity: Inclusivity) -> bool {
        if inclusivity == Inclusivity::Strict && ancestor == tag {
            return false;
        }
        self.inner
            .read()
            .node(tag)
            .is_some_and(|node| node.ancestors.contains(&ancestor))
    }

    /// Ancestor chain of `tag`, root first and `tag` last.
    pub fn ancestors(&self, tag: Tag) -> Option<Arc<[Tag]>> {
        self.inner.read().node(tag).map(|n| n.ancestors.clone())
    }

    pub fn path_of(&self, tag: Tag) -> Option<Arc<str>> {
        self.inner.read().node(tag).map(|n| n.path.clone())
    }

    pub fn parent_of(&self, tag: Tag) -> Option<Tag> {
        self.inner.read().node(tag).and_then(|n| n.parent)
    }

    /// Direct children of `tag`, sorted by path.
    pub fn children_of(&self, tag: Tag) -> Vec<Tag> {
        self.inner
            .read()
            .node(tag)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the node for `tag`.
    pub fn node(&self, tag: Tag) -> Option<TagNode> {
        self.inner.read().node(tag).cloned()
    }

    #[inline]
    pub fn contains(&self, tag: Tag) -> bool {
        self.inner.read().by_tag.contains_key(&tag)
    }

    /// `true` if `path` resolves, directly or through a redirect.
    #[inline]
    pub fn contains_path(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    pub fn is_native(&self, tag: Tag) -> bool {
        self.inner.read().node(tag).is_some_and(|n| n.native)
    }

    /// Every interned tag in `tag`'s subtree, `tag` included.
    ///
    /// Scans all nodes. Use [`Tag::is_descendant_of`] for single checks.
    pub fn descendants_of(&self, tag: Tag) -> Vec<Tag> {
        self.inner
            .read()
            .nodes
            .iter()
            .filter(|n| n.tag.is_descendant_of(tag))
            .map(|n| n.tag)
            .collect()
    }

    /// All tags, parents before children, siblings alphabetical.
    pub fn dfs_order(&self) -> Vec<Tag> {
        let inner = self.inner.read();
        let mut roots: Vec<&TagNode> = inner.nodes.iter().filter(|n| n.parent.is_none()).collect();
        roots.sort_by(|a, b| a.path.cmp(&b.path));

        let mut out = Vec::with_capacity(inner.nodes.len());
        let mut stack: Vec<Tag> = roots.iter().rev().map(|n| n.tag).collect();
        while let Some(tag) = stack.pop() {
            out.push(tag);
            if let Some(node) = inner.node(tag) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Total number of interned tags.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of levels in use (0 = empty, 1 = only root tags).
    #[inline]
    pub fn tree_depth(&self) -> usize {
        self.inner.read().max_depth
    }

    /// Bulk-load declared tags and mark them native.
    ///
    /// The table is validated as a whole first: no empty or duplicate paths,
    /// and every `parent` must be declared and be the path's prefix. Either
    /// every definition is registered or none is.
    ///
    /// # Errors
    ///
    /// Besides [`Error::Definition`], [`Error::TagCollision`] when a declared
    /// path cannot take its hashed id because a sibling already holds it.
    pub fn register_native(&self, defs: &[TagDef]) -> Result<()> {
        validate_defs(defs)?;
        let split: Vec<Vec<&str>> = defs
            .iter()
            .map(|def| split_path(def.path))
            .collect::<Result<_>>()?;

        self.apply(|staged| {
            for segments in &split {
                staged.insert(segments, true)?;
            }
            Ok(())
        })?;
        debug!(count = defs.len(), "registered native tags");
        Ok(())
    }

    /// Make `from` resolve to `to`.
    ///
    /// `to` is interned if needed. Chains are allowed; loops are not.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRedirect`] when `from == to`, when `from` is already an
    /// interned tag, when `from` already redirects elsewhere, or when the
    /// chain starting at `to` leads back to `from` or is too long.
    pub fn add_redirect(&self, from: &str, to: &str) -> Result<Tag> {
        split_path(from)?;
        split_path(to)?;
        self.inner.write().add_redirect(from, to)
    }

    /// Register every redirect generated by `message_tags!`, all or nothing.
    pub fn register_redirects(&self, defs: &[RedirectDef]) -> Result<()> {
        for def in defs {
            split_path(def.from)?;
            split_path(def.to)?;
        }
        self.apply(|staged| {
            for def in defs {
                staged.add_redirect(def.from, def.to)?;
            }
            Ok(())
        })
    }

    /// Tag that `from` redirects to, if `from` is a redirect.
    pub fn redirect_target(&self, from: &str) -> Option<Tag> {
        let inner = self.inner.read();
        if !inner.redirects.contains_key(from) {
            return None;
        }
        inner.lookup(from)
    }

    /// Apply the `[tags]` section of a bus config.
    ///
    /// Every path is checked before the registry is touched, and a failure
    /// part way through leaves the registry as it was.
    pub fn load_config(&self, config: &BusConfig) -> Result<()> {
        let split: Vec<Vec<&str>> = config
            .entries()
            .map(|entry| split_path(&entry.path))
            .collect::<Result<_>>()?;
        for redirect in config.redirects() {
            split_path(&redirect.from)?;
            split_path(&redirect.to)?;
        }

        self.apply(|staged| {
            for segments in &split {
                staged.insert(segments, true)?;
            }
            for redirect in config.redirects() {
                staged.add_redirect(&redirect.from, &redirect.to)?;
            }
            Ok(())
        })?;
        debug!(
            tags = config.len(),
            redirects = config.redirects().len(),
            "loaded tag config"
        );
        Ok(())
    }

    /// Run `f` on a copy of the table and publish it only if `f` succeeds.
    fn apply(&self, f: impl FnOnce(&mut Inner) -> Result<()>) -> Result<()> {
        let mut inner = self.inner.write();
        let mut staged = inner.clone();
        f(&mut staged)?;
        *inner = staged;
        Ok(())
    }
}

/// Split and validate a dotted path.
fn split_path(path: &str) -> Result<Vec<&str>> {
    let invalid = |reason: String| Error::InvalidTagPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("path is empty".into()));
    }

    let segments: Vec<&str> = path.split('.').collect();
    for seg in &segments {
        if seg.is_empty() {
            return Err(invalid("empty segment".into()));
        }
        if let Some(c) = seg
            .chars()
            .find(|c| !c.is_alphanumeric() && *c != '_' && *c != '-')
        {
            return Err(invalid(format!("segment '{}' contains '{}'", seg, c)));
        }
    }

    if segments.len() > MAX_DEPTH {
        return Err(Error::TagTooDeep {
            path: path.to_string(),
            depth: segments.len(),
        });
    }
    Ok(segments)
}

fn validate_defs(defs: &[TagDef]) -> Result<()> {
    let mut paths = HashSet::new();
    for def in defs {
        if def.path.is_empty() {
            return Err(Error::Definition("empty tag path is not allowed".into()));
        }
        if !paths.insert(def.path) {
            return Err(Error::Definition(format!("duplicate tag path: {}", def.path)));
        }
    }
    for def in defs {
        let expected_parent = def.path.rsplit_once('.').map(|(parent, _)| parent);
        if def.parent != expected_parent {
            return Err(Error::Definition(format!(
                "'{}' declares parent {:?}, its path implies {:?}",
                def.path, def.parent, expected_parent
            )));
        }
        if let Some(parent) = def.parent
            && !paths.contains(parent)
        {
            return Err(Error::Definition(format!(
                "missing parent for '{}': '{}'",
                def.path, parent
            )));
        }
    }
    Ok(())
}
