//! Packed hierarchical tag ids.
//!
//! A [`TagId`] is a `u128` with the segment count embedded in the top bits and
//! one FNV-1a hash per path segment in a fixed slot per level:
//!
//! ```text
//! ┌─────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────┐
//! │ Depth   │ Level 0  │ Level 1  │ Level 2  │ Level 3  │ Level 4  │ Level 5  │ Level 6  │ Level 7  │
//! │ 3 bits  │ 21 bits  │ 18 bits  │ 16 bits  │ 16 bits  │ 14 bits  │ 14 bits  │ 13 bits  │ 13 bits  │
//! │[127:125]│[124:104] │ [103:86] │ [85:70]  │ [69:54]  │ [53:40]  │ [39:26]  │ [25:13]  │ [12:0]   │
//! └─────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! The id of `A.B` shares its level 0 slot with the id of `A`, so "is `x` under
//! `y`" is one mask comparison and needs no registry. [`path_id`] is a pure
//! function of the path and is what `message_tags!` constants use. A registry
//! that finds a level slot already taken by a sibling moves the newcomer to the
//! next free slot with [`advance_slot`], so only the colliding subtree deviates
//! from the hash.

/// Stable hierarchical id of a tag path.
pub type TagId = u128;

/// Maximum number of segments in a tag path.
pub const MAX_DEPTH: usize = 8;

const DEPTH_SHIFT: u32 = 125;
const DEPTH_MASK: u128 = 0b111 << DEPTH_SHIFT;

/// Bit width of each level's slot. Sums to 125.
pub const LEVEL_WIDTHS: [u8; MAX_DEPTH] = [21, 18, 16, 16, 14, 14, 13, 13];

/// Lowest bit of each level's slot. Level 0 sits just below the depth bits.
pub const LEVEL_OFFSETS: [u8; MAX_DEPTH] = {
    let mut offsets = [0u8; MAX_DEPTH];
    let mut top = DEPTH_SHIFT as u8;
    let mut i = 0;
    while i < MAX_DEPTH {
        top -= LEVEL_WIDTHS[i];
        offsets[i] = top;
        i += 1;
    }
    offsets
};

/// `PREFIX_MASKS[d]` keeps the slots of levels `0..=d`, without depth bits.
const PREFIX_MASKS: [u128; MAX_DEPTH] = {
    let mut masks = [0u128; MAX_DEPTH];
    let mut acc = 0u128;
    let mut i = 0;
    while i < MAX_DEPTH {
        acc |= ((1u128 << LEVEL_WIDTHS[i]) - 1) << LEVEL_OFFSETS[i];
        masks[i] = acc;
        i += 1;
    }
    masks
};

const _: () = {
    let mut total: u32 = 0;
    let mut i = 0;
    while i < MAX_DEPTH {
        total += LEVEL_WIDTHS[i] as u32;
        i += 1;
    }
    assert!(total == DEPTH_SHIFT, "LEVEL_WIDTHS must fill the 125 payload bits");
    assert!(LEVEL_OFFSETS[MAX_DEPTH - 1] == 0);
};

/// FNV-1a 64-bit.
pub const fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
        i += 1;
    }
    hash
}

/// Hash one segment into `width` bits. Never returns 0.
pub const fn segment_hash(segment: &[u8], width: u8) -> u128 {
    let full = fnv1a_64(segment);
    let mixed = full ^ (full >> 32) ^ (full >> 17);
    let val = (mixed as u128) & ((1u128 << width) - 1);
    if val == 0 { 1 } else { val }
}

/// Id of the path made of `segments`.
///
/// # Panics
///
/// Panics (at compile time in const contexts) when `segments` is empty or
/// longer than [`MAX_DEPTH`]. Runtime callers validate first.
pub const fn path_id(segments: &[&[u8]]) -> TagId {
    assert!(!segments.is_empty(), "a tag path needs at least one segment");
    assert!(segments.len() <= MAX_DEPTH, "tag path deeper than MAX_DEPTH (8)");

    let mut payload: u128 = 0;
    let mut i = 0;
    while i < segments.len() {
        payload |= segment_hash(segments[i], LEVEL_WIDTHS[i]) << LEVEL_OFFSETS[i];
        i += 1;
    }
    payload | (((segments.len() - 1) as u128) << DEPTH_SHIFT)
}

/// Id of the child `segment` under `parent` (`None` for a root tag).
///
/// Equals [`path_id`] of the full path whenever `parent` is itself the
/// `path_id` of its path. The caller keeps `parent` shallower than
/// [`MAX_DEPTH`] - 1.
pub const fn child_id(parent: Option<TagId>, segment: &[u8]) -> TagId {
    let (prefix, depth) = match parent {
        Some(id) => {
            let parent_depth = depth_of(id) as usize;
            (id & PREFIX_MASKS[parent_depth], parent_depth + 1)
        }
        None => (0, 0),
    };
    prefix
        | (segment_hash(segment, LEVEL_WIDTHS[depth]) << LEVEL_OFFSETS[depth])
        | ((depth as u128) << DEPTH_SHIFT)
}

/// Number of distinct non-zero slot values at `depth`.
#[inline]
pub const fn slot_capacity(depth: u8) -> u128 {
    (1u128 << LEVEL_WIDTHS[depth as usize]) - 1
}

/// `id` with its own level slot advanced by `step`, wrapping and skipping 0.
///
/// Ancestor slots and depth are kept, so the result stays under the same parent.
pub const fn advance_slot(id: TagId, step: u128) -> TagId {
    let depth = depth_of(id) as usize;
    let offset = LEVEL_OFFSETS[depth];
    let capacity = slot_capacity(depth as u8);
    let slot_mask = capacity << offset;

    let current = (id & slot_mask) >> offset;
    let next = (current - 1 + step) % capacity + 1;
    (id & !slot_mask) | (next << offset)
}

/// Zero-based depth: 0 for a root tag, 1 for its children.
#[inline]
pub const fn depth_of(id: TagId) -> u8 {
    ((id & DEPTH_MASK) >> DEPTH_SHIFT) as u8
}

/// `true` when `candidate` equals `ancestor` or lies in its subtree.
#[inline]
pub const fn is_descendant_id(candidate: TagId, ancestor: TagId) -> bool {
    let depth = depth_of(ancestor);
    if depth_of(candidate) < depth {
        return false;
    }
    let mask = PREFIX_MASKS[depth as usize];
    (candidate & mask) == (ancestor & mask)
}

/// Id of the parent path, or `None` for a root tag.
#[inline]
pub const fn parent_id(id: TagId) -> Option<TagId> {
    let depth = depth_of(id);
    if depth == 0 {
        return None;
    }
    let parent_depth = depth - 1;
    let payload = id & PREFIX_MASKS[parent_depth as usize];
    Some(payload | ((parent_depth as u128) << DEPTH_SHIFT))
}
