//! The boundary-tag word written at the borders of every block.
//!
//! Each block starts with a 4-byte [`Tag`]. The upper 29 bits hold the total
//! block size in bytes (header included); sizes are always multiples of 8,
//! so the low 3 bits are free to carry flags: bit 0 records whether this
//! block is allocated, bit 1 whether the *previous* physical block is
//! allocated. Bit 2 is reserved and stays zero.
//!
//! Free blocks repeat their tag as a footer in their last 4 bytes, which is
//! what makes backward coalescing O(1). Allocated blocks carry no footer:
//! the successor's previous-allocated bit records their status instead,
//! saving 4 bytes per live allocation.

use core::fmt;

/// Flag bit: this block is allocated.
const ALLOCATED: u32 = 0b001;
/// Flag bit: the previous physical block is allocated.
const PREV_ALLOCATED: u32 = 0b010;
/// Everything above the three flag bits is the size.
const SIZE_MASK: u32 = !0b111;

/// A 4-byte header/footer word packing a block size and two flags.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
    /// Tag of an allocated block of `size` total bytes.
    pub const fn allocated(size: usize, prev_allocated: bool) -> Self {
        Self::new(size, ALLOCATED, prev_allocated)
    }

    /// Tag of a free block of `size` total bytes.
    pub const fn free(size: usize, prev_allocated: bool) -> Self {
        Self::new(size, 0, prev_allocated)
    }

    /// The epilogue sentinel: a zero-size allocated tag.
    pub const fn epilogue(prev_allocated: bool) -> Self {
        Self::new(0, ALLOCATED, prev_allocated)
    }

    const fn new(size: usize, flags: u32, prev_allocated: bool) -> Self {
        assert!(size % 8 == 0, "block sizes are multiples of 8");
        assert!(size as u64 <= SIZE_MASK as u64, "block size exceeds the tag range");
        let prev = if prev_allocated { PREV_ALLOCATED } else { 0 };
        Self(size as u32 | flags | prev)
    }

    /// Total block size in bytes, header included.
    pub const fn size(self) -> usize {
        (self.0 & SIZE_MASK) as usize
    }

    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    pub const fn prev_allocated(self) -> bool {
        self.0 & PREV_ALLOCATED != 0
    }

    /// The same tag with the previous-allocated flag replaced.
    #[must_use]
    pub const fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        if prev_allocated {
            Self(self.0 | PREV_ALLOCATED)
        } else {
            Self(self.0 & !PREV_ALLOCATED)
        }
    }

    /// The in-memory representation of the tag.
    pub const fn to_raw(self) -> [u8; 4] {
        self.0.to_ne_bytes()
    }

    /// Reconstruct a tag from its in-memory representation.
    pub const fn from_raw(raw: [u8; 4]) -> Self {
        Self(u32::from_ne_bytes(raw))
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}: {}{}]",
            self.size(),
            if self.is_allocated() { 'a' } else { 'f' },
            if self.prev_allocated() { 'p' } else { '-' },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Tag;

    #[test]
    fn packs_size_and_flags() {
        let tag = Tag::allocated(104, true);
        assert_eq!(tag.size(), 104);
        assert!(tag.is_allocated());
        assert!(tag.prev_allocated());

        let tag = Tag::free(24, false);
        assert_eq!(tag.size(), 24);
        assert!(!tag.is_allocated());
        assert!(!tag.prev_allocated());
    }

    #[test]
    fn epilogue_is_zero_size_and_allocated() {
        let tag = Tag::epilogue(true);
        assert_eq!(tag.size(), 0);
        assert!(tag.is_allocated());
        assert!(tag.prev_allocated());
    }

    #[test]
    fn replaces_the_prev_allocated_flag_only() {
        let tag = Tag::free(64, true).with_prev_allocated(false);
        assert_eq!(tag, Tag::free(64, false));

        let tag = Tag::allocated(64, false).with_prev_allocated(true);
        assert_eq!(tag, Tag::allocated(64, true));
    }

    #[test]
    fn raw_roundtrip() {
        let tag = Tag::free(131080, true);
        assert_eq!(Tag::from_raw(tag.to_raw()), tag);
    }

    #[test]
    #[should_panic(expected = "multiples of 8")]
    fn rejects_unaligned_sizes() {
        let _tag = Tag::free(23, false);
    }
}
