//! Heap-consistency auditing.
//!
//! [`Heap::check`] walks the prologue, every block front to back, the
//! epilogue and all twelve bucket lists, and reports the first violated
//! invariant as a [`CheckError`]. A passing audit means: every block is
//! aligned, in bounds and legally sized; free headers match their footers;
//! no two free blocks touch; every previous-allocated flag agrees with the
//! predecessor; every bucket list is acyclic with reciprocal links and
//! holds only free blocks of its size range; and the bucket walk sees
//! exactly the free blocks the heap walk sees.
//!
//! The audit is read-only and never panics on a corrupted heap: offsets are
//! validated before they are dereferenced, so a scribbled size or link ends
//! the walk with a diagnostic instead of an out-of-bounds read.

use super::index::{BUCKET_COUNT, BUCKET_LIMITS};
use super::{Heap, DWORD, MIN_BLOCK, TABLE, WORD};

use core::fmt;

/// The first invariant violation found by [`Heap::check`].
///
/// Offsets name the payload of the offending block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    /// The prologue is not an 8-byte allocated header/footer pair.
    BadPrologue,
    /// The epilogue is not a zero-size allocated tag at the break.
    BadEpilogue,
    /// A block's payload offset is not 8-byte aligned.
    Misaligned { block: usize },
    /// A block lies (partly) outside the managed region.
    OutOfBounds { block: usize },
    /// A block's size is not a legal multiple of 8.
    BadSize { block: usize, size: usize },
    /// A free block's footer does not match its header.
    FooterMismatch { block: usize },
    /// Two physically adjacent blocks are both free.
    AdjacentFree { block: usize },
    /// A block's previous-allocated flag disagrees with its predecessor.
    PrevAllocMismatch { block: usize },
    /// A bucket member is not marked free.
    NotFree { block: usize },
    /// A free block sits in a bucket whose size range excludes it.
    WrongBucket { block: usize, bucket: usize },
    /// Neighbour links within a bucket list are not reciprocal.
    BrokenLinks { block: usize },
    /// A bucket list contains a cycle.
    Cycle { bucket: usize },
    /// Heap walk and bucket walk disagree on the number of free blocks.
    CountMismatch { by_heap: usize, by_buckets: usize },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BadPrologue => write!(f, "bad prologue block"),
            Self::BadEpilogue => write!(f, "bad epilogue header"),
            Self::Misaligned { block } => {
                write!(f, "block {block} is not 8-byte aligned")
            }
            Self::OutOfBounds { block } => {
                write!(f, "block {block} lies outside the heap")
            }
            Self::BadSize { block, size } => {
                write!(f, "block {block} has illegal size {size}")
            }
            Self::FooterMismatch { block } => {
                write!(f, "free block {block}: header and footer mismatch")
            }
            Self::AdjacentFree { block } => {
                write!(f, "free block {block} and its successor are adjacent")
            }
            Self::PrevAllocMismatch { block } => {
                write!(f, "block {block} disagrees with its predecessor's allocation")
            }
            Self::NotFree { block } => {
                write!(f, "bucket member {block} is not marked free")
            }
            Self::WrongBucket { block, bucket } => {
                write!(f, "free block {block} does not belong in bucket {bucket}")
            }
            Self::BrokenLinks { block } => {
                write!(f, "free block {block} has inconsistent neighbour links")
            }
            Self::Cycle { bucket } => write!(f, "bucket {bucket} contains a cycle"),
            Self::CountMismatch { by_heap, by_buckets } => write!(
                f,
                "free block counts disagree: {by_heap} by heap walk, {by_buckets} by bucket walk"
            ),
        }
    }
}

impl<const N: usize> Heap<N> {
    /// Audit every heap invariant; `Err` names the first violation found.
    ///
    /// An uninitialized heap is trivially consistent.
    pub fn check(&self) -> Result<(), CheckError> {
        if !self.initialized {
            return Ok(());
        }
        self.check_prologue()?;
        let by_heap = self.check_heap_walk()?;
        let by_buckets = self.check_buckets()?;
        if by_heap != by_buckets {
            return Err(CheckError::CountMismatch { by_heap, by_buckets });
        }
        Ok(())
    }

    fn check_prologue(&self) -> Result<(), CheckError> {
        let block = TABLE + DWORD;
        let header = self.region.tag_at(block - WORD);
        let footer = self.region.tag_at(block);
        if header.size() != DWORD || !header.is_allocated() || footer != header {
            return Err(CheckError::BadPrologue);
        }
        Ok(())
    }

    /// Front-to-back block walk ending at the epilogue; returns the number
    /// of free blocks passed.
    fn check_heap_walk(&self) -> Result<usize, CheckError> {
        let hi = self.region.hi();
        let mut frees = 0;
        let mut block = self.first_block();
        loop {
            if block % DWORD != 0 {
                return Err(CheckError::Misaligned { block });
            }
            if block > hi {
                return Err(CheckError::OutOfBounds { block });
            }
            let tag = self.tag_of(block);
            if tag.size() == 0 {
                if !tag.is_allocated() || block != hi {
                    return Err(CheckError::BadEpilogue);
                }
                return Ok(frees);
            }
            let size = tag.size();
            let min = if tag.is_allocated() { DWORD } else { MIN_BLOCK };
            if size % DWORD != 0 || size < min {
                return Err(CheckError::BadSize { block, size });
            }
            if block + size > hi {
                return Err(CheckError::OutOfBounds { block });
            }
            if !tag.is_allocated() {
                frees += 1;
                if self.footer_of(block) != tag {
                    return Err(CheckError::FooterMismatch { block });
                }
            }
            let next_tag = self.tag_of(block + size);
            if next_tag.prev_allocated() != tag.is_allocated() {
                return Err(CheckError::PrevAllocMismatch { block: block + size });
            }
            if !tag.is_allocated() && !next_tag.is_allocated() && next_tag.size() != 0 {
                return Err(CheckError::AdjacentFree { block });
            }
            block += size;
        }
    }

    /// Walk all bucket lists with cycle detection; returns the number of
    /// members passed.
    fn check_buckets(&self) -> Result<usize, CheckError> {
        let mut members = 0;
        for bucket in 0..BUCKET_COUNT {
            let lower = if bucket == 0 { 0 } else { BUCKET_LIMITS[bucket - 1] };
            let upper = BUCKET_LIMITS.get(bucket).copied().unwrap_or(usize::MAX);

            let mut slow = self.bucket_head(bucket);
            let mut fast = slow;
            let mut prev = None;
            while let Some(block) = slow {
                self.check_member(block, bucket, lower, upper, prev)?;
                members += 1;
                prev = Some(block);
                slow = self.next_free(block);
                fast = self.hare_step(self.hare_step(fast));
                if fast.is_some() && fast == slow {
                    return Err(CheckError::Cycle { bucket });
                }
            }
        }
        Ok(members)
    }

    fn check_member(
        &self,
        block: usize,
        bucket: usize,
        lower: usize,
        upper: usize,
        prev: Option<usize>,
    ) -> Result<(), CheckError> {
        if block % DWORD != 0 {
            return Err(CheckError::Misaligned { block });
        }
        if block < self.first_block() || block > self.region.hi() {
            return Err(CheckError::OutOfBounds { block });
        }
        let tag = self.tag_of(block);
        if tag.is_allocated() {
            return Err(CheckError::NotFree { block });
        }
        let size = tag.size();
        if size < MIN_BLOCK || block + size > self.region.hi() {
            return Err(CheckError::BadSize { block, size });
        }
        if size <= lower || size > upper {
            return Err(CheckError::WrongBucket { block, bucket });
        }
        if self.prev_free(block) != prev {
            return Err(CheckError::BrokenLinks { block });
        }
        Ok(())
    }

    /// One hare step of the cycle detector. A malformed node stops the
    /// hare; the tortoise reaches it later and reports it.
    fn hare_step(&self, cursor: Option<usize>) -> Option<usize> {
        let block = cursor?;
        if block % DWORD != 0
            || block < self.first_block()
            || block + 2 * DWORD > self.region.hi()
        {
            return None;
        }
        self.next_free(block)
    }
}

/// Block-by-block heap dump, the verbose companion to [`Heap::check`].
impl<const N: usize> fmt::Debug for Heap<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.initialized {
            return f.write_str("Heap (uninitialized)");
        }
        writeln!(f, "Heap [{}..{})", self.region.lo(), self.region.hi())?;
        let mut block = self.first_block();
        loop {
            if block % DWORD != 0 || block > self.region.hi() {
                return writeln!(f, "{block:>8}: walk left the heap");
            }
            let tag = self.tag_of(block);
            if tag.size() == 0 {
                return write!(f, "{block:>8}: epilogue {tag:?}");
            }
            writeln!(f, "{block:>8}: {tag:?}")?;
            block += tag.size();
        }
    }
}
