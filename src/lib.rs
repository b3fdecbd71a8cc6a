//! Segregated free-list allocator for embedded Rust
//!
//! This crate provides a single type called [`Allocator`]. It implements the
//! [`core::alloc::GlobalAlloc`]-trait, which is required to use the
//! [`alloc`-crate][alloc] on `#![no_std]`-targets. Unlike a simple
//! linear-scan allocator, this one keeps its free blocks indexed in twelve
//! size-classed lists, so allocation cost stays flat as the heap fills up,
//! and it merges freed neighbours eagerly in both directions, so mixed
//! workloads don't fragment the heap over time.
//!
//! # Usage
//!
//! Copy and paste the following into your binary crate and adjust the heap
//! size (here 16K) to your needs:
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: segalloc::Allocator<16384> = segalloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards the usual collections (`alloc::vec::Vec`,
//! `alloc::collections::BTreeMap`, ...) just work. The heap size must be a
//! multiple of 8 and at least 280 bytes (the fixed bookkeeping prefix plus
//! one 168-byte chunk); both are checked when the allocator is created.
//!
//! When hunting for heap corruption (a use-after-free scribbling over
//! metadata, a buffer overrun past a payload) call [`Allocator::check`],
//! which audits every internal invariant and names the first violated one,
//! and format the allocator with `{:?}` for a block-by-block dump.
//!
//! # Implementation
//!
//! The heap is one contiguous byte region that grows in 168-byte chunks up
//! to the fixed capacity `N`. Every block carries a 4-byte header encoding
//! its size and two flag bits; free blocks repeat the header as a footer in
//! their last 4 bytes and thread two 8-byte list links through their unused
//! payload:
//!
//! ```text
//!  allocated block               free block
//!  +--------+---------------+    +--------+------+------+-- ... --+--------+
//!  | header |    payload    |    | header | next | prev |         | footer |
//!  +--------+---------------+    +--------+------+------+-- ... --+--------+
//!   4 bytes  8-byte aligned       4 bytes    8      8               4 bytes
//! ```
//!
//! The footer-only-when-free trick works because a header also records
//! whether the *previous* block is allocated: freeing a block can look one
//! word back to find a free left neighbour's footer, and never needs to
//! touch an allocated neighbour at all. The smallest block is therefore 24
//! bytes, and every allocation costs just 4 bytes of overhead.
//!
//! Free blocks are indexed by size class: twelve doubly-linked lists with
//! upper bounds doubling from 128 bytes to 128 KiB (the last list is
//! unbounded). An allocation scans its own class first-fit and climbs to
//! larger classes on a miss; the found block is split when the remainder
//! can stand on its own. A release merges the block with free neighbours on
//! either side before re-indexing it, so no two free blocks are ever
//! adjacent. Two permanent sentinel blocks pin the ends of the heap, an
//! 8-byte prologue and a zero-size epilogue that moves up on every
//! extension, so that these walks need no edge cases.
//!
//! All bookkeeping lives inside the heap region itself; the in-band
//! metadata is only ever touched through one audited module of
//! bounds-checked accessors, so the allocator contains no pointer
//! arithmetic of its own.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

mod heap;

pub use heap::CheckError;

use heap::{Heap, DWORD};

use core::alloc::{GlobalAlloc, Layout};
use core::fmt;
use core::ptr;

/// The segregated free-list memory allocator.
///
/// This is the core type of this crate: an allocator over a fixed heap of
/// `N` bytes, stored inline in the allocator itself. A static `Allocator`
/// therefore counts towards the static memory (`.bss`), which statically
/// bounds the heap usage and keeps it from colliding with the stack.
///
/// Its usage is simple: just copy and paste the following in the binary
/// crate you're developing and adjust the memory size (here 16K):
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: segalloc::Allocator<16384> = segalloc::Allocator::new();
/// ```
/// Also please refer to the [crate-level](crate)-documentation for the size
/// requirements and general usage.
pub struct Allocator<const N: usize> {
    heap: spin::Mutex<Heap<N>>,
}

impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly
    /// when creating the allocator. The heap is laid out lazily on the
    /// first allocation.
    ///
    /// # Panics
    /// This function will panic, if the supplied heap size `N` is less than
    /// `280` or not divisible by `8`.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self {
            heap: spin::Mutex::new(Heap::new()),
        }
    }

    /// Audit the heap against every internal invariant.
    ///
    /// Returns the first violation found, if any. On a correct program this
    /// holds before and after every allocator call; a reported violation
    /// means heap corruption (or an allocator bug) and names the offending
    /// block. The audit is read-only and safe to call at any time.
    pub fn check(&self) -> Result<(), CheckError> {
        self.heap.lock().check()
    }
}

impl<const N: usize> fmt::Debug for Allocator<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.heap.lock(), f)
    }
}

unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.heap.lock();
        let offset = if layout.align() <= DWORD {
            heap.alloc(layout.size())
        } else {
            heap.alloc_aligned(layout.size(), layout.align())
        };
        match offset {
            // SAFETY: the offset names a payload inside the heap region, so
            // the resulting pointer stays within one allocated object.
            Some(offset) => unsafe { heap.base_ptr().add(offset) },
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let mut heap = self.heap.lock();
        let offset = (ptr as usize).wrapping_sub(heap.base_ptr() as usize);
        if layout.align() <= DWORD {
            // natively aligned pointers are exactly the payload offset
            heap.release(offset);
        } else if let Some(block) = heap.block_containing(offset) {
            // over-aligned pointers may sit inside their payload
            heap.release(block);
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.heap.lock();
        let offset = if layout.align() <= DWORD {
            heap.zeroed_alloc(layout.size(), 1)
        } else {
            let offset = heap.alloc_aligned(layout.size(), layout.align());
            if let Some(offset) = offset {
                heap.payload_mut(offset, layout.size()).fill(0);
            }
            offset
        };
        match offset {
            // SAFETY: as in `alloc`
            Some(offset) => unsafe { heap.base_ptr().add(offset) },
            None => ptr::null_mut(),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: the alignment is unchanged and therefore already valid
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        if ptr.is_null() {
            return unsafe { self.alloc(new_layout) };
        }
        if layout.align() > DWORD {
            // the in-place fast path cannot serve an interior pointer; move
            let new = unsafe { self.alloc(new_layout) };
            if !new.is_null() {
                // SAFETY: both allocations are live and disjoint and at
                // least `min(old, new)` bytes long
                unsafe {
                    ptr::copy_nonoverlapping(ptr, new, layout.size().min(new_size));
                    self.dealloc(ptr, layout);
                }
            }
            return new;
        }
        let mut heap = self.heap.lock();
        let offset = (ptr as usize).wrapping_sub(heap.base_ptr() as usize);
        match heap.resize(offset, new_size) {
            // SAFETY: as in `alloc`
            Some(offset) => unsafe { heap.base_ptr().add(offset) },
            None => ptr::null_mut(),
        }
    }
}
