#![feature(test)]
extern crate test;
use test::Bencher;

use std::alloc::{GlobalAlloc as _, Layout};

mod repeated_allocation_deallocation {
    use super::*;

    /// Run a benchmark, which repeatedly allocates and deallocates the same
    /// block. The benchmark will allocate the given amount of minimum-size
    /// blocks beforehand (before running the actual benchmark) in order to
    /// fill up the heap with unrelated allocations.
    ///
    /// # Panics
    /// This will panic, if the requested pre-allocations fill up the whole
    /// heap (so the actual benchmark cannot allocate blocks anymore).
    fn benchmark_with_preallocation(b: &mut Bencher, pre_allocations: usize) {
        let allocator = segalloc::Allocator::<16384>::new();
        // fill the heap; every 1-byte request occupies one 24-byte block
        for _ in 0..pre_allocations {
            unsafe { allocator.alloc(Layout::new::<u8>()) };
        }

        let layout = Layout::new::<u8>();

        // make sure, that there is enough room for the next allocation
        let ptr = unsafe { allocator.alloc(layout) };
        assert_ne!(ptr, std::ptr::null_mut::<u8>());
        unsafe { allocator.dealloc(ptr, layout) };

        // run actual benchmark: allocate & deallocate the same block repeatedly
        b.iter(|| {
            let ptr = unsafe { allocator.alloc(layout) };
            let ptr = test::black_box(ptr);
            unsafe { allocator.dealloc(ptr, layout) };
        });
    }

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 320);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 620);
    }
}

mod mixed_size_churn {
    use super::*;

    /// Allocate a spread of sizes hitting different size classes, then free
    /// them again in a different order, forcing splits and coalescing.
    #[bench]
    fn allocate_and_free_four_classes(b: &mut Bencher) {
        let allocator = segalloc::Allocator::<65536>::new();
        let layouts = [
            Layout::from_size_align(24, 8).unwrap(),
            Layout::from_size_align(120, 8).unwrap(),
            Layout::from_size_align(500, 8).unwrap(),
            Layout::from_size_align(2000, 8).unwrap(),
        ];

        b.iter(|| {
            let mut pointers = [std::ptr::null_mut::<u8>(); 4];
            for (slot, layout) in pointers.iter_mut().zip(layouts) {
                *slot = test::black_box(unsafe { allocator.alloc(layout) });
            }
            // free the small blocks first so the large ones coalesce last
            unsafe {
                allocator.dealloc(pointers[0], layouts[0]);
                allocator.dealloc(pointers[2], layouts[2]);
                allocator.dealloc(pointers[1], layouts[1]);
                allocator.dealloc(pointers[3], layouts[3]);
            }
        });
    }

    /// Repeatedly grow a block through the in-place and the moving path.
    #[bench]
    fn grow_via_realloc(b: &mut Bencher) {
        let allocator = segalloc::Allocator::<65536>::new();
        let layout = Layout::from_size_align(32, 8).unwrap();

        b.iter(|| {
            let mut ptr = unsafe { allocator.alloc(layout) };
            let mut size = 32;
            while size < 4096 {
                ptr = test::black_box(unsafe {
                    allocator.realloc(ptr, Layout::from_size_align(size, 8).unwrap(), size * 2)
                });
                size *= 2;
            }
            unsafe { allocator.dealloc(ptr, Layout::from_size_align(size, 8).unwrap()) };
        });
    }
}
