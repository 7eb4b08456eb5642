//! Definition of memory regions that back a ring buffer.

use memmap2::{MmapMut, MmapOptions};
use std::{
    alloc::{self, Layout, handle_alloc_error},
    fmt::Debug,
    io,
    ptr::NonNull,
};

/// A fixed size region of initialized bytes.
///
/// A ring buffer carves this region into disjoint leases, handing out references
/// derived from [`Memory::as_ptr`] to producers and consumers at the same time.
///
/// # Safety
///
/// * Pointer must point to `capacity()` initialized bytes.
/// * Pointer must remain valid and stable for as long as the region is alive.
/// * Region must not be accessed through any other path while it backs a ring buffer.
pub unsafe trait Memory: Debug + Send + Sync {
    /// Pointer to the first byte of the region.
    fn as_ptr(&self) -> *mut u8;

    /// Number of bytes in the region.
    fn capacity(&self) -> usize;
}

// Safety: Forwards to the boxed implementation which upholds the contract.
unsafe impl<M: Memory + ?Sized> Memory for Box<M> {
    #[inline]
    fn as_ptr(&self) -> *mut u8 {
        (**self).as_ptr()
    }

    #[inline]
    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}

/// Kind of memory to allocate for a ring buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Memory from the registered global allocator.
    #[default]
    OnHeap,

    /// Memory from an anonymous memory map.
    OffHeap,
}

impl MemoryKind {
    /// Allocate a region of this kind.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of bytes to allocate.
    pub fn alloc(self, capacity: usize) -> io::Result<Box<dyn Memory>> {
        Ok(match self {
            MemoryKind::OnHeap => Box::new(OnHeap::alloc(capacity)),
            MemoryKind::OffHeap => Box::new(OffHeap::alloc(capacity)?),
        })
    }
}

/// Memory allocated using the registered global allocator.
///
/// * If no custom allocator is registered, the default allocator from Rust std is used.
/// * Bytes are zeroed on allocation, so leases never expose uninitialized memory.
/// * Uses RAII pattern to free memory when it goes out of scope.
#[derive(Debug)]
pub struct OnHeap {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: Raw pointer is only dereferenced through leases handed out by a ring buffer.
unsafe impl Send for OnHeap {}
unsafe impl Sync for OnHeap {}

impl OnHeap {
    /// Allocate some number of bytes on heap.
    ///
    /// # Panic
    ///
    /// * Capacity must be > 0.
    /// * Capacity should be <= isize::MAX.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of bytes to allocate.
    #[track_caller]
    pub fn alloc(capacity: usize) -> Self {
        assert!(capacity > 0, "zero length memory cannot be allocated");

        let layout = Layout::array::<u8>(capacity)
            .expect("Trying to allocate more than isize::MAX worth of memory");

        // We'll get a non-null pointer only if allocation was successful.
        // Safety: Layout is valid and has non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .unwrap_or_else(|| handle_alloc_error(layout));

        Self { ptr, layout }
    }
}

impl Drop for OnHeap {
    fn drop(&mut self) {
        // Safety: Cannot initialize with invalid pointer and layout.
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// Safety: Allocation is zeroed, sized by layout and freed only on drop.
unsafe impl Memory for OnHeap {
    #[inline]
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.layout.size()
    }
}

/// Off heap memory backed by an anonymous memory map.
///
/// * Frees memory using RAII pattern, so no method to deallocate memory.
/// * If successful memory is guaranteed to be page aligned and zeroed.
#[derive(Debug)]
pub struct OffHeap {
    ptr: NonNull<u8>,
    mmap: MmapMut,
}

// Safety: Raw pointer is only dereferenced through leases handed out by a ring buffer.
unsafe impl Send for OffHeap {}
unsafe impl Sync for OffHeap {}

impl OffHeap {
    /// Map some number of anonymous bytes.
    ///
    /// Returns an I/O error if the mapping cannot be created.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of bytes to map.
    pub fn alloc(capacity: usize) -> io::Result<Self> {
        let mut mmap = MmapOptions::new()
            .len(capacity)
            // Fault all pages so that they are eagerly initialized.
            .populate()
            .map_anon()?;

        // Pointer is captured once, the map itself is never touched again.
        let ptr = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| io::Error::other("anonymous map returned a null pointer"))?;

        Ok(Self { ptr, mmap })
    }
}

// Safety: Mapping is zeroed by the OS and unmapped only on drop.
unsafe impl Memory for OffHeap {
    #[inline]
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.mmap.len()
    }
}
