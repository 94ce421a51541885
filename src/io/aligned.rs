use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Mutex;

/// The aligned-I/O unit. Every on-disk extent starts and ends on a multiple
/// of this size, and every buffer handed to the file is aligned to it.
pub const PAGE_SIZE: usize = 4096;

/// Smallest multiple of [`PAGE_SIZE`] greater than or equal to `n`.
///
/// # Examples
///
/// ```
/// use wallabydb::io::aligned::{page_round_up, PAGE_SIZE};
///
/// assert_eq!(page_round_up(1), PAGE_SIZE);
/// assert_eq!(page_round_up(PAGE_SIZE), PAGE_SIZE);
/// assert_eq!(page_round_up(PAGE_SIZE + 1), 2 * PAGE_SIZE);
/// ```
#[inline]
pub fn page_round_up(n: usize) -> usize {
    (n + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// A page-aligned, zero-initialized byte buffer.
///
/// The allocation is always a whole number of pages (`capacity`); the visible
/// length can be shrunk with [`truncate`](AlignedBuf::truncate) once the
/// useful payload size is known. Ownership is moved into and out of I/O
/// requests, never shared.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    cap: usize,
    len: usize,
}

impl AlignedBuf {
    /// Allocates a zeroed buffer of `page_round_up(size)` bytes.
    ///
    /// # Panics
    /// Panics if `size` is zero: a zero-sized aligned buffer is invalid input.
    pub fn alloc(size: usize) -> AlignedBuf {
        assert!(size > 0, "cannot allocate an empty aligned buffer");
        let cap = page_round_up(size);
        let layout = Layout::from_size_align(cap, PAGE_SIZE)
            .expect("page-aligned layout is always valid");
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        AlignedBuf { ptr, cap, len: cap }
    }

    /// The allocated size, a multiple of [`PAGE_SIZE`].
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shrinks the visible length. The allocation is untouched.
    ///
    /// # Panics
    /// Panics if `len` exceeds the capacity.
    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.cap, "cannot grow an aligned buffer");
        self.len = len;
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Restores the full capacity view and zeroes the contents, returning the
    /// buffer to its freshly allocated state.
    fn reset(&mut self) {
        self.len = self.cap;
        self.as_mut_slice().fill(0);
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("capacity", &self.cap)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.cap, PAGE_SIZE)
            .expect("page-aligned layout is always valid");
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

// The buffer owns its allocation exclusively.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

/// A size-bucketed cache of freed aligned buffers.
///
/// Caching is bounded by a byte capacity; buffers beyond it are simply
/// dropped. Recycled buffers are re-zeroed so callers always observe the same
/// contents as from a fresh allocation.
pub struct BufferPool {
    capacity: usize,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    buckets: BTreeMap<usize, Vec<AlignedBuf>>,
    cached_bytes: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> BufferPool {
        BufferPool {
            capacity,
            inner: Mutex::new(PoolInner { buckets: BTreeMap::new(), cached_bytes: 0 }),
        }
    }

    /// Returns a zeroed buffer of `page_round_up(size)` bytes, reusing a
    /// cached one of that exact rounded size when available.
    pub fn alloc(&self, size: usize) -> AlignedBuf {
        assert!(size > 0, "cannot allocate an empty aligned buffer");
        let rounded = page_round_up(size);

        let recycled = {
            let mut inner = self.inner.lock().unwrap();
            match inner.buckets.get_mut(&rounded).and_then(Vec::pop) {
                Some(buf) => {
                    inner.cached_bytes -= rounded;
                    Some(buf)
                }
                None => None,
            }
        };

        match recycled {
            Some(mut buf) => {
                buf.reset();
                buf
            }
            None => AlignedBuf::alloc(size),
        }
    }

    /// Releases a buffer, caching it when the pool has room.
    pub fn free(&self, buf: AlignedBuf) {
        let cap = buf.capacity();
        let mut inner = self.inner.lock().unwrap();
        if inner.cached_bytes + cap <= self.capacity {
            inner.cached_bytes += cap;
            inner.buckets.entry(cap).or_default().push(buf);
        }
        // Otherwise the buffer is dropped here and deallocated.
    }

    #[cfg(test)]
    fn cached_bytes(&self) -> usize {
        self.inner.lock().unwrap().cached_bytes
    }
}
