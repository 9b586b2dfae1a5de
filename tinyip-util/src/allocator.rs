//! Fixed-pool buffer allocation for packet frames.
//!
//! Frames in the dispatch core never touch a general-purpose heap. They draw
//! their backing storage from a static pool of equally sized buffers and
//! return it when they terminate. The pool front-end is `Copy` so that every
//! frame can carry a handle to the pool it came from.

use core::{
    alloc::Layout,
    array::from_fn,
    cell::UnsafeCell,
    marker::PhantomPinned,
    ops::{Deref, DerefMut},
    pin::Pin,
    ptr::{slice_from_raw_parts_mut, NonNull},
};

use allocator_api2::alloc::{AllocError, Allocator};
use generic_array::{ArrayLength, GenericArray};
use heapless::Deque;
use typenum::{Const, ToUInt, U};

use crate::tokens::TokenGuard;

// Re-export the external items required to use this module so that dependent
// crates need not manage those dependencies themselves.
pub mod export {
    pub use allocator_api2::alloc::{AllocError, Allocator};
    pub use static_cell::StaticCell;
}

/// A token representing exclusive ownership of a 1-aligned byte buffer drawn
/// from a [`BufferPool`].
///
/// The token behaves like a smart pointer around a previously allocated
/// `&'static mut [u8]`. It is linear: dropping it panics via its
/// [`TokenGuard`]; it must be handed back to the pool it was drawn from
/// instead. Keeping de-allocation out of `Drop` keeps the token free of a
/// pool reference and lets owners decide when and where the buffer returns.
///
/// Safety:
///   - The token cannot be cloned, so at most one owner exists at any time.
///   - The wrapped reference is only reachable through `Deref`/`DerefMut`,
///     which ties its lifetime to the token and preserves `&mut` XOR `&`.
///   - Being a mutable reference to a primitive slice, the buffer is both
///     [`Send`] and [`Sync`].
#[derive(Debug, PartialEq, Eq)]
pub struct BufferToken(
    // A fat slice pointer rather than an array reference: this costs a usize
    // but lets one pool hand out buffers whose advertised length varies with
    // the requested size.
    &'static mut [u8],
    TokenGuard,
);

impl BufferToken {
    /// Wraps a static buffer in a fresh token.
    pub const fn new(buffer: &'static mut [u8]) -> Self {
        Self(buffer, TokenGuard)
    }

    /// Consumes the token and surfaces the wrapped buffer.
    ///
    /// # Safety
    ///
    /// Must only be called by the pool that issued the token. Calling it
    /// anywhere else leaks the buffer from the pool's perspective.
    pub unsafe fn consume(self) -> &'static mut [u8] {
        self.1.consume();
        self.0
    }

    /// Const proxy for `[u8]::len()`, usable where deref is not.
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Const proxy for `[u8]::is_empty()`.
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for BufferToken {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl DerefMut for BufferToken {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

/// A single-threaded pool backend providing `CAPACITY` buffers of
/// `BUFFER_SIZE` bytes each.
///
/// Free buffers are tracked by a stack of pointers, so allocation and release
/// are both O(1).
///
/// Safety: The backend is not [`Sync`], so inner state can be mutated without
///         synchronization. A single pinned `&'static` reference to the
///         backend is assumed to exist, typically obtained through
///         [`static_cell::StaticCell::init()`]; see [`crate::buffer_pool!`].
pub struct FramePoolBackend<const BUFFER_SIZE: usize, const CAPACITY: usize>
where
    Const<CAPACITY>: ToUInt,
    <Const<CAPACITY> as ToUInt>::Output: ArrayLength,
    Const<BUFFER_SIZE>: ToUInt,
    <Const<BUFFER_SIZE> as ToUInt>::Output: ArrayLength,
{
    buffers: GenericArray<UnsafeCell<GenericArray<u8, U<BUFFER_SIZE>>>, U<CAPACITY>>,
    /// Safety: The pointers are self-references into `buffers`. Static
    ///         lifetime plus pinning (see [`Self::pin()`]) guarantee they
    ///         never dangle.
    free_list: UnsafeCell<Deque<NonNull<u8>, CAPACITY>>,
    _pinned: PhantomPinned,
}

impl<const BUFFER_SIZE: usize, const CAPACITY: usize> FramePoolBackend<BUFFER_SIZE, CAPACITY>
where
    Const<CAPACITY>: ToUInt,
    <Const<CAPACITY> as ToUInt>::Output: ArrayLength,
    Const<BUFFER_SIZE>: ToUInt,
    <Const<BUFFER_SIZE> as ToUInt>::Output: ArrayLength,
{
    /// Creates an un-pinned backend. Nothing can be allocated from it until a
    /// static reference to it has been passed through [`Self::pin()`].
    pub fn new() -> Self {
        Self {
            buffers: GenericArray::from_array::<CAPACITY>(from_fn(|_| {
                UnsafeCell::new(GenericArray::from_array([0; BUFFER_SIZE]))
            })),
            free_list: UnsafeCell::new(Deque::new()),
            _pinned: PhantomPinned,
        }
    }

    /// Finalizes initialization of a static backend instance and returns the
    /// pinned reference through which buffers may be allocated.
    pub fn pin(&'static mut self) -> Pin<&'static Self> {
        // Safety: Self-references into the buffer array only become stable
        //         once we hold a static reference to self. The same
        //         guarantees justify Pin::static_ref() below.
        let free_list = self.free_list.get_mut();
        for i in 0..CAPACITY {
            let buffer_ptr =
                // Safety: Static lifetime is enforced by the signature and
                //         the pointers are guaranteed to be non-null.
                unsafe { NonNull::new_unchecked(self.buffers[i].get_mut().as_mut_ptr()) };
            free_list.push_front(buffer_ptr).unwrap();
        }
        Pin::static_ref(self)
    }
}

/// Safety:
/// - Memory blocks handed out point into statically allocated storage and
///   stay valid forever.
/// - The trait is implemented on the pinned reference; copies of that
///   reference all address the same backend, so a block allocated through one
///   copy may be released through another.
unsafe impl<const BUFFER_SIZE: usize, const CAPACITY: usize> Allocator
    for Pin<&'static FramePoolBackend<BUFFER_SIZE, CAPACITY>>
where
    Const<CAPACITY>: ToUInt,
    <Const<CAPACITY> as ToUInt>::Output: ArrayLength,
    Const<BUFFER_SIZE>: ToUInt,
    <Const<BUFFER_SIZE> as ToUInt>::Output: ArrayLength,
{
    /// Pops a free buffer off the pool in O(1).
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() > BUFFER_SIZE || layout.align() != 1 {
            return Err(AllocError);
        }

        // Safety: The cell holds a valid deque and is only ever accessed from
        //         within this impl. The backend is !Sync, so no data races.
        let free_list = unsafe { &mut *self.free_list.get() };
        free_list
            .pop_front()
            .map(|buffer_ptr| unsafe {
                // Safety: Every pooled buffer is exactly BUFFER_SIZE long.
                NonNull::new_unchecked(slice_from_raw_parts_mut(buffer_ptr.as_ptr(), BUFFER_SIZE))
            })
            .ok_or(AllocError)
    }

    /// Pushes a buffer back onto the pool in O(1).
    ///
    /// Safety: The pointer must originate from this pool's `allocate()` and
    ///         the caller must hand over exclusive ownership. Neither is
    ///         checked at runtime.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        debug_assert!(layout.size() <= BUFFER_SIZE && layout.align() == 1);

        let free_list = unsafe { &mut *self.free_list.get() };
        free_list.push_front(ptr).unwrap();
    }
}

impl<const BUFFER_SIZE: usize, const CAPACITY: usize> Default
    for FramePoolBackend<BUFFER_SIZE, CAPACITY>
where
    Const<CAPACITY>: ToUInt,
    <Const<CAPACITY> as ToUInt>::Output: ArrayLength,
    Const<BUFFER_SIZE>: ToUInt,
    <Const<BUFFER_SIZE> as ToUInt>::Output: ArrayLength,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The buffer pool front-end handed around the stack.
///
/// It wraps any [`allocator_api2::alloc::Allocator`] capable backend. Copies
/// of a pool handle all address the same backend, so a buffer allocated from
/// one copy may be released through another.
#[derive(Clone, Copy)]
pub struct BufferPool {
    allocator: &'static dyn Allocator,
}

impl BufferPool {
    /// Creates a pool front-end over the given backend.
    pub fn new(allocator: &'static dyn Allocator) -> Self {
        Self { allocator }
    }

    /// Tries to draw a buffer of exactly `size` bytes from the pool.
    ///
    /// The backend may reserve more, but the token advertises the requested
    /// size so that it can participate in length calculations.
    pub fn try_allocate_buffer(&self, size: usize) -> Result<BufferToken, AllocError> {
        self.allocator
            .allocate(Self::buffer_layout(size))
            .map(|mut buffer_ptr| {
                BufferToken::new(
                    // Safety: Mutability and validity are guaranteed by the
                    //         allocator; the block is at least `size` long.
                    unsafe { &mut buffer_ptr.as_mut()[0..size] },
                )
            })
    }

    /// Consumes the token and returns its buffer to the backend.
    ///
    /// # Safety
    ///
    /// The token must have been issued by this pool (or a copy of it). We do
    /// not carry a pool identifier in the token to keep it small; the backend
    /// is trusted to reject or tolerate foreign pointers as it sees fit.
    pub unsafe fn deallocate_buffer(&self, buffer_token: BufferToken) {
        let buffer = buffer_token.consume();
        self.allocator.deallocate(
            // Safety: Non-null was ensured when the token was created.
            NonNull::new_unchecked(buffer.as_mut_ptr()),
            Self::buffer_layout(buffer.len()),
        );
    }

    const fn buffer_layout(size: usize) -> Layout {
        // Safety: An alignment of one is trivially valid for a byte buffer
        //         and the backend checks the size.
        unsafe { Layout::from_size_align_unchecked(size, 1) }
    }
}

/// Instantiates a [`BufferPool`] over a static [`FramePoolBackend`] via
/// [`static_cell::StaticCell::init()`].
#[macro_export]
macro_rules! buffer_pool {
    ($size:expr, $capacity:expr) => {{
        use core::default::Default;
        use core::pin::Pin;
        use $crate::allocator::export::StaticCell;

        type PoolBackend = $crate::allocator::FramePoolBackend<$size, $capacity>;
        static POOL_BACKEND: StaticCell<PoolBackend> = StaticCell::new();
        static POOL: StaticCell<Pin<&'static PoolBackend>> = StaticCell::new();
        $crate::allocator::BufferPool::new(
            POOL.init(POOL_BACKEND.init(Default::default()).pin()),
        )
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release() {
        let pool = crate::buffer_pool!(64, 2);

        let mut a = pool.try_allocate_buffer(64).expect("out of memory");
        let b = pool.try_allocate_buffer(16).expect("out of memory");
        assert_eq!(a.len(), 64);
        assert_eq!(b.len(), 16);

        a[0] = 0xaa;
        a[63] = 0x55;
        assert_eq!((a[0], a[63]), (0xaa, 0x55));

        // Pool is exhausted with two buffers outstanding.
        assert!(pool.try_allocate_buffer(1).is_err());

        unsafe { pool.deallocate_buffer(a) };
        let c = pool.try_allocate_buffer(32).expect("out of memory");
        assert_eq!(c.len(), 32);

        unsafe {
            pool.deallocate_buffer(b);
            pool.deallocate_buffer(c);
        }
    }

    #[test]
    fn oversized_request_fails() {
        let pool = crate::buffer_pool!(8, 1);
        assert!(pool.try_allocate_buffer(9).is_err());
        let buffer = pool.try_allocate_buffer(8).expect("out of memory");
        unsafe { pool.deallocate_buffer(buffer) };
    }
}
