//! Owned, mutable packet frames.
//!
//! A frame owns one buffer drawn from the stack's [`BufferPool`] plus the
//! metadata that travels with it through the layers: the active window
//! (`start`/`len`), one header marker per layer, the back-reference to the
//! device it belongs to and the resolution retry counter. Markers are plain
//! bounds-checked indices into the buffer; every advance is validated against
//! the buffer capacity.
//!
//! A frame is exclusively owned by exactly one queue or one processing
//! routine at any time. Its life ends by dropping it, which returns the
//! buffer to the pool ("discard"), or by being consumed on a successful
//! device submit.

use core::fmt::Debug;

use tinyip_util::allocator::{BufferPool, BufferToken};

use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::ethernet::ETHERNET_HEADER_LEN;

/// A packet frame backed by a pool buffer.
#[must_use = "Dropping a frame discards it."]
pub struct Frame {
    pool: BufferPool,
    /// Safety: Always `Some` until dropped.
    buffer: Option<BufferToken>,
    /// First byte of the active window.
    start: usize,
    /// Length of the active window.
    len: usize,
    /// Offset of the datalink header, set at most once per frame.
    datalink: Option<usize>,
    datalink_len: usize,
    /// Offset of the network header, set at most once per frame.
    net: Option<usize>,
    /// Offset of the transport header, set at most once per frame.
    transport: Option<usize>,
    /// The device this frame was received on or will be sent through. A
    /// back-reference, not ownership.
    dev: Option<DeviceId>,
    /// Number of failed link-address resolution attempts for this frame.
    failure_count: u8,
}

impl Frame {
    /// Allocates a frame whose window covers the whole buffer. This is the
    /// ingress shape: received bytes are copied in starting at offset zero.
    pub fn allocate(pool: BufferPool, size: usize) -> Result<Self> {
        let buffer = pool
            .try_allocate_buffer(size)
            .map_err(|_| Error::NoMemory)?;
        Ok(Self::from_token(pool, buffer, 0, size))
    }

    /// Allocates a frame with leading space reserved for a datalink header.
    ///
    /// This is the egress shape: upper layers fill the window and the
    /// link-layer dispatcher later retreats `start` to prepend its header.
    /// Reserving the headroom here is what guarantees the prepend can never
    /// run out of buffer.
    pub fn allocate_with_headroom(pool: BufferPool, size: usize) -> Result<Self> {
        let buffer = pool
            .try_allocate_buffer(ETHERNET_HEADER_LEN + size)
            .map_err(|_| Error::NoMemory)?;
        Ok(Self::from_token(pool, buffer, ETHERNET_HEADER_LEN, size))
    }

    fn from_token(pool: BufferPool, buffer: BufferToken, start: usize, len: usize) -> Self {
        Self {
            pool,
            buffer: Some(buffer),
            start,
            len,
            datalink: None,
            datalink_len: 0,
            net: None,
            transport: None,
            dev: None,
            failure_count: 0,
        }
    }

    /// Deep-copies the frame: a fresh buffer with the same contents and the
    /// same window and marker metadata, independently owned.
    pub fn copy(&self) -> Result<Self> {
        let mut buffer = self
            .pool
            .try_allocate_buffer(self.buffer_len())
            .map_err(|_| Error::NoMemory)?;
        buffer.copy_from_slice(self.buf());
        Ok(Self {
            pool: self.pool,
            buffer: Some(buffer),
            start: self.start,
            len: self.len,
            datalink: self.datalink,
            datalink_len: self.datalink_len,
            net: self.net,
            transport: self.transport,
            dev: self.dev,
            failure_count: self.failure_count,
        })
    }

    fn buf(&self) -> &BufferToken {
        // Safety: The option only becomes None inside drop().
        self.buffer.as_ref().unwrap()
    }

    fn buf_mut(&mut self) -> &mut BufferToken {
        // Safety: The option only becomes None inside drop().
        self.buffer.as_mut().unwrap()
    }

    /// Total capacity of the backing buffer.
    pub fn buffer_len(&self) -> usize {
        self.buf().len()
    }

    /// Offset of the first byte of the active window.
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Length of the active window.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Leading space available for prepending headers.
    pub const fn headroom(&self) -> usize {
        self.start
    }

    /// The active window, i.e. the bytes the current layer operates on.
    pub fn window(&self) -> &[u8] {
        &self.buf()[self.start..self.start + self.len]
    }

    pub fn window_mut(&mut self) -> &mut [u8] {
        let (start, len) = (self.start, self.len);
        &mut self.buf_mut()[start..start + len]
    }

    /// Retreats the window start by `len` bytes and exposes the uncovered
    /// region so a header can be written into it. Fails with [`Error::Malformed`]
    /// when the headroom is insufficient.
    pub fn push_header(&mut self, len: usize) -> Result<&mut [u8]> {
        if self.start < len {
            return Err(Error::Malformed);
        }
        self.start -= len;
        self.len += len;
        let start = self.start;
        Ok(&mut self.buf_mut()[start..start + len])
    }

    /// Records the datalink header position. Each marker may be set at most
    /// once per frame ("one pass per layer").
    pub fn mark_datalink(&mut self, offset: usize, len: usize) -> Result<()> {
        if self.datalink.is_some() || offset + len > self.buffer_len() {
            return Err(Error::Malformed);
        }
        self.datalink = Some(offset);
        self.datalink_len = len;
        Ok(())
    }

    /// Records the network header position. Set at most once per frame.
    pub fn mark_net(&mut self, offset: usize) -> Result<()> {
        if self.net.is_some() || offset > self.buffer_len() {
            return Err(Error::Malformed);
        }
        self.net = Some(offset);
        Ok(())
    }

    /// Records the transport header position. Set at most once per frame.
    pub fn mark_transport(&mut self, offset: usize) -> Result<()> {
        if self.transport.is_some() || offset > self.buffer_len() {
            return Err(Error::Malformed);
        }
        self.transport = Some(offset);
        Ok(())
    }

    pub const fn datalink(&self) -> Option<usize> {
        self.datalink
    }

    pub const fn datalink_len(&self) -> usize {
        self.datalink_len
    }

    pub const fn net(&self) -> Option<usize> {
        self.net
    }

    pub const fn transport(&self) -> Option<usize> {
        self.transport
    }

    /// The bytes from the network header to the end of the active window.
    /// Fails when the network marker has not been set yet.
    pub fn net_bytes(&self) -> Result<&[u8]> {
        let offset = self.net.ok_or(Error::Malformed)?;
        let end = self.start + self.len;
        if offset > end {
            return Err(Error::Malformed);
        }
        Ok(&self.buf()[offset..end])
    }

    pub const fn dev(&self) -> Option<DeviceId> {
        self.dev
    }

    pub fn set_dev(&mut self, dev: DeviceId) {
        self.dev = Some(dev);
    }

    pub const fn failure_count(&self) -> u8 {
        self.failure_count
    }

    /// Counts one more failed resolution attempt and returns the new total.
    /// Strictly increasing up to the retry bound, which guarantees the retry
    /// loop terminates.
    pub fn bump_failure_count(&mut self) -> u8 {
        self.failure_count = self.failure_count.saturating_add(1);
        self.failure_count
    }
}

/// Field-wise equality, except the pool handle: a `&dyn Allocator` cannot be
/// compared, and which pool a buffer came from does not affect frame
/// contents.
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
            && self.start == other.start
            && self.len == other.len
            && self.datalink == other.datalink
            && self.datalink_len == other.datalink_len
            && self.net == other.net
            && self.transport == other.transport
            && self.dev == other.dev
            && self.failure_count == other.failure_count
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            // Safety: The frame held the token exclusively and the pool
            //         handle is the one the token was drawn from.
            unsafe { self.pool.deallocate_buffer(buffer) };
        }
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Frame")
            .field("buffer_len", &self.buffer_len())
            .field("start", &self.start)
            .field("len", &self.len)
            .field("datalink", &self.datalink)
            .field("net", &self.net)
            .field("transport", &self.transport)
            .field("dev", &self.dev)
            .field("failure_count", &self.failure_count)
            .finish()
    }
}
