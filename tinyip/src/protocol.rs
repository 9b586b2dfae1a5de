//! Network-layer protocols and the router between layers.
//!
//! The registry replaces a process-wide protocol table: it is owned by the
//! stack instance and handed to the router explicitly, so several independent
//! stacks can coexist (which the tests rely on).

use tinyip_util::{debug, trace};

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::ip::{self, IpVersion};
use crate::queue::Queue;

/// The processing capability a concrete network/transport protocol supplies.
///
/// Each hook consumes one frame and reports the number of bytes it accepted.
pub trait ProtocolHandler {
    fn process_in(&mut self, frame: Frame) -> Result<usize>;
    fn process_out(&mut self, frame: Frame) -> Result<usize>;
}

/// A no-op handler that releases every frame and reports its window length.
/// Useful as a placeholder for an unregistered direction and in tests.
impl ProtocolHandler for () {
    fn process_in(&mut self, frame: Frame) -> Result<usize> {
        Ok(frame.len())
    }

    fn process_out(&mut self, frame: Frame) -> Result<usize> {
        Ok(frame.len())
    }
}

/// A network-layer protocol: its version identity, its two queues and its
/// processing hooks.
pub struct Protocol<H: ProtocolHandler> {
    version: IpVersion,
    pub q_in: Queue,
    pub q_out: Queue,
    handler: H,
}

impl<H: ProtocolHandler> Protocol<H> {
    pub fn new(version: IpVersion, handler: H) -> Self {
        Self {
            version,
            q_in: Queue::new(),
            q_out: Queue::new(),
            handler,
        }
    }

    pub const fn version(&self) -> IpVersion {
        self.version
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Combined depth of both queues, the scheduler's idle check.
    pub fn pending(&self) -> usize {
        self.q_in.len() + self.q_out.len()
    }
}

/// The per-stack protocol registry, indexed by version tag.
pub struct ProtocolRegistry<V4: ProtocolHandler, V6: ProtocolHandler> {
    v4: Option<Protocol<V4>>,
    v6: Option<Protocol<V6>>,
}

impl<V4: ProtocolHandler, V6: ProtocolHandler> ProtocolRegistry<V4, V6> {
    pub const fn new() -> Self {
        Self { v4: None, v6: None }
    }

    pub fn register_v4(&mut self, protocol: Protocol<V4>) {
        debug_assert!(protocol.version() == IpVersion::V4);
        self.v4 = Some(protocol);
    }

    pub fn register_v6(&mut self, protocol: Protocol<V6>) {
        debug_assert!(protocol.version() == IpVersion::V6);
        self.v6 = Some(protocol);
    }

    pub fn v4_mut(&mut self) -> Option<&mut Protocol<V4>> {
        self.v4.as_mut()
    }

    pub fn v6_mut(&mut self) -> Option<&mut Protocol<V6>> {
        self.v6.as_mut()
    }

    /// Routes an inbound frame into the input queue of the protocol matching
    /// its version tag and reports the number of bytes accepted.
    ///
    /// A frame handed to this router is never silently lost: it ends up in a
    /// protocol queue or it is explicitly discarded with the failure
    /// reported.
    pub fn network_receive(&mut self, frame: Frame) -> Result<usize> {
        let accepted = frame.buffer_len();
        let q_in = match ip::version(&frame) {
            Some(IpVersion::V4) => match self.v4.as_mut() {
                Some(protocol) => &mut protocol.q_in,
                None => {
                    debug!("no IPv4 protocol registered, dropping frame");
                    return Err(Error::Unsupported);
                }
            },
            Some(IpVersion::V6) => match self.v6.as_mut() {
                Some(protocol) => &mut protocol.q_in,
                None => {
                    debug!("no IPv6 protocol registered, dropping frame");
                    return Err(Error::Unsupported);
                }
            },
            None => {
                debug!("unrecognized network version tag, dropping frame");
                return Err(Error::Unsupported);
            }
        };
        match q_in.enqueue(frame) {
            Ok(_) => Ok(accepted),
            Err(frame) => {
                debug!("protocol input queue full, dropping frame");
                drop(frame);
                Err(Error::QueueFull)
            }
        }
    }
}

impl<V4: ProtocolHandler, V6: ProtocolHandler> Default for ProtocolRegistry<V4, V6> {
    fn default() -> Self {
        Self::new()
    }
}

/// Seam towards the transport layer. The actual demultiplexing lives in the
/// protocol handlers' `process_in`; this pass-through only accounts for the
/// bytes and explicitly releases the frame.
pub fn transport_receive(frame: Frame) -> Result<usize> {
    let accepted = frame.len();
    trace!("transport pass-through, {} bytes", accepted);
    drop(frame);
    Ok(accepted)
}

/// Seam towards the socket layer; see [`transport_receive`].
pub fn socket_receive(frame: Frame) -> Result<usize> {
    let accepted = frame.len();
    trace!("socket pass-through, {} bytes", accepted);
    drop(frame);
    Ok(accepted)
}
