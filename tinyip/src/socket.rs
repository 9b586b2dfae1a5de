//! UDP-style socket delivery: fan-out of inbound frames to every socket
//! bound to the destination port.

use core::mem;

use heapless::Vec;
use tinyip_util::debug;

use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::ip::{self, Ipv4Address};
use crate::queue::Queue;

/// Bound on the number of sockets sharing one port.
pub const SOCKPORT_MAX_SOCKETS: usize = 8;

/// Byte overhead charged per frame held in a socket input queue, covering the
/// frame bookkeeping itself.
pub const UDP_FRAME_OVERHEAD: usize = mem::size_of::<Frame>();

/// Events reported through the wakeup capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    /// Data arrived in the socket's input queue.
    Readable,
}

/// The wakeup capability a socket owner supplies. Invoked synchronously on
/// successful delivery.
pub trait SocketWakeup {
    fn wakeup(&mut self, event: SocketEvent);
}

/// Verdict of the multicast source/group filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Accept,
    Reject,
}

/// The multicast filtering capability (group membership and source filtering
/// live outside this core).
pub trait MulticastFilter {
    fn filter<W: SocketWakeup>(
        &mut self,
        socket: &Socket<W>,
        group: Ipv4Address,
        source: Ipv4Address,
    ) -> Result<FilterAction>;
}

/// The delivery-relevant view of a UDP socket.
pub struct Socket<W: SocketWakeup> {
    local_addr: Ipv4Address,
    port: u16,
    /// The device carrying the socket's local address; `None` for a
    /// wildcard-bound socket.
    link: Option<DeviceId>,
    pub q_in: Queue,
    wakeup: W,
}

impl<W: SocketWakeup> Socket<W> {
    pub fn new(local_addr: Ipv4Address, port: u16, link: Option<DeviceId>, wakeup: W) -> Self {
        Self {
            local_addr,
            port,
            link,
            q_in: Queue::with_limits(0, UDP_FRAME_OVERHEAD),
            wakeup,
        }
    }

    pub const fn local_addr(&self) -> Ipv4Address {
        self.local_addr
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn link(&self) -> Option<DeviceId> {
        self.link
    }

    pub fn wakeup(&self) -> &W {
        &self.wakeup
    }
}

/// All sockets bound to one port. Insertion order is irrelevant for
/// delivery semantics.
pub struct SockPort<W: SocketWakeup> {
    port: u16,
    sockets: Vec<Socket<W>, SOCKPORT_MAX_SOCKETS>,
}

impl<W: SocketWakeup> SockPort<W> {
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            sockets: Vec::new(),
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Adds a socket. A socket bound to a different port, or one that does
    /// not fit, is handed back.
    pub fn add(&mut self, socket: Socket<W>) -> core::result::Result<(), Socket<W>> {
        if socket.port() != self.port {
            return Err(socket);
        }
        self.sockets.push(socket)
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn socket(&self, index: usize) -> Option<&Socket<W>> {
        self.sockets.get(index)
    }

    pub fn socket_mut(&mut self, index: usize) -> Option<&mut Socket<W>> {
        self.sockets.get_mut(index)
    }
}

/// Fans an inbound frame out to every matching socket of the port.
///
/// Matching rules, in precedence order:
///
/// 1. Broadcast or multicast destination: a multicast frame must first pass
///    the socket's [`MulticastFilter`] (a rejection skips this socket only; a
///    filter failure aborts the whole delivery). The socket matches if its
///    local address is the wildcard, or if it is bound to the device the
///    frame arrived on (neighbor-originated broadcast). Note the documented
///    catch-all rule: a wildcard-bound socket receives the broadcast even
///    when its conceptual home device differs from the arrival device.
/// 2. Unicast destination: the socket matches if its local address is the
///    wildcard or exactly the destination.
///
/// Every matching socket receives an independent copy; a full socket queue
/// silently drops that copy. The original is discarded after all sockets have
/// been visited. Reports [`Error::NoListener`] when the port has no sockets
/// at all; a per-socket mismatch is not an error.
pub fn udp_deliver<W: SocketWakeup>(
    sockport: &mut SockPort<W>,
    frame: Frame,
    filter: &mut impl MulticastFilter,
) -> Result<()> {
    let dst = ip::destination(&frame)?;
    let src = if dst.is_multicast() {
        Some(ip::source(&frame)?)
    } else {
        None
    };

    // The membership snapshot: sockets added by wakeup callbacks during this
    // delivery are not visited, sockets cannot be removed mid-iteration
    // because we hold the port exclusively.
    let visited = sockport.sockets.len();
    for index in 0..visited {
        let socket = &mut sockport.sockets[index];

        let matched = if dst.is_broadcast() || dst.is_multicast() {
            if dst.is_multicast() {
                // Safety: src is Some whenever dst is multicast, see above.
                match filter.filter(socket, dst, src.unwrap())? {
                    FilterAction::Reject => continue,
                    FilterAction::Accept => {}
                }
            }
            socket.local_addr.is_any()
                || (socket.link.is_some() && socket.link == frame.dev())
        } else {
            socket.local_addr.is_any() || socket.local_addr == dst
        };
        if !matched {
            continue;
        }

        let cpy = frame.copy()?;
        match socket.q_in.enqueue(cpy) {
            Ok(_) => socket.wakeup.wakeup(SocketEvent::Readable),
            Err(cpy) => {
                // Backpressure on one socket is a silent drop of its copy,
                // never a delivery failure.
                debug!("socket input queue full, dropping copy");
                drop(cpy);
            }
        }
    }

    drop(frame);
    if visited > 0 {
        Ok(())
    } else {
        Err(Error::NoListener)
    }
}
