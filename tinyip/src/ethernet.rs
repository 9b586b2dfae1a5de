//! Datalink-level dispatch: the interface between the network layer and
//! Ethernet-capable devices.
//!
//! Receive validates and strips the Ethernet header and hands the frame to
//! the resolution subsystem or the network router. Send resolves the
//! destination link address with a bounded retry protocol, prepends the
//! header into the frame's reserved headroom and submits the frame to the
//! device driver.

use byteorder::{ByteOrder, NetworkEndian};
use tinyip_util::{debug, warn};

use crate::device::{Device, DeviceDriver};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::ip::{self, IpVersion};
use crate::protocol::{ProtocolHandler, ProtocolRegistry};

pub const ETHERNET_ADDR_LEN: usize = 6;
pub const ETHERNET_HEADER_LEN: usize = 14;

/// How often an unresolved frame may trigger a resolution query before it is
/// reported unreachable.
pub const RESOLUTION_MAX_ATTEMPTS: u8 = 3;

/// An Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetAddress(pub [u8; ETHERNET_ADDR_LEN]);

impl EthernetAddress {
    pub const BROADCAST: Self = Self([0xff; ETHERNET_ADDR_LEN]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

/// The protocol tag embedded in an Ethernet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Arp,
    Unknown(u16),
}

impl EtherType {
    pub const fn from_u16(raw: u16) -> Self {
        match raw {
            0x0800 => Self::Ipv4,
            0x0806 => Self::Arp,
            0x86dd => Self::Ipv6,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u16(&self) -> u16 {
        match self {
            Self::Ipv4 => 0x0800,
            Self::Arp => 0x0806,
            Self::Ipv6 => 0x86dd,
            Self::Unknown(other) => *other,
        }
    }
}

/// A parsed or to-be-emitted Ethernet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetRepr {
    pub dst: EthernetAddress,
    pub src: EthernetAddress,
    pub ethertype: EtherType,
}

impl EthernetRepr {
    /// Parses the header at the beginning of `buffer`.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ETHERNET_HEADER_LEN {
            return Err(Error::Malformed);
        }
        let mut dst = [0; ETHERNET_ADDR_LEN];
        let mut src = [0; ETHERNET_ADDR_LEN];
        dst.copy_from_slice(&buffer[0..6]);
        src.copy_from_slice(&buffer[6..12]);
        let ethertype = EtherType::from_u16(NetworkEndian::read_u16(&buffer[12..14]));
        Ok(Self {
            dst: EthernetAddress(dst),
            src: EthernetAddress(src),
            ethertype,
        })
    }

    /// Writes the header into the first [`ETHERNET_HEADER_LEN`] bytes of
    /// `buffer`.
    pub fn emit(&self, buffer: &mut [u8]) {
        debug_assert!(buffer.len() >= ETHERNET_HEADER_LEN);
        buffer[0..6].copy_from_slice(&self.dst.0);
        buffer[6..12].copy_from_slice(&self.src.0);
        NetworkEndian::write_u16(&mut buffer[12..14], self.ethertype.as_u16());
    }
}

/// The contract towards the link-address resolution subsystem (the ARP cache
/// and protocol, which live outside this core).
pub trait AddressResolver {
    /// Non-blocking lookup of the link address for the frame's network
    /// destination.
    fn resolve(&mut self, frame: &Frame) -> Option<EthernetAddress>;

    /// Triggers an asynchronous resolution request for the frame's network
    /// destination. The answer arrives out of band on a later tick.
    fn query(&mut self, frame: &Frame);

    /// Consumes an inbound resolution-protocol frame.
    fn receive(&mut self, frame: Frame) -> Result<usize>;
}

/// The result of a send attempt through the link layer.
#[derive(Debug)]
pub enum TxOutcome {
    /// The frame was submitted to the device; so many bytes were accepted.
    Sent(usize),
    /// Address resolution is in progress. The frame is handed back and must
    /// be re-enqueued for a later retry, not dropped.
    Pending(Frame),
}

/// Pushes a received datalink frame up into the stack.
///
/// Used by the scheduler for devices with link-layer capability. The frame's
/// datalink marker must be unset: a frame makes at most one pass through each
/// layer, and a resubmitted frame is rejected here.
pub fn ethernet_receive<D, V4, V6>(
    device: &Device<D>,
    registry: &mut ProtocolRegistry<V4, V6>,
    resolver: &mut impl AddressResolver,
    mut frame: Frame,
) -> Result<usize>
where
    D: DeviceDriver,
    V4: ProtocolHandler,
    V6: ProtocolHandler,
{
    let Some(mac) = device.link_addr() else {
        return Err(Error::Malformed);
    };
    if frame.dev().is_none() || frame.datalink().is_some() {
        return Err(Error::Malformed);
    }

    let header = EthernetRepr::parse(frame.window())?;
    if header.dst != mac && !header.dst.is_broadcast() {
        // Not for us and not broadcast.
        return Err(Error::Malformed);
    }

    let start = frame.start();
    frame.mark_datalink(start, ETHERNET_HEADER_LEN)?;
    frame.mark_net(start + ETHERNET_HEADER_LEN)?;

    match header.ethertype {
        EtherType::Arp => resolver.receive(frame),
        EtherType::Ipv4 | EtherType::Ipv6 => registry.network_receive(frame),
        EtherType::Unknown(raw) => {
            debug!("dropping frame with unsupported ethertype {:#06x}", raw);
            drop(frame);
            Err(Error::Unsupported)
        }
    }
}

/// Addresses and submits an outbound frame through a link-capable device.
///
/// A broadcast network destination maps straight to the broadcast link
/// address. Anything else goes through the resolver: while unresolved, each
/// call counts one attempt, fires one query and returns
/// [`TxOutcome::Pending`] until the attempt bound is reached, after which the
/// frame is discarded as [`Error::Unreachable`]. Once resolved, the header is
/// prepended into the frame's reserved headroom and the frame is handed to
/// the device driver.
pub fn ethernet_send<D: DeviceDriver>(
    device: &mut Device<D>,
    resolver: &mut impl AddressResolver,
    mut frame: Frame,
) -> Result<TxOutcome> {
    let Some(mac) = device.link_addr() else {
        return Err(Error::Malformed);
    };

    let dst_mac = match ip::version(&frame) {
        Some(IpVersion::V4) => {
            let dst = ip::destination(&frame)?;
            if dst.is_broadcast() {
                EthernetAddress::BROADCAST
            } else {
                match resolver.resolve(&frame) {
                    Some(resolved) => resolved,
                    None => {
                        if frame.bump_failure_count() < RESOLUTION_MAX_ATTEMPTS {
                            resolver.query(&frame);
                            return Ok(TxOutcome::Pending(frame));
                        }
                        warn!("link address resolution exhausted, dropping frame");
                        return Err(Error::Unreachable);
                    }
                }
            }
        }
        // Neighbor discovery is not handled at this layer.
        Some(IpVersion::V6) => return Err(Error::Unsupported),
        None => return Err(Error::Malformed),
    };

    if frame.headroom() < ETHERNET_HEADER_LEN {
        return Err(Error::Malformed);
    }
    let header = EthernetRepr {
        dst: dst_mac,
        src: mac,
        ethertype: EtherType::Ipv4,
    };
    header.emit(frame.push_header(ETHERNET_HEADER_LEN)?);
    let start = frame.start();
    frame.mark_datalink(start, ETHERNET_HEADER_LEN)?;

    let sent = device.driver_mut().send(frame.window())?;
    drop(frame);
    Ok(TxOutcome::Sent(sent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::ip::Ipv4Address;
    use crate::protocol::Protocol;
    use std::vec::Vec;
    use tinyip_util::allocator::BufferPool;

    const DEV_MAC: EthernetAddress = EthernetAddress([2, 0, 0, 0, 0, 1]);

    struct SilentDriver;

    impl DeviceDriver for SilentDriver {
        fn send(&mut self, buffer: &[u8]) -> Result<usize> {
            Ok(buffer.len())
        }
    }

    struct RecordingDriver {
        sent: Vec<Vec<u8>>,
    }

    impl RecordingDriver {
        fn new() -> Self {
            Self { sent: Vec::new() }
        }
    }

    impl DeviceDriver for RecordingDriver {
        fn send(&mut self, buffer: &[u8]) -> Result<usize> {
            self.sent.push(buffer.to_vec());
            Ok(buffer.len())
        }
    }

    /// Never resolves; counts queries and ARP frames.
    struct NeverResolves {
        queries: usize,
        arp_frames: usize,
    }

    impl NeverResolves {
        fn new() -> Self {
            Self {
                queries: 0,
                arp_frames: 0,
            }
        }
    }

    impl AddressResolver for NeverResolves {
        fn resolve(&mut self, _frame: &Frame) -> Option<EthernetAddress> {
            None
        }

        fn query(&mut self, _frame: &Frame) {
            self.queries += 1;
        }

        fn receive(&mut self, frame: Frame) -> Result<usize> {
            self.arp_frames += 1;
            Ok(frame.len())
        }
    }

    /// Resolves every destination to one fixed address.
    struct FixedResolver(EthernetAddress);

    impl AddressResolver for FixedResolver {
        fn resolve(&mut self, _frame: &Frame) -> Option<EthernetAddress> {
            Some(self.0)
        }

        fn query(&mut self, _frame: &Frame) {}

        fn receive(&mut self, frame: Frame) -> Result<usize> {
            Ok(frame.len())
        }
    }

    fn eth_device() -> Device<SilentDriver> {
        Device::new(DeviceId(1), Some(DEV_MAC), SilentDriver)
    }

    fn registry() -> ProtocolRegistry<(), ()> {
        let mut registry = ProtocolRegistry::new();
        registry.register_v4(Protocol::new(IpVersion::V4, ()));
        registry
    }

    /// An Ethernet frame around a minimal IPv4 header.
    fn inbound_frame(pool: BufferPool, dev: DeviceId, dst: EthernetAddress, ethertype: EtherType) -> Frame {
        let mut frame = Frame::allocate(pool, ETHERNET_HEADER_LEN + 20).expect("out of memory");
        let header = EthernetRepr {
            dst,
            src: EthernetAddress([2, 0, 0, 0, 0, 2]),
            ethertype,
        };
        header.emit(frame.window_mut());
        frame.window_mut()[ETHERNET_HEADER_LEN] = 0x45;
        frame.set_dev(dev);
        frame
    }

    /// An egress frame carrying a minimal IPv4 header addressed to `dst`.
    fn outbound_frame(pool: BufferPool, dst: Ipv4Address) -> Frame {
        let mut frame = Frame::allocate_with_headroom(pool, 20).expect("out of memory");
        let window = frame.window_mut();
        window[0] = 0x45;
        window[16..20].copy_from_slice(&dst.0);
        let start = frame.start();
        frame.mark_net(start).expect("marker");
        frame
    }

    #[test]
    fn repr_roundtrip() {
        let repr = EthernetRepr {
            dst: EthernetAddress([1, 2, 3, 4, 5, 6]),
            src: DEV_MAC,
            ethertype: EtherType::Ipv4,
        };
        let mut buffer = [0; ETHERNET_HEADER_LEN];
        repr.emit(&mut buffer);
        assert_eq!(EthernetRepr::parse(&buffer), Ok(repr));
        assert_eq!(EthernetRepr::parse(&buffer[..13]), Err(Error::Malformed));
    }

    #[test]
    fn receive_routes_ipv4_to_registry() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let device = eth_device();
        let mut registry = registry();
        let mut resolver = NeverResolves::new();

        let frame = inbound_frame(pool, device.id(), DEV_MAC, EtherType::Ipv4);
        let accepted = ethernet_receive(&device, &mut registry, &mut resolver, frame)
            .expect("accepted");
        assert_eq!(accepted, ETHERNET_HEADER_LEN + 20);
        assert_eq!(registry.v4_mut().unwrap().q_in.len(), 1);

        let queued = registry.v4_mut().unwrap().q_in.dequeue().expect("frame");
        assert_eq!(queued.datalink(), Some(0));
        assert_eq!(queued.net(), Some(ETHERNET_HEADER_LEN));
    }

    #[test]
    fn receive_routes_arp_to_resolver() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let device = eth_device();
        let mut registry = registry();
        let mut resolver = NeverResolves::new();

        let frame = inbound_frame(pool, device.id(), EthernetAddress::BROADCAST, EtherType::Arp);
        ethernet_receive(&device, &mut registry, &mut resolver, frame).expect("accepted");
        assert_eq!(resolver.arp_frames, 1);
        assert_eq!(registry.v4_mut().unwrap().q_in.len(), 0);
    }

    #[test]
    fn receive_rejects_foreign_destination() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let device = eth_device();
        let mut registry = registry();
        let mut resolver = NeverResolves::new();

        let foreign = EthernetAddress([2, 0, 0, 0, 0, 9]);
        let frame = inbound_frame(pool, device.id(), foreign, EtherType::Ipv4);
        assert_eq!(
            ethernet_receive(&device, &mut registry, &mut resolver, frame).unwrap_err(),
            Error::Malformed
        );
    }

    #[test]
    fn receive_rejects_second_pass() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let device = eth_device();
        let mut registry = registry();
        let mut resolver = NeverResolves::new();

        let mut frame = inbound_frame(pool, device.id(), DEV_MAC, EtherType::Ipv4);
        frame.mark_datalink(0, ETHERNET_HEADER_LEN).expect("marker");
        assert_eq!(
            ethernet_receive(&device, &mut registry, &mut resolver, frame).unwrap_err(),
            Error::Malformed
        );
    }

    #[test]
    fn receive_drops_unsupported_ethertype() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let device = eth_device();
        let mut registry = registry();
        let mut resolver = NeverResolves::new();

        let frame = inbound_frame(pool, device.id(), DEV_MAC, EtherType::Unknown(0x1234));
        assert_eq!(
            ethernet_receive(&device, &mut registry, &mut resolver, frame).unwrap_err(),
            Error::Unsupported
        );
    }

    #[test]
    fn broadcast_destination_skips_resolution() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let mut device = Device::new(DeviceId(1), Some(DEV_MAC), RecordingDriver::new());
        let mut resolver = NeverResolves::new();

        let frame = outbound_frame(pool, Ipv4Address::BROADCAST);
        match ethernet_send(&mut device, &mut resolver, frame).expect("sent") {
            TxOutcome::Sent(len) => assert_eq!(len, ETHERNET_HEADER_LEN + 20),
            TxOutcome::Pending(_) => panic!("broadcast must not wait for resolution"),
        }
        assert_eq!(resolver.queries, 0);

        let sent = &device.driver().sent[0];
        let header = EthernetRepr::parse(sent).expect("header");
        assert_eq!(header.dst, EthernetAddress::BROADCAST);
        assert_eq!(header.src, DEV_MAC);
        assert_eq!(header.ethertype, EtherType::Ipv4);
    }

    #[test]
    fn resolution_gives_up_after_three_attempts() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let mut device = eth_device();
        let mut resolver = NeverResolves::new();

        let mut frame = outbound_frame(pool, Ipv4Address::new(10, 0, 0, 2));
        for attempt in 1..RESOLUTION_MAX_ATTEMPTS {
            frame = match ethernet_send(&mut device, &mut resolver, frame).expect("pending") {
                TxOutcome::Pending(frame) => frame,
                TxOutcome::Sent(_) => panic!("nothing can have been resolved"),
            };
            assert_eq!(frame.failure_count(), attempt);
            assert_eq!(resolver.queries, attempt as usize);
        }

        assert_eq!(
            ethernet_send(&mut device, &mut resolver, frame).unwrap_err(),
            Error::Unreachable
        );
        // The third attempt counts but queries no more.
        assert_eq!(resolver.queries, (RESOLUTION_MAX_ATTEMPTS - 1) as usize);

        // The frame was discarded: its buffer is back in the pool.
        for _ in 0..4 {
            drop(Frame::allocate(pool, 16).expect("pool fully available"));
        }
    }

    #[test]
    fn resolved_destination_is_sent_with_header() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let mut device = Device::new(DeviceId(1), Some(DEV_MAC), RecordingDriver::new());
        let next_hop = EthernetAddress([2, 0, 0, 0, 0, 7]);
        let mut resolver = FixedResolver(next_hop);

        let frame = outbound_frame(pool, Ipv4Address::new(10, 0, 0, 2));
        match ethernet_send(&mut device, &mut resolver, frame).expect("sent") {
            TxOutcome::Sent(len) => assert_eq!(len, ETHERNET_HEADER_LEN + 20),
            TxOutcome::Pending(_) => panic!("resolver answered"),
        }

        let sent = &device.driver().sent[0];
        let header = EthernetRepr::parse(sent).expect("header");
        assert_eq!(header.dst, next_hop);
        assert_eq!(header.src, DEV_MAC);
        assert_eq!(sent[ETHERNET_HEADER_LEN], 0x45);
    }

    #[test]
    fn missing_headroom_is_fatal_for_the_frame() {
        let pool = tinyip_util::buffer_pool!(64, 4);
        let mut device = eth_device();
        let mut resolver = FixedResolver(EthernetAddress([2, 0, 0, 0, 0, 7]));

        // No reserved headroom: the header cannot be prepended.
        let mut frame = Frame::allocate(pool, 20).expect("out of memory");
        let window = frame.window_mut();
        window[0] = 0x45;
        window[16..20].copy_from_slice(&[10, 0, 0, 2]);
        frame.mark_net(0).expect("marker");

        assert_eq!(
            ethernet_send(&mut device, &mut resolver, frame).unwrap_err(),
            Error::Malformed
        );
    }
}
