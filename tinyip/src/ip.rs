//! The minimal slice of network-layer knowledge dispatch needs.
//!
//! The core never validates IP headers. It only reads the version nibble for
//! routing and the IPv4 source/destination fields for the socket matching
//! rules; everything else is the business of the protocol implementations
//! behind [`crate::protocol::ProtocolHandler`].

use crate::error::{Error, Result};
use crate::frame::Frame;

/// An IPv4 address in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    /// The wildcard ("any") address.
    pub const ANY: Self = Self([0, 0, 0, 0]);

    /// The limited broadcast address.
    pub const BROADCAST: Self = Self([0xff, 0xff, 0xff, 0xff]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Class D, 224.0.0.0/4.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0xf0 == 0xe0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_broadcast() && !self.is_multicast()
    }
}

/// The network-layer version tag embedded in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Classifies a frame by the version nibble at its network marker. `None`
/// when the marker is missing, out of window or the nibble is unknown.
pub fn version(frame: &Frame) -> Option<IpVersion> {
    let net = frame.net_bytes().ok()?;
    match net.first()? >> 4 {
        4 => Some(IpVersion::V4),
        6 => Some(IpVersion::V6),
        _ => None,
    }
}

// IPv4 header field offsets relative to the network marker.
const IPV4_SRC_OFFSET: usize = 12;
const IPV4_DST_OFFSET: usize = 16;

/// Reads the IPv4 source address of the frame.
pub fn source(frame: &Frame) -> Result<Ipv4Address> {
    ipv4_field(frame, IPV4_SRC_OFFSET)
}

/// Reads the IPv4 destination address of the frame.
pub fn destination(frame: &Frame) -> Result<Ipv4Address> {
    ipv4_field(frame, IPV4_DST_OFFSET)
}

fn ipv4_field(frame: &Frame, offset: usize) -> Result<Ipv4Address> {
    let net = frame.net_bytes()?;
    let bytes = net.get(offset..offset + 4).ok_or(Error::Malformed)?;
    let mut addr = [0; 4];
    addr.copy_from_slice(bytes);
    Ok(Ipv4Address(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_classes() {
        assert!(Ipv4Address::ANY.is_any());
        assert!(Ipv4Address::BROADCAST.is_broadcast());
        assert!(!Ipv4Address::BROADCAST.is_unicast());

        let mcast = Ipv4Address::new(224, 0, 0, 1);
        assert!(mcast.is_multicast());
        assert!(!mcast.is_broadcast());

        let unicast = Ipv4Address::new(10, 0, 0, 7);
        assert!(unicast.is_unicast());
        assert!(!unicast.is_multicast());
    }

    #[test]
    fn version_nibble() {
        let pool = tinyip_util::buffer_pool!(64, 2);
        let mut frame = Frame::allocate(pool, 20).expect("out of memory");
        frame.window_mut()[0] = 0x45;
        assert_eq!(version(&frame), None); // no network marker yet
        frame.mark_net(0).expect("marker");
        assert_eq!(version(&frame), Some(IpVersion::V4));

        let mut frame = Frame::allocate(pool, 20).expect("out of memory");
        frame.window_mut()[0] = 0x60;
        frame.mark_net(0).expect("marker");
        assert_eq!(version(&frame), Some(IpVersion::V6));
    }

    #[test]
    fn ipv4_addresses_from_header() {
        let pool = tinyip_util::buffer_pool!(64, 2);
        let mut frame = Frame::allocate(pool, 20).expect("out of memory");
        let window = frame.window_mut();
        window[0] = 0x45;
        window[IPV4_SRC_OFFSET..IPV4_SRC_OFFSET + 4].copy_from_slice(&[10, 0, 0, 1]);
        window[IPV4_DST_OFFSET..IPV4_DST_OFFSET + 4].copy_from_slice(&[10, 0, 0, 2]);
        frame.mark_net(0).expect("marker");

        assert_eq!(source(&frame), Ok(Ipv4Address::new(10, 0, 0, 1)));
        assert_eq!(destination(&frame), Ok(Ipv4Address::new(10, 0, 0, 2)));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let pool = tinyip_util::buffer_pool!(64, 2);
        let mut frame = Frame::allocate(pool, 8).expect("out of memory");
        frame.window_mut()[0] = 0x45;
        frame.mark_net(0).expect("marker");
        assert_eq!(destination(&frame), Err(Error::Malformed));
    }
}
