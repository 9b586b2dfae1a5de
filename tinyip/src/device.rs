//! Network devices and the driver capability contract.

use crate::error::Result;
use crate::ethernet::EthernetAddress;
use crate::queue::Queue;

/// Identifies a device within one stack instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u16);

/// The send capability a concrete driver supplies.
///
/// `send` hands the driver one ready-to-transmit buffer and reports the
/// number of bytes accepted. It must not block.
pub trait DeviceDriver {
    fn send(&mut self, buffer: &[u8]) -> Result<usize>;
}

/// A network device: identity, optional link-layer capability and the two
/// per-device queues the driver and the scheduler operate on.
///
/// A device with a link-layer address takes part in Ethernet dispatch; a
/// device without one is a raw network-layer device whose frames bypass the
/// datalink stage entirely.
pub struct Device<D: DeviceDriver> {
    id: DeviceId,
    link: Option<EthernetAddress>,
    pub q_in: Queue,
    pub q_out: Queue,
    driver: D,
}

impl<D: DeviceDriver> Device<D> {
    pub fn new(id: DeviceId, link: Option<EthernetAddress>, driver: D) -> Self {
        Self {
            id,
            link,
            q_in: Queue::new(),
            q_out: Queue::new(),
            driver,
        }
    }

    pub const fn id(&self) -> DeviceId {
        self.id
    }

    /// The device's own link-layer address, if it has link-layer capability.
    pub const fn link_addr(&self) -> Option<EthernetAddress> {
        self.link
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Combined depth of both queues, the scheduler's idle check.
    pub fn pending(&self) -> usize {
        self.q_in.len() + self.q_out.len()
    }
}
