//! The cooperative scheduler and the device-facing stack entry points.
//!
//! An external driver calls [`stack_recv`] whenever a device has received
//! bytes, and invokes [`dev_loop`] / [`proto_loop`] periodically ("tick")
//! with a work budget. One budget unit corresponds to one frame taken off a
//! queue; the loops alternate between the output and input direction so both
//! get service within the same tick. No call here ever blocks.

use tinyip_util::allocator::BufferPool;
use tinyip_util::debug;

use crate::device::{Device, DeviceDriver};
use crate::error::{Error, Result};
use crate::ethernet::{ethernet_receive, ethernet_send, AddressResolver, TxOutcome};
use crate::frame::Frame;
use crate::protocol::{Protocol, ProtocolHandler, ProtocolRegistry};

/// Non-blocking ingestion of received bytes, called by device drivers.
///
/// Allocates a frame, copies the bytes, tags the receiving device and
/// enqueues the frame on the device input queue. All further processing
/// happens later, inside [`dev_loop`]. Reports the new input queue depth.
pub fn stack_recv<D: DeviceDriver>(
    device: &mut Device<D>,
    pool: BufferPool,
    bytes: &[u8],
) -> Result<usize> {
    if bytes.is_empty() {
        return Err(Error::Malformed);
    }
    let mut frame = Frame::allocate(pool, bytes.len())?;
    frame.window_mut().copy_from_slice(bytes);
    frame.set_dev(device.id());
    match device.q_in.enqueue(frame) {
        Ok(depth) => Ok(depth),
        Err(frame) => {
            debug!("device input queue full, dropping received frame");
            drop(frame);
            Err(Error::QueueFull)
        }
    }
}

/// Hands an outbound frame to a device for transmission on a later tick.
/// Reports the new output queue depth.
pub fn sendto_dev<D: DeviceDriver>(device: &mut Device<D>, mut frame: Frame) -> Result<usize> {
    frame.set_dev(device.id());
    match device.q_out.enqueue(frame) {
        Ok(depth) => Ok(depth),
        Err(frame) => {
            debug!("device output queue full, dropping outbound frame");
            drop(frame);
            Err(Error::QueueFull)
        }
    }
}

/// Drains one device's queues under a work budget and returns the unspent
/// remainder.
///
/// Output direction: link-capable devices go through the Ethernet send
/// contract; a [`TxOutcome::Pending`] frame is re-enqueued for a later tick
/// instead of being dropped, so resolution retries happen across
/// invocations. Raw devices submit the window straight to their driver.
///
/// Input direction: link-capable devices go through Ethernet receive; raw
/// devices mark the network header at the window start and hand the frame to
/// the router.
///
/// Per-frame failures never abort the loop; the frame in question has been
/// discarded and accounting continues. Termination is guaranteed because
/// every successfully dequeued frame costs one budget unit.
pub fn dev_loop<D, V4, V6>(
    device: &mut Device<D>,
    registry: &mut ProtocolRegistry<V4, V6>,
    resolver: &mut impl AddressResolver,
    budget: usize,
) -> usize
where
    D: DeviceDriver,
    V4: ProtocolHandler,
    V6: ProtocolHandler,
{
    let mut budget = budget;
    while budget > 0 {
        if device.pending() == 0 {
            break;
        }

        // Output direction.
        if let Some(frame) = device.q_out.dequeue() {
            budget -= 1;
            if device.link_addr().is_some() {
                match ethernet_send(device, resolver, frame) {
                    Ok(TxOutcome::Pending(frame)) => {
                        // Addressing still in progress; retry later.
                        if let Err(frame) = device.q_out.enqueue(frame) {
                            debug!("output queue full, dropping pending frame");
                            drop(frame);
                        }
                    }
                    Ok(TxOutcome::Sent(_)) => {}
                    Err(_) => {}
                }
            } else {
                let _ = device.driver_mut().send(frame.window());
                drop(frame);
            }
        }
        if budget == 0 {
            break;
        }

        // Input direction.
        if let Some(mut frame) = device.q_in.dequeue() {
            budget -= 1;
            if device.link_addr().is_some() {
                let _ = ethernet_receive(device, registry, resolver, frame);
            } else {
                let start = frame.start();
                match frame.mark_net(start) {
                    Ok(()) => {
                        let _ = registry.network_receive(frame);
                    }
                    Err(_) => drop(frame),
                }
            }
        }
    }
    budget
}

/// Drains one protocol's queues under a work budget and returns the unspent
/// remainder. The symmetric counterpart of [`dev_loop`], with the protocol's
/// own `process_out` / `process_in` hooks doing the per-frame work.
pub fn proto_loop<H: ProtocolHandler>(protocol: &mut Protocol<H>, budget: usize) -> usize {
    let mut budget = budget;
    while budget > 0 {
        if protocol.pending() == 0 {
            break;
        }

        if let Some(frame) = protocol.q_out.dequeue() {
            budget -= 1;
            let _ = protocol.handler_mut().process_out(frame);
        }
        if budget == 0 {
            break;
        }

        if let Some(frame) = protocol.q_in.dequeue() {
            budget -= 1;
            let _ = protocol.handler_mut().process_in(frame);
        }
    }
    budget
}
