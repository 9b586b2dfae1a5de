//! The packet-dispatch core of an embedded TCP/IP network stack.
//!
//! This crate moves packet frames through the layered processing stages of
//! the stack (device, datalink, network, transport, socket) using bounded,
//! cooperatively scheduled work loops and per-stage queues. Protocol logic
//! proper (stream reassembly, header validation, the ARP cache, device
//! drivers) lives behind the capability traits in the respective modules.
//!
//! Execution is strictly single-threaded: an external driver invokes the
//! scheduler loops periodically, device ingestion is the only asynchronous
//! entry point and never blocks. Frames draw their storage from a fixed
//! buffer pool and are owned by exactly one queue or processing routine at
//! any time.

#![no_std]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

pub mod device;
pub mod error;
pub mod ethernet;
pub mod frame;
pub mod ip;
pub mod protocol;
pub mod queue;
pub mod socket;
pub mod stack;

pub use error::{Error, Result};
