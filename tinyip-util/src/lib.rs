//! Generic utilities the tinyip crates depend upon but that are not tied to
//! any particular network protocol.
//!
//! Keeping these concerns in a separate crate keeps the dispatch core itself
//! free of allocator and logger plumbing.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod allocator;
pub mod tokens;

pub mod log;

#[cfg(any(feature = "defmt", feature = "log"))]
pub use log::*;
