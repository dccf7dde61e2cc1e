//! Protocol engine for Wayland clients
//!
//! This crate provides the low-level machinery a Wayland client is built upon:
//!
//! - the [`wire`] codec turning messages into frames and back,
//! - the [`socket`] transport, moving frames and file descriptors over a unix stream,
//! - the [`map`] of live protocol objects,
//! - and the [`client`] backend tying them together: it allocates ids, serializes
//!   requests and dispatches events to the [`ObjectData`][client::ObjectData] of
//!   their target object.
//!
//! It is protocol-agnostic: every message is described by an
//! [`Interface`][protocol::Interface] table, and arguments are carried as dynamically
//! typed [`Argument`][protocol::Argument]s. Typed wrappers live in the `wayrt-client` crate.
//!
//! ## Logging
//!
//! Runtime diagnostics (protocol errors, dropped events) go through the `log` crate.
//! Setting `WAYLAND_DEBUG=1` (or `WAYLAND_DEBUG=client`) additionally traces every
//! message sent and received to stderr, in the same format as libwayland.

#![warn(missing_docs, missing_debug_implementations)]

/// Reexport of the `smallvec` crate, which is part of `wayrt-backend`'s public API.
pub extern crate smallvec;

/// Helper macro for quickly making a [`Message`][crate::protocol::Message]
#[macro_export]
macro_rules! message {
    ($sender_id: expr, $opcode: expr, [$($args: expr),* $(,)?] $(,)?) => {
        $crate::protocol::Message {
            sender_id: $sender_id,
            opcode: $opcode,
            args: $crate::smallvec::smallvec![$($args),*],
        }
    }
}

#[allow(unused_imports)]
use log::{debug as log_debug, error as log_error, info as log_info, warn as log_warn};

pub mod client;
pub mod map;
pub mod protocol;
pub mod socket;
pub mod wire;

mod core_interfaces;
mod debug;
mod types;

pub use core_interfaces::*;

#[cfg(test)]
mod test;
