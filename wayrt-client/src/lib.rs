//! Typed client API of the wayrt Wayland runtime
//!
//! This crate wraps the protocol engine of `wayrt-backend` with one handle type per
//! core protocol interface, and models the state the compositor derives from the
//! requests of this client: double-buffered surface state, sub-surface trees, and the
//! lifecycles of clipboard and drag-and-drop sources and offers.
//!
//! ## General concepts
//!
//! A [`Connection`] is created with [`Connection::connect_to_env()`], which follows
//! `WAYLAND_SOCKET`, `WAYLAND_DISPLAY` and `XDG_RUNTIME_DIR` like libwayland does. From
//! there, [`Connection::get_registry()`] lists the globals of the server, which are bound
//! with [`Registry::bind()`] or [`Registry::bind_one()`].
//!
//! Every protocol object is represented by a handle implementing [`Proxy`]. Handles are
//! cheap to clone and compare equal when they designate the same object. Events are
//! delivered to listener traits, one per interface, whose methods all default to doing
//! nothing. Listeners run on the thread dispatching the connection, one event at a time,
//! in the order the server sent them.
//!
//! Requests the compositor would refuse with a protocol error are checked locally
//! beforehand, and refused with a [`RequestError`] without anything being sent.
//!
//! ## Synchronization
//!
//! [`Connection::sync()`] returns a [`SyncToken`] resolved once the server processed
//! every request sent before it. Waiting on it from inside a listener would block the
//! very thread that must resolve it, so it fails with [`SyncError::WouldDeadlock`]
//! instead.
//!
//! ## Logging
//!
//! Diagnostics go through the `log` crate, and `WAYLAND_DEBUG=1` traces every message
//! to stderr, see `wayrt-backend`.

#![warn(missing_docs, missing_debug_implementations)]

#[allow(unused_imports)]
use log::{debug as log_debug, error as log_error, info as log_info, warn as log_warn};

mod conn;
mod proxy;

pub mod compositor;
pub mod data_device;
pub mod display;
pub mod error;
pub mod output;
pub mod protocol;
pub mod registry;
pub mod seat;
pub mod shm;
pub mod subcompositor;
pub mod surface;

pub use conn::{resolve_socket_path, ConnectError, Connection, DEFAULT_DISPLAY};
pub use display::{Callback, CallbackListener, DisplayListener, SyncToken};
pub use error::{RequestError, SyncError};
pub use proxy::Proxy;
pub use registry::{BindError, Global, GlobalInfo, Registry, RegistryListener};

pub use compositor::{Compositor, Region};
pub use data_device::{DataDevice, DataDeviceManager, DataOffer, DataSource};
pub use output::Output;
pub use seat::{Keyboard, Pointer, Seat, Touch};
pub use shm::{Buffer, Shm, ShmPool};
pub use subcompositor::{Subcompositor, Subsurface};
pub use surface::Surface;

/// Reexport of the protocol engine
pub use wayrt_backend as backend;
