//! `WAYLAND_DEBUG` tracing
//!
//! When the variable is `1` or `client`, every request sent and every event read is
//! printed to stderr, one line each, in the layout libwayland uses:
//!
//! ```text
//! [1234567.890] -> wl_surface@7.attach(wl_buffer@9, 0, 0)
//! [1234567.912] <- wl_callback@12.done(4711)
//! ```

use std::{
    fmt,
    os::unix::io::AsRawFd,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::protocol::Argument;

/// Whether `WAYLAND_DEBUG` asks for client-side tracing
pub fn enabled_by_env() -> bool {
    std::env::var_os("WAYLAND_DEBUG").map_or(false, |value| value == "1" || value == "client")
}

/// Which way a traced message went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A request written to the server
    Sent,
    /// An event read from the server
    Received,
}

/// Print one message to stderr
///
/// `discarded` marks messages that were not delivered: requests on dead objects, or
/// events for objects the client already destroyed.
pub fn trace<Id: fmt::Display, Fd: AsRawFd>(
    direction: Direction,
    interface: &str,
    id: u32,
    name: &str,
    args: &[Argument<Id, Fd>],
    discarded: bool,
) {
    let arrow = match direction {
        Direction::Sent => "->",
        Direction::Received => "<-",
    };
    let discarded = if discarded { "[discarded] " } else { "" };
    eprintln!("{} {discarded}{arrow} {interface}@{id}.{name}({})", Timestamp, ArgList(args));
}

/// Arguments of a message, comma-separated
pub(crate) struct ArgList<'a, T>(pub &'a [T]);

impl<T: fmt::Display> fmt::Display for ArgList<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        Ok(())
    }
}

// wall clock milliseconds, wrapped to 32 bits of microseconds like libwayland
struct Timestamp;

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_micros() as u32);
        write!(f, "[{:7}.{:03}]", micros / 1000, micros % 1000)
    }
}
