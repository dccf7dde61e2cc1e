use std::fmt;

use crate::protocol::ProtocolError;
use crate::wire::MessageParseError;

/// An error that can occur when using a Wayland connection
///
/// Every variant is fatal: once one was reported, every later operation on the
/// connection returns it again.
#[derive(Debug)]
pub enum WaylandError {
    /// The connection encountered an IO error
    Io(std::io::Error),
    /// The server reported a protocol error through `wl_display.error`
    Protocol(ProtocolError),
    /// The server sent something this client cannot make sense of
    Violation(ProtocolViolation),
    /// The connection was closed, by the peer or locally
    ConnectionClosed,
}

impl std::error::Error for WaylandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Violation(e) => Some(e),
            Self::ConnectionClosed => None,
        }
    }
}

impl fmt::Display for WaylandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Io error: {e}"),
            Self::Protocol(e) => fmt::Display::fmt(e, f),
            Self::Violation(e) => fmt::Display::fmt(e, f),
            Self::ConnectionClosed => f.write_str("The Wayland connection is closed"),
        }
    }
}

impl Clone for WaylandError {
    fn clone(&self) -> Self {
        match self {
            Self::Protocol(e) => Self::Protocol(e.clone()),
            Self::Violation(e) => Self::Violation(e.clone()),
            Self::ConnectionClosed => Self::ConnectionClosed,
            Self::Io(e) => {
                if let Some(code) = e.raw_os_error() {
                    Self::Io(std::io::Error::from_raw_os_error(code))
                } else {
                    Self::Io(std::io::Error::new(e.kind(), e.to_string()))
                }
            }
        }
    }
}

impl From<ProtocolError> for WaylandError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<ProtocolViolation> for WaylandError {
    fn from(err: ProtocolViolation) -> Self {
        Self::Violation(err)
    }
}

impl From<std::io::Error> for WaylandError {
    fn from(err: std::io::Error) -> Self {
        if err.raw_os_error() == Some(rustix::io::Errno::PIPE.raw_os_error()) {
            Self::ConnectionClosed
        } else {
            Self::Io(err)
        }
    }
}

/// What was wrong with a message received from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The frame could not be decoded
    MalformedFrame(MessageParseError),
    /// The opcode does not exist for the interface of the target object
    UnknownOpcode,
    /// An object argument refers to an object this client does not know
    UnknownObject(u32),
    /// An object argument refers to an object of the wrong interface
    WrongInterface(u32),
    /// The server tried to create an object at an invalid id
    InvalidNewId(u32),
}

/// A message from the server broke the protocol
///
/// The stream can no longer be trusted after this, so the connection is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolViolation {
    /// The kind of violation
    pub kind: ViolationKind,
    /// Id of the object the message was sent to
    pub object_id: u32,
    /// Opcode of the message
    pub opcode: u16,
}

impl std::error::Error for ProtocolViolation {}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Protocol violation in event {}.{}: ", self.object_id, self.opcode)?;
        match self.kind {
            ViolationKind::MalformedFrame(e) => write!(f, "malformed frame ({e})"),
            ViolationKind::UnknownOpcode => f.write_str("unknown opcode"),
            ViolationKind::UnknownObject(id) => write!(f, "unknown object {id}"),
            ViolationKind::WrongInterface(id) => write!(f, "object {id} has the wrong interface"),
            ViolationKind::InvalidNewId(id) => write!(f, "invalid new object id {id}"),
        }
    }
}

/// An error generated when trying to act on an invalid `ObjectId`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidId;

impl std::error::Error for InvalidId {}

impl fmt::Display for InvalidId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid ObjectId")
    }
}
