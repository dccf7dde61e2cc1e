//! Messages, arguments and the binding tables describing them
//!
//! The backend does not know any interface by itself: every object is associated to a
//! static [`Interface`] table giving, for each request and event opcode, the
//! [`MessageDesc`] used to encode or decode it.

use std::{ffi::CString, fmt, os::unix::io::AsRawFd};

use smallvec::SmallVec;

/// Whether a string or object argument may be null
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllowNull {
    /// The argument is nullable
    Yes,
    /// A null value is a protocol error
    No,
}

/// Type of an argument slot in a message signature
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArgumentType {
    /// `int`, a signed 32-bit word
    Int,
    /// `uint`, an unsigned 32-bit word
    Uint,
    /// `fixed`, a 24.8 signed fixed-point number
    Fixed,
    /// `string`, NUL-terminated and padded on the wire
    Str(AllowNull),
    /// `object`, the id of an existing object
    Object(AllowNull),
    /// `new_id`, the id of the object the message creates
    NewId,
    /// `array`, a length-prefixed byte blob
    Array,
    /// `fd`, transferred out of band
    Fd,
}

/// Value of an argument
///
/// `Id` is how objects are referred to (raw protocol ids on the wire, `ObjectId`s in the
/// client API) and `Fd` how file descriptors are held.
#[derive(Debug, Clone)]
#[allow(clippy::box_collection)]
pub enum Argument<Id, Fd> {
    /// `int`
    Int(i32),
    /// `uint`
    Uint(u32),
    /// `fixed`, as its raw wire value, see [`fixed_to_f64`]
    Fixed(i32),
    /// `string`, `None` being the null string
    Str(Option<Box<CString>>),
    /// `object`, the null id meaning no object
    Object(Id),
    /// `new_id`
    NewId(Id),
    /// `array`
    Array(Box<Vec<u8>>),
    /// `fd`
    Fd(Fd),
}

impl<Id, Fd> Argument<Id, Fd> {
    /// Whether this value can fill a slot of the given type
    ///
    /// Nullability is not checked here, it is a property of the value the wire
    /// codec enforces.
    pub fn fits(&self, typ: ArgumentType) -> bool {
        matches!(
            (self, typ),
            (Self::Int(_), ArgumentType::Int)
                | (Self::Uint(_), ArgumentType::Uint)
                | (Self::Fixed(_), ArgumentType::Fixed)
                | (Self::Str(_), ArgumentType::Str(_))
                | (Self::Object(_), ArgumentType::Object(_))
                | (Self::NewId(_), ArgumentType::NewId)
                | (Self::Array(_), ArgumentType::Array)
                | (Self::Fd(_), ArgumentType::Fd)
        )
    }

    fn with_fd<T>(self, convert: &mut impl FnMut(Fd) -> T) -> Argument<Id, T> {
        match self {
            Self::Fd(fd) => Argument::Fd(convert(fd)),
            Self::Int(v) => Argument::Int(v),
            Self::Uint(v) => Argument::Uint(v),
            Self::Fixed(v) => Argument::Fixed(v),
            Self::Str(v) => Argument::Str(v),
            Self::Object(v) => Argument::Object(v),
            Self::NewId(v) => Argument::NewId(v),
            Self::Array(v) => Argument::Array(v),
        }
    }
}

// fds compare by number, which is what the codec tests need
impl<Id: PartialEq, Fd: AsRawFd> PartialEq for Argument<Id, Fd> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Fd(a), Self::Fd(b)) => a.as_raw_fd() == b.as_raw_fd(),
            (Self::Int(a), Self::Int(b)) | (Self::Fixed(a), Self::Fixed(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) | (Self::NewId(a), Self::NewId(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl<Id: Eq, Fd: AsRawFd> Eq for Argument<Id, Fd> {}

impl<Id: fmt::Display, Fd: AsRawFd> fmt::Display for Argument<Id, Fd> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Uint(value) => write!(f, "{value}"),
            Self::Fixed(value) => write!(f, "{:.4}", fixed_to_f64(*value)),
            Self::Str(Some(value)) => write!(f, "{value:?}"),
            Self::Str(None) => f.write_str("nil"),
            Self::Object(value) => write!(f, "{value}"),
            Self::NewId(value) => write!(f, "new id {value}"),
            Self::Array(value) => write!(f, "array[{}]", value.len()),
            Self::Fd(value) => write!(f, "fd {}", value.as_raw_fd()),
        }
    }
}

/// Convert a 24.8 fixed-point wire value into a float
#[inline]
pub fn fixed_to_f64(value: i32) -> f64 {
    value as f64 / 256.0
}

/// Convert a float into its 24.8 fixed-point wire value, rounding to the nearest 1/256
#[inline]
pub fn fixed_from_f64(value: f64) -> i32 {
    (value * 256.0).round() as i32
}

/// Binding table of an interface
///
/// Requests and events are indexed by their opcode.
pub struct Interface {
    /// Protocol name, like `wl_surface`
    pub name: &'static str,
    /// Highest version these tables describe
    pub version: u32,
    /// Requests, sent by the client
    pub requests: &'static [MessageDesc],
    /// Events, sent by the server
    pub events: &'static [MessageDesc],
}

// tables reference each other, only the name is printed
impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Binding table entry of one request or event
#[derive(Copy, Clone, Debug)]
pub struct MessageDesc {
    /// Protocol name of the message
    pub name: &'static str,
    /// Argument types, in wire order
    pub signature: &'static [ArgumentType],
    /// Interface version that introduced the message
    pub since: u32,
    /// The sender is destroyed by this message
    pub is_destructor: bool,
    /// Interface of the object created by the `new_id` argument
    ///
    /// `None` for messages without a `new_id`, and for `wl_registry.bind` whose
    /// interface is chosen at runtime.
    pub child_interface: Option<&'static Interface>,
    /// Expected interface of each `object` argument, in order
    ///
    /// Empty when the object arguments are not typed.
    pub arg_interfaces: &'static [&'static Interface],
}

impl MessageDesc {
    /// Whether `args` has the shape of this message's signature
    pub fn accepts<Id, Fd>(&self, args: &[Argument<Id, Fd>]) -> bool {
        self.signature.len() == args.len()
            && self.signature.iter().zip(args).all(|(&typ, arg)| arg.fits(typ))
    }
}

/// Interface of objects whose interface is unknown, and of the null object
pub static ANONYMOUS_INTERFACE: Interface =
    Interface { name: "<anonymous>", version: 0, requests: &[], events: &[] };

/// Protocol id, interface and version of a live object
#[derive(Copy, Clone, Debug)]
pub struct ObjectInfo {
    /// Protocol id
    pub id: u32,
    /// Interface
    pub interface: &'static Interface,
    /// Version the object was created with
    pub version: u32,
}

/// An error the server reported through `wl_display.error`
///
/// The server closes the connection right after sending it.
#[derive(Clone, Debug)]
pub struct ProtocolError {
    /// Error code, from the error enum of `object_interface`
    pub code: u32,
    /// Protocol id of the object the error is about
    pub object_id: u32,
    /// Interface of that object, `<anonymous>` if the client does not know it
    pub object_interface: String,
    /// Human readable description sent by the server
    pub message: String,
}

impl std::error::Error for ProtocolError {}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Protocol error {} on object {}@{}: {}",
            self.code, self.object_interface, self.object_id, self.message
        )
    }
}

/// Number of arguments a [`Message`] stores without allocating
pub const INLINE_ARGS: usize = 4;

/// A request or an event
#[derive(Clone, Debug)]
pub struct Message<Id, Fd> {
    /// Object sending a request, or receiving an event
    pub sender_id: Id,
    /// Index of the message in the interface tables
    pub opcode: u16,
    /// Arguments, in signature order
    pub args: SmallVec<[Argument<Id, Fd>; INLINE_ARGS]>,
}

impl<Id, Fd> Message<Id, Fd> {
    /// Change how the file descriptors of this message are held
    pub fn map_fd<T>(self, mut convert: impl FnMut(Fd) -> T) -> Message<Id, T> {
        Message {
            sender_id: self.sender_id,
            opcode: self.opcode,
            args: self.args.into_iter().map(|arg| arg.with_fd(&mut convert)).collect(),
        }
    }
}

impl<Id: PartialEq, Fd: AsRawFd> PartialEq for Message<Id, Fd> {
    fn eq(&self, other: &Self) -> bool {
        (&self.sender_id, self.opcode) == (&other.sender_id, other.opcode) && self.args == other.args
    }
}

impl<Id: Eq, Fd: AsRawFd> Eq for Message<Id, Fd> {}

/// Whether two tables describe the same interface
///
/// Tables are compared by name, so that copies of a table compiled in different
/// crates match.
#[inline]
pub fn same_interface(a: &'static Interface, b: &'static Interface) -> bool {
    std::ptr::eq(a, b) || a.name == b.name
}

// an anonymous `a` matches any interface
#[inline]
pub(crate) fn same_interface_or_anonymous(a: &'static Interface, b: &'static Interface) -> bool {
    same_interface(a, b) || same_interface(a, &ANONYMOUS_INTERFACE)
}

/// A value of a protocol enum
///
/// Servers may send values this side does not know yet, they are kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WEnum<T> {
    /// A known value
    Value(T),
    /// A raw value outside of the known ones
    Unknown(u32),
}

impl<T> WEnum<T> {
    /// The known value, if any
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unknown(_) => None,
        }
    }
}

impl<T: TryFrom<u32>> From<u32> for WEnum<T> {
    fn from(raw: u32) -> Self {
        T::try_from(raw).map_or(Self::Unknown(raw), Self::Value)
    }
}

impl<T: Into<u32>> From<WEnum<T>> for u32 {
    fn from(value: WEnum<T>) -> u32 {
        match value {
            WEnum::Value(v) => v.into(),
            WEnum::Unknown(raw) => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::io::RawFd;

    use super::*;

    #[test]
    fn fixed_conversions() {
        assert_eq!(fixed_from_f64(1.0), 256);
        assert_eq!(fixed_from_f64(-2.5), -640);
        assert_eq!(fixed_to_f64(-89), -89.0 / 256.0);
        assert_eq!(fixed_to_f64(fixed_from_f64(12.25)), 12.25);
    }

    #[test]
    fn signature_check() {
        let desc = MessageDesc {
            name: "ping",
            signature: &[ArgumentType::Uint, ArgumentType::Str(AllowNull::No)],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[],
        };
        let args: [Argument<u32, RawFd>; 2] = [Argument::Uint(3), Argument::Str(None)];
        assert!(desc.accepts(&args));
        assert!(!desc.accepts(&args[..1]));
        let swapped: [Argument<u32, RawFd>; 2] = [Argument::Int(3), Argument::Str(None)];
        assert!(!desc.accepts(&swapped));
    }

    #[test]
    fn unknown_enum_values_are_kept() {
        #[derive(Debug, PartialEq)]
        struct Even(u32);
        impl TryFrom<u32> for Even {
            type Error = ();
            fn try_from(v: u32) -> Result<Self, ()> {
                if v % 2 == 0 {
                    Ok(Even(v))
                } else {
                    Err(())
                }
            }
        }
        assert_eq!(WEnum::<Even>::from(4).value(), Some(Even(4)));
        assert_eq!(WEnum::<Even>::from(3), WEnum::Unknown(3));
    }
}
