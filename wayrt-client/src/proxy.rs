//! Machinery shared by all the protocol object handles

use std::{
    os::unix::io::{OwnedFd, RawFd},
    sync::Arc,
};

use wayrt_backend::{
    client::{Backend, InvalidId, ObjectData, ObjectId},
    protocol::{fixed_to_f64, Argument, Interface, Message, INLINE_ARGS},
    smallvec::{self, SmallVec},
};

use crate::error::RequestError;

/// Arguments of an outgoing request
pub(crate) type RequestArgs = SmallVec<[Argument<ObjectId, RawFd>; INLINE_ARGS]>;

/// Trait implemented by all protocol object handles
///
/// Handles are cheap to clone: clones designate the same protocol object. Two handles
/// compare equal if they designate the same object.
pub trait Proxy: Clone + std::fmt::Debug {
    /// The interface of this object type
    fn interface() -> &'static Interface;

    /// The id of this object
    fn id(&self) -> ObjectId;

    /// The version this object was created with
    fn version(&self) -> u32;

    /// Whether the object is still alive
    ///
    /// An object is dead once it was destroyed, by a destructor request or event, or
    /// when its connection died.
    fn is_alive(&self) -> bool;
}

/// Backend-level state of a handle
#[derive(Clone)]
pub(crate) struct ProxyInner {
    pub(crate) id: ObjectId,
    pub(crate) version: u32,
    pub(crate) backend: Backend,
}

impl ProxyInner {
    pub(crate) fn new(backend: &Backend, id: ObjectId, version: u32) -> Self {
        Self { id, version, backend: backend.clone() }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.backend.info(&self.id).is_ok()
    }

    /// Send a request that does not create an object
    pub(crate) fn send(&self, opcode: u16, args: RequestArgs) -> Result<(), RequestError> {
        self.check_version(opcode)?;
        self.backend.send_request(
            Message { sender_id: self.id.clone(), opcode, args },
            None,
            None,
        )?;
        Ok(())
    }

    /// Send a request creating a new object
    ///
    /// The `new_id` placeholder must be part of `args`. The child inherits the version
    /// of this object unless `child_spec` says otherwise.
    pub(crate) fn send_constructor(
        &self,
        opcode: u16,
        args: RequestArgs,
        data: Arc<dyn ObjectData>,
        child_spec: Option<(&'static Interface, u32)>,
    ) -> Result<ProxyInner, RequestError> {
        self.check_version(opcode)?;
        let version = child_spec.map_or(self.version, |(_, version)| version);
        let id = self.backend.send_request(
            Message { sender_id: self.id.clone(), opcode, args },
            Some(data),
            child_spec,
        )?;
        if id.is_null() {
            // the connection died, the request was discarded
            return Err(InvalidId.into());
        }
        Ok(ProxyInner::new(&self.backend, id, version))
    }

    fn check_version(&self, opcode: u16) -> Result<(), RequestError> {
        let desc = &self.id.interface().requests[opcode as usize];
        if desc.since > self.version {
            return Err(RequestError::UnsupportedVersion {
                request: desc.name,
                since: desc.since,
                version: self.version,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProxyInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.id, self.version)
    }
}

/// Retrieve the data of an object if it has the expected type
pub(crate) fn object_data<D: ObjectData>(backend: &Backend, id: &ObjectId) -> Option<Arc<D>> {
    backend.get_data(id).ok()?.downcast_arc::<D>().ok()
}

/// Placeholder for the id of the object created by a request
pub(crate) fn new_id() -> Argument<ObjectId, RawFd> {
    Argument::NewId(ObjectId::null())
}

/// Object argument, `None` meaning null
pub(crate) fn object_arg<P: Proxy>(proxy: Option<&P>) -> Argument<ObjectId, RawFd> {
    Argument::Object(proxy.map_or_else(ObjectId::null, Proxy::id))
}

pub(crate) fn str_arg(value: &str) -> Result<Argument<ObjectId, RawFd>, RequestError> {
    let value = std::ffi::CString::new(value)
        .map_err(|_| RequestError::InvalidArgument("strings cannot contain NUL bytes"))?;
    Ok(Argument::Str(Some(Box::new(value))))
}

pub(crate) fn args() -> RequestArgs {
    SmallVec::new()
}

/// Sequential reader of the arguments of an event
///
/// The backend checked the arguments against the signature of the event, so a
/// mismatch here means the binding table and the handling code disagree.
pub(crate) struct EventArgs {
    args: smallvec::IntoIter<[Argument<ObjectId, OwnedFd>; INLINE_ARGS]>,
}

impl EventArgs {
    pub(crate) fn new(msg: Message<ObjectId, OwnedFd>) -> Self {
        Self { args: msg.args.into_iter() }
    }

    pub(crate) fn int(&mut self) -> i32 {
        match self.args.next() {
            Some(Argument::Int(v)) => v,
            other => mismatch(other),
        }
    }

    pub(crate) fn uint(&mut self) -> u32 {
        match self.args.next() {
            Some(Argument::Uint(v)) => v,
            other => mismatch(other),
        }
    }

    pub(crate) fn fixed(&mut self) -> f64 {
        match self.args.next() {
            Some(Argument::Fixed(v)) => fixed_to_f64(v),
            other => mismatch(other),
        }
    }

    pub(crate) fn opt_string(&mut self) -> Option<String> {
        match self.args.next() {
            Some(Argument::Str(s)) => s.map(|s| String::from_utf8_lossy(s.as_bytes()).into_owned()),
            other => mismatch(other),
        }
    }

    pub(crate) fn string(&mut self) -> String {
        self.opt_string().unwrap_or_default()
    }

    /// Object argument, the null id if the object was omitted
    pub(crate) fn object(&mut self) -> ObjectId {
        match self.args.next() {
            Some(Argument::Object(id)) | Some(Argument::NewId(id)) => id,
            other => mismatch(other),
        }
    }

    pub(crate) fn array(&mut self) -> Vec<u8> {
        match self.args.next() {
            Some(Argument::Array(a)) => *a,
            other => mismatch(other),
        }
    }

    pub(crate) fn fd(&mut self) -> OwnedFd {
        match self.args.next() {
            Some(Argument::Fd(fd)) => fd,
            other => mismatch(other),
        }
    }
}

fn mismatch(arg: Option<Argument<ObjectId, OwnedFd>>) -> ! {
    panic!("Event arguments do not match the binding table, got {arg:?}.")
}

/// Implement [`Proxy`] and the common traits for a handle type
///
/// The type must have an `inner: ProxyInner` field and a `data: Arc<$data>` field.
macro_rules! proxy_type {
    ($name:ident, $data:ty, $interface:expr) => {
        impl $crate::proxy::Proxy for $name {
            fn interface() -> &'static wayrt_backend::protocol::Interface {
                &$interface
            }

            fn id(&self) -> wayrt_backend::client::ObjectId {
                self.inner.id.clone()
            }

            fn version(&self) -> u32 {
                self.inner.version
            }

            fn is_alive(&self) -> bool {
                self.inner.is_alive()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.inner.id == other.inner.id
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.inner.id.hash(state)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.inner).finish()
            }
        }

        impl $name {
            /// Build the handle of an object from its id
            ///
            /// Returns `None` if the object is dead or not of this type.
            pub fn from_id(
                backend: &wayrt_backend::client::Backend,
                id: &wayrt_backend::client::ObjectId,
            ) -> Option<Self> {
                if !wayrt_backend::protocol::same_interface(id.interface(), &$interface) {
                    return None;
                }
                let data = $crate::proxy::object_data::<$data>(backend, id)?;
                let inner = $crate::proxy::ProxyInner::new(backend, id.clone(), data.version);
                Some(Self { inner, data })
            }

            #[allow(dead_code)]
            pub(crate) fn from_parts(
                backend: &wayrt_backend::client::Backend,
                id: wayrt_backend::client::ObjectId,
                data: std::sync::Arc<$data>,
            ) -> Self {
                let inner = $crate::proxy::ProxyInner::new(backend, id, data.version);
                Self { inner, data }
            }

            /// The connection backend of this object
            pub fn backend(&self) -> &wayrt_backend::client::Backend {
                &self.inner.backend
            }
        }
    };
}

pub(crate) use proxy_type;
