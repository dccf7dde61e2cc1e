//! The registry and the binding of globals

use std::{
    ops::RangeInclusive,
    os::unix::io::OwnedFd,
    sync::{Arc, Mutex},
};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Interface, Message},
    smallvec::smallvec,
    WL_REGISTRY_INTERFACE,
};

use crate::{
    error::RequestError,
    proxy::{new_id, proxy_type, str_arg, EventArgs, Proxy, ProxyInner},
};

/// Description of a global advertised by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    /// Name of the global, used to bind it
    pub name: u32,
    /// Interface of the global
    pub interface: String,
    /// Highest version the server supports
    pub version: u32,
}

/// Listener for the events of a [`Registry`]
///
/// The registry keeps its own list of globals, available through
/// [`Registry::globals()`]; it is updated before the listener is called.
pub trait RegistryListener: Send + Sync {
    /// A new global was advertised
    fn global(&self, registry: &Registry, name: u32, interface: &str, version: u32) {
        let _ = (registry, name, interface, version);
    }

    /// A global was removed
    fn global_remove(&self, registry: &Registry, name: u32) {
        let _ = (registry, name);
    }
}

impl RegistryListener for () {}

pub(crate) struct RegistryData {
    pub(crate) version: u32,
    globals: Mutex<Vec<GlobalInfo>>,
    listener: Box<dyn RegistryListener>,
}

impl RegistryData {
    pub(crate) fn new(listener: impl RegistryListener + 'static) -> Arc<Self> {
        Arc::new(Self { version: 1, globals: Mutex::new(Vec::new()), listener: Box::new(listener) })
    }
}

impl ObjectData for RegistryData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let registry = Registry::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        match opcode {
            0 => {
                let name = args.uint();
                let interface = args.string();
                let version = args.uint();
                {
                    let mut globals = self.globals.lock().unwrap();
                    globals.retain(|g| g.name != name);
                    globals.push(GlobalInfo { name, interface: interface.clone(), version });
                }
                self.listener.global(&registry, name, &interface, version);
            }
            1 => {
                let name = args.uint();
                let removed = {
                    let mut globals = self.globals.lock().unwrap();
                    let before = globals.len();
                    globals.retain(|g| g.name != name);
                    before != globals.len()
                };
                if !removed {
                    crate::log_warn!("Server removed unknown global {name}.");
                }
                self.listener.global_remove(&registry, name);
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_registry`, created by [`Connection::get_registry()`](crate::Connection::get_registry)
#[derive(Clone)]
pub struct Registry {
    inner: ProxyInner,
    data: Arc<RegistryData>,
}

proxy_type!(Registry, RegistryData, WL_REGISTRY_INTERFACE);

/// Trait of the objects that are bound from the registry
pub trait Global: Proxy + Sized {
    /// Listener for the events of this global
    type Listener;

    #[doc(hidden)]
    fn bind_with(
        registry: &Registry,
        name: u32,
        version: u32,
        listener: Self::Listener,
    ) -> Result<Self, RequestError>;
}

/// An error that occurred trying to bind a global
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// The requested version is not supported, by this crate or by the server
    #[error("the requested version {requested} of {interface} is not supported (max {max})")]
    UnsupportedVersion {
        /// The interface name
        interface: &'static str,
        /// The version that was requested
        requested: u32,
        /// The highest usable version
        max: u32,
    },

    /// The requested global was not advertised by the server
    #[error("the requested global was not found in the registry")]
    NotPresent,

    /// The bind request could not be sent
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl Registry {
    pub(crate) fn from_inner(inner: ProxyInner, data: Arc<RegistryData>) -> Self {
        Self { inner, data }
    }

    /// The globals currently advertised by the server
    pub fn globals(&self) -> Vec<GlobalInfo> {
        self.data.globals.lock().unwrap().clone()
    }

    /// Bind the global with the given name
    ///
    /// The version must be at least 1 and at most the version supported by this crate.
    /// If the global is known to the registry, it must also not exceed the version
    /// advertised by the server.
    pub fn bind<G: Global>(
        &self,
        name: u32,
        version: u32,
        listener: G::Listener,
    ) -> Result<G, BindError> {
        let interface = G::interface();
        let advertised = self
            .data
            .globals
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.version);
        let max = advertised.map_or(interface.version, |v| v.min(interface.version));
        if version == 0 || version > max {
            return Err(BindError::UnsupportedVersion {
                interface: interface.name,
                requested: version,
                max,
            });
        }
        Ok(G::bind_with(self, name, version, listener)?)
    }

    /// Bind the first global of the given interface
    ///
    /// The highest version both in `version` and advertised by the server is used.
    pub fn bind_one<G: Global>(
        &self,
        version: RangeInclusive<u32>,
        listener: G::Listener,
    ) -> Result<G, BindError> {
        let interface = G::interface();
        assert!(
            *version.end() <= interface.version,
            "Requested version of {} is higher than the supported one ({} > {}).",
            interface.name,
            version.end(),
            interface.version
        );
        let global = self
            .globals()
            .into_iter()
            .find(|g| g.interface == interface.name)
            .ok_or(BindError::NotPresent)?;
        if global.version < *version.start() {
            return Err(BindError::UnsupportedVersion {
                interface: interface.name,
                requested: *version.start(),
                max: global.version,
            });
        }
        let version = global.version.min(*version.end());
        Ok(G::bind_with(self, global.name, version, listener)?)
    }

    /// Send the bind request for a global
    pub(crate) fn send_bind(
        &self,
        name: u32,
        interface: &'static Interface,
        version: u32,
        data: Arc<dyn ObjectData>,
    ) -> Result<ProxyInner, RequestError> {
        self.inner.send_constructor(
            0,
            smallvec![
                wayrt_backend::protocol::Argument::Uint(name),
                str_arg(interface.name)?,
                wayrt_backend::protocol::Argument::Uint(version),
                new_id(),
            ],
            data,
            Some((interface, version)),
        )
    }
}

/// Implement [`Global`] for a handle whose data is built from its listener
///
/// `$make` turns `(version, listener)` into the object data.
macro_rules! global_type {
    ($name:ident, $listener:ty, $make:expr) => {
        impl $crate::registry::Global for $name {
            type Listener = $listener;

            fn bind_with(
                registry: &$crate::registry::Registry,
                name: u32,
                version: u32,
                listener: Self::Listener,
            ) -> Result<Self, $crate::error::RequestError> {
                let data = ($make)(version, listener);
                let inner = registry.send_bind(
                    name,
                    <Self as $crate::proxy::Proxy>::interface(),
                    version,
                    data.clone(),
                )?;
                Ok(Self { inner, data })
            }
        }
    };
}

pub(crate) use global_type;
