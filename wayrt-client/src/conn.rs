use std::{
    env,
    ffi::OsStr,
    io::{self, ErrorKind},
    os::unix::io::{AsFd, BorrowedFd, FromRawFd, OwnedFd},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
};

use wayrt_backend::{
    client::{Backend, ObjectId, WaylandError},
    message,
    protocol::{Argument, ProtocolError},
    WL_CALLBACK_INTERFACE, WL_DISPLAY_GET_REGISTRY, WL_DISPLAY_SYNC, WL_REGISTRY_INTERFACE,
};

use crate::{
    display::{DisplayData, DisplayListener, SyncData, SyncToken},
    error::{RequestError, SyncError},
    proxy::ProxyInner,
    registry::{Registry, RegistryData, RegistryListener},
};

/// Name of the socket used when `WAYLAND_DISPLAY` is not set
pub const DEFAULT_DISPLAY: &str = "wayland-0";

/// The Wayland connection
///
/// This is the main type representing your connection to the Wayland server. It is
/// cheap to clone, all clones share the same connection, which is shut down once the
/// last of them is dropped. Protocol objects do not keep the connection open: after
/// that their requests are silently discarded.
///
/// It can be created through the [`connect_to_env()`][Self::connect_to_env()] method to
/// follow the configuration from the environment (which is what you'll do most of the
/// time), or using the [`from_socket()`][Self::from_socket()] method if you retrieved
/// your connected Wayland socket through other means.
///
/// Events are dispatched either by calling one of the dispatching methods, or by a
/// thread started by [`spawn_dispatcher()`][Self::spawn_dispatcher()]. In both cases
/// listeners run on the dispatching thread, one event at a time, in arrival order.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    backend: Backend,
    display: Arc<DisplayData>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.backend.shutdown();
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.backend == other.inner.backend
    }
}

impl Eq for Connection {}

impl Connection {
    /// Try to connect to the Wayland server following the environment
    ///
    /// If `WAYLAND_SOCKET` is set it is used as an already connected file descriptor,
    /// and removed from the environment. Otherwise the socket path is resolved from
    /// `WAYLAND_DISPLAY` and `XDG_RUNTIME_DIR`, see [`resolve_socket_path()`].
    pub fn connect_to_env() -> Result<Self, ConnectError> {
        let stream = if let Ok(txt) = env::var("WAYLAND_SOCKET") {
            // We should connect to the provided WAYLAND_SOCKET
            let fd = txt.parse::<i32>().map_err(|_| ConnectError::InvalidFd)?;
            if fd < 0 {
                return Err(ConnectError::InvalidFd);
            }
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            // remove the variable so any child processes don't see it
            env::remove_var("WAYLAND_SOCKET");
            // set the CLOEXEC flag on this FD
            let flags = rustix::io::fcntl_getfd(&fd);
            let result = flags
                .map(|f| f | rustix::io::FdFlags::CLOEXEC)
                .and_then(|f| rustix::io::fcntl_setfd(&fd, f));
            match result {
                Ok(_) => UnixStream::from(fd),
                Err(_) => return Err(ConnectError::InvalidFd),
            }
        } else {
            let path = resolve_socket_path(
                None,
                env::var_os("WAYLAND_DISPLAY").as_deref(),
                env::var_os("XDG_RUNTIME_DIR").as_deref(),
            )?;
            dial(path)?
        };
        Ok(Self::from_socket(stream))
    }

    /// Connect to the compositor socket with the given name
    ///
    /// An absolute name is used as is, a relative one is looked up in
    /// `XDG_RUNTIME_DIR`. `WAYLAND_SOCKET` and `WAYLAND_DISPLAY` are ignored.
    pub fn connect_to(name: impl AsRef<OsStr>) -> Result<Self, ConnectError> {
        let path = resolve_socket_path(
            Some(name.as_ref()),
            None,
            env::var_os("XDG_RUNTIME_DIR").as_deref(),
        )?;
        Ok(Self::from_socket(dial(path)?))
    }

    /// Initialize a Wayland connection from an already existing Unix stream
    pub fn from_socket(stream: UnixStream) -> Self {
        let backend = Backend::connect(stream);
        let display = Arc::new(DisplayData::default());
        // the display is never destroyed while the backend lives
        if backend.set_data(&backend.display_id(), display.clone()).is_err() {
            crate::log_warn!("The connection died before it was set up.");
        }
        Self { inner: Arc::new(ConnectionInner { backend, display }) }
    }

    /// Get the [`Backend`] underlying this [`Connection`]
    pub fn backend(&self) -> Backend {
        self.inner.backend.clone()
    }

    /// Id of the display singleton
    pub fn display_id(&self) -> ObjectId {
        self.inner.backend.display_id()
    }

    /// Set the listener notified of the events of the display singleton
    pub fn set_display_listener(&self, listener: impl DisplayListener + 'static) {
        self.inner.display.set_listener(Arc::new(listener));
    }

    /// Create a registry, the object advertising the globals of the server
    ///
    /// The server advertises all its current globals right away, a
    /// [`roundtrip()`][Self::roundtrip()] after this call guarantees they were received.
    pub fn get_registry(
        &self,
        listener: impl RegistryListener + 'static,
    ) -> Result<Registry, RequestError> {
        let backend = &self.inner.backend;
        let data = RegistryData::new(listener);
        let id = backend.send_request(
            message!(self.display_id(), WL_DISPLAY_GET_REGISTRY, [Argument::NewId(ObjectId::null())]),
            Some(data.clone()),
            None,
        )?;
        if id.is_null() {
            return Err(self.dead_connection());
        }
        debug_assert_eq!(id.interface().name, WL_REGISTRY_INTERFACE.name);
        Ok(Registry::from_inner(ProxyInner::new(backend, id, 1), data))
    }

    /// Ask the server to answer once it processed all requests sent so far
    ///
    /// Requests are flushed. The returned token resolves when the answer arrives.
    pub fn sync(&self) -> Result<SyncToken, WaylandError> {
        let backend = &self.inner.backend;
        let data = SyncData::new();
        let id = backend.send_request(
            message!(self.display_id(), WL_DISPLAY_SYNC, [Argument::NewId(ObjectId::null())]),
            Some(data.clone()),
            None,
        );
        match id {
            Ok(id) if !id.is_null() => debug_assert_eq!(id.interface().name, WL_CALLBACK_INTERFACE.name),
            _ => return Err(backend.last_error().unwrap_or(WaylandError::ConnectionClosed)),
        }
        match backend.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
        Ok(SyncToken::new(backend.clone(), data))
    }

    /// Do a roundtrip to the server
    ///
    /// This method will block until the Wayland server has processed and answered all your
    /// preceding requests, dispatching events in the meantime. This is notably useful
    /// during the initial setup of an app, to wait for the initial state from the server.
    ///
    /// Returns the number of events dispatched by the calling thread. Fails with
    /// [`SyncError::WouldDeadlock`] if called from an event listener of this connection.
    pub fn roundtrip(&self) -> Result<usize, SyncError> {
        let backend = &self.inner.backend;
        if backend.is_dispatch_thread() {
            return Err(SyncError::WouldDeadlock);
        }
        let token = self.sync()?;
        match backend.dispatch_until(None, || token.is_done()) {
            Ok(Some(dispatched)) => token.wait().map(|_| dispatched),
            Ok(None) => Err(SyncError::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    /// Start a thread dispatching events of this connection
    ///
    /// The thread runs until the connection is closed, it returns `Ok(())` if it was
    /// closed cleanly and the fatal error otherwise. Other threads can still wait on
    /// [`SyncToken`]s and [`roundtrip()`][Self::roundtrip()] while it runs, all listeners
    /// are invoked by the dispatcher thread.
    pub fn spawn_dispatcher(&self) -> io::Result<JoinHandle<Result<(), WaylandError>>> {
        let dispatcher = self.inner.backend.dispatcher();
        std::thread::Builder::new().name("wayland-dispatch".into()).spawn(move || dispatcher.run())
    }

    /// Flush pending outgoing requests to the server
    ///
    /// The dispatching methods do it implicitly before waiting for events.
    pub fn flush(&self) -> Result<(), WaylandError> {
        self.inner.backend.flush()
    }

    /// Dispatch the events that can be read without blocking
    ///
    /// Returns the number of events dispatched.
    pub fn dispatch_pending(&self) -> Result<usize, WaylandError> {
        self.inner.backend.dispatch_pending()
    }

    /// Block until at least one event is dispatched
    ///
    /// # Panics
    ///
    /// Panics if called from an event listener of this connection.
    pub fn blocking_dispatch(&self) -> Result<usize, WaylandError> {
        self.inner.backend.blocking_dispatch()
    }

    /// Retrieve the protocol error that occured on the connection if any
    ///
    /// If this method returns [`Some`], it means your Wayland connection is already dead.
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        match self.inner.backend.last_error()? {
            WaylandError::Protocol(err) => Some(err),
            _ => None,
        }
    }

    /// The fatal error of the connection, if it is dead
    pub fn last_error(&self) -> Option<WaylandError> {
        self.inner.backend.last_error()
    }

    /// Number of events received for objects this client already destroyed
    pub fn stale_events(&self) -> usize {
        self.inner.backend.stale_events()
    }

    /// Close the connection
    ///
    /// All live objects are notified of their destruction, and blocked waiters are woken up.
    pub fn shutdown(&self) {
        self.inner.backend.shutdown()
    }

    fn dead_connection(&self) -> RequestError {
        RequestError::InvalidId(wayrt_backend::client::InvalidId)
    }
}

impl AsFd for Connection {
    /// Provides fd from [`Backend::poll_fd()`] for polling.
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.backend.poll_fd()
    }
}

/// Compute the path of the compositor socket
///
/// `name` takes precedence over `wayland_display`, and [`DEFAULT_DISPLAY`] is used if
/// both are unset. An absolute name is used as is, a relative one is joined to
/// `runtime_dir`, which must then be set and absolute.
pub fn resolve_socket_path(
    name: Option<&OsStr>,
    wayland_display: Option<&OsStr>,
    runtime_dir: Option<&OsStr>,
) -> Result<PathBuf, ConnectError> {
    let name = Path::new(
        name.filter(|n| !n.is_empty())
            .or(wayland_display.filter(|n| !n.is_empty()))
            .unwrap_or_else(|| OsStr::new(DEFAULT_DISPLAY)),
    );
    if name.is_absolute() {
        return Ok(name.into());
    }
    let runtime_dir = runtime_dir.map(Path::new).ok_or(ConnectError::NoRuntimeDir)?;
    if !runtime_dir.is_absolute() {
        return Err(ConnectError::NoRuntimeDir);
    }
    Ok(runtime_dir.join(name))
}

fn dial(endpoint: PathBuf) -> Result<UnixStream, ConnectError> {
    UnixStream::connect(&endpoint).map_err(|source| match source.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => ConnectError::NoCompositor { endpoint },
        _ => ConnectError::Dial { endpoint, source },
    })
}

/// An error when trying to establish a Wayland connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No compositor is listening at the resolved socket path
    #[error("Could not find wayland compositor at {}", endpoint.display())]
    NoCompositor {
        /// The path that was tried
        endpoint: PathBuf,
    },

    /// The socket name is relative and `XDG_RUNTIME_DIR` is unset or not absolute
    #[error("XDG_RUNTIME_DIR is not set to an absolute path")]
    NoRuntimeDir,

    /// Connecting to the socket failed
    #[error("Could not connect to {}: {source}", endpoint.display())]
    Dial {
        /// The path that was tried
        endpoint: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },

    /// The FD provided in WAYLAND_SOCKET was invalid
    #[error("WAYLAND_SOCKET was set but contained garbage")]
    InvalidFd,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(s: &str) -> Option<&OsStr> {
        Some(OsStr::new(s))
    }

    #[test]
    fn default_socket_name() {
        assert_eq!(
            resolve_socket_path(None, None, os("/run/user/1000")).unwrap(),
            PathBuf::from("/run/user/1000/wayland-0")
        );
    }

    #[test]
    fn wayland_display_is_relative_to_runtime_dir() {
        assert_eq!(
            resolve_socket_path(None, os("wayland-3"), os("/run/user/1000")).unwrap(),
            PathBuf::from("/run/user/1000/wayland-3")
        );
    }

    #[test]
    fn explicit_name_wins() {
        assert_eq!(
            resolve_socket_path(os("other"), os("wayland-3"), os("/tmp")).unwrap(),
            PathBuf::from("/tmp/other")
        );
    }

    #[test]
    fn absolute_name_ignores_runtime_dir() {
        assert_eq!(
            resolve_socket_path(None, os("/tmp/compositor.sock"), None).unwrap(),
            PathBuf::from("/tmp/compositor.sock")
        );
    }

    #[test]
    fn runtime_dir_must_be_absolute() {
        assert!(matches!(
            resolve_socket_path(None, os("wayland-0"), None),
            Err(ConnectError::NoRuntimeDir)
        ));
        assert!(matches!(
            resolve_socket_path(None, None, os("relative/dir")),
            Err(ConnectError::NoRuntimeDir)
        ));
    }

    #[test]
    fn missing_socket_is_no_compositor() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = dir.path().join("wayland-9");
        match dial(endpoint.clone()) {
            Err(ConnectError::NoCompositor { endpoint: e }) => assert_eq!(e, endpoint),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
