//! The display singleton and `wl_callback` objects

use std::{
    os::unix::io::OwnedFd,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId, WaylandError},
    protocol::Message,
    WL_CALLBACK_INTERFACE, WL_DISPLAY_DELETE_ID, WL_DISPLAY_ERROR,
};

use crate::{
    error::SyncError,
    proxy::{proxy_type, EventArgs, ProxyInner},
};

/// Listener for the events of the display singleton
///
/// Both events are also handled by the connection itself: `error` is fatal to the
/// connection, `delete_id` releases the id. The listener is only notified.
pub trait DisplayListener: Send + Sync {
    /// The server reported a fatal protocol error
    ///
    /// `object` is the null id if the object is not known to this client.
    fn error(&self, object: &ObjectId, code: u32, message: &str) {
        let _ = (object, code, message);
    }

    /// The server released an object id
    fn delete_id(&self, id: u32) {
        let _ = id;
    }
}

impl DisplayListener for () {}

#[derive(Default)]
pub(crate) struct DisplayData {
    listener: Mutex<Option<Arc<dyn DisplayListener>>>,
}

impl std::fmt::Debug for DisplayData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayData")
            .field("has_listener", &self.listener.lock().unwrap().is_some())
            .finish()
    }
}

impl DisplayData {
    pub(crate) fn set_listener(&self, listener: Arc<dyn DisplayListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }
}

impl ObjectData for DisplayData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let listener = self.listener.lock().unwrap().clone();
        let Some(listener) = listener else { return None };
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        match opcode {
            WL_DISPLAY_ERROR => {
                let object = args.object();
                let code = args.uint();
                let message = args.string();
                listener.error(&object, code, &message);
            }
            WL_DISPLAY_DELETE_ID => listener.delete_id(args.uint()),
            _ => {}
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

enum SyncState {
    Pending,
    Done(u32),
    Failed,
}

pub(crate) struct SyncData {
    state: Mutex<SyncState>,
}

impl SyncData {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(SyncState::Pending) })
    }
}

impl ObjectData for SyncData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let data = EventArgs::new(msg).uint();
        *self.state.lock().unwrap() = SyncState::Done(data);
        None
    }

    fn destroyed(&self, _: ObjectId) {
        let mut state = self.state.lock().unwrap();
        if let SyncState::Pending = *state {
            *state = SyncState::Failed;
        }
    }
}

/// Handle on a pending `wl_display.sync` request
///
/// The token resolves once the server answered, which means it processed every request
/// sent before the sync. Waiting dispatches the connection on the calling thread, or
/// waits for the thread currently dispatching it.
pub struct SyncToken {
    backend: Backend,
    data: Arc<SyncData>,
}

impl SyncToken {
    pub(crate) fn new(backend: Backend, data: Arc<SyncData>) -> Self {
        Self { backend, data }
    }

    /// Whether the server already answered
    pub fn is_done(&self) -> bool {
        !matches!(*self.data.state.lock().unwrap(), SyncState::Pending)
    }

    /// Block until the server answered
    ///
    /// Returns the callback data sent by the server (an event serial).
    pub fn wait(&self) -> Result<u32, SyncError> {
        self.wait_inner(None)
    }

    /// Block until the server answered, or the timeout expires
    pub fn wait_timeout(&self, timeout: Duration) -> Result<u32, SyncError> {
        self.wait_inner(Some(Instant::now() + timeout))
    }

    fn result(&self) -> Option<Result<u32, SyncError>> {
        match *self.data.state.lock().unwrap() {
            SyncState::Pending => None,
            SyncState::Done(data) => Some(Ok(data)),
            SyncState::Failed => Some(Err(SyncError::Connection(
                self.backend.last_error().unwrap_or(WaylandError::ConnectionClosed),
            ))),
        }
    }

    fn wait_inner(&self, deadline: Option<Instant>) -> Result<u32, SyncError> {
        if let Some(result) = self.result() {
            return result;
        }
        if self.backend.is_dispatch_thread() {
            return Err(SyncError::WouldDeadlock);
        }
        match self.backend.dispatch_until(deadline, || self.is_done()) {
            Ok(Some(_)) => self.result().unwrap_or(Err(SyncError::Timeout)),
            Ok(None) => Err(SyncError::Timeout),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for SyncToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncToken").field("done", &self.is_done()).finish()
    }
}

/// Listener for `wl_callback` objects
pub trait CallbackListener: Send + Sync {
    /// The callback fired, the object is destroyed after this returns
    fn done(&self, callback: &Callback, data: u32) {
        let _ = (callback, data);
    }
}

impl<F: Fn(&Callback, u32) + Send + Sync> CallbackListener for F {
    fn done(&self, callback: &Callback, data: u32) {
        self(callback, data)
    }
}

pub(crate) struct CallbackData {
    pub(crate) version: u32,
    listener: Box<dyn CallbackListener>,
}

impl CallbackData {
    pub(crate) fn new(version: u32, listener: impl CallbackListener + 'static) -> Arc<Self> {
        Arc::new(Self { version, listener: Box::new(listener) })
    }
}

impl ObjectData for CallbackData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let callback = Callback::from_parts(backend, msg.sender_id.clone(), self.clone());
        let data = EventArgs::new(msg).uint();
        self.listener.done(&callback, data);
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_callback`, fired once by the server
///
/// Frame callbacks of surfaces are created by [`Surface::frame()`](crate::Surface::frame).
#[derive(Clone)]
pub struct Callback {
    inner: ProxyInner,
    #[allow(dead_code)]
    data: Arc<CallbackData>,
}

proxy_type!(Callback, CallbackData, WL_CALLBACK_INTERFACE);

impl Callback {
    pub(crate) fn from_inner(inner: ProxyInner, data: Arc<CallbackData>) -> Self {
        Self { inner, data }
    }
}
