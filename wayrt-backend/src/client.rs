//! Client-side backend
//!
//! The [`Backend`] owns the connection to the server. It allocates object ids,
//! serializes requests into the outgoing buffer, and reads events from the socket
//! to dispatch them to the [`ObjectData`] of their target object.
//!
//! ## Locking
//!
//! The state of a connection is protected by three locks, always taken in this order:
//!
//! - the reader lock, held by the thread currently reading and dispatching events,
//! - the object map lock,
//! - the writer lock, protecting the outgoing buffer.
//!
//! Sending a request takes the writer lock while still holding the map lock, so that
//! ids are allocated in the order their requests are written to the wire. The cost is
//! that looking up an object while dispatching waits for an in-flight write, which is
//! short as the socket is non-blocking, unless the server stops reading and the writer
//! has to wait for it. No lock other than the reader lock is held while an
//! [`ObjectData`] callback runs.
//!
//! While a [`Dispatcher`] exists, it is the only one reading the socket on its own
//! initiative: threads in [`Backend::dispatch_until()`] wait for it to make progress
//! instead of reading.

use std::{
    fmt,
    io::ErrorKind,
    os::unix::{
        io::{AsFd, BorrowedFd, OwnedFd, RawFd},
        net::UnixStream,
    },
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, TryLockError, Weak,
    },
    thread::{self, ThreadId},
    time::Instant,
};

use smallvec::SmallVec;

use crate::{
    core_interfaces::{WL_DISPLAY_DELETE_ID, WL_DISPLAY_ERROR, WL_DISPLAY_INTERFACE},
    debug::{self, ArgList, Direction},
    map::{Object, ObjectMap, DISPLAY_ID, SERVER_ID_LIMIT},
    protocol::{
        same_interface, same_interface_or_anonymous, AllowNull, Argument, ArgumentType,
        Interface, Message, ObjectInfo, ProtocolError, ANONYMOUS_INTERFACE, INLINE_ARGS,
    },
    socket::{buffered, BufferedReader, BufferedWriter, Socket},
    wire::MessageParseError,
};

pub use crate::types::{InvalidId, ProtocolViolation, ViolationKind, WaylandError};

/// A trait representing your data associated to an object
///
/// You will only be given access to it as a `&` reference, so you
/// need to handle interior mutability by yourself.
pub trait ObjectData: downcast_rs::DowncastSync {
    /// Dispatch an event for the associated object
    ///
    /// If the event has a NewId argument, the callback must return the object data
    /// for the newly created object
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>>;
    /// Notification that the object has been destroyed and is no longer active
    fn destroyed(&self, object_id: ObjectId);
    /// Helper for forwarding a Debug implementation of your `ObjectData` type
    ///
    /// By default will just print `ObjectData { ... }`
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectData").finish_non_exhaustive()
    }
}

impl fmt::Debug for dyn ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug(f)
    }
}

downcast_rs::impl_downcast!(sync ObjectData);

/// An ID representing a Wayland object
///
/// The protocol id of an object can be reused once the object is destroyed, the
/// serial distinguishes successive objects sharing the same protocol id.
#[derive(Clone)]
pub struct ObjectId {
    serial: u32,
    id: u32,
    interface: &'static Interface,
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.serial == other.serial
            && same_interface(self.interface, other.interface)
    }
}

impl Eq for ObjectId {}

impl std::hash::Hash for ObjectId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.interface.name, self.id)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}, {})", self, self.serial)
    }
}

impl ObjectId {
    /// The null ID, used for nullable object arguments
    pub fn null() -> Self {
        Self { serial: 0, id: 0, interface: &ANONYMOUS_INTERFACE }
    }

    /// Check if this is the null ID
    #[inline]
    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Interface of the represented object
    #[inline]
    pub fn interface(&self) -> &'static Interface {
        self.interface
    }

    /// Return the protocol-level numerical ID of this object
    ///
    /// Protocol IDs are reused after object destruction, so this should not be used as a
    /// unique identifier.
    #[inline]
    pub fn protocol_id(&self) -> u32 {
        self.id
    }
}

#[derive(Debug, Clone)]
struct Data {
    client_destroyed: bool,
    server_destroyed: bool,
    user_data: Arc<dyn ObjectData>,
    serial: u32,
}

#[derive(Debug)]
struct MapState {
    map: ObjectMap<Data>,
    last_serial: u32,
}

impl MapState {
    fn next_serial(&mut self) -> u32 {
        self.last_serial = self.last_serial.wrapping_add(1);
        self.last_serial
    }

    fn get_object(&self, id: &ObjectId) -> Result<Object<Data>, InvalidId> {
        let object = self.map.find(id.id).ok_or(InvalidId)?;
        if object.data.serial != id.serial {
            return Err(InvalidId);
        }
        Ok(object)
    }
}

#[derive(Debug)]
struct ConnectionState {
    reader: Mutex<BufferedReader>,
    map: Mutex<MapState>,
    writer: Mutex<BufferedWriter>,
    socket: Arc<Socket>,
    last_error: Mutex<Option<WaylandError>>,
    // bumped every time a thread stops reading, so that threads waiting for
    // another reader can check whether what they wait for was dispatched
    read_serial: Mutex<u64>,
    read_condvar: Condvar,
    reader_thread: Mutex<Option<ThreadId>>,
    // number of live `Dispatcher`s
    dispatchers: AtomicUsize,
    stale_events: AtomicUsize,
    debug: bool,
}

impl ConnectionState {
    fn lock_map(&self) -> MutexGuard<'_, MapState> {
        self.map.lock().unwrap()
    }

    fn notify_readers(&self) {
        *self.read_serial.lock().unwrap() += 1;
        self.read_condvar.notify_all();
    }
}

// Exclusive access to the reading half of the socket
struct ReaderGuard<'a> {
    state: &'a ConnectionState,
    reader: Option<MutexGuard<'a, BufferedReader>>,
}

impl<'a> ReaderGuard<'a> {
    fn new(state: &'a ConnectionState, reader: MutexGuard<'a, BufferedReader>) -> Self {
        *state.reader_thread.lock().unwrap() = Some(thread::current().id());
        Self { state, reader: Some(reader) }
    }

    fn reader(&mut self) -> &mut BufferedReader {
        // only taken out on drop
        self.reader.as_mut().unwrap()
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        *self.state.reader_thread.lock().unwrap() = None;
        // the lock must be free by the time waiting threads wake up
        drop(self.reader.take());
        self.state.notify_readers();
    }
}

/// A handle to a connection with a Wayland server
///
/// This type is cheaply clonable, all clones refer to the same connection.
#[derive(Clone, Debug)]
pub struct Backend {
    state: Arc<ConnectionState>,
}

/// The event loop of a thread dedicated to dispatching a connection
///
/// Created with [`Backend::dispatcher()`].
#[derive(Debug)]
pub struct Dispatcher {
    backend: Backend,
}

impl Dispatcher {
    /// Dispatch events until the connection is closed
    ///
    /// Returns `Ok(())` if the connection was closed cleanly, and the fatal error
    /// otherwise.
    pub fn run(self) -> Result<(), WaylandError> {
        loop {
            match self.backend.blocking_dispatch() {
                Ok(_) => {}
                Err(WaylandError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.backend.state.dispatchers.fetch_sub(1, Ordering::SeqCst);
        // waiters may have to read by themselves from now on
        self.backend.state.notify_readers();
    }
}

/// A weak handle to a [`Backend`]
#[derive(Clone, Debug)]
pub struct WeakBackend {
    state: Weak<ConnectionState>,
}

impl WeakBackend {
    /// Try to recover the backend, if the connection still exists
    pub fn upgrade(&self) -> Option<Backend> {
        Weak::upgrade(&self.state).map(|state| Backend { state })
    }
}

impl PartialEq for Backend {
    fn eq(&self, rhs: &Self) -> bool {
        Arc::ptr_eq(&self.state, &rhs.state)
    }
}

impl Eq for Backend {}

impl Backend {
    /// Initialize a backend on the provided unix stream
    ///
    /// The stream must be an already established connection with the Wayland server.
    pub fn connect(stream: UnixStream) -> Self {
        let (reader, writer) = buffered(stream);
        let socket = reader.socket().clone();
        let map = ObjectMap::with_display(Object {
            interface: &WL_DISPLAY_INTERFACE,
            version: 1,
            data: Data {
                client_destroyed: false,
                server_destroyed: false,
                user_data: Arc::new(DumbObjectData),
                serial: 0,
            },
        });
        Self {
            state: Arc::new(ConnectionState {
                reader: Mutex::new(reader),
                map: Mutex::new(MapState { map, last_serial: 0 }),
                writer: Mutex::new(writer),
                socket,
                last_error: Mutex::new(None),
                read_serial: Mutex::new(0),
                read_condvar: Condvar::new(),
                reader_thread: Mutex::new(None),
                dispatchers: AtomicUsize::new(0),
                stale_events: AtomicUsize::new(0),
                debug: debug::enabled_by_env(),
            }),
        }
    }

    /// Dedicate a dispatcher to this connection
    ///
    /// Until the returned [`Dispatcher`] is dropped, threads waiting in
    /// [`dispatch_until()`](Self::dispatch_until) never read from the socket themselves,
    /// so every event is dispatched by the thread running the dispatcher.
    pub fn dispatcher(&self) -> Dispatcher {
        self.state.dispatchers.fetch_add(1, Ordering::SeqCst);
        Dispatcher { backend: self.clone() }
    }

    /// Get a [`WeakBackend`] from this backend
    pub fn downgrade(&self) -> WeakBackend {
        WeakBackend { state: Arc::downgrade(&self.state) }
    }

    /// Get the object ID for the `wl_display`
    pub fn display_id(&self) -> ObjectId {
        ObjectId { serial: 0, id: DISPLAY_ID, interface: &WL_DISPLAY_INTERFACE }
    }

    /// The file descriptor of the connection, to integrate it in an event loop
    pub fn poll_fd(&self) -> BorrowedFd<'_> {
        self.state.socket.as_fd()
    }

    /// Get the last error that occurred on this backend
    ///
    /// If this returns an error, the connection is dead and every further operation
    /// on it fails.
    pub fn last_error(&self) -> Option<WaylandError> {
        self.state.last_error.lock().unwrap().clone()
    }

    /// Number of events that were dropped because their target object no longer exists
    pub fn stale_events(&self) -> usize {
        self.state.stale_events.load(Ordering::Relaxed)
    }

    /// Whether the current thread is dispatching events on this connection
    ///
    /// This is the case inside [`ObjectData::event()`] callbacks. Blocking on the
    /// connection from such a thread can never complete.
    pub fn is_dispatch_thread(&self) -> bool {
        *self.state.reader_thread.lock().unwrap() == Some(thread::current().id())
    }

    /// Close the connection
    ///
    /// Every object of the connection is notified of its destruction, and any thread
    /// blocked on the connection is woken up and gets [`WaylandError::ConnectionClosed`].
    /// Does nothing if the connection is already dead.
    pub fn shutdown(&self) {
        self.fail(WaylandError::ConnectionClosed);
    }

    /// Get the protocol information related to given object ID
    pub fn info(&self, id: &ObjectId) -> Result<ObjectInfo, InvalidId> {
        let object = self.state.lock_map().get_object(id)?;
        if object.data.client_destroyed {
            Err(InvalidId)
        } else {
            Ok(ObjectInfo { id: id.id, interface: object.interface, version: object.version })
        }
    }

    /// Get the object data associated with an object
    pub fn get_data(&self, id: &ObjectId) -> Result<Arc<dyn ObjectData>, InvalidId> {
        let object = self.state.lock_map().get_object(id)?;
        Ok(object.data.user_data)
    }

    /// Replace the object data associated with an object
    pub fn set_data(&self, id: &ObjectId, data: Arc<dyn ObjectData>) -> Result<(), InvalidId> {
        let mut guard = self.state.lock_map();
        guard.get_object(id)?;
        guard.map.with(id.id, move |obj| obj.data.user_data = data).ok_or(InvalidId)
    }

    /// Send a request
    ///
    /// The request is written to the outgoing buffer, it reaches the server on the
    /// next [`flush()`](Self::flush).
    ///
    /// If the request creates an object, its `NewId` argument must be a placeholder
    /// (for example [`ObjectId::null()`]), and `data` provides the object data of the new
    /// object. `child_spec` gives the interface and version of the new object when the
    /// request does not determine it, as for `wl_registry.bind`. The id of the created
    /// object is returned, or the null id if no object was created.
    ///
    /// Fails with [`InvalidId`] if the target object or one of the object arguments
    /// is not alive.
    ///
    /// # Panics
    ///
    /// Panics if the arguments do not match the signature of the request.
    pub fn send_request(
        &self,
        Message { sender_id: id, opcode, args }: Message<ObjectId, RawFd>,
        data: Option<Arc<dyn ObjectData>>,
        child_spec: Option<(&'static Interface, u32)>,
    ) -> Result<ObjectId, InvalidId> {
        let mut guard = self.state.lock_map();
        let object = guard.get_object(&id)?;

        let message_desc = match object.interface.requests.get(opcode as usize) {
            Some(msg) => msg,
            None => {
                panic!("Unknown opcode {} for object {}@{}.", opcode, object.interface.name, id.id);
            }
        };

        if object.data.client_destroyed {
            if self.state.debug {
                debug::trace(Direction::Sent, id.interface.name, id.id, message_desc.name, &args, true);
            }
            return Err(InvalidId);
        }

        if !message_desc.accepts(&args) {
            panic!(
                "Unexpected signature for request {}@{}.{}: expected {:?}, got {:?}.",
                object.interface.name, id.id, message_desc.name, message_desc.signature, args
            );
        }

        // Prepare the child object
        let child_spec = if message_desc
            .signature
            .iter()
            .any(|arg| matches!(arg, ArgumentType::NewId))
        {
            if let Some((iface, version)) = child_spec {
                if let Some(child_interface) = message_desc.child_interface {
                    if !same_interface(child_interface, iface) {
                        panic!(
                            "Wrong placeholder used when sending request {}@{}.{}: expected interface {} but got {}",
                            object.interface.name,
                            id.id,
                            message_desc.name,
                            child_interface.name,
                            iface.name
                        );
                    }
                    if version != object.version {
                        panic!(
                            "Wrong placeholder used when sending request {}@{}.{}: expected version {} but got {}",
                            object.interface.name,
                            id.id,
                            message_desc.name,
                            object.version,
                            version
                        );
                    }
                }
                Some((iface, version))
            } else if let Some(child_interface) = message_desc.child_interface {
                Some((child_interface, object.version))
            } else {
                panic!(
                    "Wrong placeholder used when sending request {}@{}.{}: target interface must be specified for a generic constructor.",
                    object.interface.name,
                    id.id,
                    message_desc.name
                );
            }
        } else {
            None
        };

        let child = if let Some((child_interface, child_version)) = child_spec {
            let user_data = data
                .expect("Sending a request creating an object without providing an object data.");
            let child_serial = guard.next_serial();
            let child = Object {
                interface: child_interface,
                version: child_version,
                data: Data {
                    client_destroyed: false,
                    server_destroyed: false,
                    user_data,
                    serial: child_serial,
                },
            };
            match guard.map.client_insert_new(child) {
                Some(child_id) => Some(ObjectId { id: child_id, serial: child_serial, interface: child_interface }),
                None => {
                    crate::log_error!("Cannot create a new object: the client id space is exhausted.");
                    return Err(InvalidId);
                }
            }
        } else {
            None
        };

        // Replace the placeholder by the id of the new object
        let args = args
            .into_iter()
            .map(|arg| match arg {
                Argument::NewId(p) => {
                    if !p.is_null() {
                        panic!(
                            "The newid provided when sending request {}@{}.{} is not a placeholder.",
                            object.interface.name, id.id, message_desc.name
                        );
                    }
                    match child {
                        Some(ref child_id) => Argument::NewId(child_id.clone()),
                        None => unreachable!(),
                    }
                }
                arg => arg,
            })
            .collect::<SmallVec<[_; INLINE_ARGS]>>();

        // Check that all object arguments are alive and of the expected type
        let mut arg_interfaces = message_desc.arg_interfaces.iter();
        for (i, arg) in args.iter().enumerate() {
            if let Argument::Object(arg_id) = arg {
                let next_interface = arg_interfaces.next().copied().unwrap_or(&ANONYMOUS_INTERFACE);
                if arg_id.is_null() {
                    if let ArgumentType::Object(AllowNull::No) = message_desc.signature[i] {
                        panic!(
                            "Request {}@{}.{} expects a non-null object argument.",
                            object.interface.name, id.id, message_desc.name
                        );
                    }
                    continue;
                }
                let arg_object = guard.get_object(arg_id)?;
                if arg_object.data.client_destroyed {
                    return Err(InvalidId);
                }
                if !same_interface_or_anonymous(next_interface, arg_object.interface) {
                    panic!(
                        "Request {}@{}.{} expects an argument of interface {} but {} was provided instead.",
                        object.interface.name,
                        id.id,
                        message_desc.name,
                        next_interface.name,
                        arg_object.interface.name
                    );
                }
            }
        }

        if self.state.debug {
            debug::trace(
                Direction::Sent,
                object.interface.name,
                id.id,
                message_desc.name,
                &args,
                false,
            );
        }
        crate::log_debug!(
            "Sending {}.{} ({})",
            id,
            message_desc.name,
            ArgList(&args)
        );

        // Serialize, still under the map lock so that the wire order of object creations
        // matches their id allocation order
        let write_result = if self.state.last_error.lock().unwrap().is_some() {
            Ok(())
        } else {
            let msg_args = args
                .into_iter()
                .map(|arg| match arg {
                    Argument::Int(i) => Argument::Int(i),
                    Argument::Uint(u) => Argument::Uint(u),
                    Argument::Fixed(f) => Argument::Fixed(f),
                    Argument::Str(s) => Argument::Str(s),
                    Argument::Array(a) => Argument::Array(a),
                    Argument::Fd(fd) => Argument::Fd(fd),
                    Argument::Object(o) => Argument::Object(o.id),
                    Argument::NewId(n) => Argument::NewId(n.id),
                })
                .collect();
            let msg = Message { sender_id: id.id, opcode, args: msg_args };
            self.state.writer.lock().unwrap().write_message(&msg)
        };

        // Handle destruction if relevant
        let destroyed = if message_desc.is_destructor {
            let server_destroyed = guard
                .map
                .with(id.id, |obj| {
                    obj.data.client_destroyed = true;
                    obj.data.server_destroyed
                })
                .unwrap_or(true);
            if server_destroyed {
                guard.map.release(id.id);
            }
            Some(object.data.user_data.clone())
        } else {
            None
        };
        drop(guard);

        if let Err(err) = write_result {
            self.fail(err.into());
        }
        if let Some(user_data) = destroyed {
            user_data.destroyed(id.clone());
        }

        Ok(child.unwrap_or_else(ObjectId::null))
    }

    /// Flush the outgoing buffer to the server
    ///
    /// Fails with a `WouldBlock` IO error if the socket is full, the remaining data is
    /// kept for the next call. Any other error is fatal to the connection.
    pub fn flush(&self) -> Result<(), WaylandError> {
        self.no_last_error()?;
        let result = self.state.writer.lock().unwrap().flush();
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(e.into()),
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Dispatch the events that can be read without blocking
    ///
    /// Returns the number of events dispatched.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an [`ObjectData`] callback of this connection.
    pub fn dispatch_pending(&self) -> Result<usize, WaylandError> {
        let mut guard = self.lock_reader();
        let mut dispatched = self.dispatch_buffered(guard.reader())?;
        loop {
            match guard.reader().fill_incoming_buffers() {
                Ok(()) => dispatched += self.dispatch_buffered(guard.reader())?,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(dispatched),
                Err(e) => return Err(self.fail(e.into())),
            }
        }
    }

    /// Block until at least one event is dispatched
    ///
    /// Outgoing requests are flushed before waiting. Returns the number of events
    /// dispatched.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an [`ObjectData`] callback of this connection.
    pub fn blocking_dispatch(&self) -> Result<usize, WaylandError> {
        let mut guard = self.lock_reader();
        self.read_and_dispatch(guard.reader(), None)
    }

    /// Dispatch events until a condition holds
    ///
    /// `done` is checked before every read and after every dispatching round. If another
    /// thread is already reading from the connection, or a [`Dispatcher`] exists, this
    /// waits for it to make progress rather than competing for the socket.
    ///
    /// Returns `Some(n)` once `done` returned true, `n` being the number of events
    /// dispatched by this thread, or `None` if the deadline passed first.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an [`ObjectData`] callback of this connection.
    pub fn dispatch_until(
        &self,
        deadline: Option<Instant>,
        mut done: impl FnMut() -> bool,
    ) -> Result<Option<usize>, WaylandError> {
        assert!(!self.is_dispatch_thread(), "Cannot block on a connection from its dispatching thread.");
        let mut dispatched = 0;
        loop {
            let serial = *self.state.read_serial.lock().unwrap();
            if done() {
                return Ok(Some(dispatched));
            }
            self.no_last_error()?;
            let reader = if self.state.dispatchers.load(Ordering::SeqCst) == 0 {
                self.try_lock_reader()
            } else {
                None
            };
            if let Some(mut guard) = reader {
                // another reader may have finished between the check and the lock
                if done() {
                    return Ok(Some(dispatched));
                }
                dispatched += self.read_and_dispatch(guard.reader(), deadline)?;
            } else {
                // somebody else is reading, let them dispatch and check again
                match self.flush() {
                    Ok(()) => {}
                    Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
                let guard = self.state.read_serial.lock().unwrap();
                let unchanged = |current: &mut u64| *current == serial;
                match deadline {
                    None => drop(self.state.read_condvar.wait_while(guard, unchanged).unwrap()),
                    Some(deadline) => {
                        let timeout = deadline.saturating_duration_since(Instant::now());
                        drop(
                            self.state
                                .read_condvar
                                .wait_timeout_while(guard, timeout, unchanged)
                                .unwrap(),
                        );
                    }
                }
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                return Ok(if done() { Some(dispatched) } else { None });
            }
        }
    }

    fn no_last_error(&self) -> Result<(), WaylandError> {
        match *self.state.last_error.lock().unwrap() {
            Some(ref err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn lock_reader(&self) -> ReaderGuard<'_> {
        assert!(!self.is_dispatch_thread(), "Cannot dispatch from inside an event callback.");
        ReaderGuard::new(&self.state, self.state.reader.lock().unwrap())
    }

    fn try_lock_reader(&self) -> Option<ReaderGuard<'_>> {
        match self.state.reader.try_lock() {
            Ok(reader) => Some(ReaderGuard::new(&self.state, reader)),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(e)) => panic!("{e}"),
        }
    }

    /// Record a fatal error and tear the connection down
    ///
    /// Only the first error is kept, it is the one returned. Must not be called while
    /// holding the map or writer lock.
    fn fail(&self, err: WaylandError) -> WaylandError {
        {
            let mut last_error = self.state.last_error.lock().unwrap();
            if let Some(ref previous) = *last_error {
                return previous.clone();
            }
            match err {
                WaylandError::ConnectionClosed => crate::log_info!("{err}"),
                _ => crate::log_error!("{err}"),
            }
            *last_error = Some(err.clone());
        }
        self.state.socket.shutdown();

        let objects = {
            let mut guard = self.state.lock_map();
            let alive: Vec<(u32, Object<Data>)> = guard
                .map
                .all_objects()
                .filter(|(_, obj)| !obj.data.client_destroyed)
                .map(|(id, obj)| (id, obj.clone()))
                .collect();
            for &(id, _) in &alive {
                guard.map.with(id, |obj| {
                    obj.data.client_destroyed = true;
                    obj.data.server_destroyed = true;
                });
            }
            alive
        };
        for (id, obj) in objects {
            obj.data.user_data.destroyed(ObjectId {
                id,
                serial: obj.data.serial,
                interface: obj.interface,
            });
        }

        self.state.notify_readers();
        err
    }

    fn violation(&self, kind: ViolationKind, object_id: u32, opcode: u16) -> WaylandError {
        self.fail(ProtocolViolation { kind, object_id, opcode }.into())
    }

    // Dispatch buffered events, reading more from the socket until at least one event
    // was dispatched or the deadline passed. Returns 0 only in the latter case.
    fn read_and_dispatch(
        &self,
        reader: &mut BufferedReader,
        deadline: Option<Instant>,
    ) -> Result<usize, WaylandError> {
        loop {
            let dispatched = self.dispatch_buffered(reader)?;
            if dispatched > 0 {
                return Ok(dispatched);
            }
            // the server may be waiting for our requests before answering
            match self.flush() {
                Ok(()) => {}
                Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            match reader.fill_incoming_buffers() {
                Ok(()) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(self.fail(e.into())),
            }
            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(0);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if let Err(e) = reader.socket().wait_readable(timeout) {
                return Err(self.fail(e.into()));
            }
        }
    }

    // Dispatch all complete events present in the incoming buffer
    fn dispatch_buffered(&self, reader: &mut BufferedReader) -> Result<usize, WaylandError> {
        let mut dispatched = 0;
        loop {
            self.no_last_error()?;

            let (sender_id, opcode) = match reader.peek_header() {
                Ok((sender_id, opcode, _)) => (sender_id, opcode),
                Err(MessageParseError::MissingData) => return Ok(dispatched),
                Err(e) => return Err(self.violation(ViolationKind::MalformedFrame(e), 0, 0)),
            };

            let receiver = self.state.lock_map().map.find(sender_id);
            let receiver = match receiver {
                Some(receiver) => receiver,
                None => {
                    // the object was destroyed and its id released, the event is stale
                    match reader.skip_message() {
                        Ok(()) => {}
                        Err(MessageParseError::MissingData) => return Ok(dispatched),
                        Err(e) => {
                            return Err(self.violation(
                                ViolationKind::MalformedFrame(e),
                                sender_id,
                                opcode,
                            ))
                        }
                    }
                    crate::log_warn!("Dropping event {opcode} sent to unknown object {sender_id}.");
                    self.state.stale_events.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let message_desc = match receiver.interface.events.get(opcode as usize) {
                Some(desc) => desc,
                None => {
                    return Err(self.violation(ViolationKind::UnknownOpcode, sender_id, opcode))
                }
            };

            let message = match reader.read_one_message(message_desc.signature) {
                Ok(message) => message,
                Err(MessageParseError::MissingData) | Err(MessageParseError::MissingFD) => {
                    return Ok(dispatched)
                }
                Err(e) => {
                    return Err(self.violation(ViolationKind::MalformedFrame(e), sender_id, opcode))
                }
            };

            if sender_id == DISPLAY_ID {
                self.handle_display_event(receiver, message)?;
                dispatched += 1;
                continue;
            }

            // Convert the arguments, creating the objects the server announced
            let mut created_id = None;
            let mut args = SmallVec::with_capacity(message.args.len());
            let mut arg_interfaces = message_desc.arg_interfaces.iter();
            {
                let mut guard = self.state.lock_map();
                for arg in message.args {
                    args.push(match arg {
                        Argument::Int(i) => Argument::Int(i),
                        Argument::Uint(u) => Argument::Uint(u),
                        Argument::Fixed(f) => Argument::Fixed(f),
                        Argument::Str(s) => Argument::Str(s),
                        Argument::Array(a) => Argument::Array(a),
                        Argument::Fd(fd) => Argument::Fd(fd),
                        Argument::Object(0) => {
                            arg_interfaces.next();
                            Argument::Object(ObjectId::null())
                        }
                        Argument::Object(o) => {
                            let next_interface = arg_interfaces.next();
                            let obj = match guard.map.find(o) {
                                Some(obj) => obj,
                                None => {
                                    drop(guard);
                                    return Err(self.violation(
                                        ViolationKind::UnknownObject(o),
                                        sender_id,
                                        opcode,
                                    ));
                                }
                            };
                            if let Some(next_interface) = next_interface {
                                if !same_interface_or_anonymous(next_interface, obj.interface) {
                                    drop(guard);
                                    return Err(self.violation(
                                        ViolationKind::WrongInterface(o),
                                        sender_id,
                                        opcode,
                                    ));
                                }
                            }
                            Argument::Object(ObjectId {
                                id: o,
                                serial: obj.data.serial,
                                interface: obj.interface,
                            })
                        }
                        Argument::NewId(new_id) => {
                            let child_interface = match message_desc.child_interface {
                                Some(iface) => iface,
                                None => &ANONYMOUS_INTERFACE,
                            };
                            // a server object we destroyed may be replaced without delete_id
                            if new_id >= SERVER_ID_LIMIT
                                && guard
                                    .map
                                    .with(new_id, |obj| obj.data.client_destroyed)
                                    .unwrap_or(false)
                            {
                                guard.map.release(new_id);
                            }
                            let child_serial = guard.next_serial();
                            let child_obj = Object {
                                interface: child_interface,
                                version: receiver.version,
                                data: Data {
                                    client_destroyed: receiver.data.client_destroyed,
                                    server_destroyed: false,
                                    user_data: Arc::new(UninitObjectData),
                                    serial: child_serial,
                                },
                            };
                            if guard.map.register_server(new_id, child_obj).is_err() {
                                drop(guard);
                                return Err(self.violation(
                                    ViolationKind::InvalidNewId(new_id),
                                    sender_id,
                                    opcode,
                                ));
                            }
                            let child_id = ObjectId {
                                id: new_id,
                                serial: child_serial,
                                interface: child_interface,
                            };
                            created_id = Some(child_id.clone());
                            Argument::NewId(child_id)
                        }
                    });
                }
            }

            if self.state.debug {
                debug::trace(
                    Direction::Received,
                    receiver.interface.name,
                    sender_id,
                    message_desc.name,
                    &args,
                    receiver.data.client_destroyed,
                );
            }

            // The object was destroyed by us and the server did not acknowledge it yet
            if receiver.data.client_destroyed {
                crate::log_warn!(
                    "Dropping event {}@{}.{} sent to a destroyed object.",
                    receiver.interface.name,
                    sender_id,
                    message_desc.name
                );
                self.state.stale_events.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let id = ObjectId { id: sender_id, serial: receiver.data.serial, interface: receiver.interface };
            crate::log_debug!("Dispatching {}.{} ({})", id, message_desc.name, ArgList(&args));

            let ret = receiver
                .data
                .user_data
                .clone()
                .event(self, Message { sender_id: id.clone(), opcode, args });

            if message_desc.is_destructor {
                self.state.lock_map().map.with(sender_id, |obj| {
                    obj.data.server_destroyed = true;
                    obj.data.client_destroyed = true;
                });
                receiver.data.user_data.destroyed(id.clone());
            }

            match (created_id, ret) {
                (Some(child_id), Some(child_data)) => {
                    self.state
                        .lock_map()
                        .map
                        .with(child_id.id, |obj| obj.data.user_data = child_data);
                }
                (None, None) => {}
                (Some(child_id), None) => {
                    panic!("Callback creating object {child_id} did not provide any object data.");
                }
                (None, Some(_)) => {
                    panic!("An object data was returned from a callback not creating any object");
                }
            }

            dispatched += 1;
        }
    }

    fn handle_display_event(
        &self,
        display: Object<Data>,
        message: Message<u32, OwnedFd>,
    ) -> Result<(), WaylandError> {
        let name = WL_DISPLAY_INTERFACE.events[message.opcode as usize].name;
        if self.state.debug {
            debug::trace(Direction::Received, "wl_display", DISPLAY_ID, name, &message.args, false);
        }
        match message.opcode {
            WL_DISPLAY_ERROR => {
                if let [Argument::Object(obj), Argument::Uint(code), Argument::Str(Some(ref msg))] =
                    message.args[..]
                {
                    let object = self.state.lock_map().map.find(obj);
                    let (object_id, interface) = match object {
                        Some(object) => (
                            ObjectId { id: obj, serial: object.data.serial, interface: object.interface },
                            object.interface,
                        ),
                        None => (ObjectId::null(), &ANONYMOUS_INTERFACE),
                    };
                    let err = ProtocolError {
                        code,
                        object_id: obj,
                        object_interface: interface.name.into(),
                        message: msg.to_string_lossy().into(),
                    };
                    display.data.user_data.clone().event(
                        self,
                        Message {
                            sender_id: self.display_id(),
                            opcode: WL_DISPLAY_ERROR,
                            args: smallvec::smallvec![
                                Argument::Object(object_id),
                                Argument::Uint(code),
                                Argument::Str(Some(msg.clone())),
                            ],
                        },
                    );
                    Err(self.fail(err.into()))
                } else {
                    unreachable!()
                }
            }
            WL_DISPLAY_DELETE_ID => {
                if let [Argument::Uint(id)] = message.args[..] {
                    let released = {
                        let mut guard = self.state.lock_map();
                        let released = guard.map.release(id);
                        if released.is_none() {
                            crate::log_warn!("Received delete_id for unknown id {id}.");
                        }
                        released
                    };
                    // the server removed an object we did not destroy ourselves
                    if let Some(object) = released.filter(|obj| !obj.data.client_destroyed) {
                        object.data.user_data.destroyed(ObjectId {
                            id,
                            serial: object.data.serial,
                            interface: object.interface,
                        });
                    }
                    display.data.user_data.clone().event(
                        self,
                        Message {
                            sender_id: self.display_id(),
                            opcode: WL_DISPLAY_DELETE_ID,
                            args: smallvec::smallvec![Argument::Uint(id)],
                        },
                    );
                    Ok(())
                } else {
                    unreachable!()
                }
            }
            _ => unreachable!(),
        }
    }
}

struct DumbObjectData;

impl ObjectData for DumbObjectData {
    fn event(
        self: Arc<Self>,
        _backend: &Backend,
        _msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        None
    }

    fn destroyed(&self, _object_id: ObjectId) {}
}

// Placeholder for objects created by an event, until the callback provides their data
struct UninitObjectData;

impl ObjectData for UninitObjectData {
    fn event(
        self: Arc<Self>,
        _backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        panic!("Received a message on an uninitialized object: {msg:?}");
    }

    fn destroyed(&self, _object_id: ObjectId) {}

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uninit").finish()
    }
}
