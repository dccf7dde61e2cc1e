// This module contains helpers functions and types that
// are not test in themselves, but are used by several tests.
//
// The `TestCompositor` plays the server end of a connection: it answers the
// display, registry and binding requests like a compositor would, records every
// request it receives, and lets the test inject arbitrary events.

#![allow(dead_code)]

pub use wayrt_backend as backend;
pub use wayrt_client as client;

use std::{
    collections::HashMap,
    ffi::CString,
    os::unix::{
        io::{OwnedFd, RawFd},
        net::UnixStream,
    },
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use backend::{
    message,
    protocol::{Argument, Interface, Message},
    socket::{buffered, BufferedReader, BufferedWriter, Socket},
    wire::MessageParseError,
    WL_DISPLAY_INTERFACE,
};
use client::{protocol::interfaces::*, Connection, Proxy};

/// First id of the server namespace
pub const SERVER_ID_START: u32 = 0xFF00_0000;

static INTERFACES: &[&Interface] = &[
    &WL_COMPOSITOR_INTERFACE,
    &WL_SHM_POOL_INTERFACE,
    &WL_SHM_INTERFACE,
    &WL_BUFFER_INTERFACE,
    &WL_DATA_OFFER_INTERFACE,
    &WL_DATA_SOURCE_INTERFACE,
    &WL_DATA_DEVICE_INTERFACE,
    &WL_DATA_DEVICE_MANAGER_INTERFACE,
    &WL_SURFACE_INTERFACE,
    &WL_SEAT_INTERFACE,
    &WL_POINTER_INTERFACE,
    &WL_KEYBOARD_INTERFACE,
    &WL_TOUCH_INTERFACE,
    &WL_OUTPUT_INTERFACE,
    &WL_REGION_INTERFACE,
    &WL_SUBCOMPOSITOR_INTERFACE,
    &WL_SUBSURFACE_INTERFACE,
];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A request received by the test compositor
#[derive(Debug)]
pub struct Request {
    pub object: u32,
    pub interface: &'static str,
    pub name: &'static str,
    pub args: Vec<Argument<u32, OwnedFd>>,
}

impl Request {
    /// `interface.request`, the form used to compare request logs
    pub fn label(&self) -> String {
        format!("{}.{}", self.interface, self.name)
    }
}

struct State {
    writer: BufferedWriter,
    objects: HashMap<u32, &'static Interface>,
    globals: Vec<(u32, &'static Interface, u32)>,
    registries: Vec<u32>,
    requests: Vec<Request>,
    next_server_id: u32,
    next_global: u32,
    sync_serial: u32,
    hold_syncs: bool,
    held_syncs: Vec<u32>,
}

impl State {
    fn send(&mut self, msg: Message<u32, RawFd>) {
        // register the objects the event creates, an unknown opcode is sent as is
        let desc = self
            .objects
            .get(&msg.sender_id)
            .and_then(|&interface| interface.events.get(msg.opcode as usize));
        if let Some(desc) = desc {
            for arg in &msg.args {
                if let (Argument::NewId(id), Some(child)) = (arg, desc.child_interface) {
                    self.objects.insert(*id, child);
                }
            }
        }
        // the client may be gone, tests check that on their side
        let _ = self.writer.write_message(&msg);
        let _ = self.writer.flush();
    }

    fn advertise(&mut self, registry: u32, name: u32, interface: &'static Interface, version: u32) {
        let iface = CString::new(interface.name).unwrap();
        self.send(message!(
            registry,
            0,
            [Argument::Uint(name), Argument::Str(Some(Box::new(iface))), Argument::Uint(version)]
        ));
    }

    fn handle(&mut self, interface: &'static Interface, msg: Message<u32, OwnedFd>) {
        let desc = &interface.requests[msg.opcode as usize];
        let object = msg.sender_id;
        let mut created = None;
        for arg in &msg.args {
            if let Argument::NewId(id) = arg {
                created = Some(*id);
            }
        }

        let mut bound = None;
        if let Some(id) = created {
            let child = match desc.child_interface {
                Some(child) => child,
                None => {
                    // wl_registry.bind carries the interface name and version
                    let Argument::Str(Some(ref name)) = msg.args[1] else { panic!("Malformed bind") };
                    let Argument::Uint(version) = msg.args[2] else { panic!("Malformed bind") };
                    let name = name.to_str().unwrap();
                    let child = INTERFACES
                        .iter()
                        .copied()
                        .find(|i| i.name == name)
                        .unwrap_or_else(|| panic!("Bind of unknown interface {name}"));
                    bound = Some((child, version));
                    child
                }
            };
            self.objects.insert(id, child);
        }

        match (interface.name, desc.name) {
            ("wl_display", "sync") => {
                let id = created.unwrap();
                if self.hold_syncs {
                    self.held_syncs.push(id);
                } else {
                    self.answer_sync(id);
                }
            }
            ("wl_display", "get_registry") => {
                let id = created.unwrap();
                self.registries.push(id);
                for (name, interface, version) in self.globals.clone() {
                    self.advertise(id, name, interface, version);
                }
            }
            _ => {}
        }

        if let (Some(id), Some((interface, version))) = (created, bound) {
            self.greet(id, interface, version);
        }

        if desc.is_destructor {
            self.objects.remove(&object);
            if object < SERVER_ID_START {
                self.send(message!(1, 1, [Argument::Uint(object)]));
            }
        }

        self.requests.push(Request {
            object,
            interface: interface.name,
            name: desc.name,
            args: msg.args.into_iter().collect(),
        });
    }

    fn answer_sync(&mut self, id: u32) {
        self.sync_serial += 1;
        let serial = self.sync_serial;
        self.send(message!(id, 0, [Argument::Uint(serial)]));
        self.send(message!(1, 1, [Argument::Uint(id)]));
        self.objects.remove(&id);
    }

    // initial events of freshly bound globals
    fn greet(&mut self, id: u32, interface: &'static Interface, version: u32) {
        match interface.name {
            "wl_shm" => {
                self.send(message!(id, 0, [Argument::Uint(0)]));
                self.send(message!(id, 0, [Argument::Uint(1)]));
            }
            "wl_seat" => {
                self.send(message!(id, 0, [Argument::Uint(3)]));
                if version >= 2 {
                    let name = CString::new("seat0").unwrap();
                    self.send(message!(id, 1, [Argument::Str(Some(Box::new(name)))]));
                }
            }
            "wl_output" => {
                let make = CString::new("wayrt").unwrap();
                let model = CString::new("virtual").unwrap();
                self.send(message!(
                    id,
                    0,
                    [
                        Argument::Int(0),
                        Argument::Int(0),
                        Argument::Int(300),
                        Argument::Int(200),
                        Argument::Int(0),
                        Argument::Str(Some(Box::new(make))),
                        Argument::Str(Some(Box::new(model))),
                        Argument::Int(0),
                    ]
                ));
                self.send(message!(
                    id,
                    1,
                    [Argument::Uint(3), Argument::Int(1920), Argument::Int(1080), Argument::Int(60000)]
                ));
                if version >= 2 {
                    self.send(message!(id, 3, [Argument::Int(2)]));
                    self.send(message!(id, 2, []));
                }
            }
            _ => {}
        }
    }
}

// Shuts the socket down when the serving thread exits, even by a panic, so that the
// client does not wait forever.
struct ShutdownGuard(Arc<Socket>);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

fn serve(mut reader: BufferedReader, state: Arc<Mutex<State>>) {
    let _guard = ShutdownGuard(reader.socket().clone());
    loop {
        match reader.socket().wait_readable(Some(Duration::from_millis(100))) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => return,
        }
        if reader.fill_incoming_buffers().is_err() {
            // the client went away
            return;
        }
        loop {
            let (id, opcode) = match reader.peek_header() {
                Ok((id, opcode, _)) => (id, opcode),
                Err(MessageParseError::MissingData) => break,
                Err(e) => panic!("Malformed frame from the client: {e}"),
            };
            let mut state = state.lock().unwrap();
            let interface = *state
                .objects
                .get(&id)
                .unwrap_or_else(|| panic!("Request {opcode} to unknown object {id}"));
            let signature = interface.requests[opcode as usize].signature;
            let msg = match reader.read_one_message(signature) {
                Ok(msg) => msg,
                Err(MessageParseError::MissingData) | Err(MessageParseError::MissingFD) => break,
                Err(e) => panic!("Malformed frame from the client: {e}"),
            };
            state.handle(interface, msg);
        }
    }
}

pub struct TestCompositor {
    state: Arc<Mutex<State>>,
}

impl TestCompositor {
    /// Serve a connected stream, advertising the given globals
    pub fn serve(stream: UnixStream, globals: &[(&'static Interface, u32)]) -> TestCompositor {
        init_logger();
        let (reader, writer) = buffered(stream);
        let mut objects = HashMap::new();
        objects.insert(1, &WL_DISPLAY_INTERFACE);
        let state = Arc::new(Mutex::new(State {
            writer,
            objects,
            globals: globals.iter().enumerate().map(|(i, (iface, v))| (i as u32 + 1, *iface, *v)).collect(),
            registries: Vec::new(),
            requests: Vec::new(),
            next_server_id: SERVER_ID_START,
            next_global: globals.len() as u32 + 1,
            sync_serial: 0,
            hold_syncs: false,
            held_syncs: Vec::new(),
        }));
        let thread_state = state.clone();
        std::thread::Builder::new()
            .name("test-compositor".into())
            .spawn(move || serve(reader, thread_state))
            .unwrap();
        TestCompositor { state }
    }

    /// A connection to a new test compositor
    pub fn new(globals: &[(&'static Interface, u32)]) -> (Connection, TestCompositor) {
        let (client, server) = UnixStream::pair().unwrap();
        let compositor = TestCompositor::serve(server, globals);
        (Connection::from_socket(client), compositor)
    }

    /// Labels of all requests received so far
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.iter().map(Request::label).collect()
    }

    /// Take the requests received so far out of the log
    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut self.state.lock().unwrap().requests)
    }

    /// Labels of the requests received so far, ignoring the display and registry
    pub fn object_requests(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.interface != "wl_display" && r.interface != "wl_registry")
            .map(Request::label)
            .collect()
    }

    /// Send an event to the client
    pub fn send_event(&self, msg: Message<u32, RawFd>) {
        self.state.lock().unwrap().send(msg);
    }

    /// Stop answering sync requests, until [`answer_sync`](Self::answer_sync) is called
    pub fn hold_syncs(&self, hold: bool) {
        self.state.lock().unwrap().hold_syncs = hold;
    }

    /// Callback ids of the sync requests held so far, in arrival order
    pub fn held_syncs(&self) -> Vec<u32> {
        self.state.lock().unwrap().held_syncs.clone()
    }

    /// Answer a held sync request, with the serial the compositor is at
    pub fn answer_sync(&self, id: u32) {
        let mut state = self.state.lock().unwrap();
        state.held_syncs.retain(|&held| held != id);
        state.answer_sync(id);
    }

    /// Wait until the compositor reached some state
    pub fn wait_for(&self, what: &str, mut check: impl FnMut(&TestCompositor) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Allocate an id for an object created by the server
    pub fn new_server_id(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_server_id;
        state.next_server_id += 1;
        id
    }

    /// Interface of a live object, as tracked by the compositor
    pub fn interface_of(&self, id: u32) -> Option<&'static str> {
        self.state.lock().unwrap().objects.get(&id).map(|i| i.name)
    }

    /// Report a fatal protocol error on an object
    pub fn post_error(&self, object: u32, code: u32, text: &str) {
        let text = CString::new(text).unwrap();
        self.send_event(message!(
            1,
            0,
            [Argument::Object(object), Argument::Uint(code), Argument::Str(Some(Box::new(text)))]
        ));
    }

    /// Add a global and advertise it to the existing registries
    pub fn add_global(&self, interface: &'static Interface, version: u32) -> u32 {
        let mut state = self.state.lock().unwrap();
        let name = state.next_global;
        state.next_global += 1;
        state.globals.push((name, interface, version));
        for registry in state.registries.clone() {
            state.advertise(registry, name, interface, version);
        }
        name
    }

    /// Remove a global
    pub fn remove_global(&self, name: u32) {
        let mut state = self.state.lock().unwrap();
        state.globals.retain(|(n, _, _)| *n != name);
        for registry in state.registries.clone() {
            state.send(message!(registry, 1, [Argument::Uint(name)]));
        }
    }

    /// Close the connection from the server side
    pub fn disconnect(&self) {
        self.state.lock().unwrap().writer.socket().shutdown();
    }
}

/// Bind the first global of an interface through a fresh registry
pub fn bind<G: client::Global>(conn: &Connection, listener: G::Listener) -> G {
    let registry = conn.get_registry(()).unwrap();
    conn.roundtrip().unwrap();
    registry.bind_one::<G>(1..=G::interface().version, listener).unwrap()
}
