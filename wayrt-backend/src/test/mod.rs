#![allow(dead_code)]

use std::{
    ffi::CString,
    os::unix::{
        io::{OwnedFd, RawFd},
        net::UnixStream,
    },
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::client::{Backend, ObjectData, ObjectId, ViolationKind, WaylandError};
use crate::protocol::{AllowNull, Argument, ArgumentType, Interface, Message, MessageDesc};
use crate::socket::{buffered, BufferedReader, BufferedWriter};
use crate::wire::MessageParseError;

mod protocol_error;
mod server_created_objects;
mod violations;

/*
 * Interfaces used by the tests
 */

pub(crate) static TEST_GLOBAL_INTERFACE: Interface = Interface {
    name: "test_global",
    version: 3,
    requests: &[
        MessageDesc {
            name: "create_child",
            signature: &[ArgumentType::NewId],
            since: 1,
            is_destructor: false,
            child_interface: Some(&TEST_CHILD_INTERFACE),
            arg_interfaces: &[],
        },
        MessageDesc {
            name: "link",
            signature: &[ArgumentType::Object(AllowNull::Yes)],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[&TEST_CHILD_INTERFACE],
        },
        MessageDesc {
            name: "send_fd",
            signature: &[ArgumentType::Fd],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[],
        },
        MessageDesc {
            name: "destroy",
            signature: &[],
            since: 1,
            is_destructor: true,
            child_interface: None,
            arg_interfaces: &[],
        },
    ],
    events: &[
        MessageDesc {
            name: "ping",
            signature: &[ArgumentType::Uint, ArgumentType::Str(AllowNull::Yes)],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[],
        },
        MessageDesc {
            name: "announce",
            signature: &[ArgumentType::NewId],
            since: 1,
            is_destructor: false,
            child_interface: Some(&TEST_CHILD_INTERFACE),
            arg_interfaces: &[],
        },
        MessageDesc {
            name: "pointed",
            signature: &[ArgumentType::Object(AllowNull::No)],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[&TEST_CHILD_INTERFACE],
        },
        MessageDesc {
            name: "fd",
            signature: &[ArgumentType::Fd],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[],
        },
    ],
};

pub(crate) static TEST_CHILD_INTERFACE: Interface = Interface {
    name: "test_child",
    version: 3,
    requests: &[MessageDesc {
        name: "destroy",
        signature: &[],
        since: 1,
        is_destructor: true,
        child_interface: None,
        arg_interfaces: &[],
    }],
    events: &[MessageDesc {
        name: "value",
        signature: &[ArgumentType::Int],
        since: 1,
        is_destructor: false,
        child_interface: None,
        arg_interfaces: &[],
    }],
};

/*
 * A scripted server end of the connection
 */

pub(crate) struct Peer {
    reader: BufferedReader,
    writer: BufferedWriter,
}

impl Peer {
    pub(crate) fn new(stream: UnixStream) -> Self {
        let (reader, writer) = buffered(stream);
        Self { reader, writer }
    }

    pub(crate) fn send(&mut self, msg: Message<u32, RawFd>) {
        self.writer.write_message(&msg).unwrap();
        self.writer.flush().unwrap();
    }

    // write raw bytes on the socket, bypassing the encoder
    pub(crate) fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.socket().send_msg(bytes, &[]).unwrap();
    }

    pub(crate) fn next_header(&mut self) -> (u32, u16) {
        loop {
            match self.reader.peek_header() {
                Ok((id, opcode, _)) => return (id, opcode),
                Err(MessageParseError::MissingData) => self.wait(),
                Err(e) => panic!("Malformed frame from the client: {e}"),
            }
        }
    }

    pub(crate) fn recv(&mut self, signature: &[ArgumentType]) -> Message<u32, OwnedFd> {
        loop {
            match self.reader.read_one_message(signature) {
                Ok(msg) => return msg,
                Err(MessageParseError::MissingData) | Err(MessageParseError::MissingFD) => {
                    self.wait()
                }
                Err(e) => panic!("Malformed frame from the client: {e}"),
            }
        }
    }

    fn wait(&mut self) {
        assert!(
            self.reader.socket().wait_readable(Some(Duration::from_secs(5))).unwrap(),
            "timed out waiting for the client"
        );
        self.reader.fill_incoming_buffers().unwrap();
    }
}

pub(crate) fn connect() -> (Backend, Peer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (client, server) = UnixStream::pair().unwrap();
    (Backend::connect(client), Peer::new(server))
}

/*
 * Object data recording what it receives
 */

#[derive(Default)]
pub(crate) struct RecordingData {
    pub(crate) events: Mutex<Vec<String>>,
    pub(crate) destroyed: AtomicBool,
    pub(crate) children: Mutex<Vec<(ObjectId, Arc<RecordingData>)>>,
}

impl RecordingData {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn child(&self, index: usize) -> (ObjectId, Arc<RecordingData>) {
        self.children.lock().unwrap()[index].clone()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl ObjectData for RecordingData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let name = msg.sender_id.interface().events[msg.opcode as usize].name;
        let args: Vec<String> = msg.args.iter().map(|arg| arg.to_string()).collect();
        self.events.lock().unwrap().push(format!("{}({})", name, args.join(", ")));
        msg.args.iter().find_map(|arg| match arg {
            Argument::NewId(id) => {
                let child = Arc::new(RecordingData::default());
                self.children.lock().unwrap().push((id.clone(), child.clone()));
                Some(child as Arc<dyn ObjectData>)
            }
            _ => None,
        })
    }

    fn destroyed(&self, _: ObjectId) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

// Create a test_global object on the client, faking a bind from the registry
pub(crate) fn bind_test_global(client: &Backend, peer: &mut Peer) -> (ObjectId, Arc<RecordingData>) {
    let registry = client
        .send_request(
            message!(client.display_id(), 1, [Argument::NewId(ObjectId::null())]),
            Some(Arc::new(RecordingData::default())),
            None,
        )
        .unwrap();
    let data = Arc::new(RecordingData::default());
    let global = client
        .send_request(
            message!(
                registry,
                0,
                [
                    Argument::Uint(1),
                    Argument::Str(Some(Box::new(CString::new("test_global").unwrap()))),
                    Argument::Uint(3),
                    Argument::NewId(ObjectId::null()),
                ]
            ),
            Some(data.clone()),
            Some((&TEST_GLOBAL_INTERFACE, 3)),
        )
        .unwrap();
    client.flush().unwrap();
    peer.recv(&[ArgumentType::NewId]);
    peer.recv(&[
        ArgumentType::Uint,
        ArgumentType::Str(AllowNull::No),
        ArgumentType::Uint,
        ArgumentType::NewId,
    ]);
    (global, data)
}
