//! `wl_output`

use std::{
    os::unix::io::OwnedFd,
    sync::{Arc, Mutex},
};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Message, WEnum},
};

use crate::{
    error::RequestError,
    protocol::{interfaces::WL_OUTPUT_INTERFACE, OutputMode, Subpixel, Transform},
    proxy::{args, proxy_type, EventArgs, ProxyInner},
    registry::global_type,
};

/// Geometry of an output, as sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGeometry {
    /// Position in the global compositor space
    pub x: i32,
    /// Position in the global compositor space
    pub y: i32,
    /// Physical width in millimeters
    pub physical_width: i32,
    /// Physical height in millimeters
    pub physical_height: i32,
    /// Subpixel orientation
    pub subpixel: WEnum<Subpixel>,
    /// Manufacturer
    pub make: String,
    /// Model
    pub model: String,
    /// Transform of the output content
    pub transform: WEnum<Transform>,
}

/// A video mode of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// Flags of the mode
    pub flags: OutputMode,
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Refresh rate in mHz
    pub refresh: i32,
}

/// The known properties of an output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputInfo {
    /// Geometry
    pub geometry: Option<OutputGeometry>,
    /// Advertised modes
    pub modes: Vec<Mode>,
    /// Scale factor
    pub scale: i32,
    /// Name, from version 4
    pub name: Option<String>,
    /// Description, from version 4
    pub description: Option<String>,
}

/// Listener for the events of an [`Output`]
///
/// From version 2, property events are followed by `done` once a consistent set was sent.
pub trait OutputListener: Send + Sync {
    /// Geometry of the output
    fn geometry(&self, output: &Output, geometry: &OutputGeometry) {
        let _ = (output, geometry);
    }

    /// A mode of the output
    fn mode(&self, output: &Output, mode: Mode) {
        let _ = (output, mode);
    }

    /// All properties were sent
    fn done(&self, output: &Output) {
        let _ = output;
    }

    /// Scale factor of the output
    fn scale(&self, output: &Output, factor: i32) {
        let _ = (output, factor);
    }

    /// Name of the output
    fn name(&self, output: &Output, name: &str) {
        let _ = (output, name);
    }

    /// Description of the output
    fn description(&self, output: &Output, description: &str) {
        let _ = (output, description);
    }
}

impl OutputListener for () {}

pub(crate) struct OutputData {
    pub(crate) version: u32,
    // properties are double-buffered behind the done event from version 2
    pending: Mutex<OutputInfo>,
    info: Mutex<OutputInfo>,
    listener: Box<dyn OutputListener>,
}

impl OutputData {
    fn update(&self, f: impl FnOnce(&mut OutputInfo)) {
        f(&mut self.pending.lock().unwrap());
        if self.version < 2 {
            self.publish();
        }
    }

    fn publish(&self) {
        let pending = self.pending.lock().unwrap().clone();
        *self.info.lock().unwrap() = pending;
    }
}

impl ObjectData for OutputData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let output = Output::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        match opcode {
            0 => {
                let geometry = OutputGeometry {
                    x: args.int(),
                    y: args.int(),
                    physical_width: args.int(),
                    physical_height: args.int(),
                    subpixel: WEnum::from(args.int() as u32),
                    make: args.string(),
                    model: args.string(),
                    transform: WEnum::from(args.int() as u32),
                };
                self.update(|info| info.geometry = Some(geometry.clone()));
                self.listener.geometry(&output, &geometry);
            }
            1 => {
                let mode = Mode {
                    flags: OutputMode::from_bits_truncate(args.uint()),
                    width: args.int(),
                    height: args.int(),
                    refresh: args.int(),
                };
                self.update(|info| {
                    if mode.flags.contains(OutputMode::Current) {
                        for m in &mut info.modes {
                            m.flags.remove(OutputMode::Current);
                        }
                    }
                    info.modes.retain(|m| (m.width, m.height, m.refresh) != (mode.width, mode.height, mode.refresh));
                    info.modes.push(mode);
                });
                self.listener.mode(&output, mode);
            }
            2 => {
                self.publish();
                self.listener.done(&output);
            }
            3 => {
                let factor = args.int();
                self.update(|info| info.scale = factor);
                self.listener.scale(&output, factor);
            }
            4 => {
                let name = args.string();
                self.update(|info| info.name = Some(name.clone()));
                self.listener.name(&output, &name);
            }
            5 => {
                let description = args.string();
                self.update(|info| info.description = Some(description.clone()));
                self.listener.description(&output, &description);
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_output` global, a region of the compositor space shown on a screen
#[derive(Clone)]
pub struct Output {
    inner: ProxyInner,
    data: Arc<OutputData>,
}

proxy_type!(Output, OutputData, WL_OUTPUT_INTERFACE);
global_type!(Output, Box<dyn OutputListener>, |version, listener| Arc::new(OutputData {
    version,
    pending: Mutex::new(OutputInfo { scale: 1, ..Default::default() }),
    info: Mutex::new(OutputInfo { scale: 1, ..Default::default() }),
    listener,
}));

impl Output {
    /// The properties of the output as of the last `done` event
    ///
    /// With version 1 there is no `done` event and updates are visible right away.
    pub fn info(&self) -> OutputInfo {
        self.data.info.lock().unwrap().clone()
    }

    /// Release the output object
    ///
    /// Requires version 3.
    pub fn release(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())
    }
}
