//! `wl_seat` and its input devices

use std::{
    os::unix::io::OwnedFd,
    sync::{Arc, Mutex},
};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Argument, Message, WEnum},
    smallvec::smallvec,
};

use crate::{
    error::RequestError,
    protocol::{
        interfaces::{
            WL_KEYBOARD_INTERFACE, WL_POINTER_INTERFACE, WL_SEAT_INTERFACE, WL_TOUCH_INTERFACE,
        },
        Axis, AxisSource, ButtonState, Capability, KeyState, KeymapFormat,
    },
    proxy::{args, new_id, object_arg, proxy_type, EventArgs, ProxyInner},
    registry::global_type,
    surface::{tree::RoleKind, Surface},
};

/// Listener for the events of a [`Seat`]
pub trait SeatListener: Send + Sync {
    /// The input devices of the seat changed
    fn capabilities(&self, seat: &Seat, capabilities: Capability) {
        let _ = (seat, capabilities);
    }

    /// Name of the seat, from version 2
    fn name(&self, seat: &Seat, name: &str) {
        let _ = (seat, name);
    }
}

impl SeatListener for () {}

pub(crate) struct SeatData {
    pub(crate) version: u32,
    capabilities: Mutex<Capability>,
    name: Mutex<Option<String>>,
    listener: Box<dyn SeatListener>,
}

impl ObjectData for SeatData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let seat = Seat::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        match opcode {
            0 => {
                let capabilities = Capability::from_bits_truncate(args.uint());
                *self.capabilities.lock().unwrap() = capabilities;
                self.listener.capabilities(&seat, capabilities);
            }
            1 => {
                let name = args.string();
                *self.name.lock().unwrap() = Some(name.clone());
                self.listener.name(&seat, &name);
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_seat` global, a group of input devices
#[derive(Clone)]
pub struct Seat {
    inner: ProxyInner,
    data: Arc<SeatData>,
}

proxy_type!(Seat, SeatData, WL_SEAT_INTERFACE);
global_type!(Seat, Box<dyn SeatListener>, |version, listener| Arc::new(SeatData {
    version,
    capabilities: Mutex::new(Capability::empty()),
    name: Mutex::new(None),
    listener,
}));

impl Seat {
    /// The last advertised capabilities
    pub fn capabilities(&self) -> Capability {
        *self.data.capabilities.lock().unwrap()
    }

    /// The name of the seat, if advertised
    pub fn name(&self) -> Option<String> {
        self.data.name.lock().unwrap().clone()
    }

    /// Get the pointer of this seat
    pub fn get_pointer(&self, listener: impl PointerListener + 'static) -> Result<Pointer, RequestError> {
        let data = Arc::new(PointerData { version: self.inner.version, listener: Box::new(listener) });
        let inner = self.inner.send_constructor(0, smallvec![new_id()], data.clone(), None)?;
        Ok(Pointer { inner, data })
    }

    /// Get the keyboard of this seat
    pub fn get_keyboard(&self, listener: impl KeyboardListener + 'static) -> Result<Keyboard, RequestError> {
        let data = Arc::new(KeyboardData { version: self.inner.version, listener: Box::new(listener) });
        let inner = self.inner.send_constructor(1, smallvec![new_id()], data.clone(), None)?;
        Ok(Keyboard { inner, data })
    }

    /// Get the touch device of this seat
    pub fn get_touch(&self, listener: impl TouchListener + 'static) -> Result<Touch, RequestError> {
        let data = Arc::new(TouchData { version: self.inner.version, listener: Box::new(listener) });
        let inner = self.inner.send_constructor(2, smallvec![new_id()], data.clone(), None)?;
        Ok(Touch { inner, data })
    }

    /// Release the seat object
    ///
    /// Requires version 5.
    pub fn release(&self) -> Result<(), RequestError> {
        self.inner.send(3, args())
    }
}

// Resolve the surface argument of an input event, which may have been destroyed
// by this client in the meantime
fn surface_arg(backend: &Backend, args: &mut EventArgs, event: &str) -> Option<Surface> {
    let id = args.object();
    let surface = Surface::from_id(backend, &id);
    if surface.is_none() {
        crate::log_debug!("Ignoring {event} event for dead surface {id}.");
    }
    surface
}

/// Listener for the events of a [`Pointer`]
///
/// Positions are in surface coordinates.
pub trait PointerListener: Send + Sync {
    /// The pointer entered a surface
    fn enter(&self, pointer: &Pointer, serial: u32, surface: &Surface, x: f64, y: f64) {
        let _ = (pointer, serial, surface, x, y);
    }

    /// The pointer left a surface
    fn leave(&self, pointer: &Pointer, serial: u32, surface: &Surface) {
        let _ = (pointer, serial, surface);
    }

    /// The pointer moved
    fn motion(&self, pointer: &Pointer, time: u32, x: f64, y: f64) {
        let _ = (pointer, time, x, y);
    }

    /// A button was pressed or released
    fn button(&self, pointer: &Pointer, serial: u32, time: u32, button: u32, state: WEnum<ButtonState>) {
        let _ = (pointer, serial, time, button, state);
    }

    /// Scroll along an axis
    fn axis(&self, pointer: &Pointer, time: u32, axis: WEnum<Axis>, value: f64) {
        let _ = (pointer, time, axis, value);
    }

    /// End of a group of events, from version 5
    fn frame(&self, pointer: &Pointer) {
        let _ = pointer;
    }

    /// Source of the following axis events, from version 5
    fn axis_source(&self, pointer: &Pointer, source: WEnum<AxisSource>) {
        let _ = (pointer, source);
    }

    /// Scrolling stopped on an axis, from version 5
    fn axis_stop(&self, pointer: &Pointer, time: u32, axis: WEnum<Axis>) {
        let _ = (pointer, time, axis);
    }

    /// Discrete steps of the following axis event, from version 5
    fn axis_discrete(&self, pointer: &Pointer, axis: WEnum<Axis>, discrete: i32) {
        let _ = (pointer, axis, discrete);
    }
}

impl PointerListener for () {}

pub(crate) struct PointerData {
    pub(crate) version: u32,
    listener: Box<dyn PointerListener>,
}

impl ObjectData for PointerData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let pointer = Pointer::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        let listener = &self.listener;
        match opcode {
            0 => {
                let serial = args.uint();
                let Some(surface) = surface_arg(backend, &mut args, "enter") else { return None };
                let (x, y) = (args.fixed(), args.fixed());
                listener.enter(&pointer, serial, &surface, x, y);
            }
            1 => {
                let serial = args.uint();
                let Some(surface) = surface_arg(backend, &mut args, "leave") else { return None };
                listener.leave(&pointer, serial, &surface);
            }
            2 => {
                let time = args.uint();
                let (x, y) = (args.fixed(), args.fixed());
                listener.motion(&pointer, time, x, y);
            }
            3 => {
                let (serial, time, button) = (args.uint(), args.uint(), args.uint());
                listener.button(&pointer, serial, time, button, WEnum::from(args.uint()));
            }
            4 => {
                let time = args.uint();
                let axis = WEnum::from(args.uint());
                listener.axis(&pointer, time, axis, args.fixed());
            }
            5 => listener.frame(&pointer),
            6 => listener.axis_source(&pointer, WEnum::from(args.uint())),
            7 => {
                let time = args.uint();
                listener.axis_stop(&pointer, time, WEnum::from(args.uint()));
            }
            8 => {
                let axis = WEnum::from(args.uint());
                listener.axis_discrete(&pointer, axis, args.int());
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_pointer`
#[derive(Clone)]
pub struct Pointer {
    inner: ProxyInner,
    data: Arc<PointerData>,
}

proxy_type!(Pointer, PointerData, WL_POINTER_INTERFACE);

impl Pointer {
    /// Set the cursor image, `None` hiding it
    ///
    /// The surface gets the cursor role, it must not have another one.
    pub fn set_cursor(
        &self,
        serial: u32,
        surface: Option<&Surface>,
        hotspot_x: i32,
        hotspot_y: i32,
    ) -> Result<(), RequestError> {
        if let Some(surface) = surface {
            surface.node().set_role(RoleKind::Cursor)?;
        }
        self.inner.send(
            0,
            smallvec![
                Argument::Uint(serial),
                object_arg(surface),
                Argument::Int(hotspot_x),
                Argument::Int(hotspot_y)
            ],
        )
    }

    /// Release the pointer object
    ///
    /// Requires version 3.
    pub fn release(&self) -> Result<(), RequestError> {
        self.inner.send(1, args())
    }
}

/// Listener for the events of a [`Keyboard`]
pub trait KeyboardListener: Send + Sync {
    /// The keymap to use, shared through a file descriptor
    fn keymap(&self, keyboard: &Keyboard, format: WEnum<KeymapFormat>, fd: OwnedFd, size: u32) {
        let _ = (keyboard, format, fd, size);
    }

    /// A surface got the keyboard focus, with the keys currently pressed
    fn enter(&self, keyboard: &Keyboard, serial: u32, surface: &Surface, keys: &[u32]) {
        let _ = (keyboard, serial, surface, keys);
    }

    /// A surface lost the keyboard focus
    fn leave(&self, keyboard: &Keyboard, serial: u32, surface: &Surface) {
        let _ = (keyboard, serial, surface);
    }

    /// A key was pressed or released
    fn key(&self, keyboard: &Keyboard, serial: u32, time: u32, key: u32, state: WEnum<KeyState>) {
        let _ = (keyboard, serial, time, key, state);
    }

    /// The modifier state changed
    fn modifiers(
        &self,
        keyboard: &Keyboard,
        serial: u32,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    ) {
        let _ = (keyboard, serial, depressed, latched, locked, group);
    }

    /// Key repeat rate (per second) and delay (ms), from version 4
    fn repeat_info(&self, keyboard: &Keyboard, rate: i32, delay: i32) {
        let _ = (keyboard, rate, delay);
    }
}

impl KeyboardListener for () {}

pub(crate) struct KeyboardData {
    pub(crate) version: u32,
    listener: Box<dyn KeyboardListener>,
}

impl ObjectData for KeyboardData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let keyboard = Keyboard::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        let listener = &self.listener;
        match opcode {
            0 => {
                let format = WEnum::from(args.uint());
                let fd = args.fd();
                listener.keymap(&keyboard, format, fd, args.uint());
            }
            1 => {
                let serial = args.uint();
                let Some(surface) = surface_arg(backend, &mut args, "enter") else { return None };
                let keys = args
                    .array()
                    .chunks_exact(4)
                    .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect::<Vec<_>>();
                listener.enter(&keyboard, serial, &surface, &keys);
            }
            2 => {
                let serial = args.uint();
                let Some(surface) = surface_arg(backend, &mut args, "leave") else { return None };
                listener.leave(&keyboard, serial, &surface);
            }
            3 => {
                let (serial, time, key) = (args.uint(), args.uint(), args.uint());
                listener.key(&keyboard, serial, time, key, WEnum::from(args.uint()));
            }
            4 => {
                let (serial, depressed, latched) = (args.uint(), args.uint(), args.uint());
                let (locked, group) = (args.uint(), args.uint());
                listener.modifiers(&keyboard, serial, depressed, latched, locked, group);
            }
            5 => {
                let rate = args.int();
                listener.repeat_info(&keyboard, rate, args.int());
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_keyboard`
#[derive(Clone)]
pub struct Keyboard {
    inner: ProxyInner,
    data: Arc<KeyboardData>,
}

proxy_type!(Keyboard, KeyboardData, WL_KEYBOARD_INTERFACE);

impl Keyboard {
    /// Release the keyboard object
    ///
    /// Requires version 3.
    pub fn release(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())
    }
}

/// Listener for the events of a [`Touch`] device
pub trait TouchListener: Send + Sync {
    /// A new touch point appeared on a surface
    #[allow(clippy::too_many_arguments)]
    fn down(&self, touch: &Touch, serial: u32, time: u32, surface: &Surface, id: i32, x: f64, y: f64) {
        let _ = (touch, serial, time, surface, id, x, y);
    }

    /// A touch point disappeared
    fn up(&self, touch: &Touch, serial: u32, time: u32, id: i32) {
        let _ = (touch, serial, time, id);
    }

    /// A touch point moved
    fn motion(&self, touch: &Touch, time: u32, id: i32, x: f64, y: f64) {
        let _ = (touch, time, id, x, y);
    }

    /// End of a group of touch events
    fn frame(&self, touch: &Touch) {
        let _ = touch;
    }

    /// The compositor took over the touch sequence
    fn cancel(&self, touch: &Touch) {
        let _ = touch;
    }
}

impl TouchListener for () {}

pub(crate) struct TouchData {
    pub(crate) version: u32,
    listener: Box<dyn TouchListener>,
}

impl ObjectData for TouchData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let touch = Touch::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        let listener = &self.listener;
        match opcode {
            0 => {
                let (serial, time) = (args.uint(), args.uint());
                let Some(surface) = surface_arg(backend, &mut args, "down") else { return None };
                let id = args.int();
                let (x, y) = (args.fixed(), args.fixed());
                listener.down(&touch, serial, time, &surface, id, x, y);
            }
            1 => {
                let (serial, time) = (args.uint(), args.uint());
                listener.up(&touch, serial, time, args.int());
            }
            2 => {
                let (time, id) = (args.uint(), args.int());
                let (x, y) = (args.fixed(), args.fixed());
                listener.motion(&touch, time, id, x, y);
            }
            3 => listener.frame(&touch),
            4 => listener.cancel(&touch),
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_touch` device
#[derive(Clone)]
pub struct Touch {
    inner: ProxyInner,
    data: Arc<TouchData>,
}

proxy_type!(Touch, TouchData, WL_TOUCH_INTERFACE);

impl Touch {
    /// Release the touch object
    ///
    /// Requires version 3.
    pub fn release(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())
    }
}
