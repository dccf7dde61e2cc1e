//! Clipboard and drag-and-drop: `wl_data_device_manager`, `wl_data_device`,
//! `wl_data_source` and `wl_data_offer`
//!
//! Sources and offers follow the state machines of [`source`] and [`offer`]. A request
//! the machine refuses is never sent.

use std::{
    os::unix::io::{AsRawFd, BorrowedFd, OwnedFd},
    sync::{Arc, Mutex},
};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Argument, Message},
    smallvec::smallvec,
};

use crate::{
    error::RequestError,
    protocol::{
        interfaces::{
            WL_DATA_DEVICE_INTERFACE, WL_DATA_DEVICE_MANAGER_INTERFACE, WL_DATA_OFFER_INTERFACE,
            WL_DATA_SOURCE_INTERFACE,
        },
        DndAction,
    },
    proxy::{args, new_id, object_arg, object_data, proxy_type, str_arg, EventArgs, ProxyInner},
    registry::global_type,
    seat::Seat,
    surface::{tree::RoleKind, Surface},
};

pub mod offer;
pub mod source;

use offer::{OfferMachine, OfferState};
use source::{SourceMachine, SourceState, SourceUse};

pub(crate) struct DataDeviceManagerData {
    pub(crate) version: u32,
}

impl ObjectData for DataDeviceManagerData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        _: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        unreachable!("wl_data_device_manager has no events")
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// The `wl_data_device_manager` global
#[derive(Clone)]
pub struct DataDeviceManager {
    inner: ProxyInner,
    data: Arc<DataDeviceManagerData>,
}

proxy_type!(DataDeviceManager, DataDeviceManagerData, WL_DATA_DEVICE_MANAGER_INTERFACE);
global_type!(DataDeviceManager, (), |version, ()| Arc::new(DataDeviceManagerData { version }));

impl DataDeviceManager {
    /// Create a data source, to offer data to other clients
    pub fn create_data_source(
        &self,
        listener: impl DataSourceListener + 'static,
    ) -> Result<DataSource, RequestError> {
        let data = Arc::new(DataSourceData {
            version: self.inner.version,
            machine: Mutex::new(SourceMachine::new()),
            listener: Box::new(listener),
        });
        let inner = self.inner.send_constructor(0, smallvec![new_id()], data.clone(), None)?;
        Ok(DataSource { inner, data })
    }

    /// Get the data device of a seat
    pub fn get_data_device(
        &self,
        seat: &Seat,
        listener: impl DataDeviceListener + 'static,
    ) -> Result<DataDevice, RequestError> {
        let data = Arc::new(DataDeviceData {
            version: self.inner.version,
            drag_offer: Mutex::new(None),
            selection: Mutex::new(None),
            listener: Box::new(listener),
        });
        let inner = self.inner.send_constructor(
            1,
            smallvec![new_id(), object_arg(Some(seat))],
            data.clone(),
            None,
        )?;
        Ok(DataDevice { inner, data })
    }
}

/// Listener for the events of a [`DataSource`]
pub trait DataSourceListener: Send + Sync {
    /// A target accepted a mime type, or none
    fn target(&self, source: &DataSource, mime_type: Option<&str>) {
        let _ = (source, mime_type);
    }

    /// A client requests the data, to be written to `fd` which must then be closed
    fn send(&self, source: &DataSource, mime_type: &str, fd: OwnedFd) {
        let _ = (source, mime_type, fd);
    }

    /// The source was replaced or the operation cancelled, it should be destroyed
    fn cancelled(&self, source: &DataSource) {
        let _ = source;
    }

    /// The user dropped on a target, from version 3
    fn dnd_drop_performed(&self, source: &DataSource) {
        let _ = source;
    }

    /// The target finished the transfer, from version 3
    fn dnd_finished(&self, source: &DataSource) {
        let _ = source;
    }

    /// The compositor selected an action, from version 3
    fn action(&self, source: &DataSource, action: DndAction) {
        let _ = (source, action);
    }
}

impl DataSourceListener for () {}

pub(crate) struct DataSourceData {
    pub(crate) version: u32,
    machine: Mutex<SourceMachine>,
    listener: Box<dyn DataSourceListener>,
}

impl ObjectData for DataSourceData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let source = DataSource::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        match opcode {
            0 => {
                let mime_type = args.opt_string();
                self.machine.lock().unwrap().on_target(mime_type.clone());
                self.listener.target(&source, mime_type.as_deref());
            }
            1 => {
                let mime_type = args.string();
                self.listener.send(&source, &mime_type, args.fd());
            }
            2 => {
                self.machine.lock().unwrap().on_cancelled();
                self.listener.cancelled(&source);
            }
            3 => {
                self.machine.lock().unwrap().on_drop_performed();
                self.listener.dnd_drop_performed(&source);
            }
            4 => {
                self.machine.lock().unwrap().on_finished();
                self.listener.dnd_finished(&source);
            }
            5 => {
                let action = DndAction::from_bits_truncate(args.uint());
                self.machine.lock().unwrap().on_action(action);
                self.listener.action(&source, action);
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_data_source`, data offered by this client
#[derive(Clone)]
pub struct DataSource {
    inner: ProxyInner,
    data: Arc<DataSourceData>,
}

proxy_type!(DataSource, DataSourceData, WL_DATA_SOURCE_INTERFACE);

impl DataSource {
    /// Current state of the source
    pub fn state(&self) -> SourceState {
        self.data.machine.lock().unwrap().state()
    }

    /// Offered mime types
    pub fn mime_types(&self) -> Vec<String> {
        self.data.machine.lock().unwrap().mime_types().to_vec()
    }

    /// Mime type accepted by the current drop target
    pub fn target(&self) -> Option<String> {
        self.data.machine.lock().unwrap().target().map(str::to_owned)
    }

    /// Action selected by the compositor
    pub fn action(&self) -> DndAction {
        self.data.machine.lock().unwrap().action()
    }

    /// Offer a mime type
    ///
    /// Offering the same type again does nothing.
    pub fn offer(&self, mime_type: &str) -> Result<(), RequestError> {
        let arg = str_arg(mime_type)?;
        self.transition(
            |machine| machine.offer(mime_type),
            |new| if new { self.inner.send(0, smallvec![arg]) } else { Ok(()) },
        )
    }

    /// Set the actions available for drag-and-drop
    ///
    /// Allowed once, before the source is used. Requires version 3.
    pub fn set_actions(&self, actions: DndAction) -> Result<(), RequestError> {
        self.transition(
            |machine| machine.set_actions(actions.bits()),
            |actions| self.inner.send(2, smallvec![Argument::Uint(actions.bits())]),
        )
    }

    /// Destroy the source
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(1, args())
    }

    // Run a state machine step, and send the matching request only if the step
    // succeeds. The machine is only updated once the request was sent.
    fn transition<T>(
        &self,
        step: impl FnOnce(&mut SourceMachine) -> Result<T, RequestError>,
        send: impl FnOnce(T) -> Result<(), RequestError>,
    ) -> Result<(), RequestError> {
        let mut machine = self.data.machine.lock().unwrap();
        let mut next = machine.clone();
        let value = step(&mut next)?;
        send(value)?;
        *machine = next;
        Ok(())
    }
}

/// Listener for the events of a [`DataDevice`]
pub trait DataDeviceListener: Send + Sync {
    /// A new offer was introduced, its mime types follow
    ///
    /// This is the place to set the listener of the offer.
    fn data_offer(&self, device: &DataDevice, offer: &DataOffer) {
        let _ = (device, offer);
    }

    /// A drag entered one of our surfaces
    fn enter(
        &self,
        device: &DataDevice,
        serial: u32,
        surface: &Surface,
        x: f64,
        y: f64,
        offer: Option<&DataOffer>,
    ) {
        let _ = (device, serial, surface, x, y, offer);
    }

    /// The drag left our surface
    fn leave(&self, device: &DataDevice) {
        let _ = device;
    }

    /// The drag moved over our surface
    fn motion(&self, device: &DataDevice, time: u32, x: f64, y: f64) {
        let _ = (device, time, x, y);
    }

    /// The user dropped on our surface
    fn drop(&self, device: &DataDevice) {
        let _ = device;
    }

    /// The selection changed, `None` meaning it was cleared
    fn selection(&self, device: &DataDevice, offer: Option<&DataOffer>) {
        let _ = (device, offer);
    }
}

impl DataDeviceListener for () {}

// Offers are tracked by id and data rather than by handle, a handle would keep the
// backend alive from inside its own object map.
type OfferSlot = Mutex<Option<(ObjectId, Arc<DataOfferData>)>>;

pub(crate) struct DataDeviceData {
    pub(crate) version: u32,
    drag_offer: OfferSlot,
    selection: OfferSlot,
    listener: Box<dyn DataDeviceListener>,
}

impl DataDeviceData {
    fn offer_arg(backend: &Backend, args: &mut EventArgs) -> Option<(ObjectId, Arc<DataOfferData>)> {
        let id = args.object();
        if id.is_null() {
            return None;
        }
        let data = object_data::<DataOfferData>(backend, &id);
        if data.is_none() {
            crate::log_warn!("Data device event references unknown offer {id}.");
        }
        Some((id, data?))
    }
}

impl ObjectData for DataDeviceData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let device = DataDevice::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        let to_handle =
            |slot: &(ObjectId, Arc<DataOfferData>)| DataOffer::from_parts(backend, slot.0.clone(), slot.1.clone());
        match opcode {
            0 => {
                let id = args.object();
                let data = Arc::new(DataOfferData {
                    version: self.version,
                    machine: Mutex::new(OfferMachine::new()),
                    listener: Mutex::new(None),
                });
                let offer = DataOffer::from_parts(backend, id, data.clone());
                self.listener.data_offer(&device, &offer);
                return Some(data);
            }
            1 => {
                let serial = args.uint();
                let surface_id = args.object();
                let (x, y) = (args.fixed(), args.fixed());
                let offer = Self::offer_arg(backend, &mut args);
                if let Some((_, ref data)) = offer {
                    data.machine.lock().unwrap().on_enter();
                }
                *self.drag_offer.lock().unwrap() = offer.clone();
                let Some(surface) = Surface::from_id(backend, &surface_id) else {
                    crate::log_debug!("Ignoring enter event for dead surface {surface_id}.");
                    return None;
                };
                let offer = offer.as_ref().map(to_handle);
                self.listener.enter(&device, serial, &surface, x, y, offer.as_ref());
            }
            2 => {
                if let Some((_, data)) = self.drag_offer.lock().unwrap().take() {
                    data.machine.lock().unwrap().on_leave();
                }
                self.listener.leave(&device);
            }
            3 => {
                let time = args.uint();
                let (x, y) = (args.fixed(), args.fixed());
                self.listener.motion(&device, time, x, y);
            }
            4 => {
                if let Some((_, ref data)) = *self.drag_offer.lock().unwrap() {
                    data.machine.lock().unwrap().on_drop();
                }
                DataDeviceListener::drop(&*self.listener, &device);
            }
            5 => {
                let offer = Self::offer_arg(backend, &mut args);
                if let Some((_, ref data)) = offer {
                    data.machine.lock().unwrap().on_selection();
                }
                *self.selection.lock().unwrap() = offer.clone();
                let offer = offer.as_ref().map(to_handle);
                self.listener.selection(&device, offer.as_ref());
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_data_device`, the clipboard and drag-and-drop interface of a seat
#[derive(Clone)]
pub struct DataDevice {
    inner: ProxyInner,
    data: Arc<DataDeviceData>,
}

proxy_type!(DataDevice, DataDeviceData, WL_DATA_DEVICE_INTERFACE);

impl DataDevice {
    /// Start a drag-and-drop operation
    ///
    /// Without a source, the drag only happens within this client. The icon surface
    /// gets the drag icon role.
    pub fn start_drag(
        &self,
        source: Option<&DataSource>,
        origin: &Surface,
        icon: Option<&Surface>,
        serial: u32,
    ) -> Result<(), RequestError> {
        if let Some(icon) = icon {
            icon.node().set_role(RoleKind::DragIcon)?;
        }
        let args = smallvec![
            object_arg(source),
            object_arg(Some(origin)),
            object_arg(icon),
            Argument::Uint(serial)
        ];
        match source {
            Some(source) => source.transition(
                |machine| machine.start(SourceUse::Drag),
                |()| self.inner.send(0, args),
            ),
            None => self.inner.send(0, args),
        }
    }

    /// Set the selection, `None` clearing it
    ///
    /// A source with actions cannot be used for the selection.
    pub fn set_selection(&self, source: Option<&DataSource>, serial: u32) -> Result<(), RequestError> {
        let args = smallvec![object_arg(source), Argument::Uint(serial)];
        match source {
            Some(source) => source.transition(
                |machine| machine.start(SourceUse::Selection),
                |()| self.inner.send(1, args),
            ),
            None => self.inner.send(1, args),
        }
    }

    /// The offer of the drag currently over our surfaces
    pub fn drag_offer(&self) -> Option<DataOffer> {
        let slot = self.data.drag_offer.lock().unwrap();
        slot.as_ref().map(|(id, data)| DataOffer::from_parts(&self.inner.backend, id.clone(), data.clone()))
    }

    /// The offer of the current selection
    pub fn selection(&self) -> Option<DataOffer> {
        let slot = self.data.selection.lock().unwrap();
        slot.as_ref().map(|(id, data)| DataOffer::from_parts(&self.inner.backend, id.clone(), data.clone()))
    }

    /// Release the data device
    ///
    /// Requires version 2.
    pub fn release(&self) -> Result<(), RequestError> {
        self.inner.send(2, args())
    }
}

/// Listener for the events of a [`DataOffer`]
pub trait DataOfferListener: Send + Sync {
    /// The source offers a mime type
    fn offer(&self, offer: &DataOffer, mime_type: &str) {
        let _ = (offer, mime_type);
    }

    /// Actions available from the source, from version 3
    fn source_actions(&self, offer: &DataOffer, actions: DndAction) {
        let _ = (offer, actions);
    }

    /// The compositor selected an action, from version 3
    fn action(&self, offer: &DataOffer, action: DndAction) {
        let _ = (offer, action);
    }
}

impl DataOfferListener for () {}

pub(crate) struct DataOfferData {
    pub(crate) version: u32,
    machine: Mutex<OfferMachine>,
    // offers are created by the server, the listener is set afterwards
    listener: Mutex<Option<Arc<dyn DataOfferListener>>>,
}

impl ObjectData for DataOfferData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let offer = DataOffer::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let mut args = EventArgs::new(msg);
        let listener = self.listener.lock().unwrap().clone();
        match opcode {
            0 => {
                let mime_type = args.string();
                self.machine.lock().unwrap().on_offer(mime_type.clone());
                if let Some(listener) = listener {
                    listener.offer(&offer, &mime_type);
                }
            }
            1 => {
                let actions = DndAction::from_bits_truncate(args.uint());
                self.machine.lock().unwrap().on_source_actions(actions);
                if let Some(listener) = listener {
                    listener.source_actions(&offer, actions);
                }
            }
            2 => {
                let action = DndAction::from_bits_truncate(args.uint());
                self.machine.lock().unwrap().on_action(action);
                if let Some(listener) = listener {
                    listener.action(&offer, action);
                }
            }
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {
        self.machine.lock().unwrap().destroy();
    }
}

/// A `wl_data_offer`, data offered by another client
#[derive(Clone)]
pub struct DataOffer {
    inner: ProxyInner,
    data: Arc<DataOfferData>,
}

proxy_type!(DataOffer, DataOfferData, WL_DATA_OFFER_INTERFACE);

impl DataOffer {
    /// Set the listener of this offer, replacing the previous one
    pub fn set_listener(&self, listener: impl DataOfferListener + 'static) {
        *self.data.listener.lock().unwrap() = Some(Arc::new(listener));
    }

    /// Current state of the offer
    pub fn state(&self) -> OfferState {
        self.data.machine.lock().unwrap().state()
    }

    /// Mime types offered by the source
    pub fn mime_types(&self) -> Vec<String> {
        self.data.machine.lock().unwrap().mime_types().to_vec()
    }

    /// Actions advertised by the source, if known
    pub fn source_actions(&self) -> Option<DndAction> {
        self.data.machine.lock().unwrap().source_actions()
    }

    /// Action selected by the compositor
    pub fn action(&self) -> DndAction {
        self.data.machine.lock().unwrap().action()
    }

    /// Accept a mime type, `None` refusing the data
    pub fn accept(&self, serial: u32, mime_type: Option<&str>) -> Result<(), RequestError> {
        let mime_arg = match mime_type {
            Some(mime_type) => str_arg(mime_type)?,
            None => Argument::Str(None),
        };
        self.transition(
            |machine| machine.accept(mime_type),
            || self.inner.send(0, smallvec![Argument::Uint(serial), mime_arg]),
        )
    }

    /// Request the data in a mime type, to be written by the source in `fd`
    ///
    /// `fd` is usually the write end of a pipe, to be closed by this client once sent.
    pub fn receive(&self, mime_type: &str, fd: BorrowedFd<'_>) -> Result<(), RequestError> {
        let mime_arg = str_arg(mime_type)?;
        self.data.machine.lock().unwrap().check_receive()?;
        self.inner.send(1, smallvec![mime_arg, Argument::Fd(fd.as_raw_fd())])
    }

    /// Complete a drag-and-drop transfer
    ///
    /// Requires an accepted mime type and a selected action. Requires version 3.
    pub fn finish(&self) -> Result<(), RequestError> {
        self.transition(|machine| machine.finish(), || self.inner.send(3, args()))
    }

    /// Set the accepted actions and the preferred one
    ///
    /// Requires version 3.
    pub fn set_actions(&self, actions: DndAction, preferred: DndAction) -> Result<(), RequestError> {
        self.transition(
            |machine| machine.set_actions(actions.bits(), preferred.bits()),
            || {
                self.inner.send(
                    4,
                    smallvec![Argument::Uint(actions.bits()), Argument::Uint(preferred.bits())],
                )
            },
        )
    }

    /// Destroy the offer
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(2, args())
    }

    fn transition(
        &self,
        step: impl FnOnce(&mut OfferMachine) -> Result<(), RequestError>,
        send: impl FnOnce() -> Result<(), RequestError>,
    ) -> Result<(), RequestError> {
        let mut machine = self.data.machine.lock().unwrap();
        let mut next = machine.clone();
        step(&mut next)?;
        send()?;
        *machine = next;
        Ok(())
    }
}
