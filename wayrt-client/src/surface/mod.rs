//! `wl_surface` and its local state
//!
//! Every request changing the surface is mirrored in its [`SurfaceNode`], so that the
//! state the compositor will show after a commit can be inspected without asking it.
//! Invalid requests are refused before anything is sent.

use std::{os::unix::io::OwnedFd, sync::Arc};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Argument, Message, WEnum},
    smallvec::smallvec,
};

use crate::{
    compositor::{rect_args, Region},
    display::{Callback, CallbackData, CallbackListener},
    error::RequestError,
    output::Output,
    protocol::{interfaces::WL_SURFACE_INTERFACE, Transform},
    proxy::{args, new_id, object_arg, proxy_type, EventArgs, ProxyInner},
    shm::Buffer,
};

pub mod state;
pub mod tree;

use state::{CommitState, PendingState, Rect, SurfaceState};
use tree::SurfaceNode;

/// Listener for the events of a [`Surface`]
pub trait SurfaceListener: Send + Sync {
    /// Part of the surface became visible on an output
    fn enter(&self, surface: &Surface, output: &Output) {
        let _ = (surface, output);
    }

    /// The surface is no longer visible on an output
    fn leave(&self, surface: &Surface, output: &Output) {
        let _ = (surface, output);
    }
}

impl SurfaceListener for () {}

pub(crate) struct SurfaceData {
    pub(crate) version: u32,
    pub(crate) node: Arc<SurfaceNode>,
    listener: Box<dyn SurfaceListener>,
}

impl SurfaceData {
    pub(crate) fn new(version: u32, listener: impl SurfaceListener + 'static) -> Arc<Self> {
        Arc::new(Self { version, node: SurfaceNode::new(), listener: Box::new(listener) })
    }
}

impl ObjectData for SurfaceData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let surface = Surface::from_parts(backend, msg.sender_id.clone(), self.clone());
        let opcode = msg.opcode;
        let output_id = EventArgs::new(msg).object();
        let Some(output) = Output::from_id(backend, &output_id) else {
            crate::log_warn!("{} entered or left unknown output {}.", surface.inner.id, output_id);
            return None;
        };
        match opcode {
            0 => self.listener.enter(&surface, &output),
            1 => self.listener.leave(&surface, &output),
            _ => unreachable!(),
        }
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_surface`, created by [`Compositor::create_surface()`](crate::Compositor::create_surface)
#[derive(Clone)]
pub struct Surface {
    inner: ProxyInner,
    data: Arc<SurfaceData>,
}

proxy_type!(Surface, SurfaceData, WL_SURFACE_INTERFACE);

impl Surface {
    pub(crate) fn from_inner(inner: ProxyInner, data: Arc<SurfaceData>) -> Self {
        Self { inner, data }
    }

    /// The local state of this surface
    pub fn node(&self) -> &Arc<SurfaceNode> {
        &self.data.node
    }

    /// Destroy the surface
    ///
    /// A sub-surface role of this surface is dropped with it.
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())?;
        tree::remove_subsurface(&self.data.node);
        Ok(())
    }

    /// Attach a buffer, or detach the current one with `None`
    ///
    /// `x` and `y` are the position of the new buffer relative to the current one.
    pub fn attach(&self, buffer: Option<&Buffer>, x: i32, y: i32) -> Result<(), RequestError> {
        self.inner.send(1, smallvec![object_arg(buffer), Argument::Int(x), Argument::Int(y)])?;
        let buffer = buffer.map(Buffer::buffer_ref);
        self.data.node.update_pending(|pending| {
            pending.buffer = Some(buffer);
            pending.offset = Some((x, y));
        });
        Ok(())
    }

    /// Mark an area of the surface as changed, in surface coordinates
    pub fn damage(&self, x: i32, y: i32, width: i32, height: i32) -> Result<(), RequestError> {
        self.inner.send(2, rect_args(x, y, width, height))?;
        self.data.node.update_pending(|pending| pending.damage.push(Rect::new(x, y, width, height)));
        Ok(())
    }

    /// Mark an area of the surface as changed, in buffer coordinates
    ///
    /// Requires version 4.
    pub fn damage_buffer(&self, x: i32, y: i32, width: i32, height: i32) -> Result<(), RequestError> {
        self.inner.send(9, rect_args(x, y, width, height))?;
        self.data
            .node
            .update_pending(|pending| pending.buffer_damage.push(Rect::new(x, y, width, height)));
        Ok(())
    }

    /// Request a notification when it is a good time to draw a new frame
    ///
    /// The callback is part of the pending state: it only fires after a commit.
    pub fn frame(&self, listener: impl CallbackListener + 'static) -> Result<Callback, RequestError> {
        let data = CallbackData::new(self.inner.version, listener);
        let inner = self.inner.send_constructor(3, smallvec![new_id()], data.clone(), None)?;
        let id = inner.id.protocol_id();
        self.data.node.update_pending(|pending| pending.frame_callbacks.push(id));
        Ok(Callback::from_inner(inner, data))
    }

    /// Set the opaque region, `None` meaning empty
    pub fn set_opaque_region(&self, region: Option<&Region>) -> Result<(), RequestError> {
        self.inner.send(4, smallvec![object_arg(region)])?;
        let region = region.map(Region::snapshot);
        self.data.node.update_pending(|pending| pending.opaque_region = Some(region));
        Ok(())
    }

    /// Set the input region, `None` meaning infinite
    pub fn set_input_region(&self, region: Option<&Region>) -> Result<(), RequestError> {
        self.inner.send(5, smallvec![object_arg(region)])?;
        let region = region.map(Region::snapshot);
        self.data.node.update_pending(|pending| pending.input_region = Some(region));
        Ok(())
    }

    /// Apply the pending state
    ///
    /// For a synchronized sub-surface the state is cached until the parent's state
    /// is applied.
    pub fn commit(&self) -> Result<(), RequestError> {
        self.inner.send(6, args())?;
        tree::commit(&self.data.node);
        Ok(())
    }

    /// Set the transform of the attached buffers
    ///
    /// Requires version 2. Unknown transforms are refused.
    pub fn set_buffer_transform(
        &self,
        transform: impl Into<WEnum<Transform>>,
    ) -> Result<(), RequestError> {
        let transform = match transform.into() {
            WEnum::Value(transform) => transform,
            WEnum::Unknown(_) => return Err(RequestError::InvalidArgument("unknown buffer transform")),
        };
        self.inner.send(7, smallvec![Argument::Int(u32::from(transform) as i32)])?;
        self.data.node.update_pending(|pending| pending.transform = Some(transform));
        Ok(())
    }

    /// Set the scale of the attached buffers
    ///
    /// Requires version 3. The scale must be positive.
    pub fn set_buffer_scale(&self, scale: i32) -> Result<(), RequestError> {
        if scale <= 0 {
            return Err(RequestError::InvalidArgument("buffer scale must be positive"));
        }
        self.inner.send(8, smallvec![Argument::Int(scale)])?;
        self.data.node.update_pending(|pending| pending.scale = Some(scale));
        Ok(())
    }

    /// Changes made since the last commit
    pub fn pending_state(&self) -> PendingState {
        self.data.node.pending()
    }

    /// The state as of the last applied commit
    pub fn current_state(&self) -> SurfaceState {
        self.data.node.current()
    }

    /// Where the surface is in its commit cycle
    pub fn commit_state(&self) -> CommitState {
        self.data.node.commit_state()
    }

    /// Whether a commit is waiting for the parent of this sub-surface
    pub fn has_cached_state(&self) -> bool {
        self.data.node.has_cached_state()
    }
}
