//! `wl_compositor` and `wl_region`

use std::{
    os::unix::io::OwnedFd,
    sync::{Arc, Mutex},
};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Argument, Message},
    smallvec::smallvec,
};

use crate::{
    error::RequestError,
    protocol::interfaces::{WL_COMPOSITOR_INTERFACE, WL_REGION_INTERFACE},
    proxy::{args, new_id, proxy_type, ProxyInner},
    registry::global_type,
    surface::{
        state::{Rect, RegionOp, RegionSnapshot},
        Surface, SurfaceData, SurfaceListener,
    },
};

pub(crate) struct CompositorData {
    pub(crate) version: u32,
}

impl ObjectData for CompositorData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        _: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        unreachable!("wl_compositor has no events")
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// The `wl_compositor` global, factory of surfaces and regions
#[derive(Clone)]
pub struct Compositor {
    inner: ProxyInner,
    data: Arc<CompositorData>,
}

proxy_type!(Compositor, CompositorData, WL_COMPOSITOR_INTERFACE);
global_type!(Compositor, (), |version, ()| Arc::new(CompositorData { version }));

impl Compositor {
    /// Create a new surface
    pub fn create_surface(
        &self,
        listener: impl SurfaceListener + 'static,
    ) -> Result<Surface, RequestError> {
        let data = SurfaceData::new(self.inner.version, listener);
        let inner = self.inner.send_constructor(0, smallvec![new_id()], data.clone(), None)?;
        Ok(Surface::from_inner(inner, data))
    }

    /// Create a new region, initially empty
    pub fn create_region(&self) -> Result<Region, RequestError> {
        let data = Arc::new(RegionData { version: self.inner.version, ops: Mutex::new(Vec::new()) });
        let inner = self.inner.send_constructor(1, smallvec![new_id()], data.clone(), None)?;
        Ok(Region { inner, data })
    }
}

pub(crate) struct RegionData {
    pub(crate) version: u32,
    ops: Mutex<Vec<RegionOp>>,
}

impl ObjectData for RegionData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        _: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        unreachable!("wl_region has no events")
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_region`, a set of rectangles used for the opaque and input regions of surfaces
#[derive(Clone)]
pub struct Region {
    inner: ProxyInner,
    data: Arc<RegionData>,
}

proxy_type!(Region, RegionData, WL_REGION_INTERFACE);

impl Region {
    /// Destroy the region
    ///
    /// Surfaces it was set on keep their copy.
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())
    }

    /// Add a rectangle to the region
    pub fn add(&self, x: i32, y: i32, width: i32, height: i32) -> Result<(), RequestError> {
        self.inner.send(1, rect_args(x, y, width, height))?;
        self.data.ops.lock().unwrap().push(RegionOp::Add(Rect::new(x, y, width, height)));
        Ok(())
    }

    /// Subtract a rectangle from the region
    pub fn subtract(&self, x: i32, y: i32, width: i32, height: i32) -> Result<(), RequestError> {
        self.inner.send(2, rect_args(x, y, width, height))?;
        self.data.ops.lock().unwrap().push(RegionOp::Subtract(Rect::new(x, y, width, height)));
        Ok(())
    }

    /// The current content of the region
    pub fn snapshot(&self) -> RegionSnapshot {
        RegionSnapshot::new(self.data.ops.lock().unwrap().clone())
    }
}

pub(crate) fn rect_args(x: i32, y: i32, width: i32, height: i32) -> crate::proxy::RequestArgs {
    smallvec![Argument::Int(x), Argument::Int(y), Argument::Int(width), Argument::Int(height)]
}
