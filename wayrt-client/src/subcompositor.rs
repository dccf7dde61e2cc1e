//! `wl_subcompositor` and `wl_subsurface`

use std::{os::unix::io::OwnedFd, sync::Arc};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Argument, Message},
    smallvec::smallvec,
};

use crate::{
    error::RequestError,
    protocol::interfaces::{WL_SUBCOMPOSITOR_INTERFACE, WL_SUBSURFACE_INTERFACE},
    proxy::{args, new_id, object_arg, proxy_type, Proxy, ProxyInner},
    registry::global_type,
    surface::{
        tree::{self, CommitMode, SurfaceNode},
        Surface,
    },
};

pub(crate) struct SubcompositorData {
    pub(crate) version: u32,
}

impl ObjectData for SubcompositorData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        _: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        unreachable!("wl_subcompositor has no events")
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// The `wl_subcompositor` global
#[derive(Clone)]
pub struct Subcompositor {
    inner: ProxyInner,
    data: Arc<SubcompositorData>,
}

proxy_type!(Subcompositor, SubcompositorData, WL_SUBCOMPOSITOR_INTERFACE);
global_type!(Subcompositor, (), |version, ()| Arc::new(SubcompositorData { version }));

impl Subcompositor {
    /// Destroy the subcompositor object, existing sub-surfaces are not affected
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())
    }

    /// Make `surface` a sub-surface of `parent`
    ///
    /// Fails with [`RequestError::BadSurface`] if `surface` already has a role, or if
    /// `parent` is `surface` or one of its descendants.
    pub fn get_subsurface(&self, surface: &Surface, parent: &Surface) -> Result<Subsurface, RequestError> {
        let node = surface.node().clone();
        tree::add_subsurface(&node, parent.node())?;
        let data = Arc::new(SubsurfaceData { version: self.inner.version, node: node.clone() });
        let result = self.inner.send_constructor(
            1,
            smallvec![new_id(), object_arg(Some(surface)), object_arg(Some(parent))],
            data.clone(),
            None,
        );
        match result {
            Ok(inner) => Ok(Subsurface { inner, data }),
            Err(e) => {
                tree::remove_subsurface(&node);
                Err(e)
            }
        }
    }
}

pub(crate) struct SubsurfaceData {
    pub(crate) version: u32,
    node: Arc<SurfaceNode>,
}

impl ObjectData for SubsurfaceData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        _: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        unreachable!("wl_subsurface has no events")
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_subsurface`, the sub-surface role of a surface
///
/// Position and stacking changes are applied with the next applied state of the parent.
#[derive(Clone)]
pub struct Subsurface {
    inner: ProxyInner,
    data: Arc<SubsurfaceData>,
}

proxy_type!(Subsurface, SubsurfaceData, WL_SUBSURFACE_INTERFACE);

impl Subsurface {
    /// Remove the sub-surface role from the surface
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())?;
        tree::remove_subsurface(&self.data.node);
        Ok(())
    }

    /// Set the position relative to the parent's top-left corner
    pub fn set_position(&self, x: i32, y: i32) -> Result<(), RequestError> {
        self.inner.send(1, smallvec![Argument::Int(x), Argument::Int(y)])?;
        tree::set_position(&self.data.node, x, y);
        Ok(())
    }

    /// Place this sub-surface right above a sibling or its parent
    pub fn place_above(&self, sibling: &Surface) -> Result<(), RequestError> {
        self.check_alive()?;
        tree::place_above(&self.data.node, sibling.node())?;
        self.inner.send(2, smallvec![object_arg(Some(sibling))])
    }

    /// Place this sub-surface right below a sibling or its parent
    pub fn place_below(&self, sibling: &Surface) -> Result<(), RequestError> {
        self.check_alive()?;
        tree::place_below(&self.data.node, sibling.node())?;
        self.inner.send(3, smallvec![object_arg(Some(sibling))])
    }

    /// Switch to synchronized mode
    pub fn set_sync(&self) -> Result<(), RequestError> {
        self.inner.send(4, args())?;
        tree::set_mode(&self.data.node, CommitMode::Sync);
        Ok(())
    }

    /// Switch to desynchronized mode
    ///
    /// A cached commit is applied, unless an ancestor is still synchronized.
    pub fn set_desync(&self) -> Result<(), RequestError> {
        self.inner.send(5, args())?;
        tree::set_mode(&self.data.node, CommitMode::Desync);
        Ok(())
    }

    fn check_alive(&self) -> Result<(), RequestError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(wayrt_backend::client::InvalidId.into())
        }
    }
}
