//! Shared memory buffers: `wl_shm`, `wl_shm_pool` and `wl_buffer`

use std::{
    os::unix::io::{AsRawFd, BorrowedFd, OwnedFd},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc, Mutex,
    },
};

use wayrt_backend::{
    client::{Backend, ObjectData, ObjectId},
    protocol::{Argument, Message, WEnum},
    smallvec::smallvec,
};

use crate::{
    error::RequestError,
    protocol::{
        interfaces::{WL_BUFFER_INTERFACE, WL_SHM_INTERFACE, WL_SHM_POOL_INTERFACE},
        ShmFormat,
    },
    proxy::{args, new_id, proxy_type, EventArgs, ProxyInner},
    registry::global_type,
    surface::state::BufferRef,
};

/// Listener for the events of [`Shm`]
pub trait ShmListener: Send + Sync {
    /// The server supports this pixel format
    fn format(&self, shm: &Shm, format: WEnum<ShmFormat>) {
        let _ = (shm, format);
    }
}

impl ShmListener for () {}

pub(crate) struct ShmData {
    pub(crate) version: u32,
    formats: Mutex<Vec<WEnum<ShmFormat>>>,
    listener: Box<dyn ShmListener>,
}

impl ObjectData for ShmData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let shm = Shm::from_parts(backend, msg.sender_id.clone(), self.clone());
        let format = WEnum::from(EventArgs::new(msg).uint());
        self.formats.lock().unwrap().push(format);
        self.listener.format(&shm, format);
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// The `wl_shm` global
#[derive(Clone)]
pub struct Shm {
    inner: ProxyInner,
    data: Arc<ShmData>,
}

proxy_type!(Shm, ShmData, WL_SHM_INTERFACE);
global_type!(Shm, Box<dyn ShmListener>, |version, listener| Arc::new(ShmData {
    version,
    formats: Mutex::new(Vec::new()),
    listener,
}));

impl Shm {
    /// The formats advertised by the server so far
    pub fn formats(&self) -> Vec<WEnum<ShmFormat>> {
        self.data.formats.lock().unwrap().clone()
    }

    /// Create a pool from a shared memory file
    ///
    /// The file descriptor is duplicated by the kernel when sent, the caller keeps
    /// ownership of `fd`.
    pub fn create_pool(&self, fd: BorrowedFd<'_>, size: i32) -> Result<ShmPool, RequestError> {
        if size <= 0 {
            return Err(RequestError::InvalidArgument("pool size must be positive"));
        }
        let data = Arc::new(ShmPoolData { version: self.inner.version, size: AtomicI32::new(size) });
        let inner = self.inner.send_constructor(
            0,
            smallvec![new_id(), Argument::Fd(fd.as_raw_fd()), Argument::Int(size)],
            data.clone(),
            None,
        )?;
        Ok(ShmPool { inner, data })
    }
}

pub(crate) struct ShmPoolData {
    pub(crate) version: u32,
    size: AtomicI32,
}

impl ObjectData for ShmPoolData {
    fn event(
        self: Arc<Self>,
        _: &Backend,
        _: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        unreachable!("wl_shm_pool has no events")
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_shm_pool`, a shared memory area buffers are carved from
#[derive(Clone)]
pub struct ShmPool {
    inner: ProxyInner,
    data: Arc<ShmPoolData>,
}

proxy_type!(ShmPool, ShmPoolData, WL_SHM_POOL_INTERFACE);

impl ShmPool {
    /// Current size of the pool in bytes
    pub fn size(&self) -> i32 {
        self.data.size.load(Ordering::Acquire)
    }

    /// Create a buffer from a part of the pool
    ///
    /// The buffer must fit in the pool: `offset + stride * height <= size`, and the
    /// stride must hold at least `width` pixels of 4 bytes.
    pub fn create_buffer(
        &self,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: ShmFormat,
        listener: impl BufferListener + 'static,
    ) -> Result<Buffer, RequestError> {
        if width <= 0 || height <= 0 {
            return Err(RequestError::InvalidArgument("buffer size must be positive"));
        }
        if offset < 0 || stride < width.saturating_mul(4) {
            return Err(RequestError::InvalidArgument("invalid buffer offset or stride"));
        }
        let end = offset as i64 + stride as i64 * height as i64;
        if end > self.size() as i64 {
            return Err(RequestError::InvalidArgument("buffer does not fit in the pool"));
        }
        let data = Arc::new(BufferData {
            version: self.inner.version,
            width,
            height,
            stride,
            format,
            busy: Arc::new(AtomicBool::new(false)),
            listener: Box::new(listener),
        });
        let inner = self.inner.send_constructor(
            0,
            smallvec![
                new_id(),
                Argument::Int(offset),
                Argument::Int(width),
                Argument::Int(height),
                Argument::Int(stride),
                Argument::Uint(format.into()),
            ],
            data.clone(),
            None,
        )?;
        Ok(Buffer { inner, data })
    }

    /// Destroy the pool
    ///
    /// Buffers created from it stay valid.
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(1, args())
    }

    /// Grow the pool
    ///
    /// Pools can only grow.
    pub fn resize(&self, size: i32) -> Result<(), RequestError> {
        if size < self.size() {
            return Err(RequestError::InvalidArgument("pools cannot shrink"));
        }
        self.inner.send(2, smallvec![Argument::Int(size)])?;
        self.data.size.fetch_max(size, Ordering::AcqRel);
        Ok(())
    }
}

/// Listener for the events of a [`Buffer`]
pub trait BufferListener: Send + Sync {
    /// The compositor no longer reads the buffer
    fn release(&self, buffer: &Buffer) {
        let _ = buffer;
    }
}

impl BufferListener for () {}

pub(crate) struct BufferData {
    pub(crate) version: u32,
    width: i32,
    height: i32,
    stride: i32,
    format: ShmFormat,
    busy: Arc<AtomicBool>,
    listener: Box<dyn BufferListener>,
}

impl ObjectData for BufferData {
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        let buffer = Buffer::from_parts(backend, msg.sender_id.clone(), self.clone());
        self.busy.store(false, Ordering::Release);
        self.listener.release(&buffer);
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// A `wl_buffer` backed by shared memory
///
/// A buffer is busy from the commit that makes it current on a surface until the
/// compositor releases it. Its content must not be changed while busy.
#[derive(Clone)]
pub struct Buffer {
    inner: ProxyInner,
    data: Arc<BufferData>,
}

proxy_type!(Buffer, BufferData, WL_BUFFER_INTERFACE);

impl Buffer {
    /// Destroy the buffer
    pub fn destroy(&self) -> Result<(), RequestError> {
        self.inner.send(0, args())
    }

    /// Whether the compositor may still read the buffer
    pub fn is_busy(&self) -> bool {
        self.data.busy.load(Ordering::Acquire)
    }

    /// Width in pixels
    pub fn width(&self) -> i32 {
        self.data.width
    }

    /// Height in pixels
    pub fn height(&self) -> i32 {
        self.data.height
    }

    /// Bytes per row
    pub fn stride(&self) -> i32 {
        self.data.stride
    }

    /// Pixel format
    pub fn format(&self) -> ShmFormat {
        self.data.format
    }

    pub(crate) fn buffer_ref(&self) -> BufferRef {
        BufferRef::new(self.inner.id.protocol_id(), self.data.width, self.data.height)
            .with_busy_flag(self.data.busy.clone())
    }
}
