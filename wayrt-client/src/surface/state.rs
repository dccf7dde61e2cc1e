//! Double-buffered state of a surface
//!
//! Requests on a surface accumulate in a [`PendingState`], a commit turns it into
//! the [`SurfaceState`] (possibly after a detour through the sub-surface cache, see
//! [`tree`](super::tree)). Nothing here touches the wire.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::protocol::Transform;

/// A rectangle, in surface or buffer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Horizontal position of the top-left corner
    pub x: i32,
    /// Vertical position of the top-left corner
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the rectangle covers no area
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Whether the point lies inside the rectangle
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && (x as i64) < self.x as i64 + self.width as i64
            && (y as i64) < self.y as i64 + self.height as i64
    }
}

/// An operation of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOp {
    /// The rectangle was added
    Add(Rect),
    /// The rectangle was subtracted
    Subtract(Rect),
}

/// The content of a region, as the list of operations that built it
///
/// Surfaces copy it when a region is set, later changes to the region object do
/// not affect them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionSnapshot {
    ops: Vec<RegionOp>,
}

impl RegionSnapshot {
    /// Build a region from its operations
    pub fn new(ops: Vec<RegionOp>) -> Self {
        Self { ops }
    }

    /// The operations of this region, in order
    pub fn ops(&self) -> &[RegionOp] {
        &self.ops
    }

    /// Whether the point lies inside the region
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.ops.iter().fold(false, |inside, op| match op {
            RegionOp::Add(rect) if rect.contains(x, y) => true,
            RegionOp::Subtract(rect) if rect.contains(x, y) => false,
            _ => inside,
        })
    }
}

/// A buffer attached to a surface
#[derive(Debug, Clone)]
pub struct BufferRef {
    /// Protocol id of the buffer
    pub id: u32,
    /// Width of the buffer in pixels
    pub width: i32,
    /// Height of the buffer in pixels
    pub height: i32,
    busy: Option<Arc<AtomicBool>>,
}

impl BufferRef {
    /// Describe a buffer by its id and size
    pub fn new(id: u32, width: i32, height: i32) -> Self {
        Self { id, width, height, busy: None }
    }

    pub(crate) fn with_busy_flag(mut self, busy: Arc<AtomicBool>) -> Self {
        self.busy = Some(busy);
        self
    }

    fn mark_busy(&self) {
        if let Some(busy) = &self.busy {
            busy.store(true, Ordering::Release);
        }
    }
}

impl PartialEq for BufferRef {
    fn eq(&self, other: &Self) -> bool {
        (self.id, self.width, self.height) == (other.id, other.width, other.height)
    }
}

impl Eq for BufferRef {}

/// Changes requested on a surface since its last commit
///
/// `None` fields were not touched. For the buffer and regions, `Some(None)` means
/// they were explicitly unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingState {
    /// Attached buffer
    pub buffer: Option<Option<BufferRef>>,
    /// Offset given with the last attach
    pub offset: Option<(i32, i32)>,
    /// Damage in surface coordinates
    pub damage: Vec<Rect>,
    /// Damage in buffer coordinates
    pub buffer_damage: Vec<Rect>,
    /// Opaque region
    pub opaque_region: Option<Option<RegionSnapshot>>,
    /// Input region
    pub input_region: Option<Option<RegionSnapshot>>,
    /// Buffer transform
    pub transform: Option<Transform>,
    /// Buffer scale
    pub scale: Option<i32>,
    /// Protocol ids of the frame callbacks requested
    pub frame_callbacks: Vec<u32>,
}

impl PendingState {
    /// Whether no change was requested
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold newer changes on top of these
    ///
    /// Values set by `newer` replace ours, damage and frame callbacks accumulate.
    pub fn merge(&mut self, newer: PendingState) {
        if newer.buffer.is_some() {
            self.buffer = newer.buffer;
        }
        if newer.offset.is_some() {
            self.offset = newer.offset;
        }
        self.damage.extend(newer.damage);
        self.buffer_damage.extend(newer.buffer_damage);
        if newer.opaque_region.is_some() {
            self.opaque_region = newer.opaque_region;
        }
        if newer.input_region.is_some() {
            self.input_region = newer.input_region;
        }
        if newer.transform.is_some() {
            self.transform = newer.transform;
        }
        if newer.scale.is_some() {
            self.scale = newer.scale;
        }
        self.frame_callbacks.extend(newer.frame_callbacks);
    }
}

/// The state of a surface as last applied
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceState {
    /// Current buffer
    pub buffer: Option<BufferRef>,
    /// Offset of the last attach
    pub offset: (i32, i32),
    /// Damage of the last applied commit, in surface coordinates
    pub damage: Vec<Rect>,
    /// Opaque region, `None` meaning empty
    pub opaque_region: Option<RegionSnapshot>,
    /// Input region, `None` meaning infinite
    pub input_region: Option<RegionSnapshot>,
    /// Buffer transform
    pub transform: Transform,
    /// Buffer scale
    pub scale: i32,
    /// Frame callbacks of the last applied commit
    pub frame_callbacks: Vec<u32>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            buffer: None,
            offset: (0, 0),
            damage: Vec::new(),
            opaque_region: None,
            input_region: None,
            transform: Transform::Normal,
            scale: 1,
            frame_callbacks: Vec::new(),
        }
    }
}

impl SurfaceState {
    /// Apply pending changes
    ///
    /// The buffer is applied first, then transform and scale, then damage and regions.
    /// Buffer damage is converted with the resulting buffer, transform and scale, and
    /// dropped if there is no buffer.
    pub fn apply(&mut self, pending: PendingState) {
        if let Some(buffer) = pending.buffer {
            if let Some(ref buffer) = buffer {
                buffer.mark_busy();
            }
            self.buffer = buffer;
        }
        if let Some(offset) = pending.offset {
            self.offset = offset;
        }
        if let Some(transform) = pending.transform {
            self.transform = transform;
        }
        if let Some(scale) = pending.scale {
            self.scale = scale;
        }

        let mut damage = pending.damage;
        if let Some(ref buffer) = self.buffer {
            damage.extend(pending.buffer_damage.into_iter().map(|rect| {
                buffer_to_surface(rect, self.transform, self.scale, (buffer.width, buffer.height))
            }));
        }
        self.damage = damage;

        if let Some(region) = pending.opaque_region {
            self.opaque_region = region;
        }
        if let Some(region) = pending.input_region {
            self.input_region = region;
        }
        self.frame_callbacks = pending.frame_callbacks;
    }

    /// Size of the surface, derived from its buffer, transform and scale
    pub fn size(&self) -> Option<(i32, i32)> {
        self.buffer.as_ref().map(|buffer| surface_size((buffer.width, buffer.height), self.transform, self.scale))
    }
}

fn surface_size(buffer_size: (i32, i32), transform: Transform, scale: i32) -> (i32, i32) {
    let scale = scale.max(1);
    let (w, h) = (buffer_size.0 / scale, buffer_size.1 / scale);
    if transform.swaps_dimensions() {
        (h, w)
    } else {
        (w, h)
    }
}

/// Convert a rectangle from buffer to surface coordinates
///
/// `buffer_size` is in buffer pixels. The result covers every surface pixel touched
/// by the original rectangle.
pub fn buffer_to_surface(rect: Rect, transform: Transform, scale: i32, buffer_size: (i32, i32)) -> Rect {
    let scale = scale.max(1) as f64;
    let (w, h) = surface_size(buffer_size, transform, scale as i32);
    let (w, h) = (w as f64, h as f64);

    let map = |bx: f64, by: f64| -> (f64, f64) {
        let (bx, by) = (bx / scale, by / scale);
        match transform {
            Transform::Normal => (bx, by),
            Transform::_90 => (by, h - bx),
            Transform::_180 => (w - bx, h - by),
            Transform::_270 => (w - by, bx),
            Transform::Flipped => (w - bx, by),
            Transform::Flipped90 => (w - by, h - bx),
            Transform::Flipped180 => (bx, h - by),
            Transform::Flipped270 => (by, bx),
        }
    };

    let (x0, y0) = map(rect.x as f64, rect.y as f64);
    let (x1, y1) = map(rect.x as f64 + rect.width as f64, rect.y as f64 + rect.height as f64);
    let (left, right) = (x0.min(x1).floor(), x0.max(x1).ceil());
    let (top, bottom) = (y0.min(y1).floor(), y0.max(y1).ceil());
    Rect::new(left as i32, top as i32, (right - left) as i32, (bottom - top) as i32)
}

/// Progress of a surface towards a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// No change since creation or since the last commit, which was cached
    Idle,
    /// Changes were requested and not committed yet
    Pending,
    /// The last commit was applied and nothing changed since
    Committed,
}
