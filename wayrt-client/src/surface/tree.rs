//! Surface roles and the sub-surface tree
//!
//! Each surface owns a [`SurfaceNode`]. A sub-surface links a child node to its parent,
//! and from then on the commits of the child may be cached until the parent's state
//! is applied (synchronized mode).
//!
//! Locking: a node's lock is never held while locking another node. Walks up the
//! tree lock one node at a time.

use std::sync::{Arc, Mutex, Weak};

use crate::error::RequestError;

use super::state::{CommitState, PendingState, SurfaceState};

/// Commit behavior of a sub-surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Commits are cached until the parent's state is applied
    Sync,
    /// Commits are applied right away, unless an ancestor is synchronized
    Desync,
}

/// Role of a surface, assigned once for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    /// The surface is a sub-surface
    Subsurface,
    /// The surface is a pointer cursor
    Cursor,
    /// The surface is the icon of a drag-and-drop operation
    DragIcon,
}

/// An entry of a parent's stacking order
#[derive(Debug, Clone)]
pub enum StackEntry {
    /// The parent surface itself
    Parent,
    /// A sub-surface
    Child(Arc<SurfaceNode>),
}

impl PartialEq for StackEntry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Parent, Self::Parent) => true,
            (Self::Child(a), Self::Child(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Parent,
    Child(Weak<SurfaceNode>),
}

impl Slot {
    fn is(&self, node: &Arc<SurfaceNode>) -> bool {
        match self {
            Slot::Parent => false,
            Slot::Child(weak) => std::ptr::eq(weak.as_ptr(), Arc::as_ptr(node)),
        }
    }
}

#[derive(Debug)]
struct SubsurfaceRole {
    parent: Weak<SurfaceNode>,
    mode: CommitMode,
    position: (i32, i32),
    pending_position: Option<(i32, i32)>,
}

#[derive(Debug)]
enum Role {
    Subsurface(SubsurfaceRole),
    Other,
}

#[derive(Debug)]
struct NodeInner {
    pending: PendingState,
    cached: Option<PendingState>,
    current: SurfaceState,
    commit_state: CommitState,
    role: Option<Role>,
    // assigned once, kept after the role object is destroyed
    role_kind: Option<RoleKind>,
    pending_stack: Vec<Slot>,
    stack: Vec<Slot>,
}

/// The local state of a surface
#[derive(Debug)]
pub struct SurfaceNode {
    inner: Mutex<NodeInner>,
}

impl SurfaceNode {
    /// Create the node of a new surface
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(NodeInner {
                pending: PendingState::default(),
                cached: None,
                current: SurfaceState::default(),
                commit_state: CommitState::Idle,
                role: None,
                role_kind: None,
                pending_stack: vec![Slot::Parent],
                stack: vec![Slot::Parent],
            }),
        })
    }

    /// Modify the pending state
    pub fn update_pending<T>(&self, f: impl FnOnce(&mut PendingState) -> T) -> T {
        let mut inner = self.inner.lock().unwrap();
        let ret = f(&mut inner.pending);
        inner.commit_state = CommitState::Pending;
        ret
    }

    /// A copy of the pending state
    pub fn pending(&self) -> PendingState {
        self.inner.lock().unwrap().pending.clone()
    }

    /// A copy of the current state
    pub fn current(&self) -> SurfaceState {
        self.inner.lock().unwrap().current.clone()
    }

    /// Where the surface is in its commit cycle
    pub fn commit_state(&self) -> CommitState {
        self.inner.lock().unwrap().commit_state
    }

    /// Whether a commit is waiting in the sub-surface cache
    pub fn has_cached_state(&self) -> bool {
        self.inner.lock().unwrap().cached.is_some()
    }

    /// The role of this surface, if it ever got one
    pub fn role(&self) -> Option<RoleKind> {
        self.inner.lock().unwrap().role_kind
    }

    /// Commit mode, if this is a sub-surface
    pub fn mode(&self) -> Option<CommitMode> {
        match self.inner.lock().unwrap().role {
            Some(Role::Subsurface(ref role)) => Some(role.mode),
            _ => None,
        }
    }

    /// Position relative to the parent, if this is a sub-surface
    pub fn position(&self) -> Option<(i32, i32)> {
        match self.inner.lock().unwrap().role {
            Some(Role::Subsurface(ref role)) => Some(role.position),
            _ => None,
        }
    }

    /// The parent node, if this is a sub-surface
    pub fn parent(&self) -> Option<Arc<SurfaceNode>> {
        match self.inner.lock().unwrap().role {
            Some(Role::Subsurface(ref role)) => role.parent.upgrade(),
            _ => None,
        }
    }

    /// Current stacking order of this surface and its sub-surfaces, bottom first
    pub fn stack(&self) -> Vec<StackEntry> {
        upgrade_stack(&self.inner.lock().unwrap().stack)
    }

    /// Stacking order that the next applied commit will make current
    pub fn pending_stack(&self) -> Vec<StackEntry> {
        upgrade_stack(&self.inner.lock().unwrap().pending_stack)
    }

    /// Assign a role other than sub-surface
    ///
    /// Assigning the role the surface already has is allowed.
    pub fn set_role(&self, kind: RoleKind) -> Result<(), RequestError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.role_kind {
            Some(existing) if existing != kind => Err(RequestError::Role),
            Some(_) => Ok(()),
            None => {
                inner.role_kind = Some(kind);
                inner.role = Some(Role::Other);
                Ok(())
            }
        }
    }

    /// Whether commits of this surface are currently cached
    ///
    /// That is the case if it or any of its ancestors is in synchronized mode.
    pub fn is_synced(&self) -> bool {
        let (mode, mut parent) = match self.inner.lock().unwrap().role {
            Some(Role::Subsurface(ref role)) => (role.mode, role.parent.upgrade()),
            _ => return false,
        };
        if mode == CommitMode::Sync {
            return true;
        }
        while let Some(node) = parent {
            let next = match node.inner.lock().unwrap().role {
                Some(Role::Subsurface(ref role)) if role.mode == CommitMode::Sync => return true,
                Some(Role::Subsurface(ref role)) => role.parent.upgrade(),
                _ => None,
            };
            parent = next;
        }
        false
    }

    /// Whether `other` is this node or one of its ancestors
    fn is_ancestor_or_self(self: &Arc<Self>, other: &Arc<SurfaceNode>) -> bool {
        let mut node = Some(self.clone());
        while let Some(current) = node {
            if Arc::ptr_eq(&current, other) {
                return true;
            }
            node = current.parent();
        }
        false
    }
}

fn upgrade_stack(stack: &[Slot]) -> Vec<StackEntry> {
    stack
        .iter()
        .filter_map(|slot| match slot {
            Slot::Parent => Some(StackEntry::Parent),
            Slot::Child(weak) => weak.upgrade().map(StackEntry::Child),
        })
        .collect()
}

/// Commit the pending state of a surface
///
/// If the surface is synchronized the state goes to its cache, merged with any
/// previously cached commit. Otherwise it is applied, along with the cached state of
/// its sub-surfaces.
pub fn commit(node: &Arc<SurfaceNode>) {
    if node.is_synced() {
        let mut inner = node.inner.lock().unwrap();
        let pending = std::mem::take(&mut inner.pending);
        inner.cached.get_or_insert_with(PendingState::default).merge(pending);
        inner.commit_state = CommitState::Idle;
    } else {
        let pending = {
            let mut inner = node.inner.lock().unwrap();
            let mut state = inner.cached.take().unwrap_or_default();
            state.merge(std::mem::take(&mut inner.pending));
            state
        };
        apply(node, pending);
    }
}

// Apply a state to a node, then the position and cache of its sub-surfaces
fn apply(node: &Arc<SurfaceNode>, state: PendingState) {
    let children: Vec<Arc<SurfaceNode>> = {
        let mut inner = node.inner.lock().unwrap();
        inner.current.apply(state);
        inner.commit_state = CommitState::Committed;
        inner.stack = inner.pending_stack.clone();
        inner
            .stack
            .iter()
            .filter_map(|slot| match slot {
                Slot::Child(weak) => weak.upgrade(),
                Slot::Parent => None,
            })
            .collect()
    };
    for child in children {
        let cached = {
            let mut inner = child.inner.lock().unwrap();
            if let Some(Role::Subsurface(ref mut role)) = inner.role {
                if let Some(position) = role.pending_position.take() {
                    role.position = position;
                }
            }
            inner.cached.take()
        };
        if let Some(cached) = cached {
            apply(&child, cached);
        }
    }
}

/// Make `child` a sub-surface of `parent`
///
/// The child must have no role other than a previous sub-surface one, and `parent` must be neither the child nor one of
/// its descendants. The new sub-surface is synchronized, at position (0, 0), and
/// placed above its siblings in the pending stacking order of the parent.
pub fn add_subsurface(child: &Arc<SurfaceNode>, parent: &Arc<SurfaceNode>) -> Result<(), RequestError> {
    if parent.is_ancestor_or_self(child) {
        return Err(RequestError::BadSurface);
    }
    {
        let mut inner = child.inner.lock().unwrap();
        if inner.role.is_some() || inner.role_kind.map_or(false, |kind| kind != RoleKind::Subsurface) {
            return Err(RequestError::BadSurface);
        }
        inner.role_kind = Some(RoleKind::Subsurface);
        inner.role = Some(Role::Subsurface(SubsurfaceRole {
            parent: Arc::downgrade(parent),
            mode: CommitMode::Sync,
            position: (0, 0),
            pending_position: None,
        }));
    }
    parent.inner.lock().unwrap().pending_stack.push(Slot::Child(Arc::downgrade(child)));
    Ok(())
}

/// Remove the sub-surface role of `child`
///
/// The surface keeps its current state, a cached commit is discarded. It disappears
/// from the stacking order of the parent immediately.
pub fn remove_subsurface(child: &Arc<SurfaceNode>) {
    let parent = {
        let mut inner = child.inner.lock().unwrap();
        inner.cached = None;
        match inner.role.take() {
            Some(Role::Subsurface(role)) => role.parent.upgrade(),
            other => {
                inner.role = other;
                None
            }
        }
    };
    if let Some(parent) = parent {
        let mut inner = parent.inner.lock().unwrap();
        inner.pending_stack.retain(|slot| !slot.is(child));
        inner.stack.retain(|slot| !slot.is(child));
    }
}

/// Set the position of a sub-surface, applied with the next state of its parent
pub fn set_position(child: &SurfaceNode, x: i32, y: i32) {
    if let Some(Role::Subsurface(ref mut role)) = child.inner.lock().unwrap().role {
        role.pending_position = Some((x, y));
    }
}

/// Place a sub-surface directly above a sibling or its parent
pub fn place_above(child: &Arc<SurfaceNode>, sibling: &Arc<SurfaceNode>) -> Result<(), RequestError> {
    restack(child, sibling, 1)
}

/// Place a sub-surface directly below a sibling or its parent
pub fn place_below(child: &Arc<SurfaceNode>, sibling: &Arc<SurfaceNode>) -> Result<(), RequestError> {
    restack(child, sibling, 0)
}

fn restack(child: &Arc<SurfaceNode>, sibling: &Arc<SurfaceNode>, offset: usize) -> Result<(), RequestError> {
    if Arc::ptr_eq(child, sibling) {
        return Err(RequestError::BadSurface);
    }
    let parent = child.parent().ok_or(RequestError::BadSurface)?;
    let mut inner = parent.inner.lock().unwrap();
    let own = inner
        .pending_stack
        .iter()
        .position(|slot| slot.is(child))
        .ok_or(RequestError::BadSurface)?;
    let target = |stack: &[Slot]| {
        if Arc::ptr_eq(&parent, sibling) {
            stack.iter().position(|slot| matches!(slot, Slot::Parent))
        } else {
            stack.iter().position(|slot| slot.is(sibling))
        }
    };
    if target(&inner.pending_stack).is_none() {
        return Err(RequestError::BadSurface);
    }
    let slot = inner.pending_stack.remove(own);
    let index = target(&inner.pending_stack).unwrap_or_default() + offset;
    inner.pending_stack.insert(index, slot);
    Ok(())
}

/// Change the commit mode of a sub-surface
///
/// Switching to desynchronized mode applies the cached state, unless an ancestor is
/// still synchronized.
pub fn set_mode(child: &Arc<SurfaceNode>, mode: CommitMode) {
    {
        let mut inner = child.inner.lock().unwrap();
        match inner.role {
            Some(Role::Subsurface(ref mut role)) => role.mode = mode,
            _ => return,
        }
    }
    if mode == CommitMode::Desync && !child.is_synced() {
        let cached = child.inner.lock().unwrap().cached.take();
        if let Some(cached) = cached {
            apply(child, cached);
        }
    }
}
