//! Wayland objects map

use std::collections::HashMap;

use crate::protocol::Interface;

/// Limit separating server-created from client-created objects IDs in the namespace
pub const SERVER_ID_LIMIT: u32 = 0xFF00_0000;

/// Protocol id of the display singleton
pub const DISPLAY_ID: u32 = 1;

/// The representation of a protocol object
#[derive(Debug, Clone)]
pub struct Object<Data> {
    /// Interface name of this object
    pub interface: &'static Interface,
    /// Version of this object
    pub version: u32,
    /// Data associated to this object (ex: its listener client side)
    pub data: Data,
}

/// Reasons for which an object cannot be registered at a given id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The id is 0, or a client id that was never allocated
    NotAllocated,
    /// The id is outside of the namespace of the side creating the object
    WrongNamespace,
    /// An object is already live at this id
    AlreadyLive,
}

/// A holder for the object store of a connection
///
/// Keeps track of which object id is associated to which object. Client
/// ids are handed out monotonically and never reused during the lifetime
/// of the map.
#[derive(Debug)]
pub struct ObjectMap<Data> {
    client_objects: HashMap<u32, Object<Data>>,
    server_objects: HashMap<u32, Object<Data>>,
    next_client_id: u32,
}

impl<Data: Clone> Default for ObjectMap<Data> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Data: Clone> ObjectMap<Data> {
    /// Create a new empty object map
    ///
    /// Id 1 is reserved for the display, the first allocated id is 2.
    pub fn new() -> Self {
        Self {
            client_objects: HashMap::new(),
            server_objects: HashMap::new(),
            next_client_id: DISPLAY_ID + 1,
        }
    }

    /// Create a map already holding the display singleton at id 1
    pub fn with_display(display: Object<Data>) -> Self {
        let mut map = Self::new();
        map.client_objects.insert(DISPLAY_ID, display);
        map
    }

    /// Allocate a new id in the client namespace
    ///
    /// Returns `None` once the client namespace is exhausted.
    pub fn allocate(&mut self) -> Option<u32> {
        let id = self.next_client_id;
        if id >= SERVER_ID_LIMIT {
            return None;
        }
        self.next_client_id += 1;
        Some(id)
    }

    /// Register an object at the given id
    ///
    /// Client ids must have been handed out by [`allocate()`](Self::allocate) (or be the
    /// display id), server ids must lie in the server namespace. A live id cannot be
    /// registered twice.
    pub fn register(&mut self, id: u32, object: Object<Data>) -> Result<(), RegisterError> {
        let store = if id == 0 {
            return Err(RegisterError::NotAllocated);
        } else if id >= SERVER_ID_LIMIT {
            &mut self.server_objects
        } else if id >= self.next_client_id {
            return Err(RegisterError::NotAllocated);
        } else {
            &mut self.client_objects
        };
        if store.contains_key(&id) {
            return Err(RegisterError::AlreadyLive);
        }
        store.insert(id, object);
        Ok(())
    }

    /// Register an object created by the server
    ///
    /// Fails if the id is not in the server namespace.
    pub fn register_server(&mut self, id: u32, object: Object<Data>) -> Result<(), RegisterError> {
        if id < SERVER_ID_LIMIT {
            return Err(RegisterError::WrongNamespace);
        }
        self.register(id, object)
    }

    /// Allocate a new id in the client namespace and register the object there
    pub fn client_insert_new(&mut self, object: Object<Data>) -> Option<u32> {
        let id = self.allocate()?;
        self.client_objects.insert(id, object);
        Some(id)
    }

    /// Find an object in the store
    pub fn find(&self, id: u32) -> Option<Object<Data>> {
        self.store(id).and_then(|store| store.get(&id)).cloned()
    }

    /// Remove an object from the store
    ///
    /// Does nothing if the object didn't previously exists, so releasing twice is harmless.
    pub fn release(&mut self, id: u32) -> Option<Object<Data>> {
        self.store_mut(id).and_then(|store| store.remove(&id))
    }

    /// Mutably access an object of the map
    pub fn with<T, F: FnOnce(&mut Object<Data>) -> T>(&mut self, id: u32, f: F) -> Option<T> {
        self.store_mut(id).and_then(|store| store.get_mut(&id)).map(f)
    }

    /// Iterate over all live objects
    pub fn all_objects(&self) -> impl Iterator<Item = (u32, &Object<Data>)> {
        self.client_objects
            .iter()
            .chain(self.server_objects.iter())
            .map(|(&id, obj)| (id, obj))
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.client_objects.len() + self.server_objects.len()
    }

    /// Whether the map holds no object
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, id: u32) -> Option<&HashMap<u32, Object<Data>>> {
        if id == 0 {
            None
        } else if id >= SERVER_ID_LIMIT {
            Some(&self.server_objects)
        } else {
            Some(&self.client_objects)
        }
    }

    fn store_mut(&mut self, id: u32) -> Option<&mut HashMap<u32, Object<Data>>> {
        if id == 0 {
            None
        } else if id >= SERVER_ID_LIMIT {
            Some(&mut self.server_objects)
        } else {
            Some(&mut self.client_objects)
        }
    }
}
