//! Handle snapshotter and object type names.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::ps::Pid;

/// Open handle to a kernel object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub pid: Pid,
    pub id: u64,
    /// Kernel address of the referenced object.
    pub object: u64,
    pub type_name: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleUpdate {
    Create(Handle),
    Close { pid: Pid, id: u64 },
}

/// Contract of the handle state store, keyed by process id and handle value.
pub trait HandleSnapshotter: Send + Sync {
    /// Applies a handle change. Closing a handle returns its last known state.
    fn observe(&self, update: HandleUpdate) -> Option<Handle>;

    fn lookup(&self, pid: Pid, id: u64) -> Option<Handle>;

    /// Finds any open handle referencing the kernel object.
    fn lookup_by_object(&self, object: u64) -> Option<Handle>;
}

/// In-memory [`HandleSnapshotter`].
#[derive(Default)]
pub struct HandleTable {
    handles: RwLock<HashMap<(Pid, u64), Handle>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HandleSnapshotter for HandleTable {
    fn observe(&self, update: HandleUpdate) -> Option<Handle> {
        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        match update {
            HandleUpdate::Create(handle) => handles.insert((handle.pid, handle.id), handle),
            HandleUpdate::Close { pid, id } => handles.remove(&(pid, id)),
        }
    }

    fn lookup(&self, pid: Pid, id: u64) -> Option<Handle> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(pid, id))
            .cloned()
    }

    fn lookup_by_object(&self, object: u64) -> Option<Handle> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|handle| handle.object == object)
            .cloned()
    }
}

/// Resolves kernel object type indices to their names.
pub trait ObjectTypes: Send + Sync {
    fn name_of(&self, type_id: u16) -> Option<String>;
}

/// Object type indices as assigned by recent kernels.
const DEFAULT_OBJECT_TYPES: &[(u16, &str)] = &[
    (2, "Type"),
    (3, "Directory"),
    (4, "SymbolicLink"),
    (5, "Token"),
    (6, "Job"),
    (7, "Process"),
    (8, "Thread"),
    (16, "Event"),
    (17, "Mutant"),
    (19, "Semaphore"),
    (20, "Timer"),
    (30, "Section"),
    (34, "Desktop"),
    (37, "File"),
    (42, "ALPC Port"),
    (44, "Key"),
];

/// Static [`ObjectTypes`] table.
#[derive(Debug, Clone)]
pub struct ObjectTypeStore {
    types: HashMap<u16, String>,
}

impl Default for ObjectTypeStore {
    fn default() -> Self {
        DEFAULT_OBJECT_TYPES
            .iter()
            .map(|(id, name)| (*id, name.to_string()))
            .collect()
    }
}

impl FromIterator<(u16, String)> for ObjectTypeStore {
    fn from_iter<I: IntoIterator<Item = (u16, String)>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

impl ObjectTypes for ObjectTypeStore {
    fn name_of(&self, type_id: u16) -> Option<String> {
        self.types.get(&type_id).cloned()
    }
}
