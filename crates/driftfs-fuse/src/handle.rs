//! Open-file handles and the inode-keyed handle table.
//!
//! Each file gets one handle, created at `create` time and reused by every
//! later `open`. The handle owns the writer/reader pair behind an async
//! mutex: all I/O on one file is serialized, including across backend
//! awaits, which keeps the write stream strictly sequential.

use std::sync::Arc;

use dashmap::DashMap;
use driftfs_datapath::{FileReader, FileWriter};
use driftfs_types::Ino;

/// The writer/reader pair of one open file.
pub struct FileStreams {
    pub writer: Box<dyn FileWriter>,
    pub reader: Box<dyn FileReader>,
}

/// Per-file handle state.
pub struct FileHandle {
    pub ino: Ino,
    pub key: String,
    pub streams: tokio::sync::Mutex<FileStreams>,
}

impl FileHandle {
    pub fn new(ino: Ino, key: String, writer: Box<dyn FileWriter>, reader: Box<dyn FileReader>) -> Self {
        Self {
            ino,
            key,
            streams: tokio::sync::Mutex::new(FileStreams { writer, reader }),
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("ino", &self.ino)
            .field("key", &self.key)
            .finish()
    }
}

/// Thread-safe table mapping inode numbers to file handles.
pub struct HandleTable {
    handles: DashMap<Ino, Arc<FileHandle>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: FileHandle) -> Arc<FileHandle> {
        let handle = Arc::new(handle);
        self.handles.insert(handle.ino, handle.clone());
        handle
    }

    pub fn get(&self, ino: Ino) -> Option<Arc<FileHandle>> {
        self.handles.get(&ino).map(|h| Arc::clone(h.value()))
    }

    pub fn remove(&self, ino: Ino) -> Option<Arc<FileHandle>> {
        self.handles.remove(&ino).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("count", &self.handles.len())
            .finish()
    }
}
