//! Mount-facing filesystem facade.
//!
//! [`ObjectFs`] glues the in-memory tree and handle table to the data-path
//! engine. The kernel adapter calls these methods 1:1 for its protocol
//! handlers; tests drive them directly without a mount.
//!
//! Locking: the tree sits behind a `parking_lot` mutex that is never held
//! across an await; per-file serialization happens on the handle's async
//! mutex.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, info};

use driftfs_backend::{Metadata, ObjectStorage};
use driftfs_datapath::{new_reader, new_writer, DataPathOptions};
use driftfs_types::{
    make_error_msg,
    status_code::FsCode,
    Gid, Ino, Result, Uid,
};

use crate::handle::{FileHandle, HandleTable};
use crate::node::{NodeAttr, NodeKind, NodeTree};

/// Attributes of a resolved entry.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub ino: Ino,
    pub kind: NodeKind,
    pub attr: NodeAttr,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: Ino,
    pub kind: NodeKind,
    pub name: String,
}

/// Attribute changes requested by the kernel; `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct SetAttrRequest {
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub uid: Option<Uid>,
    pub gid: Option<Gid>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

pub struct ObjectFs {
    backend: Arc<dyn ObjectStorage>,
    options: DataPathOptions,
    tree: Mutex<NodeTree>,
    handles: HandleTable,
}

impl ObjectFs {
    pub fn new(backend: Arc<dyn ObjectStorage>, options: DataPathOptions) -> Self {
        info!(
            backend = %backend.describe(),
            chunked = options.chunked,
            fixed = options.fixed,
            compress = %options.compress,
            "filesystem created"
        );
        Self {
            backend,
            options,
            tree: Mutex::new(NodeTree::new()),
            handles: HandleTable::new(),
        }
    }

    pub fn root_ino(&self) -> Ino {
        driftfs_types::ROOT_INO
    }

    fn entry_info(tree: &NodeTree, index: usize) -> EntryInfo {
        let node = tree.get(index);
        EntryInfo {
            ino: node.ino,
            kind: node.kind,
            attr: node.attr.clone(),
        }
    }

    fn resolve(tree: &NodeTree, ino: Ino) -> Result<usize> {
        tree.index_of(ino)
            .ok_or_else(|| driftfs_types::Status::with_message(FsCode::NOT_FOUND, format!("inode {}", ino)))
    }

    pub fn lookup(&self, parent: Ino, name: &str) -> Result<EntryInfo> {
        let tree = self.tree.lock();
        let parent = Self::resolve(&tree, parent)?;
        let index = tree
            .lookup(parent, name)
            .ok_or_else(|| driftfs_types::Status::with_message(FsCode::NOT_FOUND, name))?;
        Ok(Self::entry_info(&tree, index))
    }

    pub fn getattr(&self, ino: Ino) -> Result<EntryInfo> {
        let tree = self.tree.lock();
        let index = Self::resolve(&tree, ino)?;
        Ok(Self::entry_info(&tree, index))
    }

    pub fn setattr(&self, ino: Ino, req: &SetAttrRequest) -> Result<EntryInfo> {
        let mut tree = self.tree.lock();
        let index = Self::resolve(&tree, ino)?;
        let attr = &mut tree.get_mut(index).attr;
        if let Some(size) = req.size {
            attr.size = size;
        }
        if let Some(mode) = req.mode {
            attr.mode = mode;
        }
        if let Some(uid) = req.uid {
            attr.uid = uid;
        }
        if let Some(gid) = req.gid {
            attr.gid = gid;
        }
        if let Some(atime) = req.atime {
            attr.atime = atime;
        }
        if let Some(mtime) = req.mtime {
            attr.mtime = mtime;
        }
        Ok(Self::entry_info(&tree, index))
    }

    pub fn readdir(&self, ino: Ino) -> Result<Vec<DirEntry>> {
        let tree = self.tree.lock();
        let index = Self::resolve(&tree, ino)?;
        Ok(tree
            .readdir(index)?
            .into_iter()
            .map(|(ino, kind, name)| DirEntry { ino, kind, name })
            .collect())
    }

    pub async fn mkdir(
        &self,
        parent: Ino,
        name: &str,
        mode: u32,
        uid: Uid,
        gid: Gid,
    ) -> Result<EntryInfo> {
        // Marker object first, tree attachment second: a failed PUT must
        // not leave a directory the store does not know about.
        let (parent_index, marker) = {
            let tree = self.tree.lock();
            let parent_index = Self::resolve(&tree, parent)?;
            if tree.lookup(parent_index, name).is_some() {
                return make_error_msg(FsCode::ALREADY_EXISTS, name);
            }
            let parent_key = tree.key_of(parent_index);
            let marker = if parent_key.is_empty() {
                format!("{}/", name)
            } else {
                format!("{}/{}/", parent_key, name)
            };
            (parent_index, marker)
        };

        self.backend.put(&marker, Metadata::new(), &[]).await?;

        let mut tree = self.tree.lock();
        let index = tree.mkdir(parent_index, name, mode, uid, gid)?;
        debug!("mkdir {} -> ino {}", name, tree.get(index).ino);
        Ok(Self::entry_info(&tree, index))
    }

    /// Create a file, its empty backing object, and its handle.
    pub async fn create(
        &self,
        parent: Ino,
        name: &str,
        mode: u32,
        uid: Uid,
        gid: Gid,
    ) -> Result<EntryInfo> {
        let (parent_index, key) = {
            let tree = self.tree.lock();
            let parent_index = Self::resolve(&tree, parent)?;
            if tree.lookup(parent_index, name).is_some() {
                return make_error_msg(FsCode::ALREADY_EXISTS, name);
            }
            let parent_key = tree.key_of(parent_index);
            let key = if parent_key.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", parent_key, name)
            };
            (parent_index, key)
        };

        self.backend.put(&key, Metadata::new(), &[]).await?;

        let entry = {
            let mut tree = self.tree.lock();
            let index = tree.create_file(parent_index, name, mode, uid, gid)?;
            Self::entry_info(&tree, index)
        };

        self.handles.insert(FileHandle::new(
            entry.ino,
            key.clone(),
            new_writer(&key, self.backend.clone(), &self.options),
            new_reader(&key, self.backend.clone(), &self.options),
        ));
        debug!("create {} -> ino {}", key, entry.ino);
        Ok(entry)
    }

    /// Open looks up the handle made at create time.
    pub fn open(&self, ino: Ino) -> Result<Arc<FileHandle>> {
        self.handles
            .get(ino)
            .ok_or_else(|| driftfs_types::Status::with_message(FsCode::HANDLE_NOT_FOUND, format!("inode {}", ino)))
    }

    pub async fn write(&self, ino: Ino, off: i64, data: &[u8]) -> Result<usize> {
        let handle = self.open(ino)?;
        let mut streams = handle.streams.lock().await;
        let n = streams.writer.write_at(data, off).await?;

        let mut tree = self.tree.lock();
        if let Some(index) = tree.index_of(ino) {
            let attr = &mut tree.get_mut(index).attr;
            attr.size = attr.size.max((off as u64) + n as u64);
            attr.mtime = SystemTime::now();
        }
        Ok(n)
    }

    /// Read caps the request at the tracked file size; the engine readers
    /// report full buffers at EOF and rely on this cap.
    pub async fn read(&self, ino: Ino, off: i64, buf: &mut [u8]) -> Result<usize> {
        let size = {
            let tree = self.tree.lock();
            let index = Self::resolve(&tree, ino)?;
            tree.get(index).attr.size
        };
        if off as u64 >= size {
            return Ok(0);
        }
        let want = buf.len().min((size - off as u64) as usize);
        if want == 0 {
            return Ok(0);
        }

        let handle = self.open(ino)?;
        let mut streams = handle.streams.lock().await;
        streams.reader.read_at(&mut buf[..want], off).await?;
        Ok(want)
    }

    pub async fn flush(&self, ino: Ino) -> Result<()> {
        let handle = self.open(ino)?;
        let mut streams = handle.streams.lock().await;
        streams.writer.flush().await
    }

    /// Drop the handle's in-memory streams; the backend is not contacted.
    pub async fn release(&self, ino: Ino) -> Result<()> {
        let handle = self.open(ino)?;
        let mut streams = handle.streams.lock().await;
        streams.writer.release();
        streams.reader.release();
        Ok(())
    }

    /// Remove a file: its chunks/manifest prefix, its blob, its node and
    /// its handle.
    pub async fn unlink(&self, parent: Ino, name: &str) -> Result<()> {
        let (parent_index, key) = {
            let tree = self.tree.lock();
            let parent_index = Self::resolve(&tree, parent)?;
            let index = tree
                .lookup(parent_index, name)
                .ok_or_else(|| driftfs_types::Status::with_message(FsCode::NOT_FOUND, name))?;
            if tree.get(index).kind != NodeKind::File {
                return make_error_msg(FsCode::NOT_A_FILE, name);
            }
            (parent_index, tree.key_of(index))
        };

        self.backend.delete_prefix(&format!("{}/", key)).await?;
        self.backend.delete(&key).await?;

        let ino = {
            let mut tree = self.tree.lock();
            let (ino, _) = tree.remove(parent_index, name)?;
            ino
        };
        self.handles.remove(ino);
        debug!("unlink {} (ino {})", key, ino);
        Ok(())
    }

    pub async fn rmdir(&self, parent: Ino, name: &str) -> Result<()> {
        let (parent_index, marker) = {
            let tree = self.tree.lock();
            let parent_index = Self::resolve(&tree, parent)?;
            let index = tree
                .lookup(parent_index, name)
                .ok_or_else(|| driftfs_types::Status::with_message(FsCode::NOT_FOUND, name))?;
            let node = tree.get(index);
            if node.kind != NodeKind::Directory {
                return make_error_msg(FsCode::NOT_A_DIRECTORY, name);
            }
            if !tree.readdir(index)?.is_empty() {
                return make_error_msg(FsCode::NOT_EMPTY, name);
            }
            (parent_index, tree.dir_key_of(index))
        };

        self.backend.delete(&marker).await?;

        let mut tree = self.tree.lock();
        tree.remove(parent_index, name)?;
        Ok(())
    }
}
