//! In-memory directory tree.
//!
//! Nodes live in an arena and are addressed by stable indices; each node
//! carries a single parent index instead of owning links in both
//! directions, so the tree has no reference cycles. The tree is rebuilt
//! empty on every mount; only file data persists in the object store.

use std::collections::HashMap;
use std::time::SystemTime;

use driftfs_types::{
    make_error_msg,
    status_code::FsCode,
    Gid, Ino, Result, Uid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Attributes surfaced to the kernel adapter.
#[derive(Debug, Clone)]
pub struct NodeAttr {
    pub size: u64,
    pub mode: u32,
    pub uid: Uid,
    pub gid: Gid,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl NodeAttr {
    fn file(mode: u32, uid: Uid, gid: Gid) -> Self {
        let now = SystemTime::now();
        Self {
            size: 0,
            mode,
            uid,
            gid,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn directory(mode: u32, uid: Uid, gid: Gid) -> Self {
        let now = SystemTime::now();
        Self {
            size: 4 << 10,
            mode,
            uid,
            gid,
            nlink: 2,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub ino: Ino,
    pub name: String,
    pub kind: NodeKind,
    pub attr: NodeAttr,
    parent: Option<usize>,
    children: HashMap<String, usize>,
}

/// Arena of nodes plus the inode-number index.
pub struct NodeTree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    by_ino: HashMap<Ino, usize>,
    next_ino: u64,
}

const ROOT_INDEX: usize = 0;

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        let root = Node {
            ino: driftfs_types::ROOT_INO,
            name: String::new(),
            kind: NodeKind::Directory,
            attr: NodeAttr::directory(0o750, Uid(0), Gid(0)),
            parent: None,
            children: HashMap::new(),
        };
        let mut by_ino = HashMap::new();
        by_ino.insert(root.ino, ROOT_INDEX);
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            by_ino,
            next_ino: 2,
        }
    }

    pub fn root(&self) -> usize {
        ROOT_INDEX
    }

    pub fn index_of(&self, ino: Ino) -> Option<usize> {
        self.by_ino.get(&ino).copied()
    }

    pub fn get(&self, index: usize) -> &Node {
        self.nodes[index].as_ref().expect("live node index")
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Node {
        self.nodes[index].as_mut().expect("live node index")
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }

    pub fn lookup(&self, parent: usize, name: &str) -> Option<usize> {
        self.get(parent).children.get(name).copied()
    }

    pub fn create_file(
        &mut self,
        parent: usize,
        name: &str,
        mode: u32,
        uid: Uid,
        gid: Gid,
    ) -> Result<usize> {
        self.attach(
            parent,
            name,
            NodeKind::File,
            NodeAttr::file(mode, uid, gid),
        )
    }

    pub fn mkdir(
        &mut self,
        parent: usize,
        name: &str,
        mode: u32,
        uid: Uid,
        gid: Gid,
    ) -> Result<usize> {
        self.attach(
            parent,
            name,
            NodeKind::Directory,
            NodeAttr::directory(mode, uid, gid),
        )
    }

    fn attach(
        &mut self,
        parent: usize,
        name: &str,
        kind: NodeKind,
        attr: NodeAttr,
    ) -> Result<usize> {
        if name.is_empty() || name.contains('/') {
            return make_error_msg(FsCode::INVALID_NAME, format!("bad name {:?}", name));
        }
        if self.get(parent).kind != NodeKind::Directory {
            return make_error_msg(FsCode::NOT_A_DIRECTORY, self.get(parent).name.clone());
        }
        if self.get(parent).children.contains_key(name) {
            return make_error_msg(FsCode::ALREADY_EXISTS, name);
        }

        let ino = Ino(self.next_ino);
        self.next_ino += 1;
        let node = Node {
            ino,
            name: name.to_string(),
            kind,
            attr,
            parent: Some(parent),
            children: HashMap::new(),
        };

        let index = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.by_ino.insert(ino, index);
        self.get_mut(parent).children.insert(name.to_string(), index);
        Ok(index)
    }

    /// Detach and free a child. Directories must be empty.
    pub fn remove(&mut self, parent: usize, name: &str) -> Result<(Ino, NodeKind)> {
        let index = self
            .lookup(parent, name)
            .ok_or_else(|| driftfs_types::Status::with_message(FsCode::NOT_FOUND, name))?;
        let node = self.get(index);
        if node.kind == NodeKind::Directory && !node.children.is_empty() {
            return make_error_msg(FsCode::NOT_EMPTY, name);
        }
        let ino = node.ino;
        let kind = node.kind;

        self.get_mut(parent).children.remove(name);
        self.by_ino.remove(&ino);
        self.nodes[index] = None;
        self.free.push(index);
        Ok((ino, kind))
    }

    pub fn readdir(&self, index: usize) -> Result<Vec<(Ino, NodeKind, String)>> {
        let node = self.get(index);
        if node.kind != NodeKind::Directory {
            return make_error_msg(FsCode::NOT_A_DIRECTORY, node.name.clone());
        }
        let mut entries: Vec<(Ino, NodeKind, String)> = node
            .children
            .values()
            .map(|&child| {
                let c = self.get(child);
                (c.ino, c.kind, c.name.clone())
            })
            .collect();
        entries.sort_by(|a, b| a.2.cmp(&b.2));
        Ok(entries)
    }

    /// Object key of a node: its slash-joined path from the root, no
    /// leading slash.
    pub fn key_of(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            if i == ROOT_INDEX {
                break;
            }
            let node = self.get(i);
            parts.push(node.name.clone());
            cursor = node.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Object key of a directory placeholder: the path with a trailing
    /// slash.
    pub fn dir_key_of(&self, index: usize) -> String {
        format!("{}/", self.key_of(index))
    }
}
