// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! blendfs FUSE adapter.
//!
//! Translates the kernel's inode-addressed requests into the engine's
//! path-keyed operations. The translation tables here are the only state
//! this layer owns; every filesystem decision happens in `blendfs_core`.

use blendfs_core::{Attributes, BlendFs, DirEntry, EntryKind, FsConfig};
use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use libc::{EINVAL, ENAMETOOLONG, ENOENT, c_int};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Maximum single path component length to guard against overly long names
const NAME_MAX: usize = 255;

/// TTL handed to the kernel for attribute and entry cache responses
const CACHE_TTL: Duration = Duration::from_secs(1);

/// blendfs FUSE filesystem adapter
pub struct BlendFuse {
    /// The routing & virtual store engine
    fs: BlendFs,
    /// Cache of inode to path mappings
    inodes: HashMap<u64, Vec<u8>>, // inode -> mount-relative path
    /// Reverse mapping from path to inode
    paths: HashMap<Vec<u8>, u64>, // path -> inode
    /// Next available inode number
    next_inode: u64,
}

impl BlendFuse {
    pub fn new(config: FsConfig) -> Self {
        let mut inodes = HashMap::new();
        let mut paths = HashMap::new();
        inodes.insert(FUSE_ROOT_ID, b"/".to_vec());
        paths.insert(b"/".to_vec(), FUSE_ROOT_ID);

        Self {
            fs: BlendFs::new(config),
            inodes,
            paths,
            next_inode: FUSE_ROOT_ID + 1,
        }
    }

    fn inode_to_path(&self, ino: u64) -> Option<&[u8]> {
        self.inodes.get(&ino).map(|p| p.as_slice())
    }

    fn alloc_inode(&mut self, path: &[u8]) -> u64 {
        let ino = self.next_inode;
        self.next_inode += 1;
        self.inodes.insert(ino, path.to_vec());
        self.paths.insert(path.to_vec(), ino);
        ino
    }

    fn get_or_alloc_inode(&mut self, path: &[u8]) -> u64 {
        match self.paths.get(path) {
            Some(ino) => *ino,
            None => self.alloc_inode(path),
        }
    }

    fn record_path_for_inode(&mut self, path: Vec<u8>, inode: u64) {
        self.inodes.insert(inode, path.clone());
        self.paths.insert(path, inode);
    }

    fn remove_path_mapping(&mut self, path: &[u8]) -> Option<u64> {
        let inode = self.paths.remove(path)?;
        self.inodes.remove(&inode);
        Some(inode)
    }

    fn forget_inode(&mut self, inode: u64) {
        if inode == FUSE_ROOT_ID {
            return;
        }
        if let Some(path) = self.inodes.remove(&inode) {
            self.paths.remove(&path);
        }
    }

    fn path_from_bytes<'a>(&self, path: &'a [u8]) -> &'a Path {
        Path::new(OsStr::from_bytes(path))
    }

    /// Join a parent path with one name component.
    fn child_path(parent: &[u8], name: &OsStr) -> Vec<u8> {
        let mut path = parent.to_vec();
        if !path.ends_with(b"/") {
            path.push(b'/');
        }
        path.extend_from_slice(name.as_bytes());
        path
    }

    /// Convert engine attributes to a FUSE attribute record
    fn attr_to_fuse(&self, attr: &Attributes, ino: u64) -> FileAttr {
        FileAttr {
            ino,
            size: attr.size,
            blocks: (attr.size + 511) / 512, // 512-byte blocks
            atime: attr.times.atime,
            mtime: attr.times.mtime,
            ctime: attr.times.ctime,
            crtime: attr.times.ctime,
            kind: kind_to_fuse(attr.kind),
            perm: attr.perm() as u16,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: 512,
            flags: 0, // macOS specific
        }
    }

    /// `reply.entry` for a freshly created or linked path.
    fn reply_entry_for(&mut self, path: Vec<u8>, reply: ReplyEntry) {
        match self.fs.getattr(self.path_from_bytes(&path)) {
            Ok(attr) => {
                let ino = self.get_or_alloc_inode(&path);
                let fuse_attr = self.attr_to_fuse(&attr, ino);
                reply.entry(&CACHE_TTL, &fuse_attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn resolve_time(time: TimeOrNow) -> SystemTime {
        match time {
            TimeOrNow::SpecificTime(t) => t,
            TimeOrNow::Now => SystemTime::now(),
        }
    }
}

fn kind_to_fuse(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::RegularFile => FileType::RegularFile,
        EntryKind::Symlink => FileType::Symlink,
    }
}

impl fuser::Filesystem for BlendFuse {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), c_int> {
        debug!("blendfs FUSE session initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!("blendfs FUSE session destroyed");
    }

    fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
        self.forget_inode(ino);
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if name.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let full_path = Self::child_path(parent_path, name);
        match self.fs.getattr(self.path_from_bytes(&full_path)) {
            Ok(attr) => {
                let ino = self.get_or_alloc_inode(&full_path);
                let fuse_attr = self.attr_to_fuse(&attr, ino);
                reply.entry(&CACHE_TTL, &fuse_attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.getattr(self.path_from_bytes(path_bytes)) {
            Ok(attr) => {
                let fuse_attr = self.attr_to_fuse(&attr, ino);
                reply.attr(&CACHE_TTL, &fuse_attr);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let path = Path::new(OsStr::from_bytes(&path_bytes)).to_path_buf();

        // Apply size (truncate)
        if let Some(new_size) = size {
            if let Err(e) = self.fs.truncate(&path, new_size) {
                reply.error(e.errno());
                return;
            }
        }

        // Apply mode (chmod)
        if let Some(new_mode) = mode {
            if let Err(e) = self.fs.chmod(&path, new_mode) {
                reply.error(e.errno());
                return;
            }
        }

        // Apply ownership (chown); the engine overwrites both ids, so fill
        // the omitted side from the current attributes.
        if uid.is_some() || gid.is_some() {
            let current = match self.fs.getattr(&path) {
                Ok(attr) => attr,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            };
            let result = self.fs.chown(
                &path,
                uid.unwrap_or(current.uid),
                gid.unwrap_or(current.gid),
            );
            if let Err(e) = result {
                reply.error(e.errno());
                return;
            }
        }

        // Apply timestamps (utimens)
        if atime.is_some() || mtime.is_some() {
            let current = match self.fs.getattr(&path) {
                Ok(attr) => attr,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            };
            let atime = atime.map(Self::resolve_time).unwrap_or(current.times.atime);
            let mtime = mtime.map(Self::resolve_time).unwrap_or(current.times.mtime);
            if let Err(e) = self.fs.utimens(&path, Some((atime, mtime))) {
                reply.error(e.errno());
                return;
            }
        }

        match self.fs.getattr(&path) {
            Ok(attr) => {
                let fuse_attr = self.attr_to_fuse(&attr, ino);
                reply.attr(&CACHE_TTL, &fuse_attr);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.readlink(self.path_from_bytes(path_bytes)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        if name.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let full_path = Self::child_path(parent_path, name);
        let file_type = mode & libc::S_IFMT as u32;
        let final_mode = file_type | (mode & 0o7777 & !umask);

        match self.fs.mknod(
            self.path_from_bytes(&full_path),
            final_mode,
            rdev as u64,
        ) {
            Ok(()) => self.reply_entry_for(full_path, reply),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        if name.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let full_path = Self::child_path(parent_path, name);
        match self.fs.mkdir(
            self.path_from_bytes(&full_path),
            mode,
            req.uid(),
            req.gid(),
        ) {
            Ok(()) => self.reply_entry_for(full_path, reply),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if name.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let full_path = Self::child_path(parent_path, name);
        match self.fs.unlink(self.path_from_bytes(&full_path)) {
            Ok(()) => {
                self.remove_path_mapping(&full_path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if name.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let full_path = Self::child_path(parent_path, name);
        match self.fs.rmdir(self.path_from_bytes(&full_path)) {
            Ok(()) => {
                self.remove_path_mapping(&full_path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: ReplyEntry,
    ) {
        if name.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let full_path = Self::child_path(parent_path, name);
        match self.fs.symlink(
            self.path_from_bytes(&full_path),
            link,
            req.uid(),
            req.gid(),
        ) {
            Ok(()) => self.reply_entry_for(full_path, reply),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        if name.as_bytes().len() > NAME_MAX || newname.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let newparent_path = match self.inode_to_path(newparent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let old_path = Self::child_path(parent_path, name);
        let new_path = Self::child_path(newparent_path, newname);

        match self.fs.rename(
            self.path_from_bytes(&old_path),
            self.path_from_bytes(&new_path),
        ) {
            Ok(()) => {
                if let Some(inode) = self.remove_path_mapping(&old_path) {
                    self.record_path_for_inode(new_path, inode);
                }
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        if newname.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let old_path = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let newparent_path = match self.inode_to_path(newparent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let new_path = Self::child_path(newparent_path, newname);
        match self.fs.link(
            self.path_from_bytes(&old_path),
            self.path_from_bytes(&new_path),
        ) {
            Ok(()) => self.reply_entry_for(new_path, reply),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.open(self.path_from_bytes(&path_bytes), flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self
            .fs
            .read(self.path_from_bytes(&path_bytes), fh, offset as u64, size)
        {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self
            .fs
            .write(self.path_from_bytes(&path_bytes), fh, offset as u64, data)
        {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.flush(self.path_from_bytes(&path_bytes), fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.release(self.path_from_bytes(&path_bytes), fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self
            .fs
            .fsync(self.path_from_bytes(&path_bytes), fh, datasync)
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let entries: Vec<DirEntry> =
            match self.fs.readdir(self.path_from_bytes(&path_bytes)) {
                Ok(entries) => entries,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            };

        for (i, entry) in entries.iter().enumerate().skip(offset as usize) {
            let entry_ino = if entry.name == "." {
                ino
            } else if entry.name == ".." {
                let parent = Path::new(OsStr::from_bytes(&path_bytes))
                    .parent()
                    .map(|p| p.as_os_str().as_bytes().to_vec())
                    .unwrap_or_else(|| b"/".to_vec());
                self.get_or_alloc_inode(&parent)
            } else {
                let child = Self::child_path(&path_bytes, &entry.name);
                self.get_or_alloc_inode(&child)
            };

            if reply.add(entry_ino, (i + 1) as i64, kind_to_fuse(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.statfs(self.path_from_bytes(path_bytes)) {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.bfree,
                stats.bavail,
                stats.files,
                stats.ffree,
                stats.bsize,
                stats.namelen,
                stats.frsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        // XATTR_CREATE / XATTR_REPLACE are ignored: the virtual store keeps
        // last-writer-wins semantics.
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let name_str = name.to_str().unwrap_or("");
        match self
            .fs
            .xattr_set(self.path_from_bytes(&path_bytes), name_str, value)
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let name_str = name.to_str().unwrap_or("");
        match self.fs.xattr_get(self.path_from_bytes(path_bytes), name_str) {
            Ok(value) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if value.len() <= size as usize {
                    reply.data(&value);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.xattr_list(self.path_from_bytes(path_bytes)) {
            Ok(names) => {
                let mut buffer = Vec::new();
                for name in &names {
                    buffer.extend_from_slice(name.as_bytes());
                    buffer.push(0); // NUL terminator
                }

                if size == 0 {
                    reply.size(buffer.len() as u32);
                } else if buffer.len() <= size as usize {
                    reply.data(&buffer);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p.to_vec(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let name_str = name.to_str().unwrap_or("");
        match self
            .fs
            .xattr_remove(self.path_from_bytes(&path_bytes), name_str)
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path_bytes = match self.inode_to_path(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.fs.access(self.path_from_bytes(path_bytes), mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if name.as_bytes().len() > NAME_MAX {
            reply.error(ENAMETOOLONG);
            return;
        }

        let parent_path = match self.inode_to_path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let full_path = Self::child_path(parent_path, name);
        let path = Path::new(OsStr::from_bytes(&full_path)).to_path_buf();

        match self.fs.create(&path, mode, req.uid(), req.gid()) {
            Ok(fh) => match self.fs.getattr(&path) {
                Ok(attr) => {
                    let ino = self.get_or_alloc_inode(&full_path);
                    let fuse_attr = self.attr_to_fuse(&attr, ino);
                    reply.created(&CACHE_TTL, &fuse_attr, 0, fh, 0);
                }
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> (BlendFuse, tempfile::TempDir) {
        let backing = tempfile::tempdir().expect("backing root");
        let adapter = BlendFuse::new(FsConfig::new(backing.path()));
        (adapter, backing)
    }

    #[test]
    fn root_inode_is_premapped() {
        let (adapter, _backing) = test_adapter();
        assert_eq!(adapter.inode_to_path(FUSE_ROOT_ID), Some(b"/".as_slice()));
    }

    #[test]
    fn inode_allocation_is_stable_per_path() {
        let (mut adapter, _backing) = test_adapter();
        let a = adapter.get_or_alloc_inode(b"/a");
        let b = adapter.get_or_alloc_inode(b"/b");
        assert_ne!(a, b);
        assert_eq!(adapter.get_or_alloc_inode(b"/a"), a);
    }

    #[test]
    fn rename_rekeys_the_mapping() {
        let (mut adapter, _backing) = test_adapter();
        let ino = adapter.get_or_alloc_inode(b"/old");

        let moved = adapter.remove_path_mapping(b"/old").expect("mapping exists");
        adapter.record_path_for_inode(b"/new".to_vec(), moved);

        assert_eq!(adapter.inode_to_path(ino), Some(b"/new".as_slice()));
        assert_eq!(adapter.get_or_alloc_inode(b"/new"), ino);
        assert!(adapter.remove_path_mapping(b"/old").is_none());
    }

    #[test]
    fn forget_drops_mapping_but_never_the_root() {
        let (mut adapter, _backing) = test_adapter();
        let ino = adapter.get_or_alloc_inode(b"/tmp_entry");
        adapter.forget_inode(ino);
        assert!(adapter.inode_to_path(ino).is_none());

        adapter.forget_inode(FUSE_ROOT_ID);
        assert_eq!(adapter.inode_to_path(FUSE_ROOT_ID), Some(b"/".as_slice()));
    }

    #[test]
    fn child_path_joins_single_component() {
        assert_eq!(BlendFuse::child_path(b"/", OsStr::new("a")), b"/a");
        assert_eq!(BlendFuse::child_path(b"/d", OsStr::new("e")), b"/d/e");
    }

    #[test]
    fn attributes_convert_to_fuse_records() {
        let (mut adapter, _backing) = test_adapter();
        let path = Path::new("/f");
        adapter.fs.create(path, 0o640, 12, 34).expect("create");
        let attr = adapter.fs.getattr(path).expect("getattr");

        let fuse_attr = adapter.attr_to_fuse(&attr, 9);
        assert_eq!(fuse_attr.ino, 9);
        assert_eq!(fuse_attr.kind, FileType::RegularFile);
        assert_eq!(fuse_attr.perm, 0o640);
        assert_eq!((fuse_attr.uid, fuse_attr.gid), (12, 34));
    }
}
