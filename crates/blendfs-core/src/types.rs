// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for blendfs

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::FsResult;

/// What a directory entry or virtual node is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
}

/// File timestamps
#[derive(Clone, Copy, Debug)]
pub struct FileTimes {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileTimes {
    /// All three stamps set to the current time.
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

/// File attributes as reported by `getattr`, covering both domains.
#[derive(Clone, Debug)]
pub struct Attributes {
    pub kind: EntryKind,
    /// Kind bits | permission bits, `st_mode` layout.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub times: FileTimes,
}

impl Attributes {
    /// Permission bits only (mode with the kind bits masked off).
    pub fn perm(&self) -> u32 {
        self.mode & !(libc::S_IFMT as u32)
    }
}

/// Directory entry information
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<OsString>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Filesystem block statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Host filesystem service backing the passthrough domain.
///
/// The engine addresses this trait with already-translated (backing-root
/// prefixed) paths and surfaces its errors to the transport unchanged.
#[cfg_attr(test, mockall::automock)]
pub trait HostFs: Send + Sync {
    /// `lstat` — attributes without following a trailing symlink.
    fn lstat(&self, abs_path: &Path) -> FsResult<Attributes>;

    /// Permission probe with the caller-supplied access mask.
    fn access(&self, abs_path: &Path, mask: i32) -> FsResult<()>;

    fn chmod(&self, abs_path: &Path, mode: u32) -> FsResult<()>;

    fn chown(&self, abs_path: &Path, uid: u32, gid: u32) -> FsResult<()>;

    /// Open with raw POSIX flags; the returned handle owns the descriptor.
    fn open(&self, abs_path: &Path, flags: i32) -> FsResult<File>;

    fn mknod(&self, abs_path: &Path, mode: u32, rdev: u64) -> FsResult<()>;

    fn readdir(&self, abs_dir: &Path) -> FsResult<Vec<DirEntry>>;

    fn readlink(&self, abs_path: &Path) -> FsResult<PathBuf>;

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;

    fn unlink(&self, abs_path: &Path) -> FsResult<()>;

    fn rmdir(&self, abs_path: &Path) -> FsResult<()>;

    /// Hard link: `link` becomes a new name for `original`.
    fn link(&self, original: &Path, link: &Path) -> FsResult<()>;

    fn truncate(&self, abs_path: &Path, size: u64) -> FsResult<()>;

    fn utimens(&self, abs_path: &Path, atime: SystemTime, mtime: SystemTime) -> FsResult<()>;

    fn statfs(&self, abs_path: &Path) -> FsResult<StatFs>;

    fn getxattr(&self, abs_path: &Path, name: &str) -> FsResult<Vec<u8>>;

    fn setxattr(&self, abs_path: &Path, name: &str, value: &[u8]) -> FsResult<()>;

    fn listxattr(&self, abs_path: &Path) -> FsResult<Vec<String>>;

    fn removexattr(&self, abs_path: &Path, name: &str) -> FsResult<()>;
}
