// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Routing & virtual store engine.
//!
//! Every operation first decides which domain owns the path: paths present
//! in the in-memory registry are served from the virtual store, everything
//! else is translated onto the backing root and delegated to the host
//! filesystem. Virtual entries shadow same-named host objects for as long
//! as they exist.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::File;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::host::RealHostFs;
use crate::types::{Attributes, DirEntry, EntryKind, FileTimes, HostFs, StatFs};

/// Metadata record for one virtual path.
#[derive(Clone, Debug)]
pub(crate) struct Entry {
    kind: EntryKind,
    /// Kind bits | permission bits, `st_mode` layout.
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    size: u64,
    times: FileTimes,
    xattrs: HashMap<String, Vec<u8>>,
}

impl Entry {
    fn new(kind: EntryKind, mode: u32, uid: u32, gid: u32, nlink: u32, size: u64) -> Self {
        Self {
            kind,
            mode,
            uid,
            gid,
            nlink,
            size,
            times: FileTimes::now(),
            xattrs: HashMap::new(),
        }
    }

    fn attributes(&self) -> Attributes {
        Attributes {
            kind: self.kind,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            nlink: self.nlink,
            size: self.size,
            times: self.times,
        }
    }
}

/// The two-domain filesystem engine.
pub struct BlendFs {
    config: FsConfig,
    host: Box<dyn HostFs>,
    /// Virtual registry, keyed by absolute mount-relative path. Presence in
    /// this map is the domain test for every operation.
    entries: HashMap<PathBuf, Entry>,
    /// Byte payloads for virtual files and symlink targets. An absent key
    /// reads as an empty buffer, never as an error.
    data: HashMap<PathBuf, Vec<u8>>,
    /// Open host files for passthrough paths. Virtual handles have no
    /// table entry; their values are inert.
    handles: HashMap<u64, File>,
    /// Shared handle counter for `create` and `open`, never reused within
    /// the process lifetime. Plain integer: dispatch is serialized.
    next_fh: u64,
}

impl BlendFs {
    /// Engine over the real host filesystem.
    pub fn new(config: FsConfig) -> Self {
        Self::with_host(config, Box::new(RealHostFs))
    }

    /// Engine over an arbitrary host service (tests inject a mock here).
    pub fn with_host(config: FsConfig, host: Box<dyn HostFs>) -> Self {
        let mut entries = HashMap::new();
        // The root entry is permanent; its link count tracks the number of
        // virtual subdirectories.
        entries.insert(
            PathBuf::from("/"),
            Entry::new(
                EntryKind::Directory,
                libc::S_IFDIR as u32 | 0o755,
                unsafe { libc::getuid() },
                unsafe { libc::getgid() },
                2,
                0,
            ),
        );
        Self {
            config,
            host,
            entries,
            data: HashMap::new(),
            handles: HashMap::new(),
            next_fh: 0,
        }
    }

    /// Translate a mount-relative path into the backing root's namespace.
    fn full_path(&self, path: &Path) -> PathBuf {
        self.config.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn is_virtual(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    fn alloc_fh(&mut self) -> u64 {
        self.next_fh += 1;
        self.next_fh
    }

    fn root_entry_mut(&mut self) -> &mut Entry {
        self.entries
            .get_mut(Path::new("/"))
            .expect("root entry is permanent")
    }

    /// Always succeeds for virtual paths; the host decides for the rest.
    pub fn access(&self, path: &Path, mask: i32) -> FsResult<()> {
        if self.is_virtual(path) {
            return Ok(());
        }
        self.host.access(&self.full_path(path), mask)
    }

    pub fn getattr(&self, path: &Path) -> FsResult<Attributes> {
        match self.entries.get(path) {
            Some(entry) => Ok(entry.attributes()),
            None => self.host.lstat(&self.full_path(path)),
        }
    }

    /// Replace the permission bits, preserving the kind bits.
    pub fn chmod(&mut self, path: &Path, mode: u32) -> FsResult<()> {
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.mode = (entry.mode & libc::S_IFMT as u32) | (mode & !(libc::S_IFMT as u32));
                Ok(())
            }
            None => self.host.chmod(&self.full_path(path), mode),
        }
    }

    /// Overwrite ownership unconditionally; no permission check.
    pub fn chown(&mut self, path: &Path, uid: u32, gid: u32) -> FsResult<()> {
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.uid = uid;
                entry.gid = gid;
                Ok(())
            }
            None => self.host.chown(&self.full_path(path), uid, gid),
        }
    }

    /// Create a virtual regular file and return a fresh handle.
    ///
    /// Creation always targets the virtual store — this is how a path enters
    /// the virtual domain. A same-named entry (and any stale content) is
    /// replaced.
    pub fn create(&mut self, path: &Path, mode: u32, uid: u32, gid: u32) -> FsResult<u64> {
        debug!(path = %path.display(), mode, "create virtual file");
        self.entries.insert(
            path.to_path_buf(),
            Entry::new(
                EntryKind::RegularFile,
                libc::S_IFREG as u32 | (mode & !(libc::S_IFMT as u32)),
                uid,
                gid,
                1,
                0,
            ),
        );
        self.data.remove(path);
        Ok(self.alloc_fh())
    }

    /// Create a virtual directory and bump the root link count.
    pub fn mkdir(&mut self, path: &Path, mode: u32, uid: u32, gid: u32) -> FsResult<()> {
        debug!(path = %path.display(), "create virtual directory");
        self.entries.insert(
            path.to_path_buf(),
            Entry::new(
                EntryKind::Directory,
                libc::S_IFDIR as u32 | (mode & !(libc::S_IFMT as u32)),
                uid,
                gid,
                2,
                0,
            ),
        );
        self.root_entry_mut().nlink += 1;
        Ok(())
    }

    /// Unconditional removal; emptiness is not verified (registry
    /// semantics).
    pub fn rmdir(&mut self, path: &Path) -> FsResult<()> {
        match self.entries.remove(path) {
            Some(_) => {
                self.root_entry_mut().nlink -= 1;
                Ok(())
            }
            None => self.host.rmdir(&self.full_path(path)),
        }
    }

    /// Open a path, returning a fresh handle. Virtual opens perform no I/O;
    /// passthrough opens hold the host descriptor until `release`.
    pub fn open(&mut self, path: &Path, flags: i32) -> FsResult<u64> {
        if self.is_virtual(path) {
            return Ok(self.alloc_fh());
        }
        let file = self.host.open(&self.full_path(path), flags)?;
        let fh = self.alloc_fh();
        self.handles.insert(fh, file);
        Ok(fh)
    }

    /// Read `[offset, offset + size)`, clipped to the content length.
    /// Over-reads return fewer bytes or none, never an error.
    pub fn read(&self, path: &Path, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        if self.is_virtual(path) {
            let content = self.data.get(path).map(Vec::as_slice).unwrap_or(&[]);
            let start = (offset as usize).min(content.len());
            let end = start.saturating_add(size as usize).min(content.len());
            return Ok(content[start..end].to_vec());
        }
        let file = self.handles.get(&fh).ok_or(FsError::BadFileDescriptor)?;
        let mut buf = vec![0u8; size as usize];
        let read = file.read_at(&mut buf, offset)?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Write at `offset`, discarding any previously-held bytes beyond the
    /// write: the new content is `old[..offset] + data`, not a splice. The
    /// gap is not zero-filled when `offset` exceeds the current length.
    pub fn write(&mut self, path: &Path, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        if self.is_virtual(path) {
            let content = self.data.entry(path.to_path_buf()).or_default();
            let keep = (offset as usize).min(content.len());
            content.truncate(keep);
            content.extend_from_slice(data);
            let size = content.len() as u64;

            let entry = self
                .entries
                .get_mut(path)
                .expect("virtual entry exists for virtual content");
            entry.size = size;
            let now = SystemTime::now();
            entry.times.mtime = now;
            entry.times.ctime = now;
            return Ok(data.len());
        }
        let file = self.handles.get(&fh).ok_or(FsError::BadFileDescriptor)?;
        Ok(file.write_at(data, offset)?)
    }

    /// Cut the content to `size` bytes. Growing a virtual file zero-pads so
    /// the recorded size always matches the buffer length.
    pub fn truncate(&mut self, path: &Path, size: u64) -> FsResult<()> {
        match self.entries.get_mut(path) {
            Some(entry) => {
                let content = self.data.entry(path.to_path_buf()).or_default();
                content.resize(size as usize, 0);
                entry.size = size;
                let now = SystemTime::now();
                entry.times.mtime = now;
                entry.times.ctime = now;
                Ok(())
            }
            None => self.host.truncate(&self.full_path(path), size),
        }
    }

    /// List a directory: `.` and `..`, then the children of the owning
    /// domain. The mount root merges both domains, virtual names winning.
    pub fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let mut listing = vec![
            DirEntry::new(".", EntryKind::Directory),
            DirEntry::new("..", EntryKind::Directory),
        ];

        if !self.is_virtual(path) {
            listing.extend(self.host.readdir(&self.full_path(path))?);
            return Ok(listing);
        }

        let mut seen: HashSet<OsString> = HashSet::new();
        let mut children: Vec<DirEntry> = self
            .entries
            .iter()
            .filter(|(p, _)| p.as_path() != Path::new("/"))
            .filter_map(|(p, entry)| match (p.parent(), p.file_name()) {
                (Some(parent), Some(name)) if parent == path => {
                    Some(DirEntry::new(name, entry.kind))
                }
                _ => None,
            })
            .collect();
        // Stable order so the transport can resume enumeration mid-listing.
        children.sort_by(|a, b| a.name.cmp(&b.name));
        for child in children {
            if seen.insert(child.name.clone()) {
                listing.push(child);
            }
        }

        if path == Path::new("/") {
            // Host names already shadowed by a virtual entry are dropped.
            match self.host.readdir(&self.full_path(path)) {
                Ok(host_entries) => {
                    for entry in host_entries {
                        if seen.insert(entry.name.clone()) {
                            listing.push(entry);
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "skipping host listing for mount root");
                }
            }
        }

        Ok(listing)
    }

    /// Return the symlink target, unvalidated. Passthrough targets that are
    /// absolute get rewritten into the mount's namespace.
    pub fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        if self.is_virtual(path) {
            let target = self.data.get(path).cloned().unwrap_or_default();
            return Ok(PathBuf::from(OsString::from_vec(target)));
        }
        let target = self.host.readlink(&self.full_path(path))?;
        if target.is_absolute() {
            if let Ok(relative) = target.strip_prefix(&self.config.root) {
                return Ok(relative.to_path_buf());
            }
        }
        Ok(target)
    }

    /// Create a virtual symlink; the target string is the entry's content.
    pub fn symlink(&mut self, path: &Path, target: &Path, uid: u32, gid: u32) -> FsResult<()> {
        use std::os::unix::ffi::OsStrExt;
        debug!(path = %path.display(), target = %target.display(), "create virtual symlink");
        let bytes = target.as_os_str().as_bytes().to_vec();
        self.entries.insert(
            path.to_path_buf(),
            Entry::new(
                EntryKind::Symlink,
                libc::S_IFLNK as u32 | 0o777,
                uid,
                gid,
                1,
                bytes.len() as u64,
            ),
        );
        self.data.insert(path.to_path_buf(), bytes);
        Ok(())
    }

    /// Re-key a virtual entry (metadata and content travel together, an
    /// existing virtual destination is silently replaced), or delegate.
    pub fn rename(&mut self, old: &Path, new: &Path) -> FsResult<()> {
        match self.entries.remove(old) {
            Some(entry) => {
                debug!(old = %old.display(), new = %new.display(), "rename virtual entry");
                self.entries.insert(new.to_path_buf(), entry);
                match self.data.remove(old) {
                    Some(content) => {
                        self.data.insert(new.to_path_buf(), content);
                    }
                    // A replaced destination must not keep stale bytes.
                    None => {
                        self.data.remove(new);
                    }
                }
                Ok(())
            }
            None => self.host.rename(&self.full_path(old), &self.full_path(new)),
        }
    }

    /// Remove a virtual entry together with its content, or delegate.
    pub fn unlink(&mut self, path: &Path) -> FsResult<()> {
        match self.entries.remove(path) {
            Some(_) => {
                self.data.remove(path);
                Ok(())
            }
            None => self.host.unlink(&self.full_path(path)),
        }
    }

    /// Hard links are always delegated to the host, whatever the domain of
    /// either path. A virtual-only operand therefore addresses a (usually
    /// nonexistent) backing path and surfaces the host's error.
    pub fn link(&self, original: &Path, link: &Path) -> FsResult<()> {
        self.host
            .link(&self.full_path(original), &self.full_path(link))
    }

    /// Device/FIFO nodes are host-only objects.
    pub fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> FsResult<()> {
        self.host.mknod(&self.full_path(path), mode, rdev)
    }

    /// Set both timestamps to the given pair, or to the current time.
    pub fn utimens(
        &mut self,
        path: &Path,
        times: Option<(SystemTime, SystemTime)>,
    ) -> FsResult<()> {
        let (atime, mtime) = times.unwrap_or_else(|| {
            let now = SystemTime::now();
            (now, now)
        });
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.times.atime = atime;
                entry.times.mtime = mtime;
                Ok(())
            }
            None => self.host.utimens(&self.full_path(path), atime, mtime),
        }
    }

    /// Virtual paths report a fixed synthetic record; passthrough asks the
    /// host.
    pub fn statfs(&self, path: &Path) -> FsResult<StatFs> {
        if self.is_virtual(path) {
            return Ok(StatFs {
                bsize: 512,
                blocks: 4096,
                bavail: 2048,
                ..StatFs::default()
            });
        }
        self.host.statfs(&self.full_path(path))
    }

    /// No-op for virtual paths; flushes the host descriptor otherwise.
    pub fn flush(&self, path: &Path, fh: u64) -> FsResult<()> {
        if self.is_virtual(path) {
            return Ok(());
        }
        let file = self.handles.get(&fh).ok_or(FsError::BadFileDescriptor)?;
        file.sync_all()?;
        Ok(())
    }

    /// No-op for virtual paths; syncs the host descriptor otherwise.
    pub fn fsync(&self, path: &Path, fh: u64, datasync: bool) -> FsResult<()> {
        if self.is_virtual(path) {
            return Ok(());
        }
        let file = self.handles.get(&fh).ok_or(FsError::BadFileDescriptor)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Drop the handle. Virtual handles hold no state; passthrough handles
    /// close the host descriptor.
    pub fn release(&mut self, path: &Path, fh: u64) -> FsResult<()> {
        if self.is_virtual(path) {
            return Ok(());
        }
        self.handles
            .remove(&fh)
            .map(drop)
            .ok_or(FsError::BadFileDescriptor)
    }

    /// A missing attribute reads as an empty value, not an error — kept
    /// deliberately for client compatibility, against strict POSIX.
    pub fn xattr_get(&self, path: &Path, name: &str) -> FsResult<Vec<u8>> {
        match self.entries.get(path) {
            Some(entry) => Ok(entry.xattrs.get(name).cloned().unwrap_or_default()),
            None => self.host.getxattr(&self.full_path(path), name),
        }
    }

    pub fn xattr_set(&mut self, path: &Path, name: &str, value: &[u8]) -> FsResult<()> {
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.xattrs.insert(name.to_string(), value.to_vec());
                Ok(())
            }
            None => self.host.setxattr(&self.full_path(path), name, value),
        }
    }

    pub fn xattr_list(&self, path: &Path) -> FsResult<Vec<String>> {
        match self.entries.get(path) {
            Some(entry) => {
                let mut names: Vec<String> = entry.xattrs.keys().cloned().collect();
                names.sort();
                Ok(names)
            }
            None => self.host.listxattr(&self.full_path(path)),
        }
    }

    /// Removing an absent attribute is a silent no-op for virtual paths.
    pub fn xattr_remove(&mut self, path: &Path, name: &str) -> FsResult<()> {
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.xattrs.remove(name);
                Ok(())
            }
            None => self.host.removexattr(&self.full_path(path), name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MockHostFs;
    use std::fs;
    use std::io;

    fn test_fs() -> (BlendFs, tempfile::TempDir) {
        let backing = tempfile::tempdir().expect("backing root");
        let fs = BlendFs::new(FsConfig::new(backing.path()));
        (fs, backing)
    }

    fn names(listing: &[DirEntry]) -> Vec<String> {
        listing
            .iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn create_write_read_roundtrip() {
        let (mut fs, backing) = test_fs();

        let fh = fs.create(Path::new("/a"), 0o644, 1000, 1000).expect("create");
        let written = fs.write(Path::new("/a"), fh, 0, b"hello").expect("write");
        assert_eq!(written, 5);

        let read = fs.read(Path::new("/a"), fh, 0, 5).expect("read");
        assert_eq!(read, b"hello");

        let attr = fs.getattr(Path::new("/a")).expect("getattr");
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, EntryKind::RegularFile);
        assert_eq!(attr.mode, libc::S_IFREG as u32 | 0o644);
        assert_eq!(attr.uid, 1000);

        // Nothing was mirrored onto the backing disk.
        assert!(!backing.path().join("a").exists());
    }

    #[test]
    fn write_at_offset_truncates_tail() {
        let (mut fs, _backing) = test_fs();
        let fh = fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");
        fs.write(Path::new("/f"), fh, 0, b"XYZ").expect("seed");

        // Overwrite-at-offset discards the old tail: "AB", not "ABZ".
        fs.write(Path::new("/f"), fh, 0, b"AB").expect("overwrite");
        assert_eq!(fs.read(Path::new("/f"), fh, 0, 16).expect("read"), b"AB");
        assert_eq!(fs.getattr(Path::new("/f")).expect("getattr").size, 2);
    }

    #[test]
    fn write_past_end_appends_without_padding() {
        let (mut fs, _backing) = test_fs();
        let fh = fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");
        fs.write(Path::new("/f"), fh, 0, b"abc").expect("seed");

        // Slice semantics: an offset past the end does not zero-fill a gap.
        fs.write(Path::new("/f"), fh, 10, b"Z").expect("write past end");
        assert_eq!(fs.read(Path::new("/f"), fh, 0, 16).expect("read"), b"abcZ");
        assert_eq!(fs.getattr(Path::new("/f")).expect("getattr").size, 4);
    }

    #[test]
    fn read_clips_to_content_length() {
        let (mut fs, _backing) = test_fs();
        let fh = fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");
        fs.write(Path::new("/f"), fh, 0, b"abc").expect("seed");

        assert_eq!(fs.read(Path::new("/f"), fh, 1, 100).expect("read"), b"bc");
        assert!(fs.read(Path::new("/f"), fh, 50, 4).expect("read").is_empty());
    }

    #[test]
    fn truncate_shrinks_to_prefix() {
        let (mut fs, _backing) = test_fs();
        let fh = fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");
        fs.write(Path::new("/f"), fh, 0, b"hello world").expect("seed");

        fs.truncate(Path::new("/f"), 5).expect("truncate");
        assert_eq!(fs.read(Path::new("/f"), fh, 0, 64).expect("read"), b"hello");
        assert_eq!(fs.getattr(Path::new("/f")).expect("getattr").size, 5);
    }

    #[test]
    fn truncate_past_end_zero_pads() {
        // Growing is unspecified upstream; this engine chooses zero-padding
        // so size and content length never diverge.
        let (mut fs, _backing) = test_fs();
        let fh = fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");
        fs.write(Path::new("/f"), fh, 0, b"ab").expect("seed");

        fs.truncate(Path::new("/f"), 4).expect("truncate");
        assert_eq!(
            fs.read(Path::new("/f"), fh, 0, 16).expect("read"),
            b"ab\0\0"
        );
        assert_eq!(fs.getattr(Path::new("/f")).expect("getattr").size, 4);
    }

    #[test]
    fn mkdir_rmdir_adjust_root_link_count() {
        let (mut fs, _backing) = test_fs();
        let before = fs.getattr(Path::new("/")).expect("getattr").nlink;

        fs.mkdir(Path::new("/d"), 0o755, 0, 0).expect("mkdir");
        assert_eq!(fs.getattr(Path::new("/")).expect("getattr").nlink, before + 1);
        let attr = fs.getattr(Path::new("/d")).expect("getattr");
        assert_eq!(attr.kind, EntryKind::Directory);
        assert_eq!(attr.nlink, 2);

        fs.rmdir(Path::new("/d")).expect("rmdir");
        assert_eq!(fs.getattr(Path::new("/")).expect("getattr").nlink, before);
    }

    #[test]
    fn rename_preserves_metadata_and_content() {
        let (mut fs, backing) = test_fs();
        let fh = fs.create(Path::new("/old"), 0o600, 42, 43).expect("create");
        fs.write(Path::new("/old"), fh, 0, b"payload").expect("seed");
        fs.xattr_set(Path::new("/old"), "user.tag", b"v").expect("setxattr");

        fs.rename(Path::new("/old"), Path::new("/new")).expect("rename");

        // The old name now resolves through the passthrough domain only.
        let err = fs.getattr(Path::new("/old")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        assert!(!backing.path().join("old").exists());

        let attr = fs.getattr(Path::new("/new")).expect("getattr");
        assert_eq!(attr.mode, libc::S_IFREG as u32 | 0o600);
        assert_eq!((attr.uid, attr.gid), (42, 43));
        assert_eq!(attr.size, 7);
        assert_eq!(fs.read(Path::new("/new"), fh, 0, 16).expect("read"), b"payload");
        assert_eq!(fs.xattr_get(Path::new("/new"), "user.tag").expect("getxattr"), b"v");
    }

    #[test]
    fn rename_replaces_existing_destination() {
        let (mut fs, _backing) = test_fs();
        let fh = fs.create(Path::new("/src"), 0o644, 0, 0).expect("create src");
        fs.write(Path::new("/src"), fh, 0, b"fresh").expect("seed src");
        let fh2 = fs.create(Path::new("/dst"), 0o644, 0, 0).expect("create dst");
        fs.write(Path::new("/dst"), fh2, 0, b"stale bytes").expect("seed dst");

        fs.rename(Path::new("/src"), Path::new("/dst")).expect("rename");
        assert_eq!(fs.read(Path::new("/dst"), fh, 0, 64).expect("read"), b"fresh");
        assert_eq!(fs.getattr(Path::new("/dst")).expect("getattr").size, 5);
    }

    #[test]
    fn symlink_readlink_roundtrip() {
        let (mut fs, _backing) = test_fs();
        fs.symlink(Path::new("/l"), Path::new("target/file"), 0, 0)
            .expect("symlink");

        assert_eq!(
            fs.readlink(Path::new("/l")).expect("readlink"),
            PathBuf::from("target/file")
        );
        let attr = fs.getattr(Path::new("/l")).expect("getattr");
        assert_eq!(attr.kind, EntryKind::Symlink);
        assert_eq!(attr.size, "target/file".len() as u64);
        assert_eq!(attr.mode, libc::S_IFLNK as u32 | 0o777);
    }

    #[test]
    fn passthrough_readlink_rewrites_absolute_targets() {
        let (fs, backing) = test_fs();
        let target = backing.path().join("real");
        fs::write(&target, b"").expect("fixture");
        std::os::unix::fs::symlink(&target, backing.path().join("abs")).expect("symlink");
        std::os::unix::fs::symlink("plain", backing.path().join("rel")).expect("symlink");

        assert_eq!(
            fs.readlink(Path::new("/abs")).expect("readlink"),
            PathBuf::from("real")
        );
        assert_eq!(
            fs.readlink(Path::new("/rel")).expect("readlink"),
            PathBuf::from("plain")
        );
    }

    #[test]
    fn chmod_preserves_kind_bits() {
        let (mut fs, _backing) = test_fs();
        fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");

        fs.chmod(Path::new("/f"), 0o4755).expect("chmod");
        let attr = fs.getattr(Path::new("/f")).expect("getattr");
        assert_eq!(attr.mode & libc::S_IFMT as u32, libc::S_IFREG as u32);
        assert_eq!(attr.perm(), 0o4755);
    }

    #[test]
    fn chown_overwrites_unconditionally() {
        let (mut fs, _backing) = test_fs();
        fs.create(Path::new("/f"), 0o644, 1, 1).expect("create");
        fs.chown(Path::new("/f"), 7, 8).expect("chown");
        let attr = fs.getattr(Path::new("/f")).expect("getattr");
        assert_eq!((attr.uid, attr.gid), (7, 8));
    }

    #[test]
    fn utimens_applies_pair_or_now() {
        let (mut fs, _backing) = test_fs();
        fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");

        let atime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(11);
        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(22);
        fs.utimens(Path::new("/f"), Some((atime, mtime))).expect("utimens");
        let attr = fs.getattr(Path::new("/f")).expect("getattr");
        assert_eq!(attr.times.atime, atime);
        assert_eq!(attr.times.mtime, mtime);

        let before = SystemTime::now();
        fs.utimens(Path::new("/f"), None).expect("utimens now");
        let attr = fs.getattr(Path::new("/f")).expect("getattr");
        assert!(attr.times.mtime >= before);
    }

    #[test]
    fn xattr_lifecycle_and_missing_name_reads_empty() {
        let (mut fs, _backing) = test_fs();
        fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");

        fs.xattr_set(Path::new("/f"), "user.k", b"v").expect("setxattr");
        assert_eq!(fs.xattr_get(Path::new("/f"), "user.k").expect("getxattr"), b"v");
        assert_eq!(fs.xattr_list(Path::new("/f")).expect("listxattr"), vec!["user.k"]);

        // Missing attribute reads as empty, never as an error.
        assert!(fs.xattr_get(Path::new("/f"), "user.absent").expect("getxattr").is_empty());

        fs.xattr_remove(Path::new("/f"), "user.k").expect("removexattr");
        // Removing an absent name stays silent too.
        fs.xattr_remove(Path::new("/f"), "user.k").expect("removexattr again");
        assert!(fs.xattr_list(Path::new("/f")).expect("listxattr").is_empty());
    }

    #[test]
    fn readdir_root_merges_both_domains_deduplicated() {
        let (mut fs, backing) = test_fs();
        fs::write(backing.path().join("host_only"), b"").expect("fixture");
        fs::write(backing.path().join("both"), b"").expect("fixture");

        fs.create(Path::new("/virtual_only"), 0o644, 0, 0).expect("create");
        fs.create(Path::new("/both"), 0o644, 0, 0).expect("create shadow");

        let listing = fs.readdir(Path::new("/")).expect("readdir");
        let listed = names(&listing);
        assert!(listed.starts_with(&[".".to_string(), "..".to_string()]));
        assert_eq!(listed.iter().filter(|n| *n == "both").count(), 1);
        assert!(listed.contains(&"host_only".to_string()));
        assert!(listed.contains(&"virtual_only".to_string()));
    }

    #[test]
    fn readdir_virtual_dir_lists_only_its_children() {
        let (mut fs, _backing) = test_fs();
        fs.mkdir(Path::new("/d"), 0o755, 0, 0).expect("mkdir");
        fs.create(Path::new("/d/inner"), 0o644, 0, 0).expect("create");
        fs.create(Path::new("/top"), 0o644, 0, 0).expect("create");

        let listed = names(&fs.readdir(Path::new("/d")).expect("readdir"));
        assert_eq!(listed, vec![".", "..", "inner"]);
    }

    #[test]
    fn readdir_passthrough_delegates() {
        let (fs, backing) = test_fs();
        let sub = backing.path().join("sub");
        fs::create_dir(&sub).expect("fixture dir");
        fs::write(sub.join("x"), b"").expect("fixture");

        let listed = names(&fs.readdir(Path::new("/sub")).expect("readdir"));
        assert_eq!(listed, vec![".", "..", "x"]);
    }

    #[test]
    fn unlink_removes_entry_then_passthrough_decides() {
        let (mut fs, backing) = test_fs();
        let fh = fs.create(Path::new("/a"), 0o644, 0, 0).expect("create");
        fs.write(Path::new("/a"), fh, 0, b"hello").expect("seed");

        fs.unlink(Path::new("/a")).expect("unlink");
        // Never created on the backing disk, so the fallthrough fails.
        let err = fs.getattr(Path::new("/a")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);

        // With a same-named host object the re-check succeeds instead.
        fs.create(Path::new("/b"), 0o644, 0, 0).expect("create");
        fs::write(backing.path().join("b"), b"disk").expect("fixture");
        fs.unlink(Path::new("/b")).expect("unlink");
        assert_eq!(fs.getattr(Path::new("/b")).expect("getattr").size, 4);
    }

    #[test]
    fn virtual_entry_shadows_host_object() {
        let (mut fs, backing) = test_fs();
        fs::write(backing.path().join("x"), b"disk bytes").expect("fixture");

        let fh = fs.create(Path::new("/x"), 0o600, 0, 0).expect("create");
        assert_eq!(fs.getattr(Path::new("/x")).expect("getattr").size, 0);
        assert!(fs.read(Path::new("/x"), fh, 0, 64).expect("read").is_empty());

        // Dropping the shadow exposes the host object again.
        fs.unlink(Path::new("/x")).expect("unlink");
        assert_eq!(fs.getattr(Path::new("/x")).expect("getattr").size, 10);
        assert_eq!(fs::read(backing.path().join("x")).expect("host intact"), b"disk bytes");
    }

    #[test]
    fn access_virtual_always_succeeds() {
        let (mut fs, _backing) = test_fs();
        fs.create(Path::new("/f"), 0o000, 0, 0).expect("create");
        fs.access(Path::new("/f"), libc::R_OK | libc::W_OK).expect("access");

        let err = fs.access(Path::new("/absent"), libc::F_OK).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn passthrough_io_via_host_handles() {
        let (mut fs, backing) = test_fs();
        fs::write(backing.path().join("h"), b"0123456789").expect("fixture");

        let fh = fs.open(Path::new("/h"), libc::O_RDWR).expect("open");
        assert_eq!(fs.read(Path::new("/h"), fh, 2, 4).expect("read"), b"2345");

        fs.write(Path::new("/h"), fh, 0, b"XX").expect("write");
        fs.flush(Path::new("/h"), fh).expect("flush");
        fs.fsync(Path::new("/h"), fh, true).expect("fsync");
        fs.release(Path::new("/h"), fh).expect("release");

        assert_eq!(fs::read(backing.path().join("h")).expect("read back"), b"XX23456789");

        // The handle is gone after release.
        let err = fs.read(Path::new("/h"), fh, 0, 1).unwrap_err();
        assert_eq!(err.errno(), libc::EBADF);
    }

    #[test]
    fn handles_are_monotonic_and_never_reused() {
        let (mut fs, backing) = test_fs();
        fs::write(backing.path().join("h"), b"").expect("fixture");

        let a = fs.create(Path::new("/a"), 0o644, 0, 0).expect("create");
        let b = fs.open(Path::new("/a"), libc::O_RDONLY).expect("open virtual");
        let c = fs.open(Path::new("/h"), libc::O_RDONLY).expect("open host");
        fs.release(Path::new("/h"), c).expect("release");
        let d = fs.open(Path::new("/h"), libc::O_RDONLY).expect("reopen host");
        assert!(a < b && b < c && c < d);
    }

    #[test]
    fn statfs_virtual_is_synthetic() {
        let (mut fs, _backing) = test_fs();
        fs.create(Path::new("/f"), 0o644, 0, 0).expect("create");

        let stats = fs.statfs(Path::new("/f")).expect("statfs");
        assert_eq!((stats.bsize, stats.blocks, stats.bavail), (512, 4096, 2048));

        // Passthrough paths go to the host, which rejects missing ones.
        let err = fs.statfs(Path::new("/nonvirtual")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn link_always_delegates_to_host() {
        let (mut fs, backing) = test_fs();
        fs::write(backing.path().join("real"), b"x").expect("fixture");

        fs.link(Path::new("/real"), Path::new("/real2")).expect("link");
        assert!(backing.path().join("real2").exists());

        // A virtual-only operand addresses a nonexistent backing path.
        fs.create(Path::new("/ghost"), 0o644, 0, 0).expect("create");
        let err = fs.link(Path::new("/ghost"), Path::new("/real3")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn host_errors_surface_verbatim() {
        let mut mock = MockHostFs::new();
        mock.expect_chmod()
            .returning(|_, _| Err(io::Error::from_raw_os_error(libc::EROFS).into()));
        mock.expect_lstat()
            .returning(|_| Err(io::Error::from_raw_os_error(libc::ESTALE).into()));

        let mut fs = BlendFs::with_host(FsConfig::new("/backing"), Box::new(mock));
        assert_eq!(
            fs.chmod(Path::new("/p"), 0o644).unwrap_err().errno(),
            libc::EROFS
        );
        assert_eq!(fs.getattr(Path::new("/p")).unwrap_err().errno(), libc::ESTALE);
    }

    #[test]
    fn passthrough_translates_paths_onto_backing_root() {
        let mut mock = MockHostFs::new();
        mock.expect_unlink()
            .withf(|p| p == Path::new("/backing/dir/leaf"))
            .times(1)
            .returning(|_| Ok(()));

        let mut fs = BlendFs::with_host(FsConfig::new("/backing"), Box::new(mock));
        fs.unlink(Path::new("/dir/leaf")).expect("unlink");
    }
}
