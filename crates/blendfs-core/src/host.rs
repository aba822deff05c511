// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Production [`HostFs`] implementation backed by the real filesystem.
//!
//! Uses `std::fs` where it covers the call and raw `libc` for the rest
//! (access, chown, mknod, utimensat, statvfs, xattrs). Every failure is
//! returned as the untranslated OS error.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{FsError, FsResult};
use crate::types::{Attributes, DirEntry, EntryKind, FileTimes, HostFs, StatFs};

/// [`HostFs`] over the process's own filesystem namespace.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealHostFs;

fn cstring(path: &Path) -> FsResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| FsError::InvalidArgument)
}

fn cstring_str(s: &str) -> FsResult<CString> {
    CString::new(s).map_err(|_| FsError::InvalidArgument)
}

fn check(ret: libc::c_int) -> FsResult<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

fn timestamp(secs: i64, nanos: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::new(secs.max(0) as u64, nanos.max(0) as u32)
}

fn timespec(t: SystemTime) -> libc::timespec {
    let since_epoch = t
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    libc::timespec {
        tv_sec: since_epoch.as_secs() as libc::time_t,
        tv_nsec: since_epoch.subsec_nanos() as _,
    }
}

fn kind_of(file_type: fs::FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::RegularFile
    }
}

impl HostFs for RealHostFs {
    fn lstat(&self, abs_path: &Path) -> FsResult<Attributes> {
        let meta = fs::symlink_metadata(abs_path)?;
        Ok(Attributes {
            kind: kind_of(meta.file_type()),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            nlink: meta.nlink() as u32,
            size: meta.len(),
            times: FileTimes {
                atime: timestamp(meta.atime(), meta.atime_nsec()),
                mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
                ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
            },
        })
    }

    fn access(&self, abs_path: &Path, mask: i32) -> FsResult<()> {
        let path = cstring(abs_path)?;
        check(unsafe { libc::access(path.as_ptr(), mask) })
    }

    fn chmod(&self, abs_path: &Path, mode: u32) -> FsResult<()> {
        fs::set_permissions(abs_path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn chown(&self, abs_path: &Path, uid: u32, gid: u32) -> FsResult<()> {
        let path = cstring(abs_path)?;
        check(unsafe { libc::chown(path.as_ptr(), uid, gid) })
    }

    fn open(&self, abs_path: &Path, flags: i32) -> FsResult<File> {
        let mut options = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => {
                options.write(true);
            }
            libc::O_RDWR => {
                options.read(true).write(true);
            }
            _ => {
                options.read(true);
            }
        }
        if flags & libc::O_APPEND != 0 {
            options.append(true);
        }
        if flags & libc::O_TRUNC != 0 {
            options.write(true).truncate(true);
        }
        if flags & libc::O_CREAT != 0 {
            options.create(true);
        }
        options.custom_flags(flags & !(libc::O_ACCMODE | libc::O_APPEND | libc::O_TRUNC | libc::O_CREAT));
        Ok(options.open(abs_path)?)
    }

    fn mknod(&self, abs_path: &Path, mode: u32, rdev: u64) -> FsResult<()> {
        let path = cstring(abs_path)?;
        check(unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })
    }

    fn readdir(&self, abs_dir: &Path) -> FsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(abs_dir)? {
            let dirent = dirent?;
            entries.push(DirEntry::new(dirent.file_name(), kind_of(dirent.file_type()?)));
        }
        Ok(entries)
    }

    fn readlink(&self, abs_path: &Path) -> FsResult<PathBuf> {
        Ok(fs::read_link(abs_path)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn unlink(&self, abs_path: &Path) -> FsResult<()> {
        fs::remove_file(abs_path)?;
        Ok(())
    }

    fn rmdir(&self, abs_path: &Path) -> FsResult<()> {
        fs::remove_dir(abs_path)?;
        Ok(())
    }

    fn link(&self, original: &Path, link: &Path) -> FsResult<()> {
        fs::hard_link(original, link)?;
        Ok(())
    }

    fn truncate(&self, abs_path: &Path, size: u64) -> FsResult<()> {
        let file = OpenOptions::new().write(true).open(abs_path)?;
        file.set_len(size)?;
        Ok(())
    }

    fn utimens(&self, abs_path: &Path, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        let path = cstring(abs_path)?;
        let times = [timespec(atime), timespec(mtime)];
        check(unsafe { libc::utimensat(libc::AT_FDCWD, path.as_ptr(), times.as_ptr(), 0) })
    }

    fn statfs(&self, abs_path: &Path) -> FsResult<StatFs> {
        let path = cstring(abs_path)?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        check(unsafe { libc::statvfs(path.as_ptr(), &mut stat) })?;
        Ok(StatFs {
            blocks: stat.f_blocks as u64,
            bfree: stat.f_bfree as u64,
            bavail: stat.f_bavail as u64,
            files: stat.f_files as u64,
            ffree: stat.f_ffree as u64,
            bsize: stat.f_bsize as u32,
            namelen: stat.f_namemax as u32,
            frsize: stat.f_frsize as u32,
        })
    }

    fn getxattr(&self, abs_path: &Path, name: &str) -> FsResult<Vec<u8>> {
        let path = cstring(abs_path)?;
        let name = cstring_str(name)?;
        let size = unsafe {
            libc::lgetxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0)
        };
        if size < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let mut value = vec![0u8; size as usize];
        let read = unsafe {
            libc::lgetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_mut_ptr() as *mut libc::c_void,
                value.len(),
            )
        };
        if read < 0 {
            return Err(io::Error::last_os_error().into());
        }
        value.truncate(read as usize);
        Ok(value)
    }

    fn setxattr(&self, abs_path: &Path, name: &str, value: &[u8]) -> FsResult<()> {
        let path = cstring(abs_path)?;
        let name = cstring_str(name)?;
        check(unsafe {
            libc::lsetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr() as *const libc::c_void,
                value.len(),
                0,
            )
        })
    }

    fn listxattr(&self, abs_path: &Path) -> FsResult<Vec<String>> {
        let path = cstring(abs_path)?;
        let size = unsafe { libc::llistxattr(path.as_ptr(), std::ptr::null_mut(), 0) };
        if size < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let mut buf = vec![0u8; size as usize];
        let read = unsafe {
            libc::llistxattr(path.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len())
        };
        if read < 0 {
            return Err(io::Error::last_os_error().into());
        }
        buf.truncate(read as usize);
        Ok(buf
            .split(|b| *b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect())
    }

    fn removexattr(&self, abs_path: &Path, name: &str) -> FsResult<()> {
        let path = cstring(abs_path)?;
        let name = cstring_str(name)?;
        check(unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) })
    }
}
