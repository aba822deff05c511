// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the blendfs engine

use std::io;

/// Core filesystem error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// POSIX error code for the transport layer.
    ///
    /// Host-delegated errors keep the exact code the host filesystem raised;
    /// the transport must never re-translate them.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::BadFileDescriptor => libc::EBADF,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
