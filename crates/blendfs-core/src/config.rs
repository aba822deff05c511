// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration

use std::path::PathBuf;

/// Configuration for a [`crate::BlendFs`] instance.
#[derive(Clone, Debug)]
pub struct FsConfig {
    /// Host directory backing the passthrough domain. Mount-relative paths
    /// are translated by joining them onto this root.
    pub root: PathBuf,
}

impl FsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}
