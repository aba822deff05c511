// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! blendfs FUSE host — mounts a blendfs volume over a backing directory.
//!
//! One mount presents two storage domains: a transparent passthrough to the
//! backing directory tree, and an in-process virtual store for entries
//! created at the mount itself.

#[cfg(target_os = "linux")]
mod adapter;

#[cfg(target_os = "linux")]
use adapter::BlendFuse;
use anyhow::Result;
#[cfg(target_os = "linux")]
use blendfs_core::FsConfig;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;
#[cfg(not(target_os = "linux"))]
use tracing::warn;

#[derive(Parser)]
struct Args {
    /// Backing root directory for the passthrough domain
    root: PathBuf,

    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Mount profile (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the filesystem
    #[arg(long)]
    allow_root: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,
}

/// Mount-time options. These configure the FUSE session only; the engine
/// itself takes nothing but the backing root.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct MountProfile {
    fs_name: String,
    allow_other: bool,
    allow_root: bool,
    auto_unmount: bool,
}

impl Default for MountProfile {
    fn default() -> Self {
        Self {
            fs_name: "blendfs".to_string(),
            allow_other: false,
            allow_root: false,
            auto_unmount: false,
        }
    }
}

fn load_profile(config_path: Option<PathBuf>) -> Result<MountProfile> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(&path)?;
            let profile: MountProfile = serde_json::from_str(&content)?;
            Ok(profile)
        }
        None => Ok(MountProfile::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("Starting blendfs FUSE host");
    info!("Backing root: {}", args.root.display());
    info!("Mount point: {}", args.mount_point.display());

    let mut profile = load_profile(args.config)?;
    if args.allow_other {
        profile.allow_other = true;
    }
    if args.allow_root {
        profile.allow_root = true;
    }
    if args.auto_unmount {
        profile.auto_unmount = true;
    }
    info!("Mount profile: {:?}", profile);

    #[cfg(target_os = "linux")]
    {
        let filesystem = BlendFuse::new(FsConfig::new(&args.root));

        let mut mount_options = vec![
            fuser::MountOption::FSName(profile.fs_name.clone()),
            fuser::MountOption::Subtype("blendfs".to_string()),
        ];

        if profile.allow_other {
            mount_options.push(fuser::MountOption::AllowOther);
        }
        if profile.allow_root {
            mount_options.push(fuser::MountOption::AllowRoot);
        }
        if profile.auto_unmount {
            mount_options.push(fuser::MountOption::AutoUnmount);
        }

        info!("Mounting filesystem...");
        // Single-threaded, foreground session: requests are fully serialized.
        fuser::mount2(filesystem, &args.mount_point, &mount_options)?;
    }

    #[cfg(not(target_os = "linux"))]
    warn!("FUSE support is only compiled on Linux; nothing was mounted.");

    Ok(())
}
