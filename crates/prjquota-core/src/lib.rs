// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory (project) quotas on XFS.
//!
//! A directory is tagged with a numeric project id through the
//! `FS_IOC_FSGETXATTR`/`FS_IOC_FSSETXATTR` ioctls ([`fsxattr`]); limits are
//! set and usage is read through the `xfs_quota` tool ([`controller`]); the
//! [`monitor`] turns usage into a Nagios-style check result.
//!
//! Everything here is blocking. Concurrent writers to the same directory's
//! attributes must be serialized by the caller.

pub mod config;
pub mod controller;
pub mod error;
pub mod fsxattr;
pub mod monitor;
pub mod mounts;
pub mod report;
pub mod runner;

pub use config::QuotaConfig;
pub use controller::{QuotaController, QuotaLimit};
pub use error::{QuotaError, ReportParseError, Result};
pub use fsxattr::{AttrStore, FsxAttr, IoctlAttrStore, ProjectIdAssigner};
pub use monitor::{CheckOutcome, QuotaMonitor, Status, Thresholds};
pub use mounts::MountInfo;
pub use report::ProjectQuota;
pub use runner::{CommandOutput, CommandRunner, SystemRunner};

use serde::{Deserialize, Serialize};

/// Project id tagging a group of directories for quota accounting
///
/// Scoped to one filesystem. `0` is the default project every inode starts in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProjectId(pub u32);

impl ProjectId {
    pub const DEFAULT: ProjectId = ProjectId(0);

    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

impl From<u32> for ProjectId {
    fn from(id: u32) -> Self {
        ProjectId(id)
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(ProjectId)
    }
}
