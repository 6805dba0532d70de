// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Project limits and usage through the `xfs_quota` tool.
//!
//! `xfs_quota` takes limits in bytes but reports usage in 1 KiB blocks; every
//! value leaving this module is in bytes.

use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::config::QuotaConfig;
use crate::error::{QuotaError, Result};
use crate::report::{self, ProjectQuota, QuotaReport};
use crate::runner::{CommandOutput, CommandRunner, SystemRunner};
use crate::ProjectId;

/// Requested block limits in bytes; `None` leaves that limit unset (0)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaLimit {
    pub soft_bytes: Option<u64>,
    pub hard_bytes: Option<u64>,
}

impl QuotaLimit {
    pub fn hard(bytes: u64) -> Self {
        Self {
            soft_bytes: None,
            hard_bytes: Some(bytes),
        }
    }

    pub fn soft_and_hard(soft: u64, hard: u64) -> Self {
        Self {
            soft_bytes: Some(soft),
            hard_bytes: Some(hard),
        }
    }
}

/// `xfs_quota` front end bound to one mounted filesystem
#[derive(Debug, Clone)]
pub struct QuotaController<R = SystemRunner> {
    mount_point: PathBuf,
    xfs_quota: String,
    runner: R,
    report_unit_bytes: u64,
    soft_equals_hard: bool,
    safe_space: bool,
}

impl QuotaController<SystemRunner> {
    pub fn from_config(mount_point: &Path, config: &QuotaConfig) -> Result<Self> {
        let runner = SystemRunner::new()
            .with_timeout(config.timeout())
            .with_sudo(config.use_sudo);
        let xfs_quota = config.xfs_quota()?;

        Ok(Self::new(mount_point, xfs_quota.to_string_lossy().as_ref(), runner)
            .with_report_unit(config.report_unit_bytes)
            .with_soft_equals_hard(config.soft_equals_hard)
            .with_safe_space(config.safe_space))
    }
}

impl<R: CommandRunner> QuotaController<R> {
    pub fn new(mount_point: &Path, xfs_quota: &str, runner: R) -> Self {
        Self {
            mount_point: mount_point.to_path_buf(),
            xfs_quota: xfs_quota.to_string(),
            runner,
            report_unit_bytes: 1024,
            soft_equals_hard: true,
            safe_space: true,
        }
    }

    pub fn with_report_unit(mut self, bytes: u64) -> Self {
        self.report_unit_bytes = bytes;
        self
    }

    pub fn with_soft_equals_hard(mut self, enabled: bool) -> Self {
        self.soft_equals_hard = enabled;
        self
    }

    pub fn with_safe_space(mut self, enabled: bool) -> Self {
        self.safe_space = enabled;
        self
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    fn run_xfs_quota(&self, command: String) -> Result<CommandOutput> {
        let args = vec![
            "-x".to_string(),
            "-c".to_string(),
            command,
            self.mount_point.to_string_lossy().into_owned(),
        ];
        self.runner.run(&self.xfs_quota, &args)
    }

    /// Set the block limits of `project_id`
    ///
    /// Without an explicit soft limit the soft limit follows the hard one
    /// (unless disabled). With safe-space checking on, limits larger than
    /// the space not yet promised to other projects are refused.
    pub fn set_limit(&self, project_id: ProjectId, limit: QuotaLimit) -> Result<()> {
        let hard = limit.hard_bytes.unwrap_or(0);
        let soft = match limit.soft_bytes {
            Some(soft) => soft,
            None if self.soft_equals_hard => hard,
            None => 0,
        };

        if self.safe_space {
            self.ensure_space(project_id, soft.max(hard))?;
        }

        self.apply_limit(project_id, soft, hard)?;
        info!(operation = "set_limit", mount_point = %self.mount_point.display(), project_id = %project_id, soft_bytes = %soft, hard_bytes = %hard, "Project quota limit set");
        Ok(())
    }

    /// Drop both limits of `project_id`, releasing its reservation
    pub fn clear_limit(&self, project_id: ProjectId) -> Result<()> {
        self.apply_limit(project_id, 0, 0)?;
        info!(operation = "clear_limit", mount_point = %self.mount_point.display(), project_id = %project_id, "Project quota limit cleared");
        Ok(())
    }

    fn apply_limit(&self, project_id: ProjectId, soft: u64, hard: u64) -> Result<()> {
        let output = self.run_xfs_quota(format!(
            "limit -p bsoft={} bhard={} {}",
            soft, hard, project_id
        ))?;

        // xfs_quota exits 0 even when a -c command fails; errors only show on stderr
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            error!(operation = "set_limit", project_id = %project_id, stderr = %stderr, "xfs_quota rejected limit");
            if stderr.contains("Permission denied") || stderr.contains("Operation not permitted") {
                return Err(QuotaError::PermissionDenied(stderr.to_string()));
            }
            return Err(QuotaError::ToolInvocation {
                program: self.xfs_quota.clone(),
                reason: stderr.to_string(),
            });
        }
        Ok(())
    }

    /// Usage and limits of every project on the filesystem
    pub fn list_projects(&self) -> Result<QuotaReport> {
        let output = self.run_xfs_quota("report -p -n -b".to_string())?;

        let stderr = output.stderr.trim();
        if output.stdout.trim().is_empty() && !stderr.is_empty() {
            return Err(QuotaError::ToolInvocation {
                program: self.xfs_quota.clone(),
                reason: stderr.to_string(),
            });
        }

        let report = report::parse_report(&output.stdout, self.report_unit_bytes)?;
        debug!(operation = "list_projects", mount_point = %self.mount_point.display(), projects = %report.len(), "Parsed quota report");
        Ok(report)
    }

    /// Usage and limits of one project
    ///
    /// A project absent from the report is
    /// [`ReportParseError::MissingProject`](crate::ReportParseError::MissingProject),
    /// not zero usage.
    pub fn get_usage(&self, project_id: ProjectId) -> Result<ProjectQuota> {
        let report = self.list_projects()?;
        let quota = report::find_project(&report, project_id)?;
        debug!(operation = "get_usage", project_id = %project_id, used_bytes = %quota.used_bytes, hard_limit_bytes = %quota.hard_limit_bytes, "Read project usage");
        Ok(quota)
    }

    /// One past the greatest project id currently known to the quota subsystem
    pub fn next_available_project_id(&self) -> Result<ProjectId> {
        let report = self.list_projects()?;
        let highest = report.keys().next_back().map(|id| id.0).unwrap_or(0);
        let next = highest.checked_add(1).ok_or_else(|| {
            QuotaError::NotSupported("project id space exhausted".to_string())
        })?;
        Ok(ProjectId(next))
    }

    /// Free bytes on the filesystem minus the limits promised to projects other than `project_id`
    pub fn available_space(&self, project_id: ProjectId) -> Result<u64> {
        let free = free_bytes(&self.mount_point)?;
        let reserved: u64 = self
            .list_projects()?
            .values()
            .filter(|quota| quota.project_id != project_id)
            .map(ProjectQuota::reserved_bytes)
            .fold(0u64, u64::saturating_add);
        Ok(free.saturating_sub(reserved))
    }

    /// Fail with [`QuotaError::NoSpace`] if `bytes` cannot be promised to `project_id`
    pub fn ensure_space(&self, project_id: ProjectId, bytes: u64) -> Result<()> {
        let available = self.available_space(project_id)?;
        if bytes > available {
            error!(operation = "ensure_space", project_id = %project_id, requested = %bytes, available = %available, "Not enough unreserved space for quota");
            return Err(QuotaError::NoSpace {
                requested: bytes,
                available,
            });
        }
        Ok(())
    }
}

fn free_bytes(mount_point: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(mount_point).map_err(|errno| {
        crate::fsxattr::map_errno("statvfs", mount_point, errno)
    })?;
    #[allow(clippy::unnecessary_cast)]
    let free = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    Ok(free)
}
