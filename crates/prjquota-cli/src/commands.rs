// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Provisioning subcommands of `xfs-prjquota`

use anyhow::Context;
use clap::{Args, Subcommand};
use prjquota_core::monitor::human_size;
use prjquota_core::{
    mounts, AttrStore, ProjectId, ProjectIdAssigner, ProjectQuota, QuotaConfig, QuotaController,
    QuotaLimit,
};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::check::CheckArgs;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the project id of a directory
    GetProject {
        /// Directory to inspect
        path: PathBuf,
    },
    /// Tag a directory with a project id
    Assign(AssignArgs),
    /// Reset a directory to the default project, keeping the project's limits
    Release(ReleaseArgs),
    /// Set the block limits of a project
    SetLimit(SetLimitArgs),
    /// Show usage and limits of one project
    Usage(UsageArgs),
    /// Show usage and limits of every project on a filesystem
    Report(ReportArgs),
    /// Print the next unused project id of a filesystem
    NextId(MountArgs),
    /// Run the monitoring check (same as check_xfs_proj_quota)
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AssignArgs {
    /// Directory to tag
    pub path: PathBuf,

    /// Project id to assign
    #[arg(long, conflicts_with = "next", required_unless_present = "next")]
    pub project_id: Option<ProjectId>,

    /// Assign the next unused project id of the directory's filesystem
    #[arg(long)]
    pub next: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReleaseArgs {
    /// Directory to release
    pub path: PathBuf,

    /// Also clear the previous project's limits; other directories in that project lose them too
    #[arg(long)]
    pub clear_limit: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MountArgs {
    /// Mount point of the XFS filesystem (any directory on it works)
    #[arg(long, value_name = "PATH")]
    pub mount: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SetLimitArgs {
    #[command(flatten)]
    pub mount: MountArgs,

    #[arg(long)]
    pub project_id: ProjectId,

    /// Hard block limit in bytes
    #[arg(long, value_name = "BYTES")]
    pub hard: u64,

    /// Soft block limit in bytes; defaults to the hard limit
    #[arg(long, value_name = "BYTES")]
    pub soft: Option<u64>,

    /// Skip the unreserved free space check
    #[arg(long)]
    pub no_safe_space: bool,
}

#[derive(Args, Debug, Clone)]
pub struct UsageArgs {
    #[command(flatten)]
    pub mount: MountArgs,

    #[arg(long)]
    pub project_id: ProjectId,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[command(flatten)]
    pub mount: MountArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Mount point of `path`, verified to be XFS with project quotas enabled
fn quota_mount(path: &Path, config: &QuotaConfig) -> anyhow::Result<PathBuf> {
    let table = mounts::read_mounts(&config.mount_table)?;
    let mount_point = mounts::find_mount_point(path, &table)?;
    mounts::check_project_quota_mount(&mount_point, &table)?;
    Ok(mount_point)
}

fn controller(path: &Path, config: &QuotaConfig) -> anyhow::Result<QuotaController> {
    let mount_point = quota_mount(path, config)?;
    Ok(QuotaController::from_config(&mount_point, config)?)
}

fn format_quota(quota: &ProjectQuota) -> String {
    let mut line = format!(
        "project {}: used {}, soft {}, hard {}",
        quota.project_id,
        human_size(quota.used_bytes),
        human_size(quota.soft_limit_bytes),
        human_size(quota.hard_limit_bytes)
    );
    if quota.warnings > 0 {
        line.push_str(&format!(", {} warnings", quota.warnings));
    }
    if let Some(grace) = &quota.grace {
        line.push_str(&format!(", grace {}", grace));
    }
    line
}

impl Commands {
    /// Run the subcommand; returns the process exit code
    pub fn run(self, config_path: Option<&Path>) -> anyhow::Result<i32> {
        let config = match self {
            Commands::Check(args) => return Ok(args.execute(config_path)),
            _ => QuotaConfig::load(config_path).context("Failed to load configuration")?,
        };

        match self {
            Commands::GetProject { path } => {
                let project_id = ProjectIdAssigner::new().project_id(&path)?;
                println!("{}", project_id);
            }
            Commands::Assign(args) => args.run(&config)?,
            Commands::Release(args) => args.run(&config)?,
            Commands::SetLimit(args) => args.run(&config)?,
            Commands::Usage(args) => args.run(&config)?,
            Commands::Report(args) => args.run(&config)?,
            Commands::NextId(args) => {
                let next = controller(&args.mount, &config)?.next_available_project_id()?;
                println!("{}", next);
            }
            Commands::Check(args) => return Ok(args.execute(config_path)),
        }
        Ok(0)
    }
}

impl AssignArgs {
    fn run(self, config: &QuotaConfig) -> anyhow::Result<()> {
        let controller = controller(&self.path, config)?;
        let project_id = match self.project_id {
            Some(project_id) => project_id,
            None => controller.next_available_project_id()?,
        };

        ProjectIdAssigner::new()
            .assign(&self.path, project_id)
            .with_context(|| format!("Failed to assign project {} to {}", project_id, self.path.display()))?;
        println!("Assigned project {} to {}", project_id, self.path.display());
        Ok(())
    }
}

impl ReleaseArgs {
    fn run(self, config: &QuotaConfig) -> anyhow::Result<()> {
        self.run_with(config, &ProjectIdAssigner::new())
    }

    /// The mount is validated before the directory's attributes are touched
    fn run_with<S: AttrStore>(
        self,
        config: &QuotaConfig,
        assigner: &ProjectIdAssigner<S>,
    ) -> anyhow::Result<()> {
        let controller = controller(&self.path, config)?;
        let previous = assigner.release(&self.path)?;
        if previous.is_default() {
            println!("{} was not assigned to a project", self.path.display());
            return Ok(());
        }

        if self.clear_limit {
            controller
                .clear_limit(previous)
                .with_context(|| format!("Released {} but could not clear limits of project {}", self.path.display(), previous))?;
        }
        info!(operation = "release", path = %self.path.display(), project_id = %previous, clear_limit = %self.clear_limit, "Released directory");
        println!("Released project {} from {}", previous, self.path.display());
        Ok(())
    }
}

impl SetLimitArgs {
    fn run(self, config: &QuotaConfig) -> anyhow::Result<()> {
        let controller = controller(&self.mount.mount, config)?
            .with_safe_space(config.safe_space && !self.no_safe_space);
        let limit = match self.soft {
            Some(soft) => QuotaLimit::soft_and_hard(soft, self.hard),
            None => QuotaLimit::hard(self.hard),
        };

        controller.set_limit(self.project_id, limit)?;
        println!(
            "Set hard limit of project {} on {} to {}",
            self.project_id,
            controller.mount_point().display(),
            human_size(self.hard)
        );
        Ok(())
    }
}

impl UsageArgs {
    fn run(self, config: &QuotaConfig) -> anyhow::Result<()> {
        let quota = controller(&self.mount.mount, config)?.get_usage(self.project_id)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&quota)?);
        } else {
            println!("{}", format_quota(&quota));
        }
        Ok(())
    }
}

impl ReportArgs {
    fn run(self, config: &QuotaConfig) -> anyhow::Result<()> {
        let report = controller(&self.mount.mount, config)?.list_projects()?;
        if self.json {
            let projects: Vec<&ProjectQuota> = report.values().collect();
            println!("{}", serde_json::to_string_pretty(&projects)?);
        } else {
            for quota in report.values() {
                println!("{}", format_quota(quota));
            }
        }
        Ok(())
    }
}
