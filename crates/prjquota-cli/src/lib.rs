// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Command-line front ends for XFS directory project quotas.
//!
//! `check_xfs_proj_quota` is a Nagios plugin; `xfs-prjquota` provisions
//! project ids and limits and embeds the same check as a subcommand.

pub mod check;
pub mod commands;

pub use clap::Parser;
pub use check::{CheckArgs, CheckCli};
pub use commands::Commands;

use prjquota_logging::CliLoggingArgs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "xfs-prjquota",
    version,
    about = "Manage XFS directory project quotas",
    long_about = None
)]
pub struct Cli {
    /// Configuration file (default: /etc/xfs-prjquota/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prjquota_core::ProjectId;

    #[test]
    fn test_assign_with_explicit_id() {
        let cli = Cli::try_parse_from(["xfs-prjquota", "assign", "/data/www", "--project-id", "42"])
            .unwrap();
        match cli.command {
            Commands::Assign(args) => {
                assert_eq!(args.path, PathBuf::from("/data/www"));
                assert_eq!(args.project_id, Some(ProjectId(42)));
                assert!(!args.next);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_assign_needs_id_or_next() {
        assert!(Cli::try_parse_from(["xfs-prjquota", "assign", "/data/www"]).is_err());
        assert!(Cli::try_parse_from([
            "xfs-prjquota",
            "assign",
            "/data/www",
            "--project-id",
            "3",
            "--next"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["xfs-prjquota", "assign", "/data/www", "--next"]).is_ok());
    }

    #[test]
    fn test_set_limit_arguments() {
        let cli = Cli::try_parse_from([
            "xfs-prjquota",
            "set-limit",
            "--mount",
            "/data",
            "--project-id",
            "42",
            "--hard",
            "16106127360",
            "--no-safe-space",
        ])
        .unwrap();
        match cli.command {
            Commands::SetLimit(args) => {
                assert_eq!(args.mount.mount, PathBuf::from("/data"));
                assert_eq!(args.project_id, ProjectId(42));
                assert_eq!(args.hard, 16_106_127_360);
                assert_eq!(args.soft, None);
                assert!(args.no_safe_space);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "xfs-prjquota",
            "report",
            "--mount",
            "/data",
            "--json",
            "--config",
            "/tmp/quota.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/quota.toml")));
        assert!(!cli.logging.is_empty());
        assert!(matches!(cli.command, Commands::Report(ref args) if args.json));
    }

    #[test]
    fn test_check_subcommand_shares_plugin_flags() {
        let cli = Cli::try_parse_from(["xfs-prjquota", "check", "-P", "/data", "-W", "50"]).unwrap();
        match cli.command {
            Commands::Check(args) => {
                assert_eq!(args.warning, 50);
                assert_eq!(args.critical, 85);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_release_keeps_limits_unless_asked() {
        let cli = Cli::try_parse_from(["xfs-prjquota", "release", "/data/www"]).unwrap();
        assert!(matches!(cli.command, Commands::Release(ref args) if !args.clear_limit));

        let cli = Cli::try_parse_from(["xfs-prjquota", "release", "/data/www", "--clear-limit"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Release(ref args) if args.clear_limit));
    }

    #[test]
    fn test_project_id_must_be_numeric() {
        assert!(Cli::try_parse_from([
            "xfs-prjquota",
            "usage",
            "--mount",
            "/data",
            "--project-id",
            "www"
        ])
        .is_err());
    }
}
