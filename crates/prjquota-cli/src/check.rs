// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Nagios plugin front end for the quota monitor

use clap::{Args, Parser};
use prjquota_core::{CheckOutcome, QuotaConfig, QuotaError, QuotaMonitor, Thresholds};
use prjquota_logging::CliLoggingArgs;
use std::path::{Path, PathBuf};

/// Exit code of an UNKNOWN plugin result
pub const UNKNOWN_EXIT_CODE: i32 = 3;

/// Arguments of a single quota check
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CheckArgs {
    /// Directory to be checked
    #[arg(short = 'P', long, value_name = "PATH")]
    pub path: PathBuf,

    /// Used percentage of the hard limit raising a warning
    #[arg(
        short = 'W',
        long,
        default_value_t = 75,
        value_name = "PCT",
        value_parser = clap::value_parser!(u8).range(0..=100)
    )]
    pub warning: u8,

    /// Used percentage of the hard limit raising a critical alert
    #[arg(
        short = 'C',
        long,
        default_value_t = 85,
        value_name = "PCT",
        value_parser = clap::value_parser!(u8).range(0..=100)
    )]
    pub critical: u8,
}

impl CheckArgs {
    pub fn thresholds(&self) -> Result<Thresholds, QuotaError> {
        Thresholds::new(self.warning, self.critical)
    }

    /// Run the check; configuration problems are reported as UNKNOWN
    pub fn run(&self, thresholds: &Thresholds, config_path: Option<&Path>) -> CheckOutcome {
        let config = match QuotaConfig::load(config_path) {
            Ok(config) => config,
            Err(err) => return CheckOutcome::unknown(err),
        };
        QuotaMonitor::from_config(config).check(&self.path, thresholds)
    }

    /// Validate thresholds, run the check and print the result; returns the exit code
    pub fn execute(&self, config_path: Option<&Path>) -> i32 {
        let thresholds = match self.thresholds() {
            Ok(thresholds) => thresholds,
            Err(err) => return bad_arguments(err),
        };

        let outcome = self.run(&thresholds, config_path);
        println!("{}", outcome);
        outcome.exit_code()
    }
}

/// Command line of `check_xfs_proj_quota`
#[derive(Parser, Debug)]
#[command(
    name = "check_xfs_proj_quota",
    version,
    about = "Check the XFS project quota usage of a directory",
    long_about = "Nagios plugin checking the XFS project quota usage of a directory \
                  against warning and critical percentages of its hard limit"
)]
pub struct CheckCli {
    #[command(flatten)]
    pub check: CheckArgs,

    /// Configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,
}

/// Print the plugin's bad arguments line; returns the UNKNOWN exit code
pub fn bad_arguments(reason: impl std::fmt::Display) -> i32 {
    println!("UNKNOWN: Bad arguments (see --help): {}", reason);
    UNKNOWN_EXIT_CODE
}

/// Handle a failed parse: help and version exit 0, everything else is UNKNOWN
pub fn handle_parse_error(err: clap::Error) -> i32 {
    use clap::error::ErrorKind;

    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = err.print();
            0
        }
        _ => bad_arguments(parse_error_reason(&err)),
    }
}

/// One-line reason of a clap error, without the usage and hint lines
pub fn parse_error_reason(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let reason = rendered
        .lines()
        .map(str::trim)
        .take_while(|line| !line.starts_with("Usage:") && !line.starts_with("For more information"))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    reason.trim_start_matches("error:").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = CheckCli::try_parse_from(["check_xfs_proj_quota", "-P", "/data"]).unwrap();
        assert_eq!(cli.check.path, PathBuf::from("/data"));
        assert_eq!(cli.check.warning, 75);
        assert_eq!(cli.check.critical, 85);
        assert!(cli.config.is_none());
        assert!(cli.logging.is_empty());
    }

    #[test]
    fn test_long_flags() {
        let cli = CheckCli::try_parse_from([
            "check_xfs_proj_quota",
            "--path",
            "/srv/www",
            "--warning",
            "60",
            "--critical",
            "90",
            "--config",
            "/tmp/quota.toml",
        ])
        .unwrap();
        assert_eq!(cli.check.warning, 60);
        assert_eq!(cli.check.critical, 90);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/quota.toml")));
        assert_eq!(cli.check.thresholds().unwrap().critical(), 90);
    }

    #[test]
    fn test_path_is_required() {
        let err = CheckCli::try_parse_from(["check_xfs_proj_quota"]).unwrap_err();
        let reason = parse_error_reason(&err);
        assert!(reason.contains("--path"), "{reason}");
        assert!(!reason.contains("Usage"));
        assert!(!reason.starts_with("error"));
    }

    #[test]
    fn test_out_of_range_percentage() {
        let err = CheckCli::try_parse_from(["check_xfs_proj_quota", "-P", "/data", "-C", "150"])
            .unwrap_err();
        assert!(parse_error_reason(&err).contains("150"));
    }

    #[test]
    fn test_warning_above_critical_is_rejected() {
        let cli = CheckCli::try_parse_from(["check_xfs_proj_quota", "-P", "/data", "-W", "90", "-C", "80"])
            .unwrap();
        let err = cli.check.thresholds().unwrap_err();
        assert!(matches!(err, QuotaError::InvalidThresholds(_)));
        assert_eq!(err.to_string(), "warning threshold must be lower than critical threshold");
    }

    #[test]
    fn test_help_is_not_an_error_exit() {
        let err = CheckCli::try_parse_from(["check_xfs_proj_quota", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
