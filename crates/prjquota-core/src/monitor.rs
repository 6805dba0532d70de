// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Nagios-style quota check.
//!
//! A check resolves the directory's mount and project id, reads the
//! project's usage, and classifies the used percentage against warning and
//! critical thresholds. The result is one status line followed by perfdata:
//!
//! ```text
//! OK: Quota used 46% (6.9GiB/15.0GiB) for path /data is below warning 75% limit|used_percent=46%;75;85;0;100 used_bytes=7415558144B;12079595520;13690208256;0;16106127360
//! ```

use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::QuotaConfig;
use crate::controller::QuotaController;
use crate::error::{QuotaError, ReportParseError, Result};
use crate::fsxattr::{AttrStore, IoctlAttrStore, ProjectIdAssigner};
use crate::mounts;
use crate::report::ProjectQuota;
use crate::runner::{CommandRunner, SystemRunner};
use crate::ProjectId;

/// Warning and critical percentages, `0 <= warning < critical <= 100`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    warning: u8,
    critical: u8,
}

impl Thresholds {
    pub fn new(warning: u8, critical: u8) -> Result<Self> {
        if warning > 100 || critical > 100 {
            return Err(QuotaError::InvalidThresholds(
                "warning/critical thresholds must be a percentage between 0 and 100".to_string(),
            ));
        }
        if warning >= critical {
            return Err(QuotaError::InvalidThresholds(
                "warning threshold must be lower than critical threshold".to_string(),
            ));
        }
        Ok(Self { warning, critical })
    }

    pub fn warning(&self) -> u8 {
        self.warning
    }

    pub fn critical(&self) -> u8 {
        self.critical
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 75,
            critical: 85,
        }
    }
}

/// Check result, mapped to the plugin exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Critical => 2,
            Status::Unknown => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a check found out about a project's usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    /// Rounded used percentage of the hard limit
    Percent(u64),
    /// The project has no hard limit
    Misconfigured,
}

struct Rule {
    status: Status,
    applies: fn(&Measurement, &Thresholds) -> bool,
}

fn critical_rule(m: &Measurement, t: &Thresholds) -> bool {
    match m {
        Measurement::Percent(pct) => *pct >= u64::from(t.critical),
        Measurement::Misconfigured => true,
    }
}

fn warning_rule(m: &Measurement, t: &Thresholds) -> bool {
    matches!(m, Measurement::Percent(pct) if *pct >= u64::from(t.warning))
}

/// Evaluated in order; the first rule that applies decides. Nothing applying means OK.
const RULES: &[Rule] = &[
    Rule {
        status: Status::Critical,
        applies: critical_rule,
    },
    Rule {
        status: Status::Warning,
        applies: warning_rule,
    },
];

pub fn classify(measurement: &Measurement, thresholds: &Thresholds) -> Status {
    RULES
        .iter()
        .find(|rule| (rule.applies)(measurement, thresholds))
        .map(|rule| rule.status)
        .unwrap_or(Status::Ok)
}

/// `used / limit * 100` rounded to the nearest integer, or `None` for a zero limit
///
/// Exact halves round to the even neighbour, so 0.5% is 0 and 2.5% is 2.
pub fn used_percent(used_bytes: u64, limit_bytes: u64) -> Option<u64> {
    if limit_bytes == 0 {
        return None;
    }
    let scaled = u128::from(used_bytes) * 100;
    let limit = u128::from(limit_bytes);
    let (quotient, remainder) = (scaled / limit, scaled % limit);
    let pct = match (remainder * 2).cmp(&limit) {
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal if quotient % 2 == 1 => quotient + 1,
        _ => quotient,
    };
    Some(u64::try_from(pct).unwrap_or(u64::MAX))
}

/// Human readable binary size, e.g. `6.9GiB`
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 8] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];

    let mut value = bytes as f64;
    for unit in UNITS {
        if value.abs() < 1024.0 {
            return format!("{:.1}{}B", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1}YiB", value)
}

/// Status line plus perfdata of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: Status,
    pub message: String,
    pub perfdata: Vec<String>,
}

impl CheckOutcome {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Outcome for a measured project
    pub fn from_usage(
        path: &str,
        quota: &ProjectQuota,
        thresholds: &Thresholds,
    ) -> CheckOutcome {
        let used = quota.used_bytes;
        let limit = quota.hard_limit_bytes;

        let Some(pct) = used_percent(used, limit) else {
            return CheckOutcome {
                status: classify(&Measurement::Misconfigured, thresholds),
                message: format!(
                    "CRITICAL: No quota limit configured for project {} on path {} (used {})",
                    quota.project_id,
                    path,
                    human_size(used)
                ),
                perfdata: vec![format!("used_bytes={}B;;;0;", used)],
            };
        };

        let status = classify(&Measurement::Percent(pct), thresholds);
        let (direction, level, threshold) = match status {
            Status::Critical => ("above", "critical", thresholds.critical),
            Status::Warning => ("above", "warning", thresholds.warning),
            _ => ("below", "warning", thresholds.warning),
        };
        let message = format!(
            "{}: Quota used {}% ({}/{}) for path {} is {} {} {}% limit",
            status.label(),
            pct,
            human_size(used),
            human_size(limit),
            path,
            direction,
            level,
            threshold
        );

        let warning_bytes = u128::from(thresholds.warning) * u128::from(limit) / 100;
        let critical_bytes = u128::from(thresholds.critical) * u128::from(limit) / 100;
        let perfdata = vec![
            format!(
                "used_percent={}%;{};{};0;100",
                pct, thresholds.warning, thresholds.critical
            ),
            format!(
                "used_bytes={}B;{};{};0;{}",
                used, warning_bytes, critical_bytes, limit
            ),
        ];

        CheckOutcome {
            status,
            message,
            perfdata,
        }
    }

    /// Outcome when the quota report has no row for the project
    pub fn usage_unavailable(path: &str, project_id: ProjectId) -> CheckOutcome {
        CheckOutcome::unknown(format!(
            "No quota usage recorded for project {} on path {}",
            project_id, path
        ))
    }

    pub fn unknown(reason: impl fmt::Display) -> CheckOutcome {
        CheckOutcome {
            status: Status::Unknown,
            message: format!("UNKNOWN: {}", reason),
            perfdata: Vec::new(),
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.perfdata.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}|{}", self.message, self.perfdata.join(" "))
        }
    }
}

/// Runs quota checks for directories
pub struct QuotaMonitor<S = IoctlAttrStore, R = SystemRunner> {
    assigner: ProjectIdAssigner<S>,
    runner: R,
    config: QuotaConfig,
}

impl QuotaMonitor<IoctlAttrStore, SystemRunner> {
    pub fn from_config(config: QuotaConfig) -> Self {
        let runner = SystemRunner::new()
            .with_timeout(config.timeout())
            .with_sudo(config.use_sudo);
        Self::new(ProjectIdAssigner::new(), runner, config)
    }
}

impl<S: AttrStore, R: CommandRunner> QuotaMonitor<S, R> {
    pub fn new(assigner: ProjectIdAssigner<S>, runner: R, config: QuotaConfig) -> Self {
        Self {
            assigner,
            runner,
            config,
        }
    }

    /// Check `path` against `thresholds`; never fails, errors become UNKNOWN
    pub fn check(&self, path: &Path, thresholds: &Thresholds) -> CheckOutcome {
        match self.try_check(path, thresholds) {
            Ok(outcome) => {
                debug!(operation = "check", path = %path.display(), status = %outcome.status, "Quota check finished");
                outcome
            }
            Err(err) => {
                warn!(operation = "check", path = %path.display(), error = %err, "Quota check failed");
                CheckOutcome::unknown(err)
            }
        }
    }

    fn try_check(&self, path: &Path, thresholds: &Thresholds) -> Result<CheckOutcome> {
        // Without a readable mount table the mount point is found by device numbers
        let mounts = match mounts::read_mounts(&self.config.mount_table) {
            Ok(mounts) => mounts,
            Err(err) => {
                debug!(operation = "check", error = %err, "Mount table unavailable");
                Vec::new()
            }
        };
        let mount_point = mounts::find_mount_point(path, &mounts)?;
        if !mounts.is_empty() {
            mounts::check_project_quota_mount(&mount_point, &mounts)?;
        }

        let project_id = self.assigner.project_id(path)?;
        if project_id.is_default() {
            return Err(QuotaError::NotConfigured(path.to_path_buf()));
        }

        let xfs_quota = self.config.xfs_quota()?;
        let controller =
            QuotaController::new(&mount_point, &xfs_quota.to_string_lossy(), &self.runner)
                .with_report_unit(self.config.report_unit_bytes);

        let display = path.display().to_string();
        match controller.get_usage(project_id) {
            Ok(quota) => Ok(CheckOutcome::from_usage(&display, &quota, thresholds)),
            Err(QuotaError::Parse(ReportParseError::MissingProject(_))) => {
                Ok(CheckOutcome::usage_unavailable(&display, project_id))
            }
            Err(err) => Err(err),
        }
    }
}
