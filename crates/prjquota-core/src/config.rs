// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tool configuration: optional TOML file overlaid with `XFS_PRJQUOTA_*`
//! environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QuotaError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/xfs-prjquota/config.toml";
pub const ENV_PREFIX: &str = "XFS_PRJQUOTA";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct QuotaConfig {
    /// Explicit `xfs_quota` location; looked up on `PATH` when unset
    pub xfs_quota_path: Option<PathBuf>,
    /// Run `xfs_quota` through `sudo -n` when not root
    pub use_sudo: bool,
    /// Seconds before an `xfs_quota` invocation is killed; 0 waits forever
    pub timeout_secs: u64,
    /// Bytes per unit in the block columns of `xfs_quota report`
    pub report_unit_bytes: u64,
    /// Use the hard limit as soft limit when none is given
    pub soft_equals_hard: bool,
    /// Refuse limits larger than the space not yet promised to other projects
    pub safe_space: bool,
    /// Mount table consulted for mount point and option checks
    pub mount_table: PathBuf,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            xfs_quota_path: None,
            use_sudo: false,
            timeout_secs: 30,
            report_unit_bytes: 1024,
            soft_equals_hard: true,
            safe_space: true,
            mount_table: PathBuf::from(crate::mounts::PROC_MOUNTS),
        }
    }
}

/// `XFS_PRJQUOTA_TIMEOUT_SECS=5` overrides `timeout-secs`
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl QuotaConfig {
    /// Load from `path` (or the default location) plus environment overrides
    ///
    /// A missing file is fine; a file that exists but does not parse is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: &Path, env: config::Environment) -> Result<Self> {
        let built = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(env.convert_case(config::Case::Kebab).try_parsing(true))
            .build()?;
        let config: QuotaConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.report_unit_bytes == 0 {
            return Err(QuotaError::Config(config::ConfigError::Message(
                "report-unit-bytes must be greater than zero".to_string(),
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Path of the `xfs_quota` binary
    pub fn xfs_quota(&self) -> Result<PathBuf> {
        if let Some(path) = &self.xfs_quota_path {
            return Ok(path.clone());
        }
        which::which("xfs_quota").map_err(|_| QuotaError::ToolInvocation {
            program: "xfs_quota".to_string(),
            reason: "command not found, install xfsprogs".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn isolated_env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(source))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            QuotaConfig::load_with_env(&dir.path().join("absent.toml"), isolated_env(&[]))
                .unwrap();
        assert_eq!(config, QuotaConfig::default());
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_file_values_are_read() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "xfs-quota-path = \"/usr/sbin/xfs_quota\"\nuse-sudo = true\ntimeout-secs = 0\nsafe-space = false"
        )
        .unwrap();

        let config = QuotaConfig::load_with_env(file.path(), isolated_env(&[])).unwrap();
        assert_eq!(config.xfs_quota().unwrap(), PathBuf::from("/usr/sbin/xfs_quota"));
        assert!(config.use_sudo);
        assert!(!config.safe_space);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.report_unit_bytes, 1024);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "timeout-secs = 10").unwrap();

        let config = QuotaConfig::load_with_env(
            file.path(),
            isolated_env(&[("XFS_PRJQUOTA_TIMEOUT_SECS", "5"), ("XFS_PRJQUOTA_USE_SUDO", "true")]),
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert!(config.use_sudo);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "timeout-secs = \"soon\"").unwrap();

        let err = QuotaConfig::load_with_env(file.path(), isolated_env(&[])).unwrap_err();
        assert!(matches!(err, QuotaError::Config(_)));
    }

    #[test]
    fn test_zero_unit_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "report-unit-bytes = 0").unwrap();

        assert!(QuotaConfig::load_with_env(file.path(), isolated_env(&[])).is_err());
    }
}
