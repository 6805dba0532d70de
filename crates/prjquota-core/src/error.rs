// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for project quota operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::ProjectId;

/// Errors that can occur while assigning, limiting or checking project quotas
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("path {0} does not exist")]
    NotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("project quotas are not supported: {0}")]
    NotSupported(String),

    #[error("path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("unable to parse xfs_quota output: {0}")]
    Parse(#[from] ReportParseError),

    #[error("{program} failed: {reason}")]
    ToolInvocation { program: String, reason: String },

    #[error("no quota limit configured for project {0}")]
    Misconfigured(ProjectId),

    #[error("no project id assigned to path {0}")]
    NotConfigured(PathBuf),

    #[error("{program} did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("{operation} failed on {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("{0} is not a mounted filesystem")]
    NotMounted(PathBuf),

    #[error("cannot allocate {requested} bytes, max available is {available} bytes")]
    NoSpace { requested: u64, available: u64 },

    #[error("{0}")]
    InvalidThresholds(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl QuotaError {
    /// Raw errno carried by an ioctl/syscall failure, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            QuotaError::Io { source, .. } => Some(*source as i32),
            _ => None,
        }
    }
}

/// Errors raised while reading an `xfs_quota` report
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReportParseError {
    #[error("no row for project {0} in quota report")]
    MissingProject(ProjectId),

    #[error("report header has no {0:?} column")]
    MissingColumn(&'static str),

    #[error("invalid number {value:?} in column {column:?}")]
    InvalidNumber { column: &'static str, value: String },

    #[error("malformed report line: {0:?}")]
    MalformedRow(String),
}

pub type Result<T> = std::result::Result<T, QuotaError>;
