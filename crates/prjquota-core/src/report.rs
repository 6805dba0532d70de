// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Parser for `xfs_quota -x -c 'report -p -n -b'` output.
//!
//! Columns are located by header name rather than by offset. Typical output:
//!
//! ```text
//! Project quota on /data (/dev/sdb1)
//!                                Blocks
//! Project ID       Used       Soft       Hard    Warn/Grace
//! ---------- --------------------------------------------------
//! #0                  0          0          0     00 [--------]
//! #42           7241756   15728640   15728640     00 [--------]
//! ```
//!
//! Headerless (`-N`) output falls back to `id used soft hard warn [grace]`.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::ProjectId;
use crate::error::ReportParseError;

/// Usage and limits of one project, in bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectQuota {
    pub project_id: ProjectId,
    pub used_bytes: u64,
    pub soft_limit_bytes: u64,
    pub hard_limit_bytes: u64,
    /// Soft limit warnings issued so far
    pub warnings: u32,
    /// Remaining grace period, when one is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace: Option<String>,
}

impl ProjectQuota {
    /// Larger of the two limits; what the project may end up consuming
    pub fn reserved_bytes(&self) -> u64 {
        self.soft_limit_bytes.max(self.hard_limit_bytes)
    }
}

pub type QuotaReport = BTreeMap<ProjectId, ProjectQuota>;

/// Token positions of the columns we read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    id: usize,
    used: usize,
    soft: usize,
    hard: usize,
    warn: Option<usize>,
}

impl ColumnMap {
    const POSITIONAL: ColumnMap = ColumnMap {
        id: 0,
        used: 1,
        soft: 2,
        hard: 3,
        warn: Some(4),
    };

    /// Build a map from a header line, or `None` if the line is not a header
    fn from_header(tokens: &[String]) -> Option<Result<ColumnMap, ReportParseError>> {
        let lowered: Vec<String> = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();
        let is_header = matches!(
            lowered.first().map(String::as_str),
            Some("project") | Some("user") | Some("group")
        ) && lowered.iter().any(|t| t == "used");
        if !is_header {
            return None;
        }

        // "Project ID" is two words but one column
        let mut names: Vec<String> = Vec::with_capacity(lowered.len());
        for token in lowered {
            match names.last_mut() {
                Some(last) if token == "id" || token == "name" => {
                    last.push(' ');
                    last.push_str(&token);
                }
                _ => names.push(token),
            }
        }

        // Warn/Grace renders as two data tokens: "00 [--------]"
        let mut positions: Vec<(String, usize)> = Vec::with_capacity(names.len());
        let mut index = 0;
        for name in names {
            let width = if name.contains('/') { 2 } else { 1 };
            positions.push((name, index));
            index += width;
        }

        Some(Self::resolve(&positions))
    }

    fn resolve(positions: &[(String, usize)]) -> Result<ColumnMap, ReportParseError> {
        // Block columns come before inode and realtime ones; first match wins
        let find = |wanted: &str| positions.iter().find(|(n, _)| n == wanted).map(|(_, i)| *i);

        Ok(ColumnMap {
            id: positions.first().map(|(_, i)| *i).unwrap_or(0),
            used: find("used").ok_or(ReportParseError::MissingColumn("Used"))?,
            soft: find("soft").ok_or(ReportParseError::MissingColumn("Soft"))?,
            hard: find("hard").ok_or(ReportParseError::MissingColumn("Hard"))?,
            warn: find("warn/grace").or_else(|| find("warn")),
        })
    }
}

/// Split a line on whitespace, keeping `[...]` groups as one token
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;

    for ch in line.chars() {
        match ch {
            '[' if !in_brackets => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                in_brackets = true;
                current.push(ch);
            }
            ']' if in_brackets => {
                current.push(ch);
                tokens.push(std::mem::take(&mut current));
                in_brackets = false;
            }
            c if c.is_whitespace() && !in_brackets => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_number(column: &'static str, value: &str, unit: u64) -> Result<u64, ReportParseError> {
    value
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .ok_or_else(|| ReportParseError::InvalidNumber {
            column,
            value: value.to_string(),
        })
}

fn looks_like_row(first: &str) -> bool {
    first.starts_with('#') || first.chars().all(|c| c.is_ascii_digit())
}

/// Parse a full project report
///
/// `unit_bytes` is the size of one unit in the block columns (1 KiB for
/// `xfs_quota`). Title lines, rulers and blank lines are skipped; a line
/// that looks like a project row but cannot be read is an error.
pub fn parse_report(text: &str, unit_bytes: u64) -> Result<QuotaReport, ReportParseError> {
    let mut columns: Option<ColumnMap> = None;
    let mut report = QuotaReport::new();

    for line in text.lines() {
        let tokens = tokenize(line);
        let Some(first) = tokens.first() else {
            continue;
        };

        if let Some(map) = ColumnMap::from_header(&tokens) {
            columns = Some(map?);
            continue;
        }
        if !looks_like_row(first) {
            continue;
        }

        let map = columns.unwrap_or(ColumnMap::POSITIONAL);
        let quota = parse_row(line, &tokens, &map, unit_bytes)?;
        report.insert(quota.project_id, quota);
    }

    Ok(report)
}

fn parse_row(
    line: &str,
    tokens: &[String],
    map: &ColumnMap,
    unit_bytes: u64,
) -> Result<ProjectQuota, ReportParseError> {
    let get = |index: usize| {
        tokens
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| ReportParseError::MalformedRow(line.trim().to_string()))
    };

    let project_id = get(map.id)?
        .parse::<ProjectId>()
        .map_err(|_| ReportParseError::MalformedRow(line.trim().to_string()))?;

    let (warnings, grace) = match map.warn {
        Some(index) => {
            let warnings = match tokens.get(index) {
                Some(value) => value.parse::<u32>().map_err(|_| ReportParseError::InvalidNumber {
                    column: "Warn",
                    value: value.clone(),
                })?,
                None => 0,
            };
            let grace = tokens
                .get(index + 1)
                .map(|g| g.trim_start_matches('[').trim_end_matches(']').trim().to_string())
                .filter(|g| !g.is_empty() && !g.chars().all(|c| c == '-'));
            (warnings, grace)
        }
        None => (0, None),
    };

    Ok(ProjectQuota {
        project_id,
        used_bytes: parse_number("Used", get(map.used)?, unit_bytes)?,
        soft_limit_bytes: parse_number("Soft", get(map.soft)?, unit_bytes)?,
        hard_limit_bytes: parse_number("Hard", get(map.hard)?, unit_bytes)?,
        warnings,
        grace,
    })
}

/// Row of `project_id`; a missing row is an error, never zero usage
pub fn find_project(
    report: &QuotaReport,
    project_id: ProjectId,
) -> Result<ProjectQuota, ReportParseError> {
    report
        .get(&project_id)
        .cloned()
        .ok_or(ReportParseError::MissingProject(project_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Project quota on /data (/dev/sdb1)
                               Blocks
Project ID       Used       Soft       Hard    Warn/Grace
---------- --------------------------------------------------
#0                  0          0          0     00 [--------]
#42           7241756   15728640   15728640     00 [--------]
#43          10485760    9437184   10485760     01 [6 days]

";

    #[test]
    fn test_tokenize_keeps_bracket_groups() {
        assert_eq!(
            tokenize("#43   10   9   10   01 [6 days 23:59]"),
            vec!["#43", "10", "9", "10", "01", "[6 days 23:59]"]
        );
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_parse_report_with_header() {
        let report = parse_report(REPORT, 1024).unwrap();
        assert_eq!(report.len(), 3);

        let quota = &report[&ProjectId(42)];
        assert_eq!(quota.used_bytes, 7_415_558_144);
        assert_eq!(quota.soft_limit_bytes, 16_106_127_360);
        assert_eq!(quota.hard_limit_bytes, 16_106_127_360);
        assert_eq!(quota.warnings, 0);
        assert_eq!(quota.grace, None);

        let over = &report[&ProjectId(43)];
        assert_eq!(over.warnings, 1);
        assert_eq!(over.grace.as_deref(), Some("6 days"));
        assert_eq!(over.reserved_bytes(), 10_485_760 * 1024);
    }

    #[test]
    fn test_parse_headerless_report() {
        let text = "#0 0 0 0 00 [--------]\n#7   2048   4096   8192   00 [--------]\n";
        let report = parse_report(text, 1024).unwrap();
        assert_eq!(report[&ProjectId(7)].hard_limit_bytes, 8192 * 1024);
    }

    #[test]
    fn test_columns_mapped_by_name() {
        // Same data, columns reordered and padded differently
        let text = "\
Project ID   Hard        Soft   Used   Warn/Grace
#42          15728640    0      512    00 [--------]
";
        let quota = find_project(&parse_report(text, 1024).unwrap(), ProjectId(42)).unwrap();
        assert_eq!(quota.used_bytes, 512 * 1024);
        assert_eq!(quota.soft_limit_bytes, 0);
        assert_eq!(quota.hard_limit_bytes, 15_728_640 * 1024);
    }

    #[test]
    fn test_block_columns_win_over_inode_columns() {
        let text = "\
Project ID   Used   Soft   Hard   Warn/Grace     Used   Soft   Hard   Warn/Grace
#5           100    200    300    00 [------]    7      8      9      00 [------]
";
        let quota = &parse_report(text, 1).unwrap()[&ProjectId(5)];
        assert_eq!((quota.used_bytes, quota.soft_limit_bytes, quota.hard_limit_bytes), (100, 200, 300));
    }

    #[test]
    fn test_missing_project_is_an_error_not_zero() {
        let report = parse_report(REPORT, 1024).unwrap();
        assert_eq!(
            find_project(&report, ProjectId(99)),
            Err(ReportParseError::MissingProject(ProjectId(99)))
        );
    }

    #[test]
    fn test_empty_report_has_no_rows() {
        let report = parse_report("", 1024).unwrap();
        assert!(report.is_empty());
        assert!(find_project(&report, ProjectId(0)).is_err());
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let text = "Project ID Used Soft Hard Warn/Grace\n#1 12x 0 0 00 [--------]\n";
        assert_eq!(
            parse_report(text, 1024),
            Err(ReportParseError::InvalidNumber {
                column: "Used",
                value: "12x".to_string()
            })
        );
    }

    #[test]
    fn test_truncated_row_is_malformed() {
        let err = parse_report("#1 100 200\n", 1024).unwrap_err();
        assert!(matches!(err, ReportParseError::MalformedRow(_)));
    }

    #[test]
    fn test_header_without_hard_column() {
        let err = parse_report("Project ID Used Soft\n#1 1 2\n", 1024).unwrap_err();
        assert_eq!(err, ReportParseError::MissingColumn("Hard"));
    }

    #[test]
    fn test_unit_overflow_is_invalid_number() {
        let text = format!("#1 {} 0 0 00 [--------]\n", u64::MAX);
        assert!(matches!(
            parse_report(&text, 1024),
            Err(ReportParseError::InvalidNumber { column: "Used", .. })
        ));
    }
}
