// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount table lookups: which filesystem a directory lives on and whether
//! that filesystem can enforce project quotas.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{QuotaError, Result};

pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mount options under which XFS accounts project usage
const PROJECT_QUOTA_OPTIONS: &[&str] = &["prjquota", "pquota", "pqnoenforce"];

/// One entry of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountInfo {
    pub fn has_project_quota(&self) -> bool {
        self.options
            .iter()
            .any(|opt| PROJECT_QUOTA_OPTIONS.contains(&opt.as_str()))
    }
}

/// Undo the octal escaping the kernel applies to spaces, tabs, newlines and backslashes
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse mount table text in `/proc/self/mounts` format
pub fn parse_mounts(text: &str) -> Vec<MountInfo> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next().unwrap_or_default();
            Some(MountInfo {
                device: unescape(device),
                mount_point: PathBuf::from(unescape(mount_point)),
                fs_type: fs_type.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Read and parse a mount table file
pub fn read_mounts(table: &Path) -> Result<Vec<MountInfo>> {
    let text = fs::read_to_string(table).map_err(|e| QuotaError::Io {
        operation: "read mount table",
        path: table.to_path_buf(),
        source: e
            .raw_os_error()
            .map(nix::errno::Errno::from_raw)
            .unwrap_or(nix::errno::Errno::UnknownErrno),
    })?;
    Ok(parse_mounts(&text))
}

fn canonical(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => QuotaError::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => {
            QuotaError::PermissionDenied(format!("cannot resolve {}: {}", path.display(), e))
        }
        _ => QuotaError::Io {
            operation: "resolve path",
            path: path.to_path_buf(),
            source: e
                .raw_os_error()
                .map(nix::errno::Errno::from_raw)
                .unwrap_or(nix::errno::Errno::UnknownErrno),
        },
    })
}

/// Mount point of the filesystem holding `path`
///
/// The deepest mount table entry containing the resolved path wins. When
/// the table is empty, walk up until the device number changes.
pub fn find_mount_point(path: &Path, mounts: &[MountInfo]) -> Result<PathBuf> {
    let resolved = canonical(path)?;

    let from_table = mounts
        .iter()
        .filter(|m| resolved.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.components().count())
        .map(|m| m.mount_point.clone());

    let mount_point = match from_table {
        Some(mount_point) => mount_point,
        None => walk_to_device_root(&resolved)?,
    };

    debug!(operation = "find_mount_point", path = %path.display(), mount_point = %mount_point.display(), "Resolved mount point");
    Ok(mount_point)
}

fn walk_to_device_root(resolved: &Path) -> Result<PathBuf> {
    let metadata = |p: &Path| {
        fs::metadata(p).map_err(|_| QuotaError::NotFound(p.to_path_buf()))
    };

    let mut current = resolved.to_path_buf();
    let mut current_dev = metadata(&current)?.dev();
    while let Some(parent) = current.parent() {
        let parent_dev = metadata(parent)?.dev();
        if parent_dev != current_dev {
            break;
        }
        current = parent.to_path_buf();
        current_dev = parent_dev;
    }
    Ok(current)
}

/// Ensure `mount_point` is a mounted XFS filesystem with project quotas enabled
pub fn check_project_quota_mount<'a>(
    mount_point: &Path,
    mounts: &'a [MountInfo],
) -> Result<&'a MountInfo> {
    // The last entry is the one visible when something is mounted on top
    let entry = mounts
        .iter()
        .rev()
        .find(|m| m.mount_point == mount_point)
        .ok_or_else(|| QuotaError::NotMounted(mount_point.to_path_buf()))?;

    if entry.fs_type != "xfs" {
        return Err(QuotaError::NotSupported(format!(
            "{} is a {} filesystem, not xfs",
            mount_point.display(),
            entry.fs_type
        )));
    }
    if !entry.has_project_quota() {
        return Err(QuotaError::NotSupported(format!(
            "{} is not mounted with the prjquota option",
            mount_point.display()
        )));
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb1 /data xfs rw,relatime,attr2,inode64,logbufs=8,logbsize=32k,prjquota 0 0
/dev/sdc1 /data/scratch xfs rw,relatime,attr2,inode64,noquota 0 0
/dev/sdd1 /mnt/with\\040space xfs rw,relatime,pqnoenforce 0 0
";

    #[test]
    fn test_parse_mounts() {
        let mounts = parse_mounts(TABLE);
        assert_eq!(mounts.len(), 5);
        assert_eq!(mounts[2].device, "/dev/sdb1");
        assert_eq!(mounts[2].mount_point, PathBuf::from("/data"));
        assert!(mounts[2].has_project_quota());
        assert!(!mounts[3].has_project_quota());
        assert_eq!(mounts[4].mount_point, PathBuf::from("/mnt/with space"));
        assert!(mounts[4].has_project_quota());
    }

    #[test]
    fn test_unescape_leaves_plain_backslashes() {
        assert_eq!(unescape("a\\134b"), "a\\b");
        assert_eq!(unescape("trailing\\"), "trailing\\");
        assert_eq!(unescape("\\9zz"), "\\9zz");
    }

    #[test]
    fn test_check_project_quota_mount() {
        let mounts = parse_mounts(TABLE);
        assert!(check_project_quota_mount(Path::new("/data"), &mounts).is_ok());
        assert!(matches!(
            check_project_quota_mount(Path::new("/data/scratch"), &mounts),
            Err(QuotaError::NotSupported(_))
        ));
        assert!(matches!(
            check_project_quota_mount(Path::new("/"), &mounts),
            Err(QuotaError::NotSupported(_))
        ));
        assert!(matches!(
            check_project_quota_mount(Path::new("/srv"), &mounts),
            Err(QuotaError::NotMounted(_))
        ));
    }

    #[test]
    fn test_find_mount_point_picks_deepest_entry() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().canonicalize().unwrap();
        let nested = base.join("projects").join("www");
        fs::create_dir_all(&nested).unwrap();

        let mounts = vec![
            MountInfo {
                device: "/dev/sda1".into(),
                mount_point: PathBuf::from("/"),
                fs_type: "ext4".into(),
                options: vec!["rw".into()],
            },
            MountInfo {
                device: "/dev/sdb1".into(),
                mount_point: base.join("projects"),
                fs_type: "xfs".into(),
                options: vec!["rw".into(), "prjquota".into()],
            },
        ];

        assert_eq!(find_mount_point(&nested, &mounts).unwrap(), base.join("projects"));
        assert_eq!(find_mount_point(&base, &mounts).unwrap(), PathBuf::from("/"));
    }

    #[test]
    fn test_find_mount_point_without_table_walks_devices() {
        let root = tempfile::tempdir().unwrap();
        let mount_point = find_mount_point(root.path(), &[]).unwrap();
        let resolved = root.path().canonicalize().unwrap();
        assert!(resolved.starts_with(&mount_point));
    }

    #[test]
    fn test_find_mount_point_missing_path() {
        let root = tempfile::tempdir().unwrap();
        let err = find_mount_point(&root.path().join("missing"), &[]).unwrap_err();
        assert!(matches!(err, QuotaError::NotFound(_)));
    }
}
