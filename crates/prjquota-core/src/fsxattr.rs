// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Project id assignment through the `fsxattr` ioctls.
//!
//! The kernel keeps the project id and the inherit flag in `struct fsxattr`
//! (see `linux/fs.h`). Assignment is read-modify-write on one open handle:
//! only `fsx_projid` and `FS_XFLAG_PROJINHERIT` are touched, every other
//! field goes back to the kernel as it was read.

use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::ProjectId;
use crate::error::{QuotaError, Result};

/// New entries created under the directory inherit its project id
pub const FS_XFLAG_PROJINHERIT: u32 = 0x0000_0200;

/// Mirror of the kernel's `struct fsxattr` (28 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsxAttr {
    pub fsx_xflags: u32,
    pub fsx_extsize: u32,
    pub fsx_nextents: u32,
    pub fsx_projid: u32,
    pub fsx_cowextsize: u32,
    pub fsx_pad: [u8; 8],
}

impl FsxAttr {
    pub fn project_id(&self) -> ProjectId {
        ProjectId(self.fsx_projid)
    }

    pub fn inherits_project(&self) -> bool {
        self.fsx_xflags & FS_XFLAG_PROJINHERIT != 0
    }

    /// Copy of this record tagged with `project_id` and the inherit flag set
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.fsx_projid = project_id.0;
        self.fsx_xflags |= FS_XFLAG_PROJINHERIT;
        self
    }
}

mod sys {
    use super::FsxAttr;

    // #define FS_IOC_FSGETXATTR _IOR('X', 31, struct fsxattr)
    nix::ioctl_read!(fs_ioc_fsgetxattr, b'X', 31, FsxAttr);
    // #define FS_IOC_FSSETXATTR _IOW('X', 32, struct fsxattr)
    nix::ioctl_write_ptr!(fs_ioc_fssetxattr, b'X', 32, FsxAttr);
}

/// An open directory whose attribute record can be read and written
#[cfg_attr(test, mockall::automock)]
pub trait AttrHandle {
    fn get(&mut self) -> Result<FsxAttr>;
    fn set(&mut self, attr: &FsxAttr) -> Result<()>;
}

/// Opens directories for attribute access
///
/// The handle is released when dropped, on success and error paths alike.
#[cfg_attr(test, mockall::automock)]
pub trait AttrStore {
    fn open(&self, path: &Path) -> Result<Box<dyn AttrHandle>>;
}

/// [`AttrStore`] backed by the real `FS_IOC_FSGETXATTR`/`FS_IOC_FSSETXATTR` ioctls
#[derive(Debug, Default, Clone, Copy)]
pub struct IoctlAttrStore;

struct DirHandle {
    file: File,
    path: PathBuf,
}

impl AttrStore for IoctlAttrStore {
    fn open(&self, path: &Path) -> Result<Box<dyn AttrHandle>> {
        // Read-only access is enough for both ioctls
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(path)
            .map_err(|e| {
                let errno = e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::UnknownErrno);
                map_errno("open", path, errno)
            })?;

        Ok(Box::new(DirHandle {
            file,
            path: path.to_path_buf(),
        }))
    }
}

impl AttrHandle for DirHandle {
    fn get(&mut self) -> Result<FsxAttr> {
        let mut attr = FsxAttr::default();
        unsafe { sys::fs_ioc_fsgetxattr(self.file.as_raw_fd(), &mut attr) }
            .map_err(|errno| map_errno("FS_IOC_FSGETXATTR", &self.path, errno))?;
        Ok(attr)
    }

    fn set(&mut self, attr: &FsxAttr) -> Result<()> {
        unsafe { sys::fs_ioc_fssetxattr(self.file.as_raw_fd(), attr) }
            .map_err(|errno| map_errno("FS_IOC_FSSETXATTR", &self.path, errno))?;
        Ok(())
    }
}

/// Translate a failed open/ioctl into the quota error taxonomy
pub(crate) fn map_errno(operation: &'static str, path: &Path, errno: Errno) -> QuotaError {
    match errno {
        Errno::ENOENT => QuotaError::NotFound(path.to_path_buf()),
        Errno::ENOTDIR => QuotaError::NotADirectory(path.to_path_buf()),
        Errno::EPERM | Errno::EACCES => {
            QuotaError::PermissionDenied(format!("{} on {}: {}", operation, path.display(), errno))
        }
        Errno::ENOTTY | Errno::EINVAL | Errno::EOPNOTSUPP => QuotaError::NotSupported(format!(
            "{} on {}: {}",
            operation,
            path.display(),
            errno
        )),
        _ => QuotaError::Io {
            operation,
            path: path.to_path_buf(),
            source: errno,
        },
    }
}

/// Reads and assigns directory project ids
#[derive(Debug, Default, Clone)]
pub struct ProjectIdAssigner<S = IoctlAttrStore> {
    store: S,
}

impl ProjectIdAssigner<IoctlAttrStore> {
    pub fn new() -> Self {
        Self {
            store: IoctlAttrStore,
        }
    }
}

impl<S: AttrStore> ProjectIdAssigner<S> {
    pub fn with_store(store: S) -> Self {
        Self { store }
    }

    /// Current attribute record of `path`
    pub fn read(&self, path: &Path) -> Result<FsxAttr> {
        let mut handle = self.store.open(path)?;
        handle.get()
    }

    /// Project id of `path`; `0` means no project has been assigned
    pub fn project_id(&self, path: &Path) -> Result<ProjectId> {
        let attr = self.read(path)?;
        debug!(operation = "get_project_id", path = %path.display(), project_id = %attr.fsx_projid, "Read project id");
        Ok(attr.project_id())
    }

    /// Tag `path` with `project_id` and enable project inheritance
    ///
    /// Other flag bits and fields are preserved. If the write fails the
    /// kernel record is unchanged.
    pub fn assign(&self, path: &Path, project_id: ProjectId) -> Result<()> {
        let mut handle = self.store.open(path)?;
        let current = handle.get()?;
        let updated = current.with_project(project_id);
        handle.set(&updated)?;

        info!(
            operation = "assign_project_id",
            path = %path.display(),
            project_id = %project_id,
            previous_project_id = %current.fsx_projid,
            "Project id assigned to directory"
        );
        Ok(())
    }

    /// Move `path` back to the default project
    ///
    /// The limit of the old project is left alone; see
    /// [`QuotaController::clear_limit`](crate::QuotaController::clear_limit).
    pub fn release(&self, path: &Path) -> Result<ProjectId> {
        let mut handle = self.store.open(path)?;
        let current = handle.get()?;
        let mut updated = current;
        updated.fsx_projid = ProjectId::DEFAULT.0;
        handle.set(&updated)?;

        info!(operation = "release_project_id", path = %path.display(), project_id = %current.fsx_projid, "Project id released");
        Ok(current.project_id())
    }
}
