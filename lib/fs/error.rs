use crate::remote::RemoteError;

/// Everything a filesystem operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Unknown inode or name, including entries removed concurrently by reconciliation.
    #[error("no such file")]
    NotFound,

    /// A directory operation on this flat filesystem.
    #[error("not a directory")]
    NotADirectory,

    /// A structural operation this filesystem does not implement.
    #[error("operation not implemented")]
    Unsupported,

    /// A write while the filesystem is mounted read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Creating outside the root directory.
    #[error("operation not permitted")]
    PermissionDenied,

    /// The file handle is not open.
    #[error("bad file handle")]
    BadHandle,

    /// ioctl requests.
    #[error("inappropriate ioctl for device")]
    NotATty,

    /// A write or truncate past [`MAX_FILE_SIZE`](super::MAX_FILE_SIZE), or one the buffer cannot
    /// grow to.
    #[error("file too large")]
    FileTooLarge,

    /// In-kernel copy between handles.
    #[error("operation not supported")]
    OperationNotSupported,

    /// The remote store could not serve hydration or an upload.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl FsError {
    /// The errno the kernel should see for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::NotADirectory => libc::ENOTDIR,
            Self::Unsupported => libc::ENOSYS,
            Self::ReadOnly => libc::EROFS,
            Self::PermissionDenied => libc::EPERM,
            Self::BadHandle => libc::EBADF,
            Self::NotATty => libc::ENOTTY,
            Self::FileTooLarge => libc::EFBIG,
            Self::OperationNotSupported => libc::EOPNOTSUPP,
            Self::Remote(_) => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_map_to_their_errno() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::NotADirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::Unsupported.errno(), libc::ENOSYS);
        assert_eq!(FsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(FsError::PermissionDenied.errno(), libc::EPERM);
        assert_eq!(FsError::FileTooLarge.errno(), libc::EFBIG);
    }

    #[test]
    fn remote_failures_surface_as_eio() {
        let err: FsError = RemoteError::Rejected {
            reason: "flood wait".to_owned(),
        }
        .into();
        assert_eq!(err.errno(), libc::EIO);
    }
}
