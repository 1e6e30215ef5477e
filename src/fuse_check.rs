//! FUSE availability checks.

use std::path::Path;

const FUSE_DEVICE: &str = "/dev/fuse";

/// Errors that can occur when verifying FUSE availability.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// The kernel module is not loaded or the device is hidden (common in containers).
    #[error(
        "{FUSE_DEVICE} does not exist. Load the fuse kernel module (`modprobe fuse`) or, \
         inside a container, pass the device through."
    )]
    DeviceMissing,

    /// The device exists but this user cannot open it.
    #[error("{FUSE_DEVICE} is not accessible: {0}")]
    DeviceInaccessible(#[source] std::io::Error),
}

/// Verify that FUSE is usable on the current host.
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    let device = Path::new(FUSE_DEVICE);
    if !device.exists() {
        return Err(FuseCheckError::DeviceMissing);
    }
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map(drop)
        .map_err(FuseCheckError::DeviceInaccessible)
}
