//! tgfs shared library: a flat filesystem over a remote document channel.

/// Filesystem core: record table, operations, write-back and reconciliation.
pub mod fs;
/// The remote document store seam.
pub mod remote;
