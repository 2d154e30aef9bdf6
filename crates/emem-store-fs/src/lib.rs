//! Filesystem backend for the emem fact store.
//!
//! Everything lives under a single store root as YAML artifacts, JSON-lines
//! logs, and one derived JSON index. The store handle holds nothing but that
//! root path and its policy defaults; every call re-reads the disk.

mod files;
mod layout;

pub mod compile;
pub mod error;
pub mod index;
pub mod observe;
pub mod resolve;
pub mod revision;
pub mod store;
pub mod timeline;

pub use error::{Error, Result};
pub use layout::Layout;
pub use store::FsStore;

#[cfg(test)]
mod tests;
