//! Core types and algorithms for the emem firmware fact store.
//!
//! This crate is deliberately free of filesystem access. It owns the data
//! model, the firmware-version matcher, the deep merge used by resolution, and
//! the [`store::FactStore`] trait that backends implement.

pub mod compile;
pub mod contract;
pub mod error;
pub mod history;
pub mod index;
pub mod merge;
pub mod observation;
pub mod resolution;
pub mod rule;
pub mod store;
pub mod version;

pub use error::{Error, Result};

/// Version tag written into every persisted document.
pub const SCHEMA_VERSION: &str = "0.1";
