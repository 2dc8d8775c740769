//! Kiln common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Kiln components.

pub mod config;
pub mod error;
pub mod page;

pub use config::IndexConfig;
pub use error::{KilnError, Result};
pub use page::{IoVersions, PageId, PageIo, PageType, VersionedIo, PAGE_SIZE};
