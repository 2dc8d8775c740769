//! Configuration structures for Kiln indexes.

use crate::error::{KilnError, Result};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Smallest supported page size in bytes.
pub const MIN_PAGE_SIZE: usize = 256;

/// Largest supported page size in bytes. Item counts are stored as u16.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// End of the B+ tree items header; items may not start before this offset.
pub const MIN_ITEMS_OFFSET: usize = 24;

/// Per-index configuration.
///
/// Page size and item geometry are fixed for the lifetime of an index, but
/// several indexes with different geometry can live in one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Page size in bytes.
    pub page_size: usize,
    /// Byte offset of the first item on B+ tree pages.
    pub items_offset: usize,
    /// Width of every key in bytes.
    pub key_size: usize,
    /// Width of every value in bytes (0 for key-only indexes).
    pub value_size: usize,
    /// Fill ratio below which a page borrows from or merges with a sibling.
    pub min_fill_factor: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            items_offset: MIN_ITEMS_OFFSET,
            key_size: 8,
            value_size: 8,
            min_fill_factor: 0.5,
        }
    }
}

impl IndexConfig {
    /// Creates a config for the given key and value widths with default page geometry.
    pub fn new(key_size: usize, value_size: usize) -> Self {
        Self {
            key_size,
            value_size,
            ..Default::default()
        }
    }

    /// Size of one leaf item (key followed by value).
    pub fn leaf_item_size(&self) -> usize {
        self.key_size + self.value_size
    }

    /// Checks the parameters are usable. Capacity checks that depend on the
    /// concrete page layout are made when an index is created.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(KilnError::InvalidParameter {
                name: "page_size".to_string(),
                value: self.page_size.to_string(),
            });
        }
        if self.items_offset < MIN_ITEMS_OFFSET || self.items_offset >= self.page_size {
            return Err(KilnError::InvalidParameter {
                name: "items_offset".to_string(),
                value: self.items_offset.to_string(),
            });
        }
        if self.key_size == 0 {
            return Err(KilnError::ConfigError("key_size must be positive".to_string()));
        }
        if !(self.min_fill_factor > 0.0 && self.min_fill_factor <= 0.5) {
            return Err(KilnError::InvalidParameter {
                name: "min_fill_factor".to_string(),
                value: self.min_fill_factor.to_string(),
            });
        }
        Ok(())
    }
}
