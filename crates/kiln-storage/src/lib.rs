//! Storage engine pieces for Kiln indexes.
//!
//! This crate provides:
//! - Page store with pinned, latched page handles
//! - Logging hook for structural page operations
//! - B+ tree page interpreters (leaf, inner, meta)
//! - Page-based B+ tree over fixed-width keys and values

pub mod btree;
pub mod store;
pub mod wal;

pub use btree::{
    BPlusInnerIo, BPlusIo, BPlusLeafIo, BPlusMetaIo, BPlusTree, ItemLayout, CNT_OFF, FORWARD_OFF,
    ITEMS_OFF, LINK_SIZE, MAX_HEIGHT, MIN_ITEMS_PER_PAGE, REMOVE_ID_OFF,
};
pub use store::{MemPageStore, MemPageStoreConfig, PageFrame, PageHandle, PageStore};
pub use wal::{Lsn, MemPageOpLog, NoopPageOpLog, PageOpLog, PageOperation};
