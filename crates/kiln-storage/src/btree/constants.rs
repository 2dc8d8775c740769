//! B+ tree constants.

/// Width of a child or sibling link on a page (a packed `PageId`).
pub const LINK_SIZE: usize = 8;

/// Fewest items a leaf or inner page must be able to hold. Below this a
/// split leaves halves too small to rebalance.
pub const MIN_ITEMS_PER_PAGE: usize = 4;

/// Deepest tree the descent path will follow before reporting corruption.
pub const MAX_HEIGHT: u16 = 64;
