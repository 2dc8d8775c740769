//! B+ tree pages and the tree built on them.
//!
//! Page interpreters are stateless values that read and write raw page
//! buffers handed out by a [`PageStore`](crate::store::PageStore):
//!
//! - [`BPlusIo`]: item layout contract shared by both node kinds (count,
//!   capacity, offsets, bulk copy and move, split and merge helpers)
//! - [`BPlusLeafIo`]: packed `key ++ value` items
//! - [`BPlusInnerIo`]: routing keys interleaved with child links
//! - [`BPlusMetaIo`]: root pointer and geometry of one tree
//!
//! [`BPlusTree`] drives search, insert with split, and remove with borrow
//! and merge purely through these interpreters.
//!
//! ## Leaf page layout
//!
//! ```text
//! +----------------------+ 0
//! | type | ver | cnt | - |
//! | forward: u64         |
//! | remove_id: u64       |
//! +----------------------+ 24 (items_offset)
//! | key_0 | value_0      |
//! | key_1 | value_1      |
//! | ...                  |
//! +----------------------+
//! ```
//!
//! ## Inner page layout
//!
//! ```text
//! +----------------------+ 0
//! | type | ver | cnt | - |
//! | forward: u64         |
//! | remove_id: u64       |
//! +----------------------+ 24 (items_offset)
//! | left_0               |
//! | key_0 | right_0      |
//! | key_1 | right_1      |
//! | ...                  |
//! +----------------------+
//! ```

pub mod constants;
pub mod inner;
pub mod io;
pub mod leaf;
pub mod meta;
pub mod tree;

pub use constants::{LINK_SIZE, MAX_HEIGHT, MIN_ITEMS_PER_PAGE};
pub use inner::BPlusInnerIo;
pub use io::{BPlusIo, ItemLayout, CNT_OFF, FORWARD_OFF, ITEMS_OFF, REMOVE_ID_OFF};
pub use leaf::BPlusLeafIo;
pub use meta::BPlusMetaIo;
pub use tree::BPlusTree;
