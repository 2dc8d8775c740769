//! Write-ahead log hook for structural page operations.
//!
//! The tree reports every multi-page change here before mutating any page, so
//! a durable log implementation can replay or roll back an interrupted split
//! or merge. The log itself is a collaborator; this module only defines the
//! record shape and two in-process implementations.

use kiln_common::page::PageId;
use kiln_common::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Log Sequence Number assigned to a logged page operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Invalid/uninitialized LSN.
    pub const INVALID: Lsn = Lsn(0);

    /// First valid LSN.
    pub const FIRST: Lsn = Lsn(1);

    /// Returns true if this is a valid LSN.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structural change spanning one or more pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageOperation {
    /// A new tree was created with the given meta and root pages.
    CreateTree { meta: PageId, root: PageId },
    /// Items `[mid..)` of `page` move to the new right sibling `forward`.
    Split {
        page: PageId,
        forward: PageId,
        level: u16,
        mid: usize,
    },
    /// The root split and a new root was placed above `left` and `right`.
    NewRoot {
        root: PageId,
        left: PageId,
        right: PageId,
        level: u16,
    },
    /// All items of `right` move into `left`; `right` is freed.
    Merge {
        parent: PageId,
        left: PageId,
        right: PageId,
        level: u16,
    },
    /// `count` items move between siblings to fix an underfull page.
    Borrow {
        parent: PageId,
        from: PageId,
        to: PageId,
        count: usize,
        level: u16,
    },
    /// An inner root with one child is replaced by that child.
    CollapseRoot { old_root: PageId, new_root: PageId },
}

impl std::fmt::Display for PageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageOperation::CreateTree { meta, root } => {
                write!(f, "create tree meta={} root={}", meta, root)
            }
            PageOperation::Split {
                page,
                forward,
                level,
                mid,
            } => write!(f, "split {} -> {} at {} (level {})", page, forward, mid, level),
            PageOperation::NewRoot {
                root,
                left,
                right,
                level,
            } => write!(f, "new root {} over {}, {} (level {})", root, left, right, level),
            PageOperation::Merge {
                parent,
                left,
                right,
                level,
            } => write!(
                f,
                "merge {} into {} under {} (level {})",
                right, left, parent, level
            ),
            PageOperation::Borrow {
                parent,
                from,
                to,
                count,
                level,
            } => write!(
                f,
                "borrow {} items {} -> {} under {} (level {})",
                count, from, to, parent, level
            ),
            PageOperation::CollapseRoot { old_root, new_root } => {
                write!(f, "collapse root {} -> {}", old_root, new_root)
            }
        }
    }
}

/// Sink for structural page operations.
pub trait PageOpLog: Send + Sync {
    /// Records an operation about to be applied.
    fn log_page_operation(&self, op: &PageOperation) -> Result<Lsn>;
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct NoopPageOpLog;

impl PageOpLog for NoopPageOpLog {
    fn log_page_operation(&self, _op: &PageOperation) -> Result<Lsn> {
        Ok(Lsn::INVALID)
    }
}

/// Keeps records in memory, in append order.
#[derive(Debug)]
pub struct MemPageOpLog {
    next_lsn: AtomicU64,
    records: Mutex<Vec<(Lsn, PageOperation)>>,
}

impl MemPageOpLog {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicU64::new(Lsn::FIRST.0),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of every record logged so far.
    pub fn records(&self) -> Vec<(Lsn, PageOperation)> {
        self.records.lock().clone()
    }

    /// Returns the number of records logged so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemPageOpLog {
    fn default() -> Self {
        Self::new()
    }
}

impl PageOpLog for MemPageOpLog {
    fn log_page_operation(&self, op: &PageOperation) -> Result<Lsn> {
        let mut records = self.records.lock();
        let lsn = Lsn(self.next_lsn.fetch_add(1, Ordering::AcqRel));
        records.push((lsn, op.clone()));
        Ok(lsn)
    }
}
