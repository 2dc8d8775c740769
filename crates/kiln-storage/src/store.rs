//! Page store: the collaborator that owns page memory.
//!
//! The layout layer never keeps a page across calls. Callers acquire a
//! [`PageHandle`], which pins the page until it is dropped, and take the
//! page's latch through [`PageHandle::read`] or [`PageHandle::write`] for the
//! duration of each access.

use kiln_common::config::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use kiln_common::page::PageId;
use kiln_common::{KilnError, Result};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A single page's memory plus buffer-management metadata.
pub struct PageFrame {
    /// Page data buffer, guarded by the page latch.
    data: RwLock<Box<[u8]>>,
    /// Number of live handles to this page.
    pin_count: AtomicU32,
    /// Whether the page has been written since it was loaded.
    is_dirty: AtomicBool,
}

impl PageFrame {
    /// Creates a zeroed frame of the given size.
    pub fn new(page_size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; page_size].into_boxed_slice()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Returns true if the page has been modified.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }
}

/// A pinned page. The pin is released when the handle is dropped, on every
/// exit path.
pub struct PageHandle {
    page_id: PageId,
    frame: Arc<PageFrame>,
}

impl PageHandle {
    /// Pins `frame` and wraps it.
    pub fn pin(page_id: PageId, frame: Arc<PageFrame>) -> Self {
        frame.pin_count.fetch_add(1, Ordering::AcqRel);
        Self { page_id, frame }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Takes the page's read latch.
    #[inline]
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.frame.data.read(), |data| &**data)
    }

    /// Takes the page's write latch and marks the page dirty.
    #[inline]
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.frame.is_dirty.store(true, Ordering::Release);
        RwLockWriteGuard::map(self.frame.data.write(), |data| &mut **data)
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.frame.pin_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Source of fixed-size pages for one index.
pub trait PageStore: Send + Sync {
    /// Size of every page handed out by this store.
    fn page_size(&self) -> usize;

    /// Allocates a zeroed page and returns its id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Pins an allocated page.
    fn acquire(&self, page_id: PageId) -> Result<PageHandle>;

    /// Returns a page to the store. Fails while anyone still holds a handle.
    fn free_page(&self, page_id: PageId) -> Result<()>;
}

/// Configuration for the in-memory page store.
#[derive(Debug, Clone)]
pub struct MemPageStoreConfig {
    /// Page size in bytes.
    pub page_size: usize,
    /// File identifier stamped into every allocated PageId.
    pub file_id: u32,
}

impl Default for MemPageStoreConfig {
    fn default() -> Self {
        Self {
            page_size: kiln_common::PAGE_SIZE,
            file_id: 0,
        }
    }
}

/// In-memory page store.
///
/// Page numbers index directly into a Vec. Page number 0 is never handed out
/// so that a packed id of 0 can mean "no page" in on-page links.
pub struct MemPageStore {
    config: MemPageStoreConfig,
    /// Frames by page number; `None` for freed or reserved slots.
    pages: RwLock<Vec<Option<Arc<PageFrame>>>>,
    /// Freed page numbers available for reuse.
    free_list: Mutex<Vec<u32>>,
}

impl MemPageStore {
    /// Creates a new empty page store.
    pub fn new(config: MemPageStoreConfig) -> Result<Self> {
        if config.page_size < MIN_PAGE_SIZE || config.page_size > MAX_PAGE_SIZE {
            return Err(KilnError::InvalidParameter {
                name: "page_size".to_string(),
                value: config.page_size.to_string(),
            });
        }
        Ok(Self {
            config,
            pages: RwLock::new(vec![None]),
            free_list: Mutex::new(Vec::new()),
        })
    }

    /// Creates a store with the given page size and file id 0.
    pub fn with_page_size(page_size: usize) -> Result<Self> {
        Self::new(MemPageStoreConfig {
            page_size,
            ..Default::default()
        })
    }

    /// Returns the number of allocated (not freed) pages.
    pub fn page_count(&self) -> usize {
        self.pages.read().iter().filter(|p| p.is_some()).count()
    }

    /// Returns the number of freed pages waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the pin count of a page, or None if it is not allocated.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.frame(page_id).ok().map(|f| f.pin_count())
    }

    fn frame(&self, page_id: PageId) -> Result<Arc<PageFrame>> {
        if page_id.file_id != self.config.file_id {
            return Err(KilnError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }
        self.pages
            .read()
            .get(page_id.page_num as usize)
            .and_then(|slot| slot.clone())
            .ok_or(KilnError::PageNotFound {
                page_id: page_id.as_u64(),
            })
    }
}

impl PageStore for MemPageStore {
    fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn allocate_page(&self) -> Result<PageId> {
        let frame = Arc::new(PageFrame::new(self.config.page_size));
        let reused = self.free_list.lock().pop();

        let mut pages = self.pages.write();
        let page_num = match reused {
            Some(page_num) => {
                pages[page_num as usize] = Some(frame);
                page_num
            }
            None => {
                let page_num = u32::try_from(pages.len()).map_err(|_| {
                    KilnError::Internal("page store exhausted".to_string())
                })?;
                pages.push(Some(frame));
                page_num
            }
        };

        Ok(PageId::new(self.config.file_id, page_num))
    }

    fn acquire(&self, page_id: PageId) -> Result<PageHandle> {
        let frame = self.frame(page_id)?;
        Ok(PageHandle::pin(page_id, frame))
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        let frame = self.frame(page_id)?;
        let pins = frame.pin_count();
        if pins > 0 {
            return Err(KilnError::PagePinned {
                page_id: page_id.as_u64(),
                pins,
            });
        }

        self.pages.write()[page_id.page_num as usize] = None;
        self.free_list.lock().push(page_id.page_num);
        debug!(page = %page_id, "freed page");
        Ok(())
    }
}
