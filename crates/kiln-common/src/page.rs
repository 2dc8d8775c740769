//! Page identity and the common page header shared by every page kind.
//!
//! Every page starts with the same 4-byte prefix:
//!
//! ```text
//! +------------------+ 0
//! | page_type: u16   |
//! | version: u16     |
//! +------------------+ 4 (PageIo::COMMON_HEADER_END)
//! | kind-specific    |
//! +------------------+
//! ```
//!
//! All multi-byte fields are little-endian.

use crate::error::{KilnError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4 * 1024;

/// Unique identifier for a page within a store.
///
/// PageId consists of a file ID and page number within that file. The packed
/// value 0 is reserved to mean "no page" in on-page links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier.
    pub file_id: u32,
    /// Page number within the file.
    pub page_num: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Returns the PageId as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }

    /// Creates a PageId from a u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_num: value as u32,
        }
    }

    /// Decodes an on-page link, where 0 means no page.
    pub fn from_link(value: u64) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self::from_u64(value))
        }
    }

    /// Encodes an optional page as an on-page link.
    pub fn to_link(page_id: Option<PageId>) -> u64 {
        page_id.map(|p| p.as_u64()).unwrap_or(0)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}

/// Page kinds in Kiln storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PageType {
    /// Unallocated/free page.
    Free = 0,
    /// B+ tree meta page (root pointer and height).
    BPlusMeta = 1,
    /// B+ tree inner (routing) page.
    BPlusInner = 2,
    /// B+ tree leaf (data) page.
    BPlusLeaf = 3,
}

impl TryFrom<u16> for PageType {
    type Error = KilnError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(PageType::Free),
            1 => Ok(PageType::BPlusMeta),
            2 => Ok(PageType::BPlusInner),
            3 => Ok(PageType::BPlusLeaf),
            _ => Err(KilnError::Internal(format!("unknown page type: {}", value))),
        }
    }
}

#[inline(always)]
pub fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline(always)]
pub fn write_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline(always)]
pub fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline(always)]
pub fn write_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline(always)]
pub fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}

#[inline(always)]
pub fn write_u64(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

/// Binds a page type and format version to raw page buffers.
///
/// A `PageIo` is the only thing allowed to decide whether a buffer may be
/// interpreted as a given kind of page. Interpreting a buffer whose stored
/// type or version disagrees is a [`KilnError::FormatMismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIo {
    page_type: PageType,
    version: u16,
}

impl PageIo {
    /// Offset of the page type tag.
    pub const TYPE_OFF: usize = 0;

    /// Offset of the format version.
    pub const VER_OFF: usize = 2;

    /// End of the header prefix shared by all page kinds.
    pub const COMMON_HEADER_END: usize = 4;

    /// Creates a page IO for the given type and version. Versions start at 1
    /// so a zeroed buffer never validates.
    ///
    /// # Panics
    ///
    /// Panics if `version` is 0. Interpreter constructors reject 0 with an
    /// error before calling this.
    pub const fn new(page_type: PageType, version: u16) -> Self {
        assert!(version > 0, "page format versions start at 1");
        Self { page_type, version }
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Writes the common header into an uninitialized buffer.
    pub fn init_new_page(&self, buf: &mut [u8]) {
        buf[..Self::COMMON_HEADER_END].fill(0);
        write_u16(buf, Self::TYPE_OFF, self.page_type as u16);
        write_u16(buf, Self::VER_OFF, self.version);
    }

    /// Reads the raw type tag stored in a buffer.
    pub fn stored_type(buf: &[u8]) -> u16 {
        read_u16(buf, Self::TYPE_OFF)
    }

    /// Reads the format version stored in a buffer.
    pub fn stored_version(buf: &[u8]) -> u16 {
        read_u16(buf, Self::VER_OFF)
    }

    /// Fails unless the buffer was initialized by this exact type and version.
    pub fn check(&self, buf: &[u8]) -> Result<()> {
        let actual_type = Self::stored_type(buf);
        let actual_version = Self::stored_version(buf);
        if actual_type != self.page_type as u16 || actual_version != self.version {
            warn!(
                expected_type = self.page_type as u16,
                expected_version = self.version,
                actual_type,
                actual_version,
                "page format mismatch"
            );
            return Err(self.mismatch(actual_type, actual_version));
        }
        Ok(())
    }

    fn mismatch(&self, actual_type: u16, actual_version: u16) -> KilnError {
        KilnError::FormatMismatch {
            expected_type: self.page_type as u16,
            expected_version: self.version,
            actual_type,
            actual_version,
        }
    }
}

/// Implemented by every concrete page interpreter.
pub trait VersionedIo {
    fn page_io(&self) -> PageIo;
}

/// All known format versions of one page kind.
///
/// Versions are dense and start at 1: `versions[0]` is version 1. New pages
/// are always written with [`IoVersions::latest`]; existing pages are read
/// with whatever version they were written in.
#[derive(Debug, Clone)]
pub struct IoVersions<T> {
    versions: Vec<T>,
}

impl<T: VersionedIo> IoVersions<T> {
    /// Builds a registry. All entries must share one page type and be listed
    /// in version order starting at 1.
    pub fn new(versions: Vec<T>) -> Result<Self> {
        let first = versions
            .first()
            .ok_or_else(|| KilnError::Internal("no IO versions registered".to_string()))?
            .page_io();

        for (i, io) in versions.iter().enumerate() {
            let page_io = io.page_io();
            if page_io.page_type() != first.page_type() {
                return Err(KilnError::Internal(format!(
                    "mixed page types in IO versions: {:?} and {:?}",
                    first.page_type(),
                    page_io.page_type()
                )));
            }
            if page_io.version() as usize != i + 1 {
                return Err(KilnError::Internal(format!(
                    "IO version {} registered at position {}",
                    page_io.version(),
                    i + 1
                )));
            }
        }

        Ok(Self { versions })
    }

    /// Page type shared by every version.
    pub fn page_type(&self) -> PageType {
        self.versions[0].page_io().page_type()
    }

    /// Newest version, used for freshly initialized pages.
    pub fn latest(&self) -> &T {
        &self.versions[self.versions.len() - 1]
    }

    /// Looks up a specific version.
    pub fn for_version(&self, version: u16) -> Result<&T> {
        if version == 0 {
            return Err(self.unknown(self.page_type() as u16, version));
        }
        self.versions
            .get(version as usize - 1)
            .ok_or_else(|| self.unknown(self.page_type() as u16, version))
    }

    /// Resolves the interpreter for an existing page from its stored header.
    pub fn for_page(&self, buf: &[u8]) -> Result<&T> {
        let actual_type = PageIo::stored_type(buf);
        let actual_version = PageIo::stored_version(buf);
        if actual_type != self.page_type() as u16 {
            warn!(
                expected_type = self.page_type() as u16,
                actual_type, actual_version, "page type mismatch"
            );
            return Err(self.unknown(actual_type, actual_version));
        }
        self.for_version(actual_version)
    }

    fn unknown(&self, actual_type: u16, actual_version: u16) -> KilnError {
        KilnError::FormatMismatch {
            expected_type: self.page_type() as u16,
            expected_version: self.latest().page_io().version(),
            actual_type,
            actual_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestIo(PageIo);

    impl VersionedIo for TestIo {
        fn page_io(&self) -> PageIo {
            self.0
        }
    }

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_roundtrip() {
        let page_id = PageId::new(42, 1000);
        assert_eq!(PageId::from_u64(page_id.as_u64()), page_id);

        let page_id = PageId::new(u32::MAX, u32::MAX);
        assert_eq!(PageId::from_u64(page_id.as_u64()), page_id);
    }

    #[test]
    fn test_page_id_as_u64_bit_layout() {
        let page_id = PageId::new(1, 2);
        assert_eq!(page_id.as_u64(), (1u64 << 32) | 2);
    }

    #[test]
    fn test_page_id_links() {
        assert_eq!(PageId::from_link(0), None);
        assert_eq!(PageId::to_link(None), 0);

        let page_id = PageId::new(0, 7);
        assert_eq!(PageId::from_link(PageId::to_link(Some(page_id))), Some(page_id));
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId::new(5, 123).to_string(), "5:123");
    }

    #[test]
    fn test_page_type_repr() {
        assert_eq!(PageType::Free as u16, 0);
        assert_eq!(PageType::BPlusMeta as u16, 1);
        assert_eq!(PageType::BPlusInner as u16, 2);
        assert_eq!(PageType::BPlusLeaf as u16, 3);
    }

    #[test]
    fn test_page_type_try_from() {
        for page_type in [
            PageType::Free,
            PageType::BPlusMeta,
            PageType::BPlusInner,
            PageType::BPlusLeaf,
        ] {
            assert_eq!(PageType::try_from(page_type as u16).unwrap(), page_type);
        }
        assert!(PageType::try_from(99).is_err());
    }

    #[test]
    fn test_le_helpers() {
        let mut buf = [0u8; 16];
        write_u16(&mut buf, 1, 0xBEEF);
        write_u64(&mut buf, 4, 0x0102_0304_0506_0708);
        write_u32(&mut buf, 12, 0xCAFE_F00D);
        assert_eq!(read_u16(&buf, 1), 0xBEEF);
        assert_eq!(read_u32(&buf, 12), 0xCAFE_F00D);
        assert_eq!(buf[12], 0x0D);
        assert_eq!(buf[1], 0xEF);
        assert_eq!(read_u64(&buf, 4), 0x0102_0304_0506_0708);
        assert_eq!(buf[4], 0x08);
    }

    #[test]
    fn test_init_new_page_writes_header() {
        let io = PageIo::new(PageType::BPlusLeaf, 2);
        let mut buf = vec![0xAAu8; 64];
        io.init_new_page(&mut buf);

        assert_eq!(PageIo::stored_type(&buf), PageType::BPlusLeaf as u16);
        assert_eq!(PageIo::stored_version(&buf), 2);
        // Bytes past the common header are left alone.
        assert_eq!(buf[PageIo::COMMON_HEADER_END], 0xAA);
        assert!(io.check(&buf).is_ok());
    }

    #[test]
    fn test_check_rejects_wrong_type() {
        let leaf = PageIo::new(PageType::BPlusLeaf, 1);
        let inner = PageIo::new(PageType::BPlusInner, 1);
        let mut buf = vec![0u8; 64];
        leaf.init_new_page(&mut buf);

        let err = inner.check(&buf).unwrap_err();
        assert!(matches!(
            err,
            KilnError::FormatMismatch {
                expected_type: 2,
                actual_type: 3,
                ..
            }
        ));
        assert!(err.is_layout_violation());
    }

    #[test]
    fn test_check_rejects_wrong_version() {
        let v1 = PageIo::new(PageType::BPlusLeaf, 1);
        let v2 = PageIo::new(PageType::BPlusLeaf, 2);
        let mut buf = vec![0u8; 64];
        v2.init_new_page(&mut buf);
        assert!(matches!(
            v1.check(&buf),
            Err(KilnError::FormatMismatch {
                expected_version: 1,
                actual_version: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_zeroed_buffer_never_validates() {
        let buf = vec![0u8; 64];
        assert!(PageIo::new(PageType::BPlusLeaf, 1).check(&buf).is_err());
    }

    #[test]
    #[should_panic(expected = "page format versions start at 1")]
    fn test_version_zero_panics() {
        let _ = PageIo::new(PageType::BPlusLeaf, 0);
    }

    #[test]
    fn test_io_versions_resolve_by_stored_version() {
        let versions = IoVersions::new(vec![
            TestIo(PageIo::new(PageType::BPlusLeaf, 1)),
            TestIo(PageIo::new(PageType::BPlusLeaf, 2)),
        ])
        .unwrap();

        assert_eq!(versions.page_type(), PageType::BPlusLeaf);
        assert_eq!(versions.latest().page_io().version(), 2);

        let mut buf = vec![0u8; 64];
        versions.for_version(1).unwrap().page_io().init_new_page(&mut buf);
        assert_eq!(versions.for_page(&buf).unwrap().page_io().version(), 1);

        assert!(versions.for_version(0).is_err());
        assert!(versions.for_version(3).is_err());
    }

    #[test]
    fn test_io_versions_rejects_foreign_page() {
        let versions = IoVersions::new(vec![TestIo(PageIo::new(PageType::BPlusLeaf, 1))]).unwrap();
        let mut buf = vec![0u8; 64];
        PageIo::new(PageType::BPlusInner, 1).init_new_page(&mut buf);
        assert!(matches!(
            versions.for_page(&buf),
            Err(KilnError::FormatMismatch { actual_type: 2, .. })
        ));
    }

    #[test]
    fn test_io_versions_validation() {
        let empty: Vec<TestIo> = Vec::new();
        assert!(IoVersions::new(empty).is_err());

        let gap = vec![
            TestIo(PageIo::new(PageType::BPlusLeaf, 1)),
            TestIo(PageIo::new(PageType::BPlusLeaf, 3)),
        ];
        assert!(IoVersions::new(gap).is_err());

        let mixed = vec![
            TestIo(PageIo::new(PageType::BPlusLeaf, 1)),
            TestIo(PageIo::new(PageType::BPlusInner, 2)),
        ];
        assert!(IoVersions::new(mixed).is_err());
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId::new(10, 500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
