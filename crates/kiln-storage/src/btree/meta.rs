//! Tree meta page.
//!
//! ```text
//! +--------------------+ 0
//! | page_type: u16     |
//! | version: u16       |
//! | reserved: u32      |
//! +--------------------+ 8
//! | root: u64          |
//! | height: u16        |
//! | key_size: u16      |
//! | value_size: u16    |
//! | items_offset: u16  |
//! +--------------------+ 24
//! | remove_seq: u64    |  last remove id handed out
//! | len: u64           |  number of live entries
//! | page_size: u32     |
//! +--------------------+ 44
//! ```

use kiln_common::config::IndexConfig;
use kiln_common::page::{
    read_u16, read_u32, read_u64, write_u16, write_u32, write_u64, IoVersions, PageId, PageIo,
    PageType, VersionedIo,
};
use kiln_common::{KilnError, Result};

const ROOT_OFF: usize = 8;
const HEIGHT_OFF: usize = 16;
const KEY_SIZE_OFF: usize = 18;
const VALUE_SIZE_OFF: usize = 20;
const ITEMS_OFFSET_OFF: usize = 22;
const REMOVE_SEQ_OFF: usize = 24;
const LEN_OFF: usize = 32;
const PAGE_SIZE_OFF: usize = 40;

/// Interpreter for the page that anchors a tree.
#[derive(Debug, Clone)]
pub struct BPlusMetaIo {
    page_io: PageIo,
}

impl BPlusMetaIo {
    pub const VERSION: u16 = 1;

    pub fn new(version: u16) -> Result<Self> {
        if version == 0 {
            return Err(KilnError::InvalidParameter {
                name: "version".to_string(),
                value: version.to_string(),
            });
        }
        Ok(Self {
            page_io: PageIo::new(PageType::BPlusMeta, version),
        })
    }

    pub fn versions() -> Result<IoVersions<Self>> {
        IoVersions::new(vec![Self::new(Self::VERSION)?])
    }

    /// Initializes a meta page for a tree with the given geometry and root.
    pub fn init_new_page(&self, buf: &mut [u8], config: &IndexConfig, root: PageId) {
        buf.fill(0);
        self.page_io.init_new_page(buf);
        self.set_root(buf, root);
        self.set_height(buf, 1);
        write_u16(buf, KEY_SIZE_OFF, config.key_size as u16);
        write_u16(buf, VALUE_SIZE_OFF, config.value_size as u16);
        write_u16(buf, ITEMS_OFFSET_OFF, config.items_offset as u16);
        write_u32(buf, PAGE_SIZE_OFF, config.page_size as u32);
    }

    pub fn check(&self, buf: &[u8]) -> Result<()> {
        self.page_io.check(buf)
    }

    /// Fails with `ConfigError` unless the stored geometry matches `config`.
    pub fn check_geometry(&self, buf: &[u8], config: &IndexConfig) -> Result<()> {
        let stored = [
            ("page_size", read_u32(buf, PAGE_SIZE_OFF) as usize, config.page_size),
            ("key_size", read_u16(buf, KEY_SIZE_OFF) as usize, config.key_size),
            ("value_size", read_u16(buf, VALUE_SIZE_OFF) as usize, config.value_size),
            (
                "items_offset",
                read_u16(buf, ITEMS_OFFSET_OFF) as usize,
                config.items_offset,
            ),
        ];
        for (name, on_page, configured) in stored {
            if on_page != configured {
                return Err(KilnError::ConfigError(format!(
                    "tree was created with {} {}, opened with {}",
                    name, on_page, configured
                )));
            }
        }
        Ok(())
    }

    pub fn root(&self, buf: &[u8]) -> PageId {
        PageId::from_u64(read_u64(buf, ROOT_OFF))
    }

    pub fn set_root(&self, buf: &mut [u8], root: PageId) {
        write_u64(buf, ROOT_OFF, root.as_u64());
    }

    /// Number of levels; a tree whose root is a leaf has height 1.
    pub fn height(&self, buf: &[u8]) -> u16 {
        read_u16(buf, HEIGHT_OFF)
    }

    pub fn set_height(&self, buf: &mut [u8], height: u16) {
        write_u16(buf, HEIGHT_OFF, height);
    }

    pub fn remove_seq(&self, buf: &[u8]) -> u64 {
        read_u64(buf, REMOVE_SEQ_OFF)
    }

    pub fn set_remove_seq(&self, buf: &mut [u8], remove_seq: u64) {
        write_u64(buf, REMOVE_SEQ_OFF, remove_seq);
    }

    pub fn len(&self, buf: &[u8]) -> u64 {
        read_u64(buf, LEN_OFF)
    }

    pub fn set_len(&self, buf: &mut [u8], len: u64) {
        write_u64(buf, LEN_OFF, len);
    }
}

impl VersionedIo for BPlusMetaIo {
    fn page_io(&self) -> PageIo {
        self.page_io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_fields() {
        let io = BPlusMetaIo::new(BPlusMetaIo::VERSION).unwrap();
        let config = IndexConfig::new(16, 24);
        let mut buf = vec![0xFFu8; config.page_size];
        io.init_new_page(&mut buf, &config, PageId::new(0, 2));

        assert!(io.check(&buf).is_ok());
        assert_eq!(io.root(&buf), PageId::new(0, 2));
        assert_eq!(io.height(&buf), 1);
        assert_eq!(io.remove_seq(&buf), 0);
        assert_eq!(io.len(&buf), 0);
        assert!(io.check_geometry(&buf, &config).is_ok());

        io.set_root(&mut buf, PageId::new(0, 9));
        io.set_height(&mut buf, 3);
        io.set_remove_seq(&mut buf, 77);
        io.set_len(&mut buf, 1000);
        assert_eq!(io.root(&buf), PageId::new(0, 9));
        assert_eq!(io.height(&buf), 3);
        assert_eq!(io.remove_seq(&buf), 77);
        assert_eq!(io.len(&buf), 1000);
    }

    #[test]
    fn test_geometry_mismatch() {
        let io = BPlusMetaIo::new(BPlusMetaIo::VERSION).unwrap();
        let config = IndexConfig::new(8, 8);
        let mut buf = vec![0u8; config.page_size];
        io.init_new_page(&mut buf, &config, PageId::new(0, 2));

        let other = IndexConfig::new(8, 16);
        assert!(matches!(
            io.check_geometry(&buf, &other),
            Err(KilnError::ConfigError(_))
        ));
    }

    #[test]
    fn test_leaf_page_is_not_meta() {
        let io = BPlusMetaIo::new(BPlusMetaIo::VERSION).unwrap();
        let mut buf = vec![0u8; 512];
        PageIo::new(PageType::BPlusLeaf, 1).init_new_page(&mut buf);
        assert!(matches!(
            io.check(&buf),
            Err(KilnError::FormatMismatch {
                expected_type: 1,
                actual_type: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_versions() {
        let versions = BPlusMetaIo::versions().unwrap();
        assert_eq!(versions.page_type(), PageType::BPlusMeta);
        assert_eq!(versions.latest().page_io().version(), BPlusMetaIo::VERSION);
    }
}
