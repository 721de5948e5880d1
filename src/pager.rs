//! C5: the pager. Translates page ids to file offsets, owns the DbHeader
//! and the freelist of recycled pages, and optionally caches pages.

use crate::error::{Result, StorageError};
use crate::file::FileManager;
use crate::page::{Page, PageType};
use log::{debug, trace};
use std::collections::HashMap;
use std::path::Path;

pub const DB_HEADER_SIZE: u64 = 12;

#[derive(Debug, Clone, Copy, Default)]
struct DbHeader {
    num_pages: u32,
    first_free_page: u32,
    num_free_pages: u32,
}

impl DbHeader {
    fn decode(buf: &[u8]) -> Self {
        DbHeader {
            num_pages: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            first_free_page: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            num_free_pages: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DB_HEADER_SIZE as usize);
        out.extend_from_slice(&self.num_pages.to_be_bytes());
        out.extend_from_slice(&self.first_free_page.to_be_bytes());
        out.extend_from_slice(&self.num_free_pages.to_be_bytes());
        out
    }
}

/// An LRU-free bounded cache: admits on miss, and on a full cache simply
/// skips admission rather than evicting, per the "admit-or-skip" policy —
/// a correctness cache for repeat reads within one call, not a working-set
/// cache meant to bound I/O under write-heavy workloads.
struct PageCache {
    capacity: usize,
    entries: HashMap<u32, Page>,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        PageCache {
            capacity,
            entries: HashMap::new(),
        }
    }

    fn get(&self, id: u32) -> Option<&Page> {
        self.entries.get(&id)
    }

    fn admit(&mut self, page: Page) {
        if self.entries.len() < self.capacity || self.entries.contains_key(&page.id) {
            self.entries.insert(page.id, page);
        }
    }

    fn invalidate(&mut self, id: u32) {
        self.entries.remove(&id);
    }
}

pub struct Pager {
    file: FileManager,
    page_size: usize,
    header: DbHeader,
    cache: Option<PageCache>,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        Self::open_with_cache(path, page_size, None)
    }

    pub fn open_with_cache<P: AsRef<Path>>(
        path: P,
        page_size: usize,
        cache_capacity: Option<usize>,
    ) -> Result<Self> {
        let mut file = FileManager::open(path)?;
        let header = if file.is_empty()? {
            let header = DbHeader::default();
            file.append(&header.encode())?;
            header
        } else {
            DbHeader::decode(&file.read_at(0, DB_HEADER_SIZE as usize)?)
        };
        Ok(Pager {
            file,
            page_size,
            header,
            cache: cache_capacity.map(PageCache::new),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn offset_of(&self, id: u32) -> u64 {
        DB_HEADER_SIZE + (id as u64 - 1) * self.page_size as u64
    }

    pub fn read_page(&mut self, id: u32) -> Result<Page> {
        if id == 0 {
            return Err(StorageError::InvalidPageId);
        }
        if let Some(cache) = &self.cache {
            if let Some(page) = cache.get(id) {
                trace!("pager: cache hit for page {id}");
                return Ok(page.clone());
            }
        }
        let off = self.offset_of(id);
        let bytes = self.file.read_at(off, self.page_size)?;
        let page = Page::deserialize(id, bytes)?;
        if let Some(cache) = &mut self.cache {
            cache.admit(page.clone());
        }
        Ok(page)
    }

    pub fn write_page(&mut self, page: &Page) -> Result<()> {
        if page.id == 0 {
            return Err(StorageError::InvalidPageId);
        }
        let off = self.offset_of(page.id);
        if page.id > self.header.num_pages {
            self.file.append(&page.serialize())?;
            self.header.num_pages = page.id;
            self.flush_header()?;
        } else {
            self.file.write_at(off, &page.serialize())?;
        }
        if let Some(cache) = &mut self.cache {
            cache.admit(page.clone());
        }
        Ok(())
    }

    /// Mints or recycles a page id and writes a freshly-initialized page of
    /// `page_type` for it. The caller is responsible for any further writes
    /// (e.g. populating cells) and for calling `write_page` again afterward.
    pub fn allocate_page(&mut self, page_type: PageType) -> Result<Page> {
        if self.header.num_free_pages == 0 {
            let new_id = self.header.num_pages + 1;
            let page = match page_type {
                PageType::Leaf => Page::new_leaf(new_id, self.page_size),
                PageType::Interior => Page::new_interior(new_id, self.page_size, 0),
            };
            self.write_page(&page)?;
            debug!("pager: minted new page {new_id}");
            Ok(page)
        } else {
            let freed_id = self.header.first_free_page;
            let freed = self.read_page(freed_id)?;
            let next_free = freed.last_ptr();
            self.header.first_free_page = next_free;
            self.header.num_free_pages -= 1;

            let page = match page_type {
                PageType::Leaf => Page::new_leaf(freed_id, self.page_size),
                PageType::Interior => Page::new_interior(freed_id, self.page_size, 0),
            };
            self.write_page(&page)?;
            self.flush_header()?;
            debug!("pager: recycled freed page {freed_id}");
            Ok(page)
        }
    }

    /// Returns `id` to the freelist. If `id` is the last page in the file,
    /// the file is truncated instead of leaving a hole.
    pub fn free_page(&mut self, id: u32) -> Result<()> {
        if id == self.header.num_pages {
            self.file.truncate(self.offset_of(id))?;
            self.header.num_pages -= 1;
            if let Some(cache) = &mut self.cache {
                cache.invalidate(id);
            }
        } else {
            let mut page = self.read_page(id)?;
            page.reset(PageType::Leaf);
            page.set_last_ptr(self.header.first_free_page);
            self.write_page(&page)?;
            self.header.first_free_page = id;
            self.header.num_free_pages += 1;
        }
        self.flush_header()?;
        debug!("pager: freed page {id}");
        Ok(())
    }

    pub fn num_pages(&self) -> u32 {
        self.header.num_pages
    }

    fn flush_header(&mut self) -> Result<()> {
        self.file.write_at(0, &self.header.encode())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush_header()?;
        self.file.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_read_back_leaf() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path(), 512).unwrap();
        let page = pager.allocate_page(PageType::Leaf).unwrap();
        assert_eq!(page.id, 1);
        let read_back = pager.read_page(1).unwrap();
        assert!(read_back.is_leaf());
    }

    #[test]
    fn free_then_allocate_recycles_lifo() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path(), 512).unwrap();
        let p1 = pager.allocate_page(PageType::Leaf).unwrap();
        let _p2 = pager.allocate_page(PageType::Leaf).unwrap();
        pager.free_page(p1.id).unwrap();
        let p3 = pager.allocate_page(PageType::Leaf).unwrap();
        assert_eq!(p3.id, p1.id);
    }

    #[test]
    fn freeing_last_page_truncates_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path(), 512).unwrap();
        let p1 = pager.allocate_page(PageType::Leaf).unwrap();
        let before = pager.num_pages();
        pager.free_page(p1.id).unwrap();
        assert_eq!(pager.num_pages(), before - 1);
    }

    #[test]
    fn read_page_zero_is_invalid() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path(), 512).unwrap();
        assert!(matches!(
            pager.read_page(0).unwrap_err(),
            StorageError::InvalidPageId
        ));
    }

    #[test]
    fn header_persists_across_reopen() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        {
            let mut pager = Pager::open(&path, 512).unwrap();
            pager.allocate_page(PageType::Leaf).unwrap();
            pager.allocate_page(PageType::Leaf).unwrap();
            pager.close().unwrap();
        }
        let pager = Pager::open(&path, 512).unwrap();
        assert_eq!(pager.num_pages(), 2);
    }
}
