//! C2 (page codec) and C3 (slotted page manager).
//!
//! Rather than keep a separate decoded representation that is serialized on
//! demand, a `Page` owns its literal `P`-byte on-disk buffer and every
//! operation below mutates that buffer directly. The slot array is the only
//! index into the cell region — no parallel hash map from offset to cell,
//! per the re-architecture note in the source notes.

use crate::cell::Cell;
use crate::error::{Result, StorageError};
use log::trace;

const HEADER_SIZE: usize = 12;
const SLOT_SIZE: usize = 2;
pub const MIN_FREE_BLOCK_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Interior,
    Leaf,
}

impl PageType {
    fn to_u8(self) -> u8 {
        match self {
            PageType::Interior => 0,
            PageType::Leaf => 1,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PageType::Interior),
            1 => Some(PageType::Leaf),
            _ => None,
        }
    }
}

/// Sentinel returned by the allocator when a page cannot accommodate a new
/// cell and the caller must split instead. Never surfaced past the B+-tree.
#[derive(Debug)]
pub struct NeedsSplit;

#[derive(Debug, Clone)]
pub struct Page {
    pub id: u32,
    page_size: usize,
    buf: Vec<u8>,
}

impl Page {
    pub fn new_leaf(id: u32, page_size: usize) -> Self {
        assert!(page_size <= u16::MAX as usize, "page size must fit a u16 offset");
        let mut p = Page {
            id,
            page_size,
            buf: vec![0u8; page_size],
        };
        p.set_page_type(PageType::Leaf);
        p.set_cell_arr_off(page_size as u16);
        p
    }

    pub fn new_interior(id: u32, page_size: usize, last_ptr: u32) -> Self {
        let mut p = Page::new_leaf(id, page_size);
        p.set_page_type(PageType::Interior);
        p.set_last_ptr(last_ptr);
        p
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.buf[0]).expect("page type validated at deserialize")
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.page_type(), PageType::Leaf)
    }

    fn set_page_type(&mut self, t: PageType) {
        self.buf[0] = t.to_u8();
    }

    pub fn free_list_head(&self) -> u16 {
        read_u16(&self.buf, 1)
    }

    fn set_free_list_head(&mut self, v: u16) {
        write_u16(&mut self.buf, 1, v);
    }

    pub fn num_cells(&self) -> u16 {
        read_u16(&self.buf, 3)
    }

    fn set_num_cells(&mut self, v: u16) {
        write_u16(&mut self.buf, 3, v);
    }

    pub fn cell_arr_off(&self) -> u16 {
        read_u16(&self.buf, 5)
    }

    fn set_cell_arr_off(&mut self, v: u16) {
        write_u16(&mut self.buf, 5, v);
    }

    pub fn num_frag_bytes(&self) -> u8 {
        self.buf[7]
    }

    fn set_num_frag_bytes(&mut self, v: u8) {
        self.buf[7] = v;
    }

    pub fn last_ptr(&self) -> u32 {
        read_u32(&self.buf, 8)
    }

    pub fn set_last_ptr(&mut self, v: u32) {
        write_u32(&mut self.buf, 8, v);
    }

    fn slot_pos(i: u16) -> usize {
        HEADER_SIZE + i as usize * SLOT_SIZE
    }

    pub fn slot(&self, i: u16) -> u16 {
        read_u16(&self.buf, Self::slot_pos(i))
    }

    pub fn key_at_slot(&self, i: u16) -> &[u8] {
        let off = self.slot(i) as usize;
        let key_len = read_u16(&self.buf, off) as usize;
        &self.buf[off + 2..off + 2 + key_len]
    }

    pub fn value_at_slot(&self, i: u16) -> &[u8] {
        let off = self.slot(i) as usize;
        let key_len = read_u16(&self.buf, off) as usize;
        let val_off = off + 2 + key_len;
        let val_len = read_u16(&self.buf, val_off) as usize;
        &self.buf[val_off + 2..val_off + 2 + val_len]
    }

    pub fn child_at_slot(&self, i: u16) -> u32 {
        let off = self.slot(i) as usize;
        let key_len = read_u16(&self.buf, off) as usize;
        read_u32(&self.buf, off + 2 + key_len)
    }

    /// Overwrites the child pointer of an interior cell in place, without
    /// touching its key or moving any other cell.
    pub fn set_child_at_slot(&mut self, i: u16, child: u32) {
        let off = self.slot(i) as usize;
        let key_len = read_u16(&self.buf, off) as usize;
        write_u32(&mut self.buf, off + 2 + key_len, child);
    }

    /// Produces a page with the same content but a different id, used when
    /// promoting the current root's content into a freshly allocated page
    /// during a root split.
    pub fn clone_with_id(&self, new_id: u32) -> Page {
        Page {
            id: new_id,
            page_size: self.page_size,
            buf: self.buf.clone(),
        }
    }

    pub fn cell_at_slot(&self, i: u16) -> Cell {
        let off = self.slot(i) as usize;
        Cell::decode(&self.buf[off..], self.is_leaf())
    }

    fn cell_size_at(&self, off: u16) -> u16 {
        let o = off as usize;
        let key_len = read_u16(&self.buf, o);
        if self.is_leaf() {
            let val_off = o + 2 + key_len as usize;
            let val_len = read_u16(&self.buf, val_off);
            2 + key_len + 2 + val_len
        } else {
            2 + key_len + 4
        }
    }

    /// Binary search over the slot array for `key`. Returns `Ok(i)` when
    /// `slot[i].key == key`, `Err(i)` for the insertion point otherwise
    /// (the smallest index whose key is >= `key`, or `num_cells` if none).
    pub fn find_slot(&self, key: &[u8]) -> std::result::Result<u16, u16> {
        let mut lo = 0i32;
        let mut hi = self.num_cells() as i32 - 1;
        let mut ins = self.num_cells();
        while lo <= hi {
            let mid = (lo + hi) / 2;
            match crate::comparator::compare_keys(self.key_at_slot(mid as u16), key) {
                std::cmp::Ordering::Equal => return Ok(mid as u16),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => {
                    ins = mid as u16;
                    hi = mid - 1;
                }
            }
        }
        Err(ins)
    }

    /// Upper-bound search: smallest slot index whose key is strictly
    /// greater than `key`, or `num_cells` if none. Used by interior
    /// insertion, which rejects exact key matches as `DuplicateKey`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<u16> {
        let mut lo = 0i32;
        let mut hi = self.num_cells() as i32 - 1;
        let mut ind = self.num_cells();
        while lo <= hi {
            let mid = (lo + hi) / 2;
            match crate::comparator::compare_keys(self.key_at_slot(mid as u16), key) {
                std::cmp::Ordering::Equal => return Err(StorageError::DuplicateKey),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => {
                    ind = mid as u16;
                    hi = mid - 1;
                }
            }
        }
        Ok(ind)
    }

    /// Descend-right search used by `getPath`: the smallest slot index whose
    /// key is >= `key`, equality included (descends to i+1 when equal, per
    /// the "separator keys reappear in leaves" convention).
    pub fn descend_index(&self, key: &[u8]) -> u16 {
        let mut lo = 0i32;
        let mut hi = self.num_cells() as i32 - 1;
        let mut ind = self.num_cells();
        while lo <= hi {
            let mid = (lo + hi) / 2;
            match crate::comparator::compare_keys(self.key_at_slot(mid as u16), key) {
                std::cmp::Ordering::Equal => return mid as u16 + 1,
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => {
                    ind = mid as u16;
                    hi = mid - 1;
                }
            }
        }
        ind
    }

    /// Places `cell` at `offset`, already allocated by `allocate_cell_bytes`,
    /// and splices `offset` into the slot array at `slot_index`.
    pub fn insert_cell(&mut self, cell: &Cell, slot_index: u16, offset: u16) {
        let bytes = cell.encode();
        let off = offset as usize;
        self.buf[off..off + bytes.len()].copy_from_slice(&bytes);

        let num_cells = self.num_cells();
        let src_start = Self::slot_pos(slot_index);
        let src_end = Self::slot_pos(num_cells);
        if src_start < src_end {
            self.buf.copy_within(src_start..src_end, src_start + SLOT_SIZE);
        }
        write_u16(&mut self.buf, src_start, offset);
        self.set_num_cells(num_cells + 1);

        if offset < self.cell_arr_off() {
            self.set_cell_arr_off(offset);
        }
    }

    pub fn remove_cell(&mut self, slot_index: u16) {
        let off = self.slot(slot_index);
        let size = self.cell_size_at(off);
        let num_cells = self.num_cells();

        let dst = Self::slot_pos(slot_index);
        let src_start = Self::slot_pos(slot_index + 1);
        let src_end = Self::slot_pos(num_cells);
        if src_start < src_end {
            self.buf.copy_within(src_start..src_end, dst);
        }
        self.set_num_cells(num_cells - 1);

        if off == self.cell_arr_off() {
            self.set_cell_arr_off(off + size);
        } else {
            self.insert_free_block(off, size);
        }
    }

    /// The core allocator. Returns the offset at which a cell of `size`
    /// bytes may be written, or `NeedsSplit` if the page cannot make room
    /// even after compaction.
    pub fn allocate_cell_bytes(
        &mut self,
        size: usize,
        max_cells: Option<u16>,
    ) -> std::result::Result<u16, NeedsSplit> {
        if let Some(cap) = max_cells {
            if self.num_cells() >= cap {
                return Err(NeedsSplit);
            }
        }

        let num_cells = self.num_cells() as usize;
        let mut u_gap =
            self.cell_arr_off() as usize - (HEADER_SIZE + SLOT_SIZE * num_cells);
        let frag = self.num_frag_bytes() as usize;
        let free_sum: usize = self.free_blocks().iter().map(|&(_, s)| s as usize).sum();
        let total = u_gap + frag + free_sum;
        if total < size + SLOT_SIZE {
            return Err(NeedsSplit);
        }

        if u_gap < SLOT_SIZE {
            self.compact();
            u_gap = self.cell_arr_off() as usize - (HEADER_SIZE + SLOT_SIZE * num_cells);
        }

        let mut prev: Option<u16> = None;
        let mut cur = self.free_list_head();
        while cur != 0 {
            let blk_size = read_u16(&self.buf, cur as usize) as usize;
            if blk_size >= size {
                let rem = blk_size - size;
                if rem >= MIN_FREE_BLOCK_SIZE {
                    write_u16(&mut self.buf, cur as usize, rem as u16);
                    trace!("allocator: shrunk free block at {cur} by {size} bytes");
                    return Ok(cur + rem as u16);
                }
                let next = read_u16(&self.buf, cur as usize + 2);
                match prev {
                    Some(p) => write_u16(&mut self.buf, p as usize + 2, next),
                    None => self.set_free_list_head(next),
                }
                let new_frag = self.num_frag_bytes() as usize + rem;
                if new_frag > u8::MAX as usize {
                    self.compact();
                    let off = self.cell_arr_off() as usize - size;
                    return Ok(off as u16);
                }
                self.set_num_frag_bytes(new_frag as u8);
                trace!("allocator: consumed free block at {cur} as fragment ({rem} bytes)");
                return Ok(cur);
            }
            prev = Some(cur);
            cur = read_u16(&self.buf, cur as usize + 2);
        }

        if u_gap < size + SLOT_SIZE {
            self.compact();
        }
        let off = self.cell_arr_off() as usize - size;
        Ok(off as u16)
    }

    fn insert_free_block(&mut self, offset: u16, size: u16) {
        debug_assert!(size as usize >= MIN_FREE_BLOCK_SIZE);

        let mut prev: Option<u16> = None;
        let mut cur = self.free_list_head();
        while cur != 0 && cur < offset {
            prev = Some(cur);
            cur = read_u16(&self.buf, cur as usize + 2);
        }

        write_u16(&mut self.buf, offset as usize, size);
        write_u16(&mut self.buf, offset as usize + 2, cur);
        match prev {
            Some(p) => write_u16(&mut self.buf, p as usize + 2, offset),
            None => self.set_free_list_head(offset),
        }

        self.coalesce_free_list();
    }

    fn coalesce_free_list(&mut self) {
        let mut cur = self.free_list_head();
        while cur != 0 {
            let size = read_u16(&self.buf, cur as usize);
            let next = read_u16(&self.buf, cur as usize + 2);
            if next != 0 && cur + size == next {
                let next_next = read_u16(&self.buf, next as usize + 2);
                let next_size = read_u16(&self.buf, next as usize);
                write_u16(&mut self.buf, cur as usize, size + next_size);
                write_u16(&mut self.buf, cur as usize + 2, next_next);
            } else {
                cur = next;
            }
        }
    }

    pub fn free_blocks(&self) -> Vec<(u16, u16)> {
        let mut out = Vec::new();
        let mut cur = self.free_list_head();
        while cur != 0 {
            let size = read_u16(&self.buf, cur as usize);
            out.push((cur, size));
            cur = read_u16(&self.buf, cur as usize + 2);
        }
        out
    }

    /// Rewrites the page so every live cell sits contiguously at the high
    /// end with no free blocks and no fragmentation.
    pub fn compact(&mut self) {
        let num_cells = self.num_cells();
        let mut cells = Vec::with_capacity(num_cells as usize);
        for i in 0..num_cells {
            let off = self.slot(i);
            let size = self.cell_size_at(off) as usize;
            cells.push(self.buf[off as usize..off as usize + size].to_vec());
        }

        let slot_end = HEADER_SIZE + SLOT_SIZE * num_cells as usize;
        for b in &mut self.buf[slot_end..] {
            *b = 0;
        }
        self.set_free_list_head(0);
        self.set_num_frag_bytes(0);

        let mut write_off = self.page_size as u16;
        for (i, bytes) in cells.iter().enumerate() {
            write_off -= bytes.len() as u16;
            let start = write_off as usize;
            self.buf[start..start + bytes.len()].copy_from_slice(bytes);
            write_u16(&mut self.buf, Self::slot_pos(i as u16), write_off);
        }
        self.set_cell_arr_off(write_off);
        trace!("compacted page into {} live cells", num_cells);
    }

    /// Re-initializes this page in place to an empty page of `page_type`,
    /// preserving its id. Used by `TruncateTree` and pager recycling.
    pub fn reset(&mut self, page_type: PageType) {
        for b in self.buf.iter_mut() {
            *b = 0;
        }
        self.set_page_type(page_type);
        self.set_cell_arr_off(self.page_size as u16);
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn deserialize(id: u32, bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(StorageError::CorruptPage {
                page_id: id,
                reason: "empty page buffer".into(),
            });
        }
        let page_size = bytes.len();
        if PageType::from_u8(bytes[0]).is_none() {
            return Err(StorageError::CorruptPage {
                page_id: id,
                reason: format!("invalid page type byte {}", bytes[0]),
            });
        }
        let cell_arr_off = read_u16(&bytes, 5);
        if cell_arr_off as usize > page_size {
            return Err(StorageError::CorruptPage {
                page_id: id,
                reason: format!("cell_arr_off {cell_arr_off} exceeds page size {page_size}"),
            });
        }
        let is_leaf = PageType::from_u8(bytes[0]) == Some(PageType::Leaf);
        let num_cells = read_u16(&bytes, 3);
        let slot_array_end = HEADER_SIZE + num_cells as usize * SLOT_SIZE;
        if slot_array_end > cell_arr_off as usize {
            return Err(StorageError::CorruptPage {
                page_id: id,
                reason: format!("slot array for {num_cells} cells overruns cell_arr_off {cell_arr_off}"),
            });
        }

        let mut prev_key: Option<&[u8]> = None;
        for i in 0..num_cells {
            let off = read_u16(&bytes, Self::slot_pos(i)) as usize;
            if off < cell_arr_off as usize || off >= page_size {
                return Err(StorageError::CorruptPage {
                    page_id: id,
                    reason: format!("slot {i} offset {off} out of bounds for page size {page_size}"),
                });
            }
            if off + 2 > page_size {
                return Err(StorageError::CorruptPage {
                    page_id: id,
                    reason: format!("slot {i} offset {off} leaves no room for a key length"),
                });
            }
            let key_len = read_u16(&bytes, off) as usize;
            let key_end = off + 2 + key_len;
            let cell_end = if is_leaf {
                if key_end + 2 > page_size {
                    return Err(StorageError::CorruptPage {
                        page_id: id,
                        reason: format!("slot {i} key overruns page size {page_size}"),
                    });
                }
                let val_len = read_u16(&bytes, key_end) as usize;
                key_end + 2 + val_len
            } else {
                key_end + 4
            };
            if cell_end > page_size {
                return Err(StorageError::CorruptPage {
                    page_id: id,
                    reason: format!("slot {i} cell of length {} overruns page size {page_size}", cell_end - off),
                });
            }
            let key = &bytes[off + 2..key_end];
            if let Some(prev) = prev_key {
                // `compare_keys` assumes well-formed field tags and panics
                // otherwise; a corrupt key is exactly what this check is
                // guarding against, so treat a panic as a failed check.
                let ascending = std::panic::catch_unwind(|| {
                    crate::comparator::compare_keys(prev, key) == std::cmp::Ordering::Less
                })
                .unwrap_or(false);
                if !ascending {
                    return Err(StorageError::CorruptPage {
                        page_id: id,
                        reason: format!("slot array not strictly ascending at slot {i}"),
                    });
                }
            }
            prev_key = Some(key);
        }

        Ok(Page { id, page_size, buf: bytes })
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes(buf[off..off + 2].try_into().unwrap())
}

fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_be_bytes());
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes(buf[off..off + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

/// The fixed 12-byte page header size, exposed for callers computing the
/// maximum cell size without duplicating the constant.
pub const PAGE_HEADER_SIZE: usize = HEADER_SIZE;
pub const SLOT_OFF_SIZE: usize = SLOT_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    fn leaf_cell(k: u8, v: u8) -> Cell {
        Cell::Leaf {
            key: vec![k],
            value: vec![v, v],
        }
    }

    #[test]
    fn insert_and_read_back_single_cell() {
        let mut p = Page::new_leaf(1, 512);
        let cell = leaf_cell(5, 9);
        let off = p.allocate_cell_bytes(cell.encoded_len(), None).unwrap();
        p.insert_cell(&cell, 0, off);
        assert_eq!(p.num_cells(), 1);
        assert_eq!(p.key_at_slot(0), &[5]);
        assert_eq!(p.value_at_slot(0), &[9, 9]);
    }

    #[test]
    fn remove_cell_at_water_mark_advances_cell_arr_off() {
        let mut p = Page::new_leaf(1, 512);
        let cell = leaf_cell(1, 1);
        let off = p.allocate_cell_bytes(cell.encoded_len(), None).unwrap();
        p.insert_cell(&cell, 0, off);
        let before = p.cell_arr_off();
        p.remove_cell(0);
        assert_eq!(p.num_cells(), 0);
        assert!(p.cell_arr_off() > before);
        assert_eq!(p.free_blocks().len(), 0);
    }

    #[test]
    fn remove_cell_not_at_water_mark_creates_free_block() {
        let mut p = Page::new_leaf(1, 512);
        let a = leaf_cell(1, 1);
        let b = leaf_cell(2, 2);
        let off_a = p.allocate_cell_bytes(a.encoded_len(), None).unwrap();
        p.insert_cell(&a, 0, off_a);
        let off_b = p.allocate_cell_bytes(b.encoded_len(), None).unwrap();
        p.insert_cell(&b, 1, off_b);

        // remove the earlier-allocated (higher-offset, since cells grow
        // downward) cell, which now sits below the water mark.
        p.remove_cell(0);
        assert_eq!(p.free_blocks().len(), 1);
    }

    #[test]
    fn compact_preserves_cells_and_clears_free_list() {
        let mut p = Page::new_leaf(1, 512);
        for k in 0..5u8 {
            let c = leaf_cell(k, k);
            let idx = p.find_slot(&[k]).unwrap_err();
            let off = p.allocate_cell_bytes(c.encoded_len(), None).unwrap();
            p.insert_cell(&c, idx, off);
        }
        p.remove_cell(2);
        assert!(!p.free_blocks().is_empty());
        p.compact();
        assert!(p.free_blocks().is_empty());
        assert_eq!(p.num_frag_bytes(), 0);
        assert_eq!(p.num_cells(), 4);
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let mut p = Page::new_leaf(7, 512);
        let c = leaf_cell(3, 4);
        let off = p.allocate_cell_bytes(c.encoded_len(), None).unwrap();
        p.insert_cell(&c, 0, off);
        let bytes = p.serialize();
        let p2 = Page::deserialize(7, bytes).unwrap();
        assert_eq!(p2.num_cells(), 1);
        assert_eq!(p2.key_at_slot(0), &[3]);
        assert_eq!(p2.cell_arr_off(), p.cell_arr_off());
    }

    #[test]
    fn deserialize_rejects_invalid_page_type() {
        let mut bytes = vec![0u8; 512];
        bytes[0] = 0xFF;
        let err = Page::deserialize(1, bytes).unwrap_err();
        assert!(matches!(err, StorageError::CorruptPage { .. }));
    }
}
