//! C6: the B+-tree. Every operation takes a root page id identifying one
//! table's tree and a pager handle; the tree itself holds no state between
//! calls.

use crate::cell::Cell;
use crate::error::{Result, StorageError};
use crate::page::{Page, PageType, PAGE_HEADER_SIZE, SLOT_OFF_SIZE};
use crate::pager::Pager;
use log::{debug, trace};
use std::collections::VecDeque;

const MIN_CELLS_PER_PAGE: usize = 2;

/// The largest single cell (key + value + framing) any page can ever be
/// asked to hold, chosen so a split always produces two pages that can
/// each still fit the cell that triggered it.
pub fn max_cell_size(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE - MIN_CELLS_PER_PAGE * SLOT_OFF_SIZE) / MIN_CELLS_PER_PAGE
}

/// Allocates a single leaf page and returns its id as a new table root.
pub fn create(pager: &mut Pager) -> Result<u32> {
    let page = pager.allocate_page(PageType::Leaf)?;
    Ok(page.id)
}

fn get_path(pager: &mut Pager, root_id: u32, key: &[u8]) -> Result<Vec<u32>> {
    let mut path = vec![root_id];
    let mut cur = pager.read_page(root_id)?;
    while !cur.is_leaf() {
        let idx = cur.descend_index(key);
        let child = if idx == cur.num_cells() {
            cur.last_ptr()
        } else {
            cur.child_at_slot(idx)
        };
        path.push(child);
        cur = pager.read_page(child)?;
    }
    Ok(path)
}

pub fn get(pager: &mut Pager, root_id: u32, key: &[u8]) -> Result<Vec<u8>> {
    let path = get_path(pager, root_id, key)?;
    let leaf = pager.read_page(*path.last().unwrap())?;
    match leaf.find_slot(key) {
        Ok(i) => Ok(leaf.value_at_slot(i).to_vec()),
        Err(_) => Err(StorageError::NotFound),
    }
}

/// A forward cursor over a tree's leaves in ascending key order, following
/// the `lastPtr` sibling chain. Borrows the pager for its lifetime; it is
/// undefined behavior to mutate the same tree while an iterator is live.
pub struct BTreeIterator<'a> {
    pager: &'a mut Pager,
    leaf: Page,
    slot: u16,
    last_key: Option<Vec<u8>>,
}

impl<'a> BTreeIterator<'a> {
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        while self.slot >= self.leaf.num_cells() {
            let next_leaf = self.leaf.last_ptr();
            if next_leaf == 0 {
                return Ok(None);
            }
            self.leaf = self.pager.read_page(next_leaf)?;
            self.slot = 0;
        }
        let value = self.leaf.value_at_slot(self.slot).to_vec();
        self.last_key = Some(self.leaf.key_at_slot(self.slot).to_vec());
        self.slot += 1;
        Ok(Some(value))
    }

    /// The key of the cell last returned by `next()`, or `None` before the
    /// first call.
    pub fn key(&self) -> Option<&[u8]> {
        self.last_key.as_deref()
    }
}

pub fn first(pager: &mut Pager, root_id: u32) -> Result<BTreeIterator<'_>> {
    let mut cur = pager.read_page(root_id)?;
    while !cur.is_leaf() {
        let child = if cur.num_cells() == 0 {
            cur.last_ptr()
        } else {
            cur.child_at_slot(0)
        };
        cur = pager.read_page(child)?;
    }
    Ok(BTreeIterator {
        pager,
        leaf: cur,
        slot: 0,
        last_key: None,
    })
}

/// Distributes `cells` between an old and a new page by accumulated byte
/// size rather than by count: the first cell whose admission would cross
/// `page_size - pageHeaderSize` becomes the new page's first cell.
/// When `max_cells` (the test-only fanout cap) is set, a page also closes
/// as soon as it reaches that many cells, whichever limit hits first.
/// Clamped so neither page is ever left empty.
fn space_aware_midpoint(cells: &[Cell], page_size: usize, max_cells: Option<u16>) -> usize {
    let fill_bound = page_size - PAGE_HEADER_SIZE;
    let mut used = 0usize;
    let mut mid = cells.len();
    for (i, c) in cells.iter().enumerate() {
        if let Some(cap) = max_cells {
            if i as u16 >= cap {
                mid = i;
                break;
            }
        }
        let cost = c.encoded_len() + SLOT_OFF_SIZE;
        if used + cost > fill_bound {
            mid = i;
            break;
        }
        used += cost;
    }
    if mid == cells.len() {
        mid = cells.len() - 1;
    }
    if mid == 0 {
        mid = 1;
    }
    mid
}

pub fn insert(pager: &mut Pager, root_id: u32, key: &[u8], value: &[u8]) -> Result<()> {
    insert_with_cap(pager, root_id, key, value, None)
}

/// Like `insert`, but accepts a soft per-page cell-count cap used only to
/// force small fanout in tests; production callers should go through
/// `insert` and leave this at `None`.
pub fn insert_with_cap(
    pager: &mut Pager,
    root_id: u32,
    key: &[u8],
    value: &[u8],
    max_cells: Option<u16>,
) -> Result<()> {
    let candidate_size = Cell::leaf_size(key, value);
    let max = max_cell_size(pager.page_size());
    if candidate_size > max {
        return Err(StorageError::CellTooLarge {
            size: candidate_size,
            max,
        });
    }

    let path = get_path(pager, root_id, key)?;
    let leaf_id = *path.last().unwrap();
    let mut leaf = pager.read_page(leaf_id)?;
    let i = match leaf.find_slot(key) {
        Ok(_) => return Err(StorageError::DuplicateKey),
        Err(i) => i,
    };

    let cell = Cell::Leaf {
        key: key.to_vec(),
        value: value.to_vec(),
    };
    match leaf.allocate_cell_bytes(cell.encoded_len(), max_cells) {
        Ok(off) => {
            leaf.insert_cell(&cell, i, off);
            pager.write_page(&leaf)?;
            Ok(())
        }
        Err(_needs_split) => split_leaf(pager, &path[..path.len() - 1], leaf, cell, i, max_cells),
    }
}

fn split_leaf(
    pager: &mut Pager,
    ancestors: &[u32],
    mut leaf: Page,
    new_cell: Cell,
    insert_at: u16,
    max_cells: Option<u16>,
) -> Result<()> {
    let mut cells: Vec<Cell> = (0..leaf.num_cells()).map(|i| leaf.cell_at_slot(i)).collect();
    cells.insert(insert_at as usize, new_cell);

    let mid = space_aware_midpoint(&cells, leaf.page_size(), max_cells);

    let old_lastptr = leaf.last_ptr();
    let mut new_leaf = pager.allocate_page(PageType::Leaf)?;
    new_leaf.set_last_ptr(old_lastptr);

    leaf.reset(PageType::Leaf);
    leaf.set_last_ptr(new_leaf.id);

    for (i, c) in cells[..mid].iter().enumerate() {
        let off = leaf
            .allocate_cell_bytes(c.encoded_len(), max_cells)
            .ok()
            .expect("space-aware midpoint guarantees the left half fits");
        leaf.insert_cell(c, i as u16, off);
    }
    for (i, c) in cells[mid..].iter().enumerate() {
        let off = new_leaf
            .allocate_cell_bytes(c.encoded_len(), max_cells)
            .ok()
            .expect("space-aware midpoint guarantees the right half fits");
        new_leaf.insert_cell(c, i as u16, off);
    }

    debug!(
        "split leaf {} into {} ({} cells) and {} ({} cells)",
        leaf.id,
        leaf.id,
        mid,
        new_leaf.id,
        cells.len() - mid
    );

    pager.write_page(&leaf)?;
    pager.write_page(&new_leaf)?;

    let separator = cells[mid].key().to_vec();
    interior_insert(pager, ancestors, leaf.id, &separator, new_leaf.id, max_cells)
}

/// Retargets the pointer in `left_child`'s parent to `new_right_child` and
/// inserts a cell `(separator, left_child)` in its place, splitting the
/// parent (and recursing toward the root) if it doesn't fit. If `ancestors`
/// is empty, `left_child` IS the current root and a new root is created.
fn interior_insert(
    pager: &mut Pager,
    ancestors: &[u32],
    left_child: u32,
    separator: &[u8],
    new_right_child: u32,
    max_cells: Option<u16>,
) -> Result<()> {
    if ancestors.is_empty() {
        let mut root = pager.read_page(left_child)?;
        let promoted_id = pager.allocate_page(root.page_type())?.id;
        let promoted = root.clone_with_id(promoted_id);
        pager.write_page(&promoted)?;

        root.reset(PageType::Interior);
        root.set_last_ptr(new_right_child);
        let cell = Cell::Interior {
            key: separator.to_vec(),
            child: promoted.id,
        };
        let off = root
            .allocate_cell_bytes(cell.encoded_len(), None)
            .ok()
            .expect("a single cell always fits a freshly reset root page");
        root.insert_cell(&cell, 0, off);
        pager.write_page(&root)?;
        debug!("grew tree height: root {} now an interior page", root.id);
        return Ok(());
    }

    let parent_id = *ancestors.last().unwrap();
    let mut parent = pager.read_page(parent_id)?;
    let i = parent.upper_bound(separator)?;
    if i == parent.num_cells() {
        parent.set_last_ptr(new_right_child);
    } else {
        parent.set_child_at_slot(i, new_right_child);
    }

    let cell = Cell::Interior {
        key: separator.to_vec(),
        child: left_child,
    };
    match parent.allocate_cell_bytes(cell.encoded_len(), max_cells) {
        Ok(off) => {
            parent.insert_cell(&cell, i, off);
            pager.write_page(&parent)?;
            Ok(())
        }
        Err(_needs_split) => split_interior(
            pager,
            &ancestors[..ancestors.len() - 1],
            parent,
            cell,
            i,
            max_cells,
        ),
    }
}

fn split_interior(
    pager: &mut Pager,
    ancestors: &[u32],
    mut parent: Page,
    new_cell: Cell,
    insert_at: u16,
    max_cells: Option<u16>,
) -> Result<()> {
    // The trailing pointer of the combined cell sequence: already retargeted
    // by the caller, so it equals `new_right_child` exactly when the
    // insertion point was the tail, and the untouched original lastPtr
    // otherwise — in both cases this is the correct pointer for whichever
    // half ends up owning "everything past the last cell".
    let trailing = parent.last_ptr();

    let mut cells: Vec<Cell> = (0..parent.num_cells())
        .map(|i| parent.cell_at_slot(i))
        .collect();
    cells.insert(insert_at as usize, new_cell);

    let mid = space_aware_midpoint(&cells, parent.page_size(), max_cells);
    let promoted = cells[mid].clone();
    let (promoted_key, promoted_child) = match promoted {
        Cell::Interior { key, child } => (key, child),
        Cell::Leaf { .. } => unreachable!("interior split only ever handles interior cells"),
    };

    let left_cells = &cells[..mid];
    let right_cells = &cells[mid + 1..];

    let mut new_parent = pager.allocate_page(PageType::Interior)?;

    parent.reset(PageType::Interior);
    parent.set_last_ptr(promoted_child);
    for (i, c) in left_cells.iter().enumerate() {
        let off = parent
            .allocate_cell_bytes(c.encoded_len(), max_cells)
            .ok()
            .expect("space-aware midpoint guarantees the left half fits");
        parent.insert_cell(c, i as u16, off);
    }

    new_parent.set_last_ptr(trailing);
    for (i, c) in right_cells.iter().enumerate() {
        let off = new_parent
            .allocate_cell_bytes(c.encoded_len(), max_cells)
            .ok()
            .expect("space-aware midpoint guarantees the right half fits");
        new_parent.insert_cell(c, i as u16, off);
    }

    debug!(
        "split interior {} into {} ({} cells) and {} ({} cells), promoting 1 cell",
        parent.id,
        parent.id,
        left_cells.len(),
        new_parent.id,
        right_cells.len()
    );

    pager.write_page(&parent)?;
    pager.write_page(&new_parent)?;

    interior_insert(
        pager,
        ancestors,
        parent.id,
        &promoted_key,
        new_parent.id,
        max_cells,
    )
}

pub fn delete(pager: &mut Pager, root_id: u32, key: &[u8]) -> Result<()> {
    let path = get_path(pager, root_id, key)?;
    let leaf_id = *path.last().unwrap();
    let mut leaf = pager.read_page(leaf_id)?;
    match leaf.find_slot(key) {
        Ok(i) => {
            leaf.remove_cell(i);
            pager.write_page(&leaf)?;
            Ok(())
        }
        Err(_) => Err(StorageError::NotFound),
    }
}

fn bfs_children(pager: &mut Pager, root_id: u32) -> Result<(Vec<u32>, u64, Vec<(Vec<u8>, Vec<u8>)>)> {
    let mut queue = VecDeque::new();
    queue.push_back(root_id);
    let mut visited = Vec::new();
    let mut row_count = 0u64;
    let mut cells = Vec::new();
    while let Some(id) = queue.pop_front() {
        let page = pager.read_page(id)?;
        if page.is_leaf() {
            row_count += page.num_cells() as u64;
            for i in 0..page.num_cells() {
                cells.push((page.key_at_slot(i).to_vec(), page.value_at_slot(i).to_vec()));
            }
        } else {
            for i in 0..page.num_cells() {
                queue.push_back(page.child_at_slot(i));
            }
            if page.last_ptr() != 0 {
                queue.push_back(page.last_ptr());
            }
        }
        visited.push(id);
    }
    Ok((visited, row_count, cells))
}

pub fn delete_tree(pager: &mut Pager, root_id: u32) -> Result<u64> {
    let (visited, row_count, _cells) = bfs_children(pager, root_id)?;
    for id in visited {
        pager.free_page(id)?;
    }
    trace!("deleted tree rooted at {root_id}, {row_count} rows");
    Ok(row_count)
}

pub fn truncate_tree(pager: &mut Pager, root_id: u32) -> Result<u64> {
    let (visited, row_count, _cells) = bfs_children(pager, root_id)?;
    for id in visited {
        if id != root_id {
            pager.free_page(id)?;
        }
    }
    let mut root = pager.read_page(root_id)?;
    root.reset(PageType::Leaf);
    pager.write_page(&root)?;
    trace!("truncated tree rooted at {root_id}, {row_count} rows");
    Ok(row_count)
}

pub fn rebuild_tree(pager: &mut Pager, root_id: u32) -> Result<()> {
    let (visited, _row_count, cells) = bfs_children(pager, root_id)?;
    for id in visited {
        if id != root_id {
            pager.free_page(id)?;
        }
    }
    let mut root = pager.read_page(root_id)?;
    root.reset(PageType::Leaf);
    pager.write_page(&root)?;

    let n = cells.len();
    for (key, value) in cells {
        insert(pager, root_id, &key, &value)?;
    }
    debug!("rebuilt tree rooted at {root_id}, re-inserted {n} rows");
    Ok(())
}
