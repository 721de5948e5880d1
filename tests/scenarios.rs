//! End-to-end scenarios exercising the B+-tree through the pager, mirroring
//! the canonical fixtures used to validate the split/delete/iteration paths.

use rocketsql_storage::btree::{self};
use rocketsql_storage::codec::{decode_fields, encode_key, encode_value, FieldValue};
use rocketsql_storage::page::PageType;
use rocketsql_storage::pager::Pager;
use std::cmp::Ordering;

fn open_pager(page_size: usize) -> (tempfile::NamedTempFile, Pager) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let pager = Pager::open(tmp.path(), page_size).unwrap();
    (tmp, pager)
}

fn row_key(name: &str) -> Vec<u8> {
    encode_key(&[FieldValue::VarChar(name.to_string())])
}

fn row_value(name: &str, dept: &str, salary: i32) -> Vec<u8> {
    encode_value(&[
        FieldValue::VarChar(name.to_string()),
        FieldValue::VarChar(dept.to_string()),
        FieldValue::Int(salary),
    ])
}

const ROWS: &[(&str, &str, i32)] = &[
    ("Brandt", "Comp. Sci.", 92000),
    ("Califieri", "History", 60000),
    ("Einstein", "Physics", 95000),
    ("El Said", "History", 80000),
    ("Gold", "Physics", 87000),
    ("Katz", "Comp. Sci.", 75000),
    ("Mozart", "Music", 40000),
    ("Singh", "Finance", 80000),
    ("Srinivasan", "Comp. Sci.", 65000),
    ("Wu", "Finance", 90000),
    ("Crick", "Biology", 72000),
];

/// Walks every page of the tree and checks P1/P2/P4/P5/P6 in one pass;
/// returns the ordered keys found across all leaves for P3 comparison.
fn check_invariants(pager: &mut Pager, root_id: u32) -> Vec<Vec<u8>> {
    fn walk(
        pager: &mut Pager,
        id: u32,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        seen_leaf_keys: &mut Vec<Vec<u8>>,
    ) {
        let page = pager.read_page(id).unwrap();

        // P2: ascending slot order.
        for i in 1..page.num_cells() {
            assert_eq!(
                page.key_at_slot(i - 1).cmp(page.key_at_slot(i)),
                Ordering::Less,
                "page {id} slots not strictly ascending"
            );
        }

        // P5/P6: free list sorted, no two adjacent, every block >= 4 bytes.
        let blocks = page.free_blocks();
        for w in blocks.windows(2) {
            assert!(w[0].0 < w[1].0, "free list not sorted by offset");
            assert_ne!(
                w[0].0 + w[0].1,
                w[1].0,
                "adjacent free blocks should have been coalesced"
            );
        }
        for (_, size) in &blocks {
            assert!(*size >= 4, "free block smaller than 4 bytes");
        }

        if page.is_leaf() {
            for i in 0..page.num_cells() {
                let k = page.key_at_slot(i).to_vec();
                if let Some(lo) = lower {
                    assert_ne!(k.as_slice().cmp(lo), Ordering::Less);
                }
                if let Some(hi) = upper {
                    assert_eq!(k.as_slice().cmp(hi), Ordering::Less);
                }
                seen_leaf_keys.push(k);
            }
        } else {
            let mut prev_lower = lower.map(|s| s.to_vec());
            for i in 0..page.num_cells() {
                let sep = page.key_at_slot(i).to_vec();
                walk(
                    pager,
                    page.child_at_slot(i),
                    prev_lower.as_deref(),
                    Some(&sep),
                    seen_leaf_keys,
                );
                prev_lower = Some(sep);
            }
            if page.last_ptr() != 0 {
                walk(pager, page.last_ptr(), prev_lower.as_deref(), upper, seen_leaf_keys);
            }
        }
    }

    let mut keys = Vec::new();
    walk(pager, root_id, None, None, &mut keys);

    // P1: uniqueness across the whole table.
    let mut sorted = keys.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), keys.len(), "duplicate keys found across leaves");

    keys
}

fn iterate_all(pager: &mut Pager, root_id: u32) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut it = btree::first(pager, root_id).unwrap();
    while let Some(value) = it.next().unwrap() {
        out.push((it.key().unwrap().to_vec(), value));
    }
    out
}

#[test]
fn s1_textbook_insert_sequence_upholds_invariants_after_each_extra_row() {
    let (_tmp, mut pager) = open_pager(128);
    let root = btree::create(&mut pager).unwrap();

    for (name, dept, salary) in ROWS {
        btree::insert_with_cap(&mut pager, root, &row_key(name), &row_value(name, dept, *salary), Some(3)).unwrap();
    }

    let extra = [("Kim", "Elec. Eng.", 80000), ("Adams", "Music", 45000), ("Lamport", "History", 82000)];
    for (name, dept, salary) in extra {
        btree::insert_with_cap(&mut pager, root, &row_key(name), &row_value(name, dept, salary), Some(3)).unwrap();

        // P3: the sibling chain visits every leaf exactly once in ascending
        // order, and matches the tree-walk's own notion of leaf ordering.
        let walked = check_invariants(&mut pager, root);
        let mut chained = Vec::new();
        let mut leaf_id = leftmost_leaf(&mut pager, root);
        loop {
            let page = pager.read_page(leaf_id).unwrap();
            for i in 0..page.num_cells() {
                chained.push(page.key_at_slot(i).to_vec());
            }
            if page.last_ptr() == 0 {
                break;
            }
            leaf_id = page.last_ptr();
        }
        assert_eq!(chained, walked);
        for w in chained.windows(2) {
            assert_eq!(w[0].cmp(&w[1]), Ordering::Less);
        }
    }
}

fn leftmost_leaf(pager: &mut Pager, root_id: u32) -> u32 {
    let mut id = root_id;
    loop {
        let page = pager.read_page(id).unwrap();
        if page.is_leaf() {
            return id;
        }
        id = if page.num_cells() == 0 {
            page.last_ptr()
        } else {
            page.child_at_slot(0)
        };
    }
}

#[test]
fn s2_delete_then_reinsert_is_an_identity_on_the_key_value_set() {
    let (_tmp, mut pager) = open_pager(128);
    let root = btree::create(&mut pager).unwrap();

    let mut rows: Vec<(&str, &str, i32)> = ROWS.to_vec();
    rows.push(("Kim", "Comp. Sci.", 75000));

    for (name, dept, salary) in &rows {
        btree::insert_with_cap(&mut pager, root, &row_key(name), &row_value(name, dept, *salary), Some(3)).unwrap();
    }

    let mut before = iterate_all(&mut pager, root);
    before.sort();

    for (name, _, _) in &rows {
        btree::delete(&mut pager, root, &row_key(name)).unwrap();
    }
    for (name, dept, salary) in &rows {
        btree::insert_with_cap(&mut pager, root, &row_key(name), &row_value(name, dept, *salary), Some(3)).unwrap();
    }

    let mut after = iterate_all(&mut pager, root);
    after.sort();
    assert_eq!(before, after);
}

#[test]
fn s3_iterator_visits_every_key_exactly_once_in_ascending_order() {
    let (_tmp, mut pager) = open_pager(256);
    let root = btree::create(&mut pager).unwrap();
    for (name, dept, salary) in ROWS {
        btree::insert(&mut pager, root, &row_key(name), &row_value(name, dept, *salary)).unwrap();
    }

    let pairs = iterate_all(&mut pager, root);
    assert_eq!(pairs.len(), ROWS.len());
    for w in pairs.windows(2) {
        assert_eq!(w[0].0.cmp(&w[1].0), Ordering::Less);
    }

    let mut names: Vec<String> = pairs
        .iter()
        .map(|(_, v)| match decode_fields(v).remove(0) {
            FieldValue::VarChar(s) => s,
            _ => unreachable!(),
        })
        .collect();
    names.sort();
    let mut expected: Vec<String> = ROWS.iter().map(|(n, _, _)| n.to_string()).collect();
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn s4_duplicate_insert_is_rejected_and_leaves_tree_unchanged() {
    let (_tmp, mut pager) = open_pager(256);
    let root = btree::create(&mut pager).unwrap();
    btree::insert(&mut pager, root, &row_key("Brandt"), &row_value("Brandt", "Comp. Sci.", 92000)).unwrap();

    let before = pager.read_page(root).unwrap().serialize();
    let err = btree::insert(&mut pager, root, &row_key("Brandt"), &row_value("Brandt", "Other", 1)).unwrap_err();
    assert!(matches!(err, rocketsql_storage::StorageError::DuplicateKey));
    let after = pager.read_page(root).unwrap().serialize();
    assert_eq!(before, after);
}

#[test]
fn s5_oversized_cell_is_rejected_without_mutating_any_page() {
    let (_tmp, mut pager) = open_pager(128);
    let root = btree::create(&mut pager).unwrap();
    let huge_value = vec![b'x'; 10_000];

    let before = pager.read_page(root).unwrap().serialize();
    let err = btree::insert(&mut pager, root, &row_key("Brandt"), &huge_value).unwrap_err();
    assert!(matches!(
        err,
        rocketsql_storage::StorageError::CellTooLarge { .. }
    ));
    let after = pager.read_page(root).unwrap().serialize();
    assert_eq!(before, after, "rejected insert must not mutate the page");
    assert_eq!(pager.num_pages(), 1, "rejected insert must not allocate pages");
}

#[test]
fn s6_page_recycling_returns_the_freed_id_on_the_third_create() {
    let (_tmp, mut pager) = open_pager(512);
    let first_root = btree::create(&mut pager).unwrap();
    let _second_root = btree::create(&mut pager).unwrap();
    btree::delete_tree(&mut pager, first_root).unwrap();
    let third_root = pager.allocate_page(PageType::Leaf).unwrap();
    assert_eq!(third_root.id, first_root);
}
