//! C7: the key/value API exposed to whatever sits above the storage engine
//! (a SQL layer, in the system this was distilled from; a thin CLI here).
//! Bundles a pager with the bootstrapped schema table and table-name
//! lookups a caller needs to find a root id in the first place.

use crate::btree::{self, BTreeIterator};
use crate::codec::{decode_fields, encode_key, encode_value, FieldValue};
use crate::error::{Result, StorageError};
use crate::pager::Pager;
use log::info;
use std::path::Path;

/// The schema table's root page id never changes: it is always the first
/// page minted when a fresh database is opened.
pub const SCHEMA_ROOT: u32 = 1;

pub struct Database {
    pager: Pager,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let mut pager = Pager::open(path, page_size)?;
        if pager.num_pages() == 0 {
            let root = btree::create(&mut pager)?;
            assert_eq!(
                root, SCHEMA_ROOT,
                "the schema table must be the first page minted in a fresh database"
            );
            let key = encode_key(&[FieldValue::VarChar("schema".into())]);
            let value = schema_row("table", "schema", SCHEMA_ROOT);
            btree::insert(&mut pager, SCHEMA_ROOT, &key, &value)?;
            info!("bootstrapped schema table at page {SCHEMA_ROOT}");
        }
        Ok(Database { pager })
    }

    /// Allocates a new table root and records it in the schema table under
    /// `name`.
    pub fn create_table(&mut self, name: &str) -> Result<u32> {
        let root = btree::create(&mut self.pager)?;
        let key = encode_key(&[FieldValue::VarChar(name.into())]);
        let value = schema_row("table", name, root);
        btree::insert(&mut self.pager, SCHEMA_ROOT, &key, &value)?;
        info!("created table '{name}' with root page {root}");
        Ok(root)
    }

    /// Drops `name` from the schema table and frees every page of its tree.
    pub fn drop_table(&mut self, name: &str) -> Result<u64> {
        let root = self.table_root(name)?;
        let key = encode_key(&[FieldValue::VarChar(name.into())]);
        btree::delete(&mut self.pager, SCHEMA_ROOT, &key)?;
        btree::delete_tree(&mut self.pager, root)
    }

    pub fn table_root(&mut self, name: &str) -> Result<u32> {
        let key = encode_key(&[FieldValue::VarChar(name.into())]);
        let value = btree::get(&mut self.pager, SCHEMA_ROOT, &key)?;
        match decode_fields(&value).get(2) {
            Some(FieldValue::Int(id)) => Ok(*id as u32),
            _ => Err(StorageError::CorruptPage {
                page_id: SCHEMA_ROOT,
                reason: "schema row missing root page id".into(),
            }),
        }
    }

    pub fn table_names(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut it = btree::first(&mut self.pager, SCHEMA_ROOT)?;
        while let Some(value) = it.next()? {
            if let Some(FieldValue::VarChar(name)) = decode_fields(&value).get(1) {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    pub fn insert(&mut self, root_id: u32, key: &[u8], value: &[u8]) -> Result<()> {
        btree::insert(&mut self.pager, root_id, key, value)
    }

    pub fn get(&mut self, root_id: u32, key: &[u8]) -> Result<Vec<u8>> {
        btree::get(&mut self.pager, root_id, key)
    }

    pub fn delete(&mut self, root_id: u32, key: &[u8]) -> Result<()> {
        btree::delete(&mut self.pager, root_id, key)
    }

    pub fn first(&mut self, root_id: u32) -> Result<BTreeIterator<'_>> {
        btree::first(&mut self.pager, root_id)
    }

    pub fn delete_tree(&mut self, root_id: u32) -> Result<u64> {
        btree::delete_tree(&mut self.pager, root_id)
    }

    pub fn truncate_tree(&mut self, root_id: u32) -> Result<u64> {
        btree::truncate_tree(&mut self.pager, root_id)
    }

    pub fn rebuild_tree(&mut self, root_id: u32) -> Result<()> {
        btree::rebuild_tree(&mut self.pager, root_id)
    }

    pub fn close(self) -> Result<()> {
        self.pager.close()
    }
}

fn schema_row(kind: &str, name: &str, root: u32) -> Vec<u8> {
    encode_value(&[
        FieldValue::VarChar(kind.into()),
        FieldValue::VarChar(name.into()),
        FieldValue::Int(root as i32),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_bootstraps_schema_table() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut db = Database::open(tmp.path(), 512).unwrap();
        assert_eq!(db.table_names().unwrap(), vec!["schema".to_string()]);
    }

    #[test]
    fn create_table_is_discoverable_by_name() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut db = Database::open(tmp.path(), 512).unwrap();
        let root = db.create_table("students").unwrap();
        assert_eq!(db.table_root("students").unwrap(), root);
        assert!(db.table_names().unwrap().contains(&"students".to_string()));
    }

    #[test]
    fn drop_table_removes_schema_row_and_frees_tree() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut db = Database::open(tmp.path(), 512).unwrap();
        let root = db.create_table("temp").unwrap();
        let key = encode_key(&[FieldValue::Int(1)]);
        db.insert(root, &key, b"row").unwrap();
        db.drop_table("temp").unwrap();
        assert!(matches!(
            db.table_root("temp").unwrap_err(),
            StorageError::NotFound
        ));
    }

    #[test]
    fn reopening_existing_database_does_not_rebootstrap() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        {
            let mut db = Database::open(&path, 512).unwrap();
            db.create_table("students").unwrap();
            db.close().unwrap();
        }
        let mut db = Database::open(&path, 512).unwrap();
        assert!(db.table_names().unwrap().contains(&"students".to_string()));
        assert_eq!(db.table_names().unwrap().len(), 2);
    }
}
