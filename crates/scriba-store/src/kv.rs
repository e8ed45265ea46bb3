//! Byte-keyed, byte-valued on-disk map backed by redb.
//!
//! Each named map lives in its own directory holding a single database file,
//! so the presence of the directory doubles as the "already built" marker for
//! one-shot resource maps. Writers are serialized per commit by redb; readers
//! run against a consistent MVCC snapshot, which is what the parallel
//! workflow workers rely on.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::StoreError;

const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

pub struct KvStore {
    db: Database,
    dir: PathBuf,
}

impl KvStore {
    /// Open (creating if needed) the map stored under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join("store.redb"))?;
        // Create the table up front so reads on a fresh map succeed.
        let txn = db.begin_write()?;
        txn.open_table(KV_TABLE)?;
        txn.commit()?;
        Ok(Self {
            db,
            dir: dir.to_path_buf(),
        })
    }

    /// Directory this map lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomic single-key write, last write wins.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(KV_TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Write a batch of pairs in a single transaction. Used by the resource
    /// map builders, where a commit per key would be far too slow.
    pub fn put_all<I>(&self, items: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(KV_TABLE)?;
            for (key, value) in items {
                table.insert(key.as_slice(), value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(KV_TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    /// Number of keys in the map.
    pub fn count(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(KV_TABLE)?;
        Ok(table.len()?)
    }

    /// Ordered traversal over a consistent snapshot of the map.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(KV_TABLE)?;
        for item in table.iter()? {
            let (key, value) = item?;
            f(key.value(), value.value());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_count() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(&dir.path().join("m")).unwrap();

        assert_eq!(kv.count().unwrap(), 0);
        assert_eq!(kv.get(b"missing").unwrap(), None);

        kv.put(b"a", b"1").unwrap();
        kv.put(b"b", b"2").unwrap();
        kv.put(b"a", b"3").unwrap(); // overwrite, last write wins

        assert_eq!(kv.count().unwrap(), 2);
        assert_eq!(kv.get(b"a").unwrap().as_deref(), Some(&b"3"[..]));
        assert_eq!(kv.get(b"b").unwrap().as_deref(), Some(&b"2"[..]));
    }

    #[test]
    fn test_iteration_is_ordered_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(&dir.path().join("m")).unwrap();
        kv.put(b"c", b"3").unwrap();
        kv.put(b"a", b"1").unwrap();
        kv.put(b"b", b"2").unwrap();

        let mut first = Vec::new();
        kv.for_each(|k, _| first.push(k.to_vec())).unwrap();
        let mut second = Vec::new();
        kv.for_each(|k, _| second.push(k.to_vec())).unwrap();

        assert_eq!(first, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_reopen_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let map_dir = dir.path().join("m");
        {
            let kv = KvStore::open(&map_dir).unwrap();
            kv.put(b"key", b"value").unwrap();
        }
        let kv = KvStore::open(&map_dir).unwrap();
        assert_eq!(kv.get(b"key").unwrap().as_deref(), Some(&b"value"[..]));
    }
}
