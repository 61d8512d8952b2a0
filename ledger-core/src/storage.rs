//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only journal (key: seq_no, big-endian)
//! - `account_idx` - Secondary index (key: account || 0x00 || seq_no)

use crate::{
    error::{Error, Result},
    types::{AccountId, LedgerEntry},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_ACCOUNT_IDX: &str = "account_idx";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for an append-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_IDX, Self::cf_options_idx()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened journal storage");

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_idx() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Append entry with account index (atomic)
    pub fn append_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let key = entry.seq_no.to_be_bytes();
        let value = bincode::serialize(entry)?;
        batch.put_cf(cf_entries, key, &value);

        let cf_idx = self.cf_handle(CF_ACCOUNT_IDX)?;
        let idx_key = Self::account_index_key(&entry.account, entry.seq_no);
        batch.put_cf(cf_idx, &idx_key, []);

        self.db.write(batch)?;

        tracing::debug!(
            seq_no = entry.seq_no,
            account = %entry.account,
            "Entry appended"
        );

        Ok(())
    }

    /// Get entry by sequence number
    pub fn get_entry(&self, seq_no: u64) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(cf, seq_no.to_be_bytes())?
            .ok_or(Error::EntryNotFound(seq_no))?;

        let entry: LedgerEntry = bincode::deserialize(&value)?;
        Ok(entry)
    }

    /// Get the most recently appended entry
    pub fn latest_entry(&self) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);

        match iter.next() {
            Some(item) => {
                let (_, value) = item?;
                let entry: LedgerEntry = bincode::deserialize(&value)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// All entries with seq_no strictly greater than `since`, ordered
    pub fn entries_since(&self, since: u64) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let start = (since + 1).to_be_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (_, value) = item?;
            let entry: LedgerEntry = bincode::deserialize(&value)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// All entries touching an account, in sequence order
    pub fn entries_for_account(&self, account: &AccountId) -> Result<Vec<LedgerEntry>> {
        let cf_idx = self.cf_handle(CF_ACCOUNT_IDX)?;

        let mut prefix = account.as_str().as_bytes().to_vec();
        prefix.push(0x00);

        let iter = self
            .db
            .iterator_cf(cf_idx, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let seq_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed account index key".to_string()))?;
            entries.push(self.get_entry(u64::from_be_bytes(seq_bytes))?);
        }

        Ok(entries)
    }

    fn account_index_key(account: &AccountId, seq_no: u64) -> Vec<u8> {
        let mut key = account.as_str().as_bytes().to_vec();
        key.push(0x00);
        key.extend_from_slice(&seq_no.to_be_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, EntryReason, EntryType, Signature};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_entry(seq_no: u64, account: &str) -> LedgerEntry {
        LedgerEntry {
            seq_no,
            entry_type: EntryType::Credit,
            account: AccountId::new(account),
            amount: Decimal::new(10000, 2),
            currency: Currency::USD,
            reason: EntryReason::SupplierPayout,
            corrects_entry: None,
            origin: None,
            created_at: Utc::now(),
            prev_hash: [0u8; 32],
            signature: Signature::from_bytes([0u8; 64]),
        }
    }

    #[test]
    fn test_append_and_get() {
        let (storage, _temp) = test_storage();

        let entry = test_entry(1, "SUP-001");
        storage.append_entry(&entry).unwrap();

        let retrieved = storage.get_entry(1).unwrap();
        assert_eq!(retrieved.seq_no, 1);
        assert_eq!(retrieved.account.as_str(), "SUP-001");
    }

    #[test]
    fn test_latest_entry() {
        let (storage, _temp) = test_storage();
        assert!(storage.latest_entry().unwrap().is_none());

        for seq in 1..=5 {
            storage.append_entry(&test_entry(seq, "SUP-001")).unwrap();
        }

        let latest = storage.latest_entry().unwrap().unwrap();
        assert_eq!(latest.seq_no, 5);
    }

    #[test]
    fn test_entries_since() {
        let (storage, _temp) = test_storage();

        for seq in 1..=10 {
            storage.append_entry(&test_entry(seq, "SUP-001")).unwrap();
        }

        let entries = storage.entries_since(7).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].seq_no, 8);
    }

    #[test]
    fn test_entries_for_account() {
        let (storage, _temp) = test_storage();

        storage.append_entry(&test_entry(1, "SUP-001")).unwrap();
        storage.append_entry(&test_entry(2, "BUY-001")).unwrap();
        storage.append_entry(&test_entry(3, "SUP-001")).unwrap();

        let entries = storage
            .entries_for_account(&AccountId::new("SUP-001"))
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.account.as_str() == "SUP-001"));
    }

    #[test]
    fn test_account_prefix_no_bleed() {
        let (storage, _temp) = test_storage();

        storage.append_entry(&test_entry(1, "SUP-1")).unwrap();
        storage.append_entry(&test_entry(2, "SUP-11")).unwrap();

        let entries = storage.entries_for_account(&AccountId::new("SUP-1")).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
