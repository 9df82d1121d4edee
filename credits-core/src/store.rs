//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only ledger entry log (key: entry_id)
//! - `accounts` - Account records (key: account_id)
//! - `account_entries` - Time-ordered index (key: account_id | created_at | entry_id)
//! - `idempotency` - Recently seen idempotency keys with their results
//!
//! This store is the only component that mutates persisted state. Every
//! mutation goes through [`TransactionStore::commit`], which applies a whole
//! [`WriteSet`] in a single RocksDB `WriteBatch`: partial writes are never
//! observable.

use crate::{
    error::{Error, Result},
    types::{Account, AccountId, LedgerEntry, TransferResult},
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_ACCOUNTS: &str = "accounts";
const CF_ACCOUNT_ENTRIES: &str = "account_entries";
const CF_IDEMPOTENCY: &str = "idempotency";

/// Index key separator; account ids must not contain it
const SEP: u8 = b'|';

/// Stored result of an idempotency-guarded operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Operation outcome to replay
    pub payload: IdempotencyPayload,

    /// When the key was first seen; records expire after the configured TTL
    pub created_at: DateTime<Utc>,
}

/// Replayable outcome per operation type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IdempotencyPayload {
    /// A credit append
    Credit {
        /// Created entry
        entry_id: Uuid,
    },
    /// A debit append
    Debit {
        /// Created entry
        entry_id: Uuid,
    },
    /// An executed transfer
    Transfer(TransferResult),
}

/// One atomic unit of persisted mutation
///
/// All entries, account updates, the optional `extended`-flag flip and the
/// optional idempotency record commit together or not at all.
#[derive(Debug, Default)]
pub struct WriteSet {
    /// New ledger entries to append
    pub entries: Vec<LedgerEntry>,

    /// Account records to upsert
    pub accounts: Vec<Account>,

    /// Credit entry whose `extended` flag flips false -> true
    pub mark_extended: Option<Uuid>,

    /// Idempotency record to store
    pub idempotency: Option<(String, IdempotencyRecord)>,
}

/// Storage wrapper for RocksDB
pub struct TransactionStore {
    db: DB,
}

impl TransactionStore {
    /// Open or create the database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy entry log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_accounts()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_ENTRIES, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_index()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened credits store");

        Ok(Self { db })
    }

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_accounts() -> Options {
        let mut opts = Options::default();
        // Accounts are frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Index key helpers

    fn index_key(account_id: &AccountId, entry: Option<&LedgerEntry>) -> Vec<u8> {
        let mut key = account_id.as_str().as_bytes().to_vec();
        key.push(SEP);
        if let Some(entry) = entry {
            // Micros since epoch, big-endian, so prefix scans come back
            // oldest-first
            let micros = entry.created_at.timestamp_micros();
            key.extend_from_slice(&(micros as u64).to_be_bytes());
            key.extend_from_slice(entry.entry_id.as_bytes());
        }
        key
    }

    // Write path

    /// Apply a write set atomically
    ///
    /// Aborts the whole batch on a duplicate entry id, a missing account, or
    /// an `extended` flag that is already set; nothing is persisted in that
    /// case.
    pub fn commit(&self, write_set: WriteSet) -> Result<()> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_index = self.cf_handle(CF_ACCOUNT_ENTRIES)?;
        let cf_idem = self.cf_handle(CF_IDEMPOTENCY)?;

        let mut batch = WriteBatch::default();

        for entry in &write_set.entries {
            if self.db.get_cf(cf_entries, entry.entry_id.as_bytes())?.is_some() {
                return Err(Error::DuplicateEntry(entry.entry_id.to_string()));
            }

            let account_in_set = write_set
                .accounts
                .iter()
                .any(|a| a.account_id == entry.account_id);
            if !account_in_set && self.get_account_opt(&entry.account_id)?.is_none() {
                return Err(Error::AccountNotFound(entry.account_id.to_string()));
            }

            let value = bincode::serialize(entry)?;
            batch.put_cf(cf_entries, entry.entry_id.as_bytes(), &value);
            batch.put_cf(cf_index, Self::index_key(&entry.account_id, Some(entry)), b"");
        }

        if let Some(entry_id) = write_set.mark_extended {
            let mut original = self.get_entry(entry_id)?;
            if original.extended {
                return Err(Error::AlreadyExtended(entry_id));
            }
            original.extended = true;
            let value = bincode::serialize(&original)?;
            batch.put_cf(cf_entries, original.entry_id.as_bytes(), &value);
        }

        for account in &write_set.accounts {
            let value = bincode::serialize(account)?;
            batch.put_cf(cf_accounts, account.account_id.as_str().as_bytes(), &value);
        }

        if let Some((key, record)) = &write_set.idempotency {
            let value = bincode::serialize(record)?;
            batch.put_cf(cf_idem, key.as_bytes(), &value);
        }

        self.db.write(batch)?;

        tracing::debug!(
            entries = write_set.entries.len(),
            accounts = write_set.accounts.len(),
            "Write set committed"
        );

        Ok(())
    }

    // Entry reads

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        let value = self
            .db
            .get_cf(cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;

        let entry: LedgerEntry = bincode::deserialize(&value)?;
        Ok(entry)
    }

    /// All entries of an account, ordered by `created_at` ascending
    pub fn entries_for(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        let cf_index = self.cf_handle(CF_ACCOUNT_ENTRIES)?;

        let prefix = Self::index_key(account_id, None);
        let iter = self
            .db
            .iterator_cf(cf_index, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            // entry_id is the trailing 16 bytes of the index key
            if key.len() >= 16 {
                let entry_id_bytes: [u8; 16] = key[key.len() - 16..].try_into().unwrap();
                entries.push(self.get_entry(Uuid::from_bytes(entry_id_bytes))?);
            }
        }

        Ok(entries)
    }

    // Account reads

    /// Get account by ID
    pub fn get_account(&self, account_id: &AccountId) -> Result<Account> {
        self.get_account_opt(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))
    }

    /// Get account by ID, `None` when absent
    pub fn get_account_opt(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        match self.db.get_cf(cf, account_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Page through accounts ordered by ID, starting after `start_after`.
    ///
    /// Restartable cursor surface for the background sweep, which processes
    /// accounts in small batches instead of holding the scan open.
    pub fn accounts_page(
        &self,
        start_after: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        let iter = match start_after {
            Some(id) => self.db.iterator_cf(
                cf,
                IteratorMode::From(id.as_str().as_bytes(), Direction::Forward),
            ),
            None => self.db.iterator_cf(cf, IteratorMode::Start),
        };

        let mut accounts = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if let Some(id) = start_after {
                if key.as_ref() == id.as_str().as_bytes() {
                    continue;
                }
            }
            accounts.push(bincode::deserialize::<Account>(&value)?);
            if accounts.len() >= limit {
                break;
            }
        }

        Ok(accounts)
    }

    // Idempotency

    /// Look up a stored idempotency record
    pub fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;

        match self.db.get_cf(cf, key.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete idempotency records older than the TTL; returns the purge count
    pub fn purge_idempotency(&self, now: DateTime<Utc>, ttl_secs: u64) -> Result<usize> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        let cutoff = now - chrono::Duration::seconds(ttl_secs as i64);

        let mut batch = WriteBatch::default();
        let mut purged = 0usize;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let record: IdempotencyRecord = bincode::deserialize(&value)?;
            if record.created_at < cutoff {
                batch.delete_cf(cf, key);
                purged += 1;
            }
        }

        if purged > 0 {
            self.db.write(batch)?;
            tracing::debug!(purged, "Purged expired idempotency records");
        }

        Ok(purged)
    }

    /// Approximate number of stored entries
    pub fn approximate_entries(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let count = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }
}
