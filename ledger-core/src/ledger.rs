//! Main journal orchestration layer
//!
//! Ties together storage, crypto, and the single-writer actor into a
//! high-level API. Balances are never stored: they are folds over the
//! entry stream, materialised in a cache that is invalidated by the
//! journal sequence number.

use crate::{
    actor::{spawn_journal_actor, JournalHandle},
    crypto::KeyPair,
    types::{
        AccountId, EntryDraft, EntryReason, EntryType, LedgerEntry, ReconcileReport,
    },
    Config, Error, Result, Storage,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Reconciliation tolerance: one cent
fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Main journal interface
pub struct Ledger {
    /// Actor handle for appends
    handle: JournalHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Signing key pair
    keypair: Arc<KeyPair>,

    /// Highest appended sequence number
    seq_watermark: Arc<AtomicU64>,

    /// Materialised balances: account -> (balance, as-of seq)
    balance_cache: RwLock<HashMap<AccountId, (Decimal, u64)>>,
}

impl Ledger {
    /// Open the journal, verify the full chain, and start the writer.
    ///
    /// Refuses to serve if any chain link or signature is broken.
    pub async fn open(config: Config, keypair: KeyPair) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let keypair = Arc::new(keypair);

        let (last_seq, last_hash) = Self::verify_chain_internal(&storage, &keypair)?;

        tracing::info!(last_seq, "Journal chain verified");

        let seq_watermark = Arc::new(AtomicU64::new(last_seq));
        let handle = spawn_journal_actor(
            storage.clone(),
            keypair.clone(),
            last_seq,
            last_hash,
            seq_watermark.clone(),
        );

        Ok(Self {
            handle,
            storage,
            keypair,
            seq_watermark,
            balance_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Append a single entry
    pub async fn append(&self, draft: EntryDraft) -> Result<LedgerEntry> {
        let mut entries = self.handle.append_batch(vec![draft]).await?;
        Ok(entries.remove(0))
    }

    /// Append several entries with contiguous sequence numbers
    pub async fn append_batch(&self, drafts: Vec<EntryDraft>) -> Result<Vec<LedgerEntry>> {
        self.handle.append_batch(drafts).await
    }

    /// Current balance of an account, derived from the entry stream.
    ///
    /// Cached per account; the cache is bypassed whenever the journal has
    /// advanced past the sequence number the cached fold observed.
    pub fn balance(&self, account: &AccountId) -> Result<Decimal> {
        let current_seq = self.seq_watermark.load(Ordering::Acquire);

        if let Some((balance, as_of)) = self.balance_cache.read().get(account) {
            if *as_of == current_seq {
                return Ok(*balance);
            }
        }

        let balance = self.fold_balance(account)?;
        self.balance_cache
            .write()
            .insert(account.clone(), (balance, current_seq));

        Ok(balance)
    }

    fn fold_balance(&self, account: &AccountId) -> Result<Decimal> {
        let entries = self.storage.entries_for_account(account)?;

        let mut seen: HashMap<u64, EntryType> = HashMap::new();
        let mut balance = Decimal::ZERO;

        for entry in &entries {
            let corrected = entry.corrects_entry.and_then(|seq| seen.get(&seq).copied());
            balance += entry.balance_effect(corrected);
            seen.insert(entry.seq_no, entry.entry_type);
        }

        Ok(balance)
    }

    /// Entries with seq_no strictly greater than `since`, in order
    pub fn stream(&self, since: u64) -> Result<Vec<LedgerEntry>> {
        self.storage.entries_since(since)
    }

    /// All entries for an account
    pub fn entries_for_account(&self, account: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.storage.entries_for_account(account)
    }

    /// Entry by sequence number
    pub fn get_entry(&self, seq_no: u64) -> Result<LedgerEntry> {
        self.storage.get_entry(seq_no)
    }

    /// Highest appended sequence number
    pub fn current_seq(&self) -> u64 {
        self.seq_watermark.load(Ordering::Acquire)
    }

    /// Signing public key (for external verification)
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    /// Reconcile the window starting after `since`.
    ///
    /// Credit effects must equal debit effects within one cent; the
    /// Credit-typed capital-advance entries are summed separately for
    /// reporting. An imbalance here is a system-level incident for the
    /// caller to escalate.
    pub fn reconcile(&self, since: u64) -> Result<ReconcileReport> {
        let entries = self.storage.entries_since(since)?;

        let mut seen: HashMap<u64, EntryType> = HashMap::new();
        let mut credits = Decimal::ZERO;
        let mut debits = Decimal::ZERO;
        let mut advances = Decimal::ZERO;
        let mut from_seq = 0u64;
        let mut to_seq = since;

        for entry in &entries {
            if from_seq == 0 {
                from_seq = entry.seq_no;
            }
            to_seq = entry.seq_no;

            let corrected = match entry.corrects_entry {
                Some(seq) => match seen.get(&seq).copied() {
                    Some(t) => Some(t),
                    // Correction target may predate the window
                    None => Some(self.storage.get_entry(seq)?.entry_type),
                },
                None => None,
            };

            let effect = entry.balance_effect(corrected);
            if effect >= Decimal::ZERO {
                credits += effect;
            } else {
                debits += -effect;
            }

            if entry.reason == EntryReason::CapitalAdvance {
                advances += entry.amount;
            }

            seen.insert(entry.seq_no, entry.entry_type);
        }

        let imbalance = (credits - debits).abs();
        let balanced = imbalance <= tolerance();

        if !balanced {
            tracing::error!(%imbalance, "Journal reconciliation imbalance");
        }

        Ok(ReconcileReport {
            total_credits: credits,
            total_debits: debits,
            total_advances: advances,
            imbalance,
            balanced,
            from_seq,
            to_seq,
        })
    }

    /// Walk the whole chain, verifying linkage and signatures.
    pub fn verify_chain(&self) -> Result<u64> {
        let (last_seq, _) = Self::verify_chain_internal(&self.storage, &self.keypair)?;
        Ok(last_seq)
    }

    fn verify_chain_internal(
        storage: &Storage,
        keypair: &KeyPair,
    ) -> Result<(u64, [u8; 32])> {
        let entries = storage.entries_since(0)?;

        let mut expected_seq = 1u64;
        let mut prev_hash = [0u8; 32];

        for entry in &entries {
            if entry.seq_no != expected_seq {
                return Err(Error::ChainCorrupted {
                    seq: entry.seq_no,
                    reason: format!("Expected seq {}", expected_seq),
                });
            }

            if entry.prev_hash != prev_hash {
                return Err(Error::ChainCorrupted {
                    seq: entry.seq_no,
                    reason: "prev_hash does not match predecessor".to_string(),
                });
            }

            if keypair.verify(&entry.signable_bytes(), &entry.signature).is_err() {
                return Err(Error::ChainCorrupted {
                    seq: entry.seq_no,
                    reason: "signature invalid".to_string(),
                });
            }

            prev_hash = entry.chain_hash();
            expected_seq += 1;
        }

        Ok((expected_seq - 1, prev_hash))
    }

    /// Shutdown journal
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use rust_decimal_macros::dec;

    async fn test_ledger() -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Ledger::open(config, KeyPair::generate()).await.unwrap();
        (ledger, temp_dir)
    }

    fn credit(account: &str, amount: Decimal) -> EntryDraft {
        EntryDraft {
            entry_type: EntryType::Credit,
            account: AccountId::new(account),
            amount,
            currency: Currency::USD,
            reason: EntryReason::SupplierPayout,
            corrects_entry: None,
            origin: None,
        }
    }

    fn debit(account: &str, amount: Decimal, reason: EntryReason) -> EntryDraft {
        EntryDraft {
            entry_type: EntryType::Debit,
            account: AccountId::new(account),
            amount,
            currency: Currency::USD,
            reason,
            corrects_entry: None,
            origin: None,
        }
    }

    #[tokio::test]
    async fn test_balance_fold() {
        let (ledger, _temp) = test_ledger().await;

        ledger.append(credit("SUP-001", dec!(500.00))).await.unwrap();
        ledger
            .append(debit("SUP-001", dec!(120.00), EntryReason::BuyerCharge))
            .await
            .unwrap();

        assert_eq!(
            ledger.balance(&AccountId::new("SUP-001")).unwrap(),
            dec!(380.00)
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_cache_invalidation() {
        let (ledger, _temp) = test_ledger().await;
        let account = AccountId::new("SUP-001");

        ledger.append(credit("SUP-001", dec!(100.00))).await.unwrap();
        assert_eq!(ledger.balance(&account).unwrap(), dec!(100.00));

        // Cache must not serve the stale fold after another append
        ledger.append(credit("SUP-001", dec!(50.00))).await.unwrap();
        assert_eq!(ledger.balance(&account).unwrap(), dec!(150.00));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_correction_restores_balance() {
        let (ledger, _temp) = test_ledger().await;
        let account = AccountId::new("BUY-001");

        let entry = ledger
            .append(debit("BUY-001", dec!(250.00), EntryReason::BuyerCharge))
            .await
            .unwrap();
        assert_eq!(ledger.balance(&account).unwrap(), dec!(-250.00));

        ledger
            .append(EntryDraft {
                entry_type: EntryType::Correction,
                account: account.clone(),
                amount: dec!(250.00),
                currency: Currency::USD,
                reason: EntryReason::Compensation,
                corrects_entry: Some(entry.seq_no),
                origin: None,
            })
            .await
            .unwrap();

        assert_eq!(ledger.balance(&account).unwrap(), dec!(0.00));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_balanced_settlement() {
        let (ledger, _temp) = test_ledger().await;

        // A settlement's three postings: payout, charge, provider position
        ledger
            .append_batch(vec![
                credit("SUP-001", dec!(50000.00)),
                debit("BUY-001", dec!(50246.58), EntryReason::BuyerCharge),
                EntryDraft {
                    entry_type: EntryType::Credit,
                    account: AccountId::new("CAP-001"),
                    amount: dec!(246.58),
                    currency: Currency::USD,
                    reason: EntryReason::CapitalAdvance,
                    corrects_entry: None,
                    origin: None,
                },
            ])
            .await
            .unwrap();

        let report = ledger.reconcile(0).unwrap();
        assert!(report.balanced);
        assert_eq!(report.total_credits, dec!(50246.58));
        assert_eq!(report.total_debits, dec!(50246.58));
        assert_eq!(report.total_advances, dec!(246.58));

        // Net effect across the three participants is zero
        let sup = ledger.balance(&AccountId::new("SUP-001")).unwrap();
        let buy = ledger.balance(&AccountId::new("BUY-001")).unwrap();
        let cap = ledger.balance(&AccountId::new("CAP-001")).unwrap();
        assert_eq!(sup + buy + cap, dec!(0.00));
        assert_eq!(cap, dec!(246.58));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_chain_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let keypair_seed = [7u8; 32];

        {
            let ledger = Ledger::open(config.clone(), KeyPair::from_seed(&keypair_seed))
                .await
                .unwrap();
            ledger.append(credit("SUP-001", dec!(100.00))).await.unwrap();
            ledger.append(credit("SUP-001", dec!(200.00))).await.unwrap();
            ledger.shutdown().await.unwrap();
        }

        let ledger = Ledger::open(config, KeyPair::from_seed(&keypair_seed))
            .await
            .unwrap();
        assert_eq!(ledger.current_seq(), 2);
        assert_eq!(
            ledger.balance(&AccountId::new("SUP-001")).unwrap(),
            dec!(300.00)
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_wrong_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let ledger = Ledger::open(config.clone(), KeyPair::from_seed(&[1u8; 32]))
                .await
                .unwrap();
            ledger.append(credit("SUP-001", dec!(100.00))).await.unwrap();
            ledger.shutdown().await.unwrap();
        }

        // A different key cannot verify the existing chain
        let result = Ledger::open(config, KeyPair::from_seed(&[2u8; 32])).await;
        assert!(matches!(result, Err(Error::ChainCorrupted { .. })));
    }
}
