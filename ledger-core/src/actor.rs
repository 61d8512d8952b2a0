//! Single-writer actor for the journal
//!
//! All appends flow through one task, which assigns sequence numbers,
//! chains hashes, and signs entries. This removes write races entirely:
//! the total order of the journal is the order the actor processed
//! messages. Reads go straight to storage.

use crate::{
    crypto::KeyPair,
    types::{EntryDraft, EntryType, LedgerEntry},
    Error, Result, Storage,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the journal actor
pub enum JournalMessage {
    /// Append a batch of entries contiguously (a settlement's postings
    /// must not interleave with other writers)
    AppendBatch {
        drafts: Vec<EntryDraft>,
        response: oneshot::Sender<Result<Vec<LedgerEntry>>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that serializes all journal writes
pub struct JournalActor {
    storage: Arc<Storage>,
    mailbox: mpsc::Receiver<JournalMessage>,
    keypair: Arc<KeyPair>,

    /// Last assigned sequence number
    last_seq: u64,

    /// Chain hash of the last entry
    last_hash: [u8; 32],

    /// Shared watermark readers use for cache invalidation
    seq_watermark: Arc<AtomicU64>,
}

impl JournalActor {
    fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<JournalMessage>,
        keypair: Arc<KeyPair>,
        last_seq: u64,
        last_hash: [u8; 32],
        seq_watermark: Arc<AtomicU64>,
    ) -> Self {
        Self {
            storage,
            mailbox,
            keypair,
            last_seq,
            last_hash,
            seq_watermark,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                JournalMessage::AppendBatch { drafts, response } => {
                    let result = self.append_batch(drafts);
                    let _ = response.send(result);
                }
                JournalMessage::Shutdown => break,
            }
        }
    }

    fn append_batch(&mut self, drafts: Vec<EntryDraft>) -> Result<Vec<LedgerEntry>> {
        if drafts.is_empty() {
            return Err(Error::InvalidEntry("Empty batch".to_string()));
        }

        for draft in &drafts {
            self.validate_draft(draft)?;
        }

        let mut appended = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let entry = self.build_entry(draft);
            self.storage.append_entry(&entry)?;

            self.last_seq = entry.seq_no;
            self.last_hash = entry.chain_hash();
            self.seq_watermark.store(self.last_seq, Ordering::Release);

            appended.push(entry);
        }

        Ok(appended)
    }

    fn build_entry(&self, draft: EntryDraft) -> LedgerEntry {
        let mut entry = LedgerEntry {
            seq_no: self.last_seq + 1,
            entry_type: draft.entry_type,
            account: draft.account,
            amount: draft.amount,
            currency: draft.currency,
            reason: draft.reason,
            corrects_entry: draft.corrects_entry,
            origin: draft.origin,
            created_at: Utc::now(),
            prev_hash: self.last_hash,
            signature: crate::types::Signature::from_bytes([0u8; 64]),
        };
        entry.signature = self.keypair.sign(&entry.signable_bytes());
        entry
    }

    fn validate_draft(&self, draft: &EntryDraft) -> Result<()> {
        if draft.amount <= rust_decimal::Decimal::ZERO {
            return Err(Error::InvalidEntry("Amount must be positive".to_string()));
        }

        match (draft.entry_type, draft.corrects_entry) {
            (EntryType::Correction, None) => Err(Error::InvalidEntry(
                "Correction must reference an entry".to_string(),
            )),
            (EntryType::Correction, Some(seq)) => {
                let target = self.storage.get_entry(seq)?;
                if target.account != draft.account {
                    return Err(Error::InvalidEntry(format!(
                        "Correction account mismatch for seq {}",
                        seq
                    )));
                }
                if target.entry_type == EntryType::Correction {
                    return Err(Error::InvalidEntry(
                        "Cannot correct a correction".to_string(),
                    ));
                }
                Ok(())
            }
            (_, Some(_)) => Err(Error::InvalidEntry(
                "Only corrections may reference an entry".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct JournalHandle {
    sender: mpsc::Sender<JournalMessage>,
}

impl JournalHandle {
    /// Append a batch of entries, contiguously sequenced
    pub async fn append_batch(&self, drafts: Vec<EntryDraft>) -> Result<Vec<LedgerEntry>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(JournalMessage::AppendBatch {
                drafts,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(JournalMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the journal actor
pub fn spawn_journal_actor(
    storage: Arc<Storage>,
    keypair: Arc<KeyPair>,
    last_seq: u64,
    last_hash: [u8; 32],
    seq_watermark: Arc<AtomicU64>,
) -> JournalHandle {
    let (tx, rx) = mpsc::channel(1024); // Bounded channel for backpressure
    seq_watermark.store(last_seq, Ordering::Release);
    let actor = JournalActor::new(storage, rx, keypair, last_seq, last_hash, seq_watermark);

    tokio::spawn(async move {
        actor.run().await;
    });

    JournalHandle::new_internal(tx)
}

impl JournalHandle {
    fn new_internal(sender: mpsc::Sender<JournalMessage>) -> Self {
        Self { sender }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Currency, EntryReason};
    use crate::Config;
    use rust_decimal::Decimal;

    fn draft(account: &str, amount: Decimal) -> EntryDraft {
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

    #[tokio::test]
    async fn test_actor_assigns_contiguous_seq() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let watermark = Arc::new(AtomicU64::new(0));
        let handle = spawn_journal_actor(
            storage,
            Arc::new(KeyPair::generate()),
            0,
            [0u8; 32],
            watermark.clone(),
        );

        let entries = handle
            .append_batch(vec![
                draft("A", Decimal::new(1000, 2)),
                draft("B", Decimal::new(2000, 2)),
            ])
            .await
            .unwrap();

        assert_eq!(entries[0].seq_no, 1);
        assert_eq!(entries[1].seq_no, 2);
        assert_eq!(watermark.load(Ordering::Acquire), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_rejects_nonpositive_amount() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_journal_actor(
            storage,
            Arc::new(KeyPair::generate()),
            0,
            [0u8; 32],
            Arc::new(AtomicU64::new(0)),
        );

        let result = handle.append_batch(vec![draft("A", Decimal::ZERO)]).await;
        assert!(result.is_err());

        handle.shutdown().await.unwrap();
    }
}
