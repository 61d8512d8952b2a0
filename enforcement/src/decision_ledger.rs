//! Signed, hash-chained audit log of every gate outcome
//!
//! Every invariant check, every status transition, and every settlement
//! outcome writes one record chained to the previous. Records are
//! write-only; a verifier can walk the chain and reproduce every hash.
//! Tamper detection is grounds for a system freeze.

use crate::{
    types::{EnforcementAction, InvariantId, Phase},
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{crypto::KeyPair, Signature};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// What the record attests to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordKind {
    /// One invariant evaluation
    InvariantCheck {
        invariant: String,
        phase: Phase,
    },
    /// An invoice status transition (attempted or applied)
    Transition {
        invoice_id: Uuid,
        from: String,
        to: String,
    },
    /// Terminal outcome of a settlement attempt
    SettlementOutcome {
        settlement_id: Uuid,
        invoice_id: Uuid,
        outcome: String,
    },
}

/// One immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Monotonic sequence number
    pub seq_no: u64,

    /// What is being attested
    pub kind: RecordKind,

    /// Did the gate pass
    pub passed: bool,

    /// Action instructed
    pub action: EnforcementAction,

    /// Free-form detail (failure reason, outcome description)
    pub detail: String,

    /// State snapshot at evaluation time
    pub snapshot: serde_json::Value,

    /// Who drove the operation
    pub actor: String,

    /// When the record was written
    pub recorded_at: DateTime<Utc>,

    /// SHA-256 of the previous record's signed bytes (zeros for the first)
    pub prev_hash: [u8; 32],

    /// Ed25519 signature over the signable bytes
    pub signature: Signature,
}

impl DecisionRecord {
    /// Bytes covered by the signature (canonical JSON of everything but
    /// the signature itself).
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Preimage<'a> {
            seq_no: u64,
            kind: &'a RecordKind,
            passed: bool,
            action: EnforcementAction,
            detail: &'a str,
            snapshot: &'a serde_json::Value,
            actor: &'a str,
            recorded_at: i64,
            prev_hash: &'a [u8; 32],
        }

        let preimage = Preimage {
            seq_no: self.seq_no,
            kind: &self.kind,
            passed: self.passed,
            action: self.action,
            detail: &self.detail,
            snapshot: &self.snapshot,
            actor: &self.actor,
            recorded_at: self.recorded_at.timestamp_nanos_opt().unwrap_or(0),
            prev_hash: &self.prev_hash,
        };

        Ok(serde_json::to_vec(&preimage)?)
    }

    /// Hash linking this record to its successor
    pub fn chain_hash(&self) -> Result<[u8; 32]> {
        let mut bytes = self.signable_bytes()?;
        bytes.extend_from_slice(self.signature.as_bytes());
        Ok(ledger_core::crypto::hash_bytes(&bytes))
    }
}

/// Append-only decision ledger
pub struct DecisionLedger {
    records: RwLock<Vec<DecisionRecord>>,
    keypair: Arc<KeyPair>,
}

impl DecisionLedger {
    /// Create an empty ledger signing with `keypair`
    pub fn new(keypair: Arc<KeyPair>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            keypair,
        }
    }

    /// Append one record; returns its sequence number
    pub fn record(
        &self,
        kind: RecordKind,
        passed: bool,
        action: EnforcementAction,
        detail: impl Into<String>,
        snapshot: serde_json::Value,
        actor: impl Into<String>,
    ) -> Result<u64> {
        let mut records = self.records.write();

        let (seq_no, prev_hash) = match records.last() {
            Some(prev) => (prev.seq_no + 1, prev.chain_hash()?),
            None => (1, [0u8; 32]),
        };

        let mut record = DecisionRecord {
            seq_no,
            kind,
            passed,
            action,
            detail: detail.into(),
            snapshot,
            actor: actor.into(),
            recorded_at: Utc::now(),
            prev_hash,
            signature: Signature::from_bytes([0u8; 64]),
        };
        record.signature = self.keypair.sign(&record.signable_bytes()?);

        tracing::debug!(
            seq_no,
            passed,
            detail = %record.detail,
            "Decision recorded"
        );

        records.push(record);
        Ok(seq_no)
    }

    /// Shorthand for an invariant-check record
    pub fn record_check(
        &self,
        invariant: &InvariantId,
        phase: Phase,
        passed: bool,
        action: EnforcementAction,
        detail: impl Into<String>,
        snapshot: serde_json::Value,
        actor: &str,
    ) -> Result<u64> {
        self.record(
            RecordKind::InvariantCheck {
                invariant: invariant.0.to_string(),
                phase,
            },
            passed,
            action,
            detail,
            snapshot,
            actor,
        )
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True if no records yet
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Copy of all records (for audit export)
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.read().clone()
    }

    /// Walk the chain, verifying linkage and every signature
    pub fn verify_chain(&self) -> Result<u64> {
        let records = self.records.read();
        let public_key = self.keypair.public_key();

        let mut prev_hash = [0u8; 32];
        let mut expected_seq = 1u64;

        for record in records.iter() {
            if record.seq_no != expected_seq {
                return Err(Error::LedgerCorrupted {
                    seq: record.seq_no,
                    reason: format!("Expected seq {}", expected_seq),
                });
            }

            if record.prev_hash != prev_hash {
                return Err(Error::LedgerCorrupted {
                    seq: record.seq_no,
                    reason: "prev_hash does not match predecessor".to_string(),
                });
            }

            let signable = record.signable_bytes()?;
            if !record.signature.verify(&signable, &public_key) {
                return Err(Error::LedgerCorrupted {
                    seq: record.seq_no,
                    reason: "signature invalid".to_string(),
                });
            }

            prev_hash = record.chain_hash()?;
            expected_seq += 1;
        }

        Ok(expected_seq - 1)
    }
}
