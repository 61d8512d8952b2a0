//! Core types for the settlement journal
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Tamper evidence (hash chaining + Ed25519 signatures)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Journal entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    /// Funds into an account
    Credit = 1,
    /// Funds out of an account
    Debit = 2,
    /// Reversal of an earlier entry; the original is never removed
    Correction = 3,
}

/// Why the entry was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryReason {
    /// Supplier paid in full at settlement
    SupplierPayout = 1,
    /// Buyer charged the quoted total cost
    BuyerCharge = 2,
    /// Capital provider's net position from advancing the payout
    CapitalAdvance = 3,
    /// Compensating reversal after a failed settlement
    Compensation = 4,
    /// Operator-initiated adjustment
    Adjustment = 5,
}

/// Fields an appender supplies; sequence, chaining, and signature are
/// assigned by the single writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDraft {
    /// Entry kind
    pub entry_type: EntryType,

    /// Account affected
    pub account: AccountId,

    /// Amount (always positive; direction comes from the entry type)
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Why this entry exists
    pub reason: EntryReason,

    /// For corrections: the sequence number being reversed
    pub corrects_entry: Option<u64>,

    /// Settlement (or other operation) that produced this entry
    pub origin: Option<uuid::Uuid>,
}

/// Immutable journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Monotonic sequence number (total order)
    pub seq_no: u64,

    /// Entry kind
    pub entry_type: EntryType,

    /// Account affected
    pub account: AccountId,

    /// Amount (always positive)
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Why this entry exists
    pub reason: EntryReason,

    /// For corrections: the sequence number being reversed
    pub corrects_entry: Option<u64>,

    /// Settlement that produced this entry
    pub origin: Option<uuid::Uuid>,

    /// Append timestamp
    pub created_at: DateTime<Utc>,

    /// SHA-256 of the previous entry's signed bytes (zeros for the genesis entry)
    pub prev_hash: [u8; 32],

    /// Ed25519 signature over the signable bytes
    pub signature: Signature,
}

impl LedgerEntry {
    /// Canonical bytes covered by the signature (everything except the
    /// signature itself).
    pub fn signable_bytes(&self) -> Vec<u8> {
        let preimage = (
            self.seq_no,
            self.entry_type,
            &self.account,
            self.amount,
            self.currency,
            self.reason,
            self.corrects_entry,
            self.origin,
            self.created_at.timestamp_nanos_opt().unwrap_or(0),
            self.prev_hash,
        );
        bincode::serialize(&preimage).expect("serialization cannot fail")
    }

    /// Hash linking this entry to its successor
    pub fn chain_hash(&self) -> [u8; 32] {
        let mut bytes = self.signable_bytes();
        bytes.extend_from_slice(self.signature.as_bytes());
        crate::crypto::hash_bytes(&bytes)
    }

    /// Signed balance effect of this entry, given the kind of the entry it
    /// corrects (corrections reverse their target).
    pub fn balance_effect(&self, corrected_type: Option<EntryType>) -> Decimal {
        match self.entry_type {
            EntryType::Credit => self.amount,
            EntryType::Debit => -self.amount,
            EntryType::Correction => match corrected_type {
                Some(EntryType::Credit) => -self.amount,
                Some(EntryType::Debit) => self.amount,
                _ => Decimal::ZERO,
            },
        }
    }
}

/// Ed25519 signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "serde_bytes")]
    bytes: [u8; 64],
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }

    /// Verify against a public key
    pub fn verify(&self, message: &[u8], public_key: &[u8; 32]) -> bool {
        use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};

        let signature = DalekSignature::from_bytes(&self.bytes);

        let verifying_key = match VerifyingKey::from_bytes(public_key) {
            Ok(key) => key,
            Err(_) => return false,
        };

        verifying_key.verify(message, &signature).is_ok()
    }
}

/// Result of a reconciliation sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Sum of credit-side effects
    pub total_credits: Decimal,

    /// Sum of debit-side effects
    pub total_debits: Decimal,

    /// Credit-side capital-advance portion, reported for visibility;
    /// not part of the credits-equal-debits arithmetic
    pub total_advances: Decimal,

    /// |credits - debits|
    pub imbalance: Decimal,

    /// Within the 0.01 tolerance
    pub balanced: bool,

    /// First sequence number covered
    pub from_seq: u64,

    /// Last sequence number covered
    pub to_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("USD"), Some(Currency::USD));
        assert_eq!(Currency::parse("EUR"), Some(Currency::EUR));
        assert_eq!(Currency::parse("XXX"), None);
    }

    fn entry(entry_type: EntryType, amount: Decimal, corrects: Option<u64>) -> LedgerEntry {
        LedgerEntry {
            seq_no: 1,
            entry_type,
            account: AccountId::new("ACC-1"),
            amount,
            currency: Currency::USD,
            reason: EntryReason::SupplierPayout,
            corrects_entry: corrects,
            origin: None,
            created_at: Utc::now(),
            prev_hash: [0u8; 32],
            signature: Signature::from_bytes([0u8; 64]),
        }
    }

    #[test]
    fn test_balance_effect_directions() {
        assert_eq!(
            entry(EntryType::Credit, dec!(100), None).balance_effect(None),
            dec!(100)
        );
        assert_eq!(
            entry(EntryType::Debit, dec!(100), None).balance_effect(None),
            dec!(-100)
        );
    }

    #[test]
    fn test_correction_reverses_target() {
        let correction = entry(EntryType::Correction, dec!(100), Some(7));
        assert_eq!(
            correction.balance_effect(Some(EntryType::Credit)),
            dec!(-100)
        );
        assert_eq!(correction.balance_effect(Some(EntryType::Debit)), dec!(100));
    }

    #[test]
    fn test_signable_bytes_deterministic() {
        let a = entry(EntryType::Credit, dec!(50), None);
        let mut b = a.clone();
        assert_eq!(a.signable_bytes(), b.signable_bytes());

        b.amount = dec!(51);
        assert_ne!(a.signable_bytes(), b.signable_bytes());
    }
}
