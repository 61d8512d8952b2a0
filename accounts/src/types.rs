//! Account entities

use chrono::{DateTime, Utc};
use ledger_core::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What the account does on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountRole {
    /// Issues invoices and receives instant payment
    Supplier,
    /// Accepts invoices and pays on terms
    Buyer,
    /// Advances working capital against accepted invoices
    CapitalProvider,
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Active,
    Suspended,
    Frozen,
    Closed,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// KYC verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KycStatus {
    Pending,
    InReview,
    Verified,
    Rejected,
    Expired,
}

/// Cached credit limit with its fetch time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLimit {
    /// Approved limit
    pub limit: Decimal,
    /// When the bureau last confirmed it
    pub checked_at: DateTime<Utc>,
}

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Identifier
    pub id: AccountId,
    /// Network role
    pub role: AccountRole,
    /// Lifecycle status
    pub status: AccountStatus,
    /// KYC state
    pub kyc_status: KycStatus,
    /// When KYC was last verified
    pub kyc_verified_at: Option<DateTime<Utc>>,
    /// Cached credit limit (buyers only)
    pub credit_limit: Option<CreditLimit>,
    /// Ed25519 public key acceptances are signed with
    pub signing_key: Option<[u8; 32]>,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Active accounts may participate in settlement legs
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// KYC must be verified at admission and at the post barrier
    pub fn is_kyc_verified(&self) -> bool {
        self.kyc_status == KycStatus::Verified
    }
}

/// Optimistic hold against a buyer's credit limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditReservation {
    /// Reservation id
    pub id: Uuid,
    /// Buyer the hold applies to
    pub buyer: AccountId,
    /// Held amount
    pub amount: Decimal,
    /// Settlement that requested the hold
    pub settlement_id: Option<Uuid>,
    /// When the hold was taken
    pub created_at: DateTime<Utc>,
}
