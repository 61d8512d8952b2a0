//! Account registry with credit reservations
//!
//! Balances are not stored here: they are derived from the journal. The
//! registry owns account status, KYC state, the cached credit limit, and
//! the reservation table that holds optimistic credit during settlement.

use crate::{
    types::{Account, AccountRole, AccountStatus, CreditLimit, CreditReservation, KycStatus},
    Error, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ledger_core::AccountId;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// External credit-bureau collaborator
#[async_trait]
pub trait CreditBureau: Send + Sync {
    /// Fetch the current approved limit for a buyer
    async fn fetch_limit(&self, account: &AccountId) -> Result<Decimal>;
}

/// Fixed-limit bureau for tests and local runs
pub struct StaticBureau {
    limits: DashMap<AccountId, Decimal>,
}

impl StaticBureau {
    /// Create with no limits on file
    pub fn new() -> Self {
        Self {
            limits: DashMap::new(),
        }
    }

    /// Set a limit
    pub fn set_limit(&self, account: AccountId, limit: Decimal) {
        self.limits.insert(account, limit);
    }
}

impl Default for StaticBureau {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CreditBureau for StaticBureau {
    async fn fetch_limit(&self, account: &AccountId) -> Result<Decimal> {
        self.limits
            .get(account)
            .map(|l| *l)
            .ok_or_else(|| Error::NoCreditLimit(account.to_string()))
    }
}

/// Account registry
pub struct AccountRegistry {
    accounts: DashMap<AccountId, Account>,
    reservations: DashMap<Uuid, CreditReservation>,
    bureau: Arc<dyn CreditBureau>,
    /// How long a cached limit may be trusted
    credit_limit_ttl: Duration,
}

impl AccountRegistry {
    /// Create a registry backed by the given bureau
    pub fn new(bureau: Arc<dyn CreditBureau>, credit_limit_ttl: Duration) -> Self {
        Self {
            accounts: DashMap::new(),
            reservations: DashMap::new(),
            bureau,
            credit_limit_ttl,
        }
    }

    /// Register a new account
    pub fn register(&self, account: Account) -> Result<()> {
        if self.accounts.contains_key(&account.id) {
            return Err(Error::AlreadyExists(account.id.to_string()));
        }

        tracing::info!(account = %account.id, role = ?account.role, "Account registered");
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    /// Fetch an account
    pub fn get(&self, id: &AccountId) -> Result<Account> {
        self.accounts
            .get(id)
            .map(|a| a.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Change lifecycle status
    pub fn set_status(&self, id: &AccountId, status: AccountStatus) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        tracing::info!(account = %id, from = %account.status, to = %status, "Account status changed");
        account.status = status;
        Ok(())
    }

    /// Change KYC state
    pub fn set_kyc(&self, id: &AccountId, kyc: KycStatus) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        account.kyc_status = kyc;
        if kyc == KycStatus::Verified {
            account.kyc_verified_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Require an active account, by role if given
    pub fn require_active(&self, id: &AccountId, role: Option<AccountRole>) -> Result<Account> {
        let account = self.get(id)?;

        if !account.is_active() {
            return Err(Error::NotActive {
                account: id.to_string(),
                status: account.status.to_string(),
            });
        }

        if let Some(expected) = role {
            if account.role != expected {
                return Err(Error::Other(format!(
                    "Account {} is not a {:?}",
                    id, expected
                )));
            }
        }

        Ok(account)
    }

    /// Sum of live reservations against a buyer
    pub fn outstanding(&self, buyer: &AccountId) -> Decimal {
        self.reservations
            .iter()
            .filter(|r| &r.buyer == buyer)
            .map(|r| r.amount)
            .sum()
    }

    /// Refresh the cached limit from the bureau if older than the TTL.
    /// Returns the limit in force and its fetch time.
    pub async fn refresh_credit_limit_if_stale(
        &self,
        buyer: &AccountId,
    ) -> Result<CreditLimit> {
        let cached = self.get(buyer)?.credit_limit;

        let stale = match &cached {
            Some(cl) => Utc::now() - cl.checked_at > self.credit_limit_ttl,
            None => true,
        };

        if !stale {
            return Ok(cached.unwrap_or(CreditLimit {
                limit: Decimal::ZERO,
                checked_at: Utc::now(),
            }));
        }

        let limit = self.bureau.fetch_limit(buyer).await?;
        let refreshed = CreditLimit {
            limit,
            checked_at: Utc::now(),
        };

        if let Some(mut account) = self.accounts.get_mut(buyer) {
            account.credit_limit = Some(refreshed.clone());
        }

        tracing::debug!(buyer = %buyer, %limit, "Credit limit refreshed from bureau");
        Ok(refreshed)
    }

    /// Take an optimistic hold against the buyer's limit.
    ///
    /// Re-fetches the limit if the cache is stale, then checks
    /// outstanding + requested against it.
    pub async fn reserve_credit(
        &self,
        buyer: &AccountId,
        amount: Decimal,
        settlement_id: Option<Uuid>,
    ) -> Result<CreditReservation> {
        self.require_active(buyer, Some(AccountRole::Buyer))?;

        let credit = self.refresh_credit_limit_if_stale(buyer).await?;
        let outstanding = self.outstanding(buyer);

        if outstanding + amount > credit.limit {
            return Err(Error::CreditExceeded {
                account: buyer.to_string(),
                outstanding: outstanding.to_string(),
                requested: amount.to_string(),
                limit: credit.limit.to_string(),
            });
        }

        let reservation = CreditReservation {
            id: Uuid::new_v4(),
            buyer: buyer.clone(),
            amount,
            settlement_id,
            created_at: Utc::now(),
        };

        self.reservations
            .insert(reservation.id, reservation.clone());

        tracing::debug!(
            buyer = %buyer,
            %amount,
            reservation = %reservation.id,
            "Credit reserved"
        );

        Ok(reservation)
    }

    /// Release a hold
    pub fn release_credit(&self, reservation_id: Uuid) -> Result<()> {
        self.reservations
            .remove(&reservation_id)
            .map(|_| ())
            .ok_or(Error::ReservationNotFound(reservation_id))
    }

    /// Release any holds taken for a settlement (compensation path and
    /// orphan resolution both land here).
    pub fn release_by_settlement(&self, settlement_id: Uuid) -> usize {
        let held: Vec<Uuid> = self
            .reservations
            .iter()
            .filter(|r| r.settlement_id == Some(settlement_id))
            .map(|r| r.id)
            .collect();

        for id in &held {
            self.reservations.remove(id);
        }

        held.len()
    }

    /// Release reservations older than `max_age`; returns how many.
    /// Called by the lifecycle scheduler's orphan sweep.
    pub fn release_orphan_reservations(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let orphans: Vec<Uuid> = self
            .reservations
            .iter()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id)
            .collect();

        for id in &orphans {
            self.reservations.remove(id);
            tracing::warn!(reservation = %id, "Released orphan credit reservation");
        }

        orphans.len()
    }

    /// Age of the cached limit, in seconds (i64::MAX when absent)
    pub fn credit_limit_age_s(&self, buyer: &AccountId, now: DateTime<Utc>) -> i64 {
        self.get(buyer)
            .ok()
            .and_then(|a| a.credit_limit)
            .map(|cl| (now - cl.checked_at).num_seconds())
            .unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(id: &str, role: AccountRole) -> Account {
        Account {
            id: AccountId::new(id),
            role,
            status: AccountStatus::Active,
            kyc_status: KycStatus::Verified,
            kyc_verified_at: Some(Utc::now()),
            credit_limit: None,
            signing_key: None,
            created_at: Utc::now(),
        }
    }

    fn registry_with_buyer(limit: Decimal) -> AccountRegistry {
        let bureau = Arc::new(StaticBureau::new());
        bureau.set_limit(AccountId::new("BUY-001"), limit);
        let registry = AccountRegistry::new(bureau, Duration::hours(1));
        registry
            .register(account("BUY-001", AccountRole::Buyer))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let registry = registry_with_buyer(dec!(100000));
        let buyer = AccountId::new("BUY-001");

        let reservation = registry
            .reserve_credit(&buyer, dec!(60000), None)
            .await
            .unwrap();
        assert_eq!(registry.outstanding(&buyer), dec!(60000));

        registry.release_credit(reservation.id).unwrap();
        assert_eq!(registry.outstanding(&buyer), dec!(0));
    }

    #[tokio::test]
    async fn test_reserve_over_limit_rejected() {
        let registry = registry_with_buyer(dec!(100000));
        let buyer = AccountId::new("BUY-001");

        registry
            .reserve_credit(&buyer, dec!(60000), None)
            .await
            .unwrap();

        let result = registry.reserve_credit(&buyer, dec!(50000), None).await;
        assert!(matches!(result, Err(Error::CreditExceeded { .. })));
    }

    #[tokio::test]
    async fn test_suspended_buyer_cannot_reserve() {
        let registry = registry_with_buyer(dec!(100000));
        let buyer = AccountId::new("BUY-001");
        registry
            .set_status(&buyer, AccountStatus::Suspended)
            .unwrap();

        let result = registry.reserve_credit(&buyer, dec!(1000), None).await;
        assert!(matches!(result, Err(Error::NotActive { .. })));
    }

    #[tokio::test]
    async fn test_orphan_sweep_releases_old_holds() {
        let registry = registry_with_buyer(dec!(100000));
        let buyer = AccountId::new("BUY-001");

        let reservation = registry
            .reserve_credit(&buyer, dec!(5000), None)
            .await
            .unwrap();

        // Age the reservation past the sweep cutoff
        registry
            .reservations
            .get_mut(&reservation.id)
            .unwrap()
            .created_at = Utc::now() - Duration::minutes(11);

        assert_eq!(registry.release_orphan_reservations(Duration::minutes(10)), 1);
        assert_eq!(registry.outstanding(&buyer), dec!(0));
    }

    #[tokio::test]
    async fn test_limit_refreshed_when_stale() {
        let bureau = Arc::new(StaticBureau::new());
        bureau.set_limit(AccountId::new("BUY-001"), dec!(75000));
        let registry = AccountRegistry::new(bureau.clone(), Duration::hours(1));

        let mut buyer = account("BUY-001", AccountRole::Buyer);
        buyer.credit_limit = Some(CreditLimit {
            limit: dec!(10000),
            checked_at: Utc::now() - Duration::hours(2),
        });
        registry.register(buyer).unwrap();

        let refreshed = registry
            .refresh_credit_limit_if_stale(&AccountId::new("BUY-001"))
            .await
            .unwrap();
        assert_eq!(refreshed.limit, dec!(75000));
    }
}
