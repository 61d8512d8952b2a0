//! # accounts
//!
//! Account registry for the settlement network: lifecycle status, KYC
//! state, credit limits with staleness, optimistic credit reservations,
//! and sanctions screening. Balances live in the journal, not here.

pub mod error;
pub mod registry;
pub mod sanctions;
pub mod types;

pub use error::{Error, Result};
pub use registry::{AccountRegistry, CreditBureau, StaticBureau};
pub use sanctions::{SanctionsFeed, SanctionsScreen, StaticFeed};
pub use types::{
    Account, AccountRole, AccountStatus, CreditLimit, CreditReservation, KycStatus,
};
