//! Mercato Credits Ledger
//!
//! Append-only credit ledger for the marketplace's virtual currency.
//!
//! # Architecture
//!
//! - **Event sourcing**: every balance is derived from immutable ledger
//!   entries; corrections are new offsetting entries
//! - **Per-batch expiry**: each credited unit carries its own expiration
//!   date and is consumed FIFO
//! - **Account-scoped locking**: mutations serialize per account, transfers
//!   lock both accounts in id order
//! - **Reconciliation**: the denormalized balance is checked against the
//!   log on every mutation; a mismatch freezes the account
//!
//! # Invariants
//!
//! - Conservation: balances + fees + write-offs always equal injected
//!   credits minus spends
//! - Append-only: entries are never modified or deleted (the one-time
//!   `extended` flag flip excepted)
//! - Daily bonus: at most one grant per calendar day per account
//! - Transfer legs commit pairwise-atomically or not at all

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod balance;
pub mod bonus;
pub mod config;
pub mod error;
pub mod expiry;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod ratelimit;
pub mod store;
pub mod transfer;
pub mod types;

// Re-exports
pub use config::{Config, ConfigHandle};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use types::{
    Account, AccountId, ClaimResult, EntryKind, ExpiringCredit, ExpiringSummary, ExtensionResult,
    LedgerEntry, TransferResult,
};
