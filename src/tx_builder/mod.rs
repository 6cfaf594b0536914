//! Transaction building
//!
//! - **errors**: error taxonomy for building and first-party signing
//! - **instructions**: instruction planning and ordering validation
//! - **builder**: compiles an intent into an [`UnsignedTransaction`] with the
//!   sponsor as fee payer
//! - **freshness**: acquisition-stamped blockhashes and the guard that
//!   rebuilds a transaction whose reference has aged out
//!
//! Every build is a new value. A stale transaction is never patched with a
//! new blockhash; it is rebuilt from its intent and signed again.

pub mod errors;
pub use errors::BuildError;

mod builder;
mod freshness;
mod instructions;

pub use builder::{TransactionBuilder, UnsignedTransaction};
pub use freshness::{BlockhashFreshnessGuard, RecentBlockReference};
pub use instructions::{plan_transfer_instructions, sanity_check_ix_order, PlanContext};
