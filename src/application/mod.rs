//! Application layer orchestrating locks, ledger and provider.
//!
//! `PaymentEngine` runs every state-changing operation inside a critical
//! section keyed by the transaction id, and calls the provider outside it.

pub mod engine;
