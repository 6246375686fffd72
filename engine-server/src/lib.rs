//! Perp-pilot engine server
//!
//! Consumes externally delivered trade signals and mirrors each one as a
//! reconciled position on a perpetual-futures venue: signal routing,
//! order placement with preflight checks, a user-data stream ingestor,
//! and periodic reconciliation loops over a SQLite store.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod fees;
pub mod ingestor;
pub mod models;
pub mod pricing;
pub mod router;
pub mod sync;

#[cfg(test)]
pub mod test_support;
