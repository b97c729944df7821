//! Offline-first match-day core for grassroots football coaching.
//!
//! Every user action becomes an immutable event appended to a local,
//! durable oplog; a background sync engine reconciles the oplog with a
//! server endpoint under at-least-once delivery with id-based
//! deduplication. A drift-corrected match clock and a pure match state
//! machine keep live match state correct across reloads and crashes, and a
//! small suggestion engine proposes substitutions from accumulated playing
//! time.
//!
//! Layering, leaf-first: [`store`] is the only persistence boundary;
//! [`clock`] and [`state`] build match semantics on top of it; [`sync`]
//! drains the oplog toward [`server`], the reconciliation endpoint (run
//! embedded here, remote in production).

pub mod clock;
pub mod config;
pub mod dto;
pub mod error;
pub mod model;
pub mod roster;
pub mod server;
pub mod state;
pub mod store;
pub mod suggest;
pub mod sync;
