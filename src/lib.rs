//! Client SDK for driving two simulated VASP consoles side by side.
//!
//! The crate is organized by surface:
//! - `stream`: session-scoped websocket connections, event feeds, and the
//!   originator/beneficiary session.
//! - `dispatch`: transfer form validation and dispatch.
//! - `console`: per-institution log and ledger state.
//! - `lifecycle`: settlement correlation by transaction id.
//! - `directory`: REST listing of selectable institutions.
//! - `retry`: bounded retry used by the directory client.

/// Per-institution log console and transaction ledger.
pub mod console;
/// Institution directory client and listing types.
pub mod directory;
/// Transfer validation and dispatch.
pub mod dispatch;
/// Transfer progress tracking.
pub mod lifecycle;
/// Retry helpers for one-shot HTTP calls.
pub mod retry;
/// Realtime stream client, protocol types, and session orchestration.
pub mod stream;
