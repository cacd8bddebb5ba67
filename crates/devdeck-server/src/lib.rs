//! # devdeck-server
//!
//! Supervises a set of user-declared local dev services (spawn, stop,
//! restart, capture output) and serves a browser dashboard that streams
//! their logs and status over a WebSocket.
//!
//! The [`Supervisor`] owns all process lifecycle state; the web layer is
//! plumbing around it.

pub mod supervisor;
pub mod web;
pub mod ws;

pub use supervisor::Supervisor;
