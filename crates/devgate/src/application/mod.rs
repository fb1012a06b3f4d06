//! Application layer of the gateway.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure data and rules) and the infrastructure (sockets, processes, files).
//! Code here decides *what* happens and *when*; it reaches the outside world
//! only through traits, so every use case can be unit-tested with fakes.
//!
//! # Sub-modules
//!
//! - **`reconcile`**        – Pure set-difference plan for one cycle: which
//!   devices were added, removed, or retained.
//!
//! - **`device_registry`**  – The periodic reconciliation loop: starts and
//!   stops per-device proxies, refreshes metadata, and notifies the informer.
//!
//! - **`connection_pool`**  – Keyed cache of automation sessions with a
//!   single destroy-and-retry on failure.

pub mod connection_pool;
pub mod device_registry;
pub mod reconcile;
