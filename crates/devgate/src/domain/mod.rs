//! Service-level domain types.
//!
//! Device entities live in `devgate_core::domain`; this module only holds
//! what the running gateway needs on top of them.

pub mod config;
