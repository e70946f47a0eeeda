//! # CDP Token Broker Library
//!
//! Obtains and caches the two chained tokens needed to talk to a customer
//! data platform (a primary token from a signed JWT bearer assertion, and a
//! downstream token exchanged from it) and relays queries with them.
//!
//! Modules:
//! - `config`: service configuration, loading and validation
//! - `signer`: signed identity assertions
//! - `sources`: outbound token exchanges
//! - `cache`: token records and the two-slot token cache
//! - `manager`: token lifecycle manager, the single entry point for tokens
//! - `query`: query relay and response normalisation
//! - `server`: HTTP API

pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod helpers;
pub mod manager;
pub mod observability;
pub mod query;
pub mod server;
pub mod signer;
pub mod sources;
pub mod utils;

#[cfg(test)]
pub mod tests;

pub use crate::config::service::ServiceConfig;
pub use crate::errors::{BrokerError, BrokerResult};
pub use crate::manager::lifecycle::TokenManager;
