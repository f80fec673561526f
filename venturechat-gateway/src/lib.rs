//! `VentureChat` gateway library.
//!
//! Exposes the gateway server for use in tests and embedding. The gateway
//! accepts WebSocket connections, registers users by role-tagged identity,
//! routes messages and typing signals between them, and serves the REST
//! history and contact endpoints.

pub mod config;
pub mod gateway;
pub mod store;
