//! `VentureChat` client core.
//!
//! Everything a frontend needs to drive a marketplace chat: conversation
//! state keyed by counterpart, presence and typing tracking, optimistic
//! sends reconciled against gateway delivery acks, and REST backfill of
//! history and contacts. The [`session::ChatSession`] coordinator ties the
//! pieces together over channels; the modules below it are independently
//! testable.

pub mod api;
pub mod config;
pub mod convo;
pub mod presence;
pub mod session;
pub mod transport;
pub mod typing;
