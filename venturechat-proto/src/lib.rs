//! Shared protocol definitions for the `VentureChat` wire format.

pub mod event;
pub mod identity;
pub mod record;
