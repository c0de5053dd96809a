//! Core types and state machine for the floorsync relay.
//!
//! This crate is deliberately free of network and async dependencies. The
//! relay binary owns a single [`relay::RelayState`] and feeds it connection
//! lifecycle events and client intents; every call returns the
//! [`relay::Dispatch`]es the transport must deliver.

pub mod error;
pub mod identity;
pub mod mirror;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod room;

pub use error::{Error, Result};
pub use identity::{ConnectionId, Handshake, Role};
pub use relay::{Dispatch, RelayState};
pub use room::Room;
