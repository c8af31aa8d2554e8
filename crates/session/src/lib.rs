//! The session core: one authenticated platform connection, owned by a
//! background worker, with serialized request dispatch.
//!
//! External callers (the HTTP front door, the listener) interact through a
//! cloneable [`SessionManager`]; every remote sequence runs to completion on
//! the worker before the next one starts, because the remote protocol does
//! not tolerate concurrent in-flight calls on one connection.

pub mod enrich;
pub mod error;
pub mod manager;

pub use {
    error::{Error, Result},
    manager::{HealthSnapshot, SessionManager},
};
