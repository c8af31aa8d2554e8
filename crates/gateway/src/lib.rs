//! The thin HTTP front door.
//!
//! Owns routing, request validation, the API-key check, and JSON responses;
//! everything stateful happens behind the [`relaygram_session::SessionManager`]
//! boundary. Lifecycle:
//! 1. Build the webhook dispatcher
//! 2. Start the session manager (connect, authorize, listener)
//! 3. Bind and serve the router

pub mod auth;
pub mod server;
pub mod telemetry;

pub use server::{AppState, build_router, serve};
