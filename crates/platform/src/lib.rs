//! Capability seam for the remote messaging platform.
//!
//! The session core never talks to a concrete protocol implementation; it
//! depends on [`PlatformClient`], an injected capability covering entity
//! resolution, history fetch, single-message fetch, media download, and the
//! new-message subscription. Adapters live outside this workspace.

pub mod client;
pub mod error;
pub mod types;

pub use {
    client::PlatformClient,
    error::{Error, Result},
    types::{Entity, EntityRef, MediaKind, MediaRef, PlatformMessage},
};
