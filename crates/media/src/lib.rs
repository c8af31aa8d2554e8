//! Signed media links and root-anchored media storage.
//!
//! Tokens are capabilities: tamper-evident, time-bound references handed to
//! untrusted clients in place of a direct path. The signer issues and
//! verifies them; the store maps verified relative paths back to files while
//! rejecting anything that escapes the media root.

pub mod error;
pub mod signer;
pub mod store;

pub use {
    error::{Error, Result},
    signer::{ExpiryPolicy, MediaClaims, MediaLinkSigner},
    store::MediaStore,
};
