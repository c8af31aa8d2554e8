//! Webhook delivery: header assembly and best-effort, fire-and-forget posts.
//!
//! Delivery runs on a dedicated worker task fed by an unbounded FIFO queue,
//! so a slow or unreachable endpoint never blocks the session gate. Failures
//! are logged and swallowed; nothing here is retried or surfaced to the
//! caller that triggered the fetch.

pub mod dispatcher;
pub mod headers;

pub use {dispatcher::WebhookDispatcher, headers::HeaderBuilder};
