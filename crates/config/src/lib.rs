//! Process configuration, read once at startup and immutable thereafter.

pub mod settings;

pub use settings::{Error, Settings};
