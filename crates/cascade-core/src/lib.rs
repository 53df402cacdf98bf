//! Cascade core: transport-agnostic tunnel envelopes, media tag codec, and errors.
//!
//! This crate defines the wire-level contracts shared by both roles of a
//! cascade node (subordinate and superior): the sequence-numbered envelope
//! carried on a registration tunnel, and the tagged media frames carried on a
//! relay connection. It carries no transport or runtime dependencies so the
//! codecs can be exercised in isolation.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `CascadeError`/`Result` so a malformed
//! envelope or truncated tag never takes a node down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod media;
pub mod protocol;

/// Shared result type.
pub use error::{CascadeError, Result};
