//! Domain logic for the prompt-to-image pipeline.
//!
//! Apart from the optional `http` response helpers, everything in this crate
//! is free of network I/O: configuration layers and
//! their resolution, the generation-spec schema, the artifact metadata
//! schema, the retry/backoff state machine, and the traits the remote
//! collaborators implement.

pub mod backoff;
pub mod config;
pub mod error;
pub mod hashing;
#[cfg(feature = "http")]
pub mod http;
pub mod record;
pub mod remote;
pub mod spec;
pub mod types;
