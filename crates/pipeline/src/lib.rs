//! Generation orchestration pipeline.
//!
//! Sequences prompt elaboration ([`spec_client`]), rendering with retries
//! ([`render_client`], [`retry`]), bounded fan-out across the requested
//! images ([`fanout`]) and verified persistence ([`store`]). The
//! [`orchestrator`] ties them together for fresh runs and replays.
//!
//! The pipeline only knows the collaborator traits from
//! [`sdprompt_core::remote`]; concrete clients are supplied by the caller.

pub mod error;
pub mod fanout;
pub mod orchestrator;
pub mod render_client;
pub mod retry;
pub mod spec_client;
pub mod store;
pub mod template;

pub use error::PipelineError;
pub use orchestrator::{Orchestrator, RunOptions, RunOutcome, RunReport, RunStatus, SpecSource};
