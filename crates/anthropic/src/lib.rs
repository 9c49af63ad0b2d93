//! Anthropic Messages API client.
//!
//! [`api::AnthropicApi`] issues one `POST /v1/messages` per call and
//! implements [`sdprompt_core::remote::SpecService`], so the pipeline can use
//! it to elaborate user prompts.

pub mod api;

pub use api::{AnthropicApi, AnthropicApiError};
