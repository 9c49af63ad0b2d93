//! Stability AI REST client.
//!
//! Provides [`api::StabilityApi`], a text-to-image client implementing
//! [`sdprompt_core::remote::ImageService`].

pub mod api;

pub use api::{StabilityApi, StabilityApiError};
