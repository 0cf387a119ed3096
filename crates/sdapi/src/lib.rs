//! REST client library for a local Stable-Diffusion-WebUI style server.
//!
//! Provides typed wire messages, an HTTP API wrapper with bounded
//! timeouts and cooperative cancellation, a coalescing catalog of the
//! server's model/sampler/scheduler/upscaler names, and a readiness wait
//! loop used at startup.

pub mod api;
pub mod catalog;
pub mod config;
pub mod messages;
pub mod readiness;
