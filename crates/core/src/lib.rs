//! Shared types and primitives for the Easel generation client.
//!
//! Nothing in this crate talks to the network or knows about the job
//! engine; it holds the vocabulary the other crates share plus the
//! [`single_flight::SingleFlightCache`] coalescing primitive.

pub mod env;
pub mod error;
pub mod progress;
pub mod single_flight;
pub mod types;
