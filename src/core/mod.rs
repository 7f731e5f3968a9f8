//! Core deterministic primitives.
//!
//! Board dealing must be reproducible from a seed, so all randomness
//! flows through here.

pub mod rng;

// Re-export core types
pub use rng::{derive_session_seed, DeterministicRng};
