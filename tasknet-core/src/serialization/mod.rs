//! Deterministic binary serialization for TaskNet wire messages.
//!
//! Control-stream envelopes and transport frames are encoded with bincode
//! using a fixed configuration, so both ends agree on the byte layout
//! regardless of platform.

mod wire;

pub use wire::{deserialize, serialize};
