//! TaskNet node library.
//!
//! This library provides the components for building and running a TaskNet
//! node. It is used by the `tasknet-node` binary and can also be used for
//! testing and embedding.

pub mod cli;
pub mod config;
pub mod node;
pub mod shutdown;
