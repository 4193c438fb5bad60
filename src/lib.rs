//! window-relay: readiness-multiplexed receiver that streams every accepted
//! connection into its own file through fixed-capacity byte windows.

pub mod client;
pub mod config;
pub mod error;
pub mod runtime;
