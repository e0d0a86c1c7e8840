//! Relay core library: live group fan-out, provider webhook ingestion, agent
//! replies, and the store behind them. Used by the `relay` CLI.

pub mod channels;
pub mod config;
pub mod error;
pub mod gateway;
pub mod init;
pub mod models;
pub mod store;
