//! Substrate - coordination for concurrent coding agents
//!
//! Exposes the substrate core as JSON-RPC methods, served over HTTP by
//! `substrate serve` or invoked one-shot with `substrate call`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod json;
pub mod rpc;
pub mod server;
