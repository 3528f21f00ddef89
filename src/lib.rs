//! Noteguard - API protection for note-service clients
//!
//! This crate guards traffic between an MCP server and a note-taking
//! service's local REST API. It provides a per-key fixed-window rate
//! limiter and a truncator that keeps responses under a model-token
//! budget. The two are independent; the application constructs both and
//! shares them with whatever needs them.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod tokens;
