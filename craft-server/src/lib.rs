//! Infini-Craft server
//!
//! This crate wraps the `infini_craft` service with:
//! - The HTTP API (`/add`, `/split`, `/health`, `/stats`)
//! - The `craft` CLI, its file configuration and logging setup

pub mod api;
pub mod cli;

/// Current version of the server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
