//! MCP orchestrator: job lifecycle, handler dispatch, and artifact lineage.

pub mod api;
pub mod artifacts;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod jobs;
