//! Tool-calling bridge to a register-machine VM.
//!
//! The server side exposes the VM tools (`initialize_vm`, `execute_vm_step`,
//! `run_uor_program`, ...) over JSON-RPC 2.0 stdio transport, compatible with
//! any MCP-aware agent. The client side spawns such a server and calls its
//! tools with per-request timeouts.

pub mod audit;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod upstream;
