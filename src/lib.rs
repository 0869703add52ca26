// ABOUTME: Library root for jumpgate - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod credentials;
pub mod error;
pub mod server;
pub mod ssh;
pub mod types;
