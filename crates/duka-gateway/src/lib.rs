//! HTTP edge wiring: webhook intake, the operator REST surface, health, and
//! the concrete gateway/rail bindings. The binary in `main.rs` assembles
//! these around the worker engine.

pub mod app;
pub mod auth;
pub mod gateway_client;
pub mod http;
pub mod rails;
