//! Order Orchestration Core HTTP API.
//!
//! Grounded on `gateway::lib`'s module layout, narrowed to what this
//! service needs: no `config`/`grpc_clients`/`rate_limiter`/`websocket`
//! modules, since there is one in-process core crate to call and no
//! per-client rate limiting in scope.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod server;

pub use server::{OrchestratorApiServer, print_routes};
