//! Staff dashboard HTTP API.
//!
//! Public: `GET /healthz`. Everything else sits behind Basic auth (see [`auth`]).

mod accessibility;
pub mod auth;
mod routes;
pub mod types;

pub use routes::{build_router, serve, AppState};
