//! # EchoTrace
//!
//! Hub and node services for the EchoTrace museum installation.
//!
//! This library provides:
//! - An MQTT hub that tracks which narrative fragments visitors have heard
//! - A staff dashboard (HTTP, Basic auth) for state and accessibility settings
//! - The per-object node service: proximity sensing, audio playback, config acks
//! - A small build-task runner mirroring the project's make targets
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────┐   trigger / health / ack    ┌──────────────────┐
//!   │  node (xN)   │ ──────────────────────────▶ │       hub        │
//!   │ sensor+audio │ ◀────────────────────────── │ narrative + push │
//!   └──────────────┘   config / state (MQTT)     └────────┬─────────┘
//!                                                         │ axum
//!                                                         ▼
//!                                                 staff dashboard
//! ```
//!
//! ## Modules
//! - `topics`: MQTT topic names
//! - `narrative`: fragment tracking and unlock
//! - `accessibility`: profile store and per-node payload derivation
//! - `hub`: hub-side message handling and config pushes
//! - `api`: dashboard routes
//! - `node`: node-side service and device seams
//! - `tasks`: build tasks

pub mod accessibility;
pub mod api;
pub mod config;
pub mod hub;
pub mod logging;
pub mod mqtt;
pub mod narrative;
pub mod node;
pub mod nodes;
pub mod shutdown;
pub mod tasks;
pub mod topics;

pub use config::{HubConfig, NodeConfig};
