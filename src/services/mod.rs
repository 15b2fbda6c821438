//! Desktop runtime: link runners, transports and the HTTP API.
//!
//! This module connects the sans-IO sessions to real I/O:
//! - `runtime` feature: tokio UDP and serial transports, one runner task per
//!   link, and the shared station state
//! - `web` feature: Axum-based HTTP API with JSON endpoints
//!
//! All runners and services share one [`SharedPowerState`] wrapped in `Arc`.
//! Runners publish into it after every step; the HTTP API reads snapshots
//! out of it and sends commands through each runner's [`LinkHandle`].
//!
//! # Shared State Pattern
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_commandstation::services::{build_router, spawn_link, SharedPowerState, WebState};
//!
//! let shared = Arc::new(SharedPowerState::new());
//!
//! let mut handles = Vec::new();
//! for link in &config.links {
//!     let (handle, _task) = spawn_link(link, &config.limits, &config.capture, Arc::clone(&shared)).await?;
//!     handles.push(handle);
//! }
//!
//! let web = Arc::new(WebState::new(Arc::clone(&shared), handles));
//! let router = build_router(web, &web_config);
//! ```

pub mod runner;
pub mod shared;
pub mod transport;

// API types and HTTP server
#[cfg(feature = "web")]
pub mod api;

#[cfg(feature = "web")]
pub mod web;

// Re-exports
pub use runner::*;
pub use shared::*;
pub use transport::*;

#[cfg(feature = "web")]
pub use api::*;

#[cfg(feature = "web")]
pub use web::*;
