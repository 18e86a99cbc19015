//! # Modelmux Gateway
//!
//! The thin management surface over a [`modelmux_core`] registry and
//! router: JSON-over-HTTP CRUD for provider configs, health and status
//! views, and routing control, all tenant-scoped.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use server::{create_router, AppState};
