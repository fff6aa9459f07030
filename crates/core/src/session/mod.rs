//! Marketplace session lifecycle: one persisted session per application user.

mod session_model;
mod session_service;

pub use session_model::*;
pub use session_service::*;
