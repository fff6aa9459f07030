//! Core building blocks of the relist marketplace sync engine.
//!
//! This crate owns the session lifecycle for external marketplace accounts,
//! the concurrency- and rate-bounded task runner used for bulk pulls, the
//! TTL cache that memoizes expensive market analyses, and the credential
//! cipher. Persistence and the remote marketplace are collaborators behind
//! traits so runtimes can wire their own implementations.

pub mod cache;
pub mod clock;
pub mod errors;
pub mod runner;
pub mod secrets;
pub mod session;

pub use errors::{Error, Result};
