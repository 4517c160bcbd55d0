#![forbid(unsafe_code)]
//! quarry-core library.
//!
//! Shared data model, error taxonomy, engine configuration and the bounded
//! result cache used by `quarry-search`.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for internal plumbing; [`error::RetrievalError`]
//!   for the failures callers are allowed to see.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod cache;
pub mod config;
pub mod error;
pub mod model;

pub use error::{Backend, ErrorCode, RetrievalError};
pub use model::{Document, Metadata, RetrievalMethod, ScoredCandidate};
