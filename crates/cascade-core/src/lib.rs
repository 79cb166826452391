//! # cascade-core
//!
//! Core abstractions for the Cascade streaming engine.
//!
//! This crate provides the foundational types and traits used across all
//! Cascade components:
//!
//! - **Block Model**: Block references, fork steps, and delivered block data
//! - **Cursors**: Opaque resumable stream positions
//! - **Storage Traits**: Abstract object-store interface for persisted state
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `cascade-core` is the only crate allowed to define shared primitives.
//! The store data model lives in `cascade-store` and the orchestration
//! domain in `cascade-flow`; both build exclusively on the contracts
//! defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod block;
pub mod cursor;
pub mod error;
pub mod observability;
pub mod storage;

pub use block::{Block, BlockData, BlockRef, Step};
pub use cursor::Cursor;
pub use error::{Error, Result};
pub use storage::{MemoryStore, ObjectMeta, ObjectStore};
