//! # cascade-flow
//!
//! The orchestration and execution domain of the Cascade streaming
//! engine.
//!
//! A client request names output modules from a declared module graph
//! and a block range. This crate:
//!
//! - validates the manifest into a [`graph::ModuleGraph`] with
//!   deterministic module hashes and a topological execution order
//! - resolves the request, its cursor, and a live-head probe into a
//!   [`resolver::RequestDetails`] plan
//! - back-processes missing store history through the
//!   [`orchestrator`]'s bounded worker pool
//! - drives blocks through the [`pipeline`], emitting one response
//!   envelope per block in strict block order
//!
//! The WASM module runtime, the block source, the remote worker
//! transport, and the gRPC surface are external collaborators behind
//! the [`pipeline::ModuleExecutor`], [`pipeline::BlockSource`],
//! [`orchestrator::Worker`], and [`response::ResponseSink`] traits.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub(crate) mod dag;

pub mod config;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod request;
pub mod resolver;
pub mod response;
pub mod service;

pub use config::RuntimeConfig;
pub use error::{Code, Error, Result, Status};
pub use graph::{Module, ModuleGraph, ModuleInput, ModuleKind, StoreAccessMode};
pub use orchestrator::{Orchestrator, StoreCoverage, WorkUnit, Worker};
pub use pipeline::{BlockSource, ExecutionInputs, ModuleExecutor, Pipeline, VecBlockSource};
pub use request::{Metadata, Request};
pub use resolver::RequestDetails;
pub use response::{ModuleOutput, ModuleProgress, OutputData, Response, ResponseSink, VecSink};
pub use service::Service;
