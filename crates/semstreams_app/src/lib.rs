//! # semstreams_app
//!
//! The SemStreams daemon: configuration, worker pool, ingest and API loops,
//! and the wiring that turns the subsystem crates into one process. The
//! binary entry point lives in `main.rs`; everything here is also usable
//! embedded (tests run the full core on in-memory buckets).

pub mod api;
pub mod config;
pub mod core;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod rules_runtime;
pub mod worker;

pub use config::AppConfig;
pub use core::{Core, CoreBuckets};
pub use metrics::AppMetrics;
pub use pipeline::{EmbedWorker, Pipeline};
pub use worker::{DeadLetterSink, Job, WorkerPool};
