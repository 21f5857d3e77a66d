//! retrievalbot-core
//!
//! Retrieval testing for Filecoin storage providers: mirror the market's
//! deal set, sample deals into retrieval tasks, run them with protocol
//! workers and record the results.
//!
//! # Layout
//! - **domain**: deals, tasks, results, provider identity, task lifecycle
//! - **ports**: stores, queue, upstream lookups, protocol workers
//! - **impls**: in-memory stores, HTTP feed, Lotus and ipinfo clients, HTTP worker
//! - **mirror**: streaming snapshot ingestion (DealMirror)
//! - **resolver**: provider and location resolution with TTL caches
//! - **app**: scheduler, worker and reaper loops, standalone probes
//! - **config**: TOML settings with environment overrides

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod mirror;
pub mod periodic;
pub mod ports;
pub mod resolver;
