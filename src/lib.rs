//! # Shardload - load generation and verification for sharded PoS networks
//!
//! This library drives synthetic transaction load against a sharded
//! proof-of-stake network and verifies the results. Signing and key storage
//! belong to an external wallet CLI; chain state is read over per-shard
//! JSON-RPC endpoints. Both are opaque services reached over subprocess and
//! HTTP boundaries.
//!
//! ## Overview
//!
//! A run is described by one YAML configuration file. The toolkit then:
//!
//! - creates or imports wallet accounts and tracks them in a local registry
//! - distributes an initial balance to target accounts through transient
//!   middleman accounts, parallelized without nonce contention
//! - fires weighted cross-shard transfer load from a bounded pool of worker
//!   threads until stopped or a configured count is reached
//! - appends every attempt to a line-JSON transaction log
//! - replays that log and re-queries each hash to classify confirmed,
//!   unconfirmed, and failed-send transactions
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: type-safe configuration structures and YAML parsing
//! - `wallet`: typed client for the external wallet CLI
//! - `rpc`: blocking JSON-RPC client for node endpoints
//! - `pool`: bounded worker pool shared by all fan-out work
//! - `accounts`: local account registry and transfer manager
//! - `funding`: middleman fan-out funding orchestrator
//! - `generator`: transaction load generator
//! - `txlog`: append-only transaction log
//! - `monitor`: per-shard status polling loop
//! - `analysis`: log replay, network verification, and reports
//!
//! ## Concurrency model
//!
//! OS worker threads in one bounded pool; every wallet or RPC call is a
//! blocking call made from a worker thread. Shared state (registry, nonce
//! counters, generation budget) sits behind plain mutexes held only across
//! the read-modify-write itself, never across an external call.
//! Cancellation is cooperative: generator and monitor loops poll a shared
//! flag at iteration boundaries and in-flight calls run to their own
//! timeouts.
//!
//! ## Error handling
//!
//! Orchestration paths return `color_eyre::Result` with context; leaf
//! failures (wallet CLI, RPC, configuration) are typed `thiserror` enums.
//! Polling loops treat malformed responses as "no data" and keep running.

pub mod accounts;
pub mod analysis;
pub mod config;
pub mod funding;
pub mod generator;
pub mod monitor;
pub mod pool;
pub mod rpc;
pub mod txlog;
pub mod wallet;

#[cfg(test)]
pub(crate) mod test_support;
