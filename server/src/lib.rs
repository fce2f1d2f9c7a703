//! TaskSync Server - Live task and log file synchronization hub.
//!
//! This crate keeps connected viewers in sync with two plain text files that
//! external processes rewrite at any time:
//! - `tasks.md`, holding the single current task
//! - `log.md`, an append-style activity log
//!
//! # Architecture
//!
//! File notifications flow from the [`watcher`] through the [`debounce`]
//! stage into the [`pipeline`], which uses the [`classifier`] to drop
//! duplicate notifications, the [`extract`] functions to turn content into
//! tasks and log entries, and the [`broadcast`] hub to fan results out.
//! Viewer requests arrive over WebSocket ([`routes`]) and go through the same
//! pipeline, so every mutation is serialized in one place.

pub mod broadcast;
pub mod classifier;
pub mod config;
pub mod debounce;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod tree;
pub mod types;
pub mod watcher;
