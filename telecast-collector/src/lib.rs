//! Telecast Collector - Service Assembly
//!
//! The binary half of the workspace: reads a TOML [`config::CollectorConfig`],
//! wires listeners, the intake queue, the pipeline and the outbound sinks
//! together ([`app::assemble`]), and supervises them with a [`runner::Runner`].
//!
//! A collector is expected to run as one of many identical instances behind a
//! load balancer or on a shared broker subscription, all writing to the same
//! snapshot directory. Nothing here coordinates instances; they meet only in
//! the store.
//!
//! ## Exit Status
//!
//! | Cause | Status |
//! |-------|--------|
//! | SIGINT / SIGTERM | 0 after draining |
//! | intake circuit breaker tripped | 1 after draining |
//! | listener bind or config failure | 1 |

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod runner;
pub mod tasks;

pub use app::{assemble, Collector};
pub use config::{CollectorConfig, ConfigError};
pub use runner::Runner;
