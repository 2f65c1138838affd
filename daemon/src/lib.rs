//! Game server lifecycle daemon.
//!
//! [`management::Orchestrator`] is the entry point for driving instances; the
//! `gsm-daemon` binary wires it up from [`config::AppConfig`] and runs its loops.

pub mod app;
pub mod config;
pub mod management;
pub mod storage;
pub mod utils;
