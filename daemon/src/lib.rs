// Festa Daemon Library
// Exposes internal modules for integration testing

#[macro_use]
extern crate log;

pub mod config;
pub mod core;
pub mod jobs;
pub mod providers;
pub mod rpc;
