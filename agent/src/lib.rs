//! Site Agent Library
//!
//! Core modules for the single-host site provisioning and deploy agent.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod sites;
pub mod storage;
pub mod utils;
pub mod workers;
