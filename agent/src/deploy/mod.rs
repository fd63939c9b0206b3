//! Deploy pipeline and its collaborators

pub mod fsm;
pub mod git;
pub mod locks;
pub mod pipeline;
pub mod service;
pub mod strategy;
