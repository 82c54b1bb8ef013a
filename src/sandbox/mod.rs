//! Sandbox module containing all execution-related components.

pub mod bridge;
pub mod cache;
pub mod capability;
pub mod config;
pub mod executor;
pub mod io;
pub mod isolate;
pub mod limits;
