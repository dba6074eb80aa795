//! CLI command implementations.

pub mod config;
pub mod doctor;
pub mod dump;
pub mod replay;
