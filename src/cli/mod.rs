//! CLI command implementations.

pub mod config;
pub mod parsers;
pub mod stop;
