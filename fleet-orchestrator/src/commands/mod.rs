//! CLI command implementations.

pub mod run;
pub mod seed;
pub mod status;
