//! Ambient helpers shared by the broker crates: logging setup and runtime
//! directory checks.

pub mod env;
pub mod utils;
