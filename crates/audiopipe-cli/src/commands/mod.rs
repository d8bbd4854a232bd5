//! CLI command implementations.

pub mod info;
pub mod process;
pub mod validate;
